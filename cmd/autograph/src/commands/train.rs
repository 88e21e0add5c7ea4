//! Training and profile commands.

use clap::Args;

use autograph_cli::{print_success, print_warning};
use autograph_signature::{TrainingProfile, TrainingStatus};

use super::{get_context, open_service, output, session};
use crate::Cli;

/// Train the backend model for an identity.
///
/// Fails immediately if a training request for the identity is already in
/// flight. Interrupting with Ctrl-C records the attempt as cancelled.
#[derive(Args)]
pub struct TrainCommand {
    /// Identity (student) id
    identity: String,
}

impl TrainCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let ctx = get_context(cli)?;
        let service = open_service(&ctx)?;

        let session = session();
        let profile = tokio::select! {
            profile = service.train(&session, &self.identity) => profile?,
            _ = tokio::signal::ctrl_c() => {
                print_warning(&format!("Training \"{}\" cancelled", self.identity));
                anyhow::bail!("interrupted");
            }
        };
        report(&profile);
        output(cli).write(&profile)
    }
}

/// Show an identity's training profile, or override its threshold.
#[derive(Args)]
pub struct ProfileCommand {
    /// Identity (student) id
    identity: String,

    /// Set the acceptance threshold (0-1)
    #[arg(long)]
    threshold: Option<f32>,
}

impl ProfileCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let ctx = get_context(cli)?;
        let service = open_service(&ctx)?;
        let session = session();

        if let Some(threshold) = self.threshold {
            let profile = service.set_threshold(&session, &self.identity, threshold)?;
            print_success(&format!(
                "Threshold of \"{}\" set to {:.2}",
                self.identity, threshold
            ));
            return output(cli).write(&profile);
        }

        match service.profile(&session, &self.identity)? {
            Some(profile) => output(cli).write(&profile),
            None => anyhow::bail!("no profile for \"{}\"; enroll a sample first", self.identity),
        }
    }
}

fn report(profile: &TrainingProfile) {
    match profile.status {
        TrainingStatus::Ready => print_success(&format!(
            "Trained \"{}\" on {} sample(s)",
            profile.identity_id, profile.sample_count
        )),
        _ => print_warning(&format!(
            "Training \"{}\" failed: {}",
            profile.identity_id,
            profile.error_message.as_deref().unwrap_or("unknown error")
        )),
    }
}
