//! Gallery inspection.

use clap::{Args, Subcommand};

use autograph_cli::print_success;

use super::{get_context, open_service, output, session};
use crate::Cli;

/// Inspect an identity's gallery.
#[derive(Args)]
pub struct GalleryCommand {
    #[command(subcommand)]
    command: GallerySubcommand,
}

#[derive(Subcommand)]
enum GallerySubcommand {
    /// List samples, newest first
    #[command(alias = "ls")]
    List {
        /// Identity (student) id
        identity: String,
    },
    /// Show or set the primary sample
    Primary {
        /// Identity (student) id
        identity: String,
        /// Sample id to designate as primary
        #[arg(long)]
        set: Option<String>,
    },
}

impl GalleryCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let ctx = get_context(cli)?;
        let service = open_service(&ctx)?;
        let session = session();

        match &self.command {
            GallerySubcommand::List { identity } => {
                let samples = service.list(&session, identity).await?;
                output(cli).write(&samples)
            }
            GallerySubcommand::Primary { identity, set } => {
                if let Some(sample_id) = set {
                    let sample = service.set_primary(&session, identity, sample_id).await?;
                    print_success(&format!("Primary sample of \"{}\" set", identity));
                    return output(cli).write(&sample);
                }
                match service.primary(&session, identity).await? {
                    Some(sample) => output(cli).write(&sample),
                    None => anyhow::bail!("no samples enrolled for \"{}\"", identity),
                }
            }
        }
    }
}
