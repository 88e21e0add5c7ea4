//! Sample enrollment.

use clap::Args;

use autograph_cli::print_success;
use autograph_signature::CaptureMetadata;

use super::{get_context, open_service, output, read_sample, session};
use crate::Cli;

/// Enroll one or more signature images for an identity.
///
/// Accepted formats are PNG, JPEG and WebP; the type is taken from the file
/// extension and checked against the content.
#[derive(Args)]
pub struct EnrollCommand {
    /// Identity (student) id
    identity: String,

    /// Image files
    #[arg(required = true)]
    files: Vec<String>,

    /// Capture device
    #[arg(long)]
    device: Option<String>,

    /// Capture screen resolution, e.g. 1920x1080
    #[arg(long)]
    resolution: Option<String>,

    /// Capture timezone
    #[arg(long)]
    timezone: Option<String>,
}

impl EnrollCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let ctx = get_context(cli)?;
        let service = open_service(&ctx)?;
        let session = session();

        let capture = CaptureMetadata {
            device: self.device.clone().unwrap_or_default(),
            screen_resolution: self.resolution.clone().unwrap_or_default(),
            timezone: self.timezone.clone().unwrap_or_default(),
        };

        let mut enrolled = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let sample = read_sample(file)?.with_capture(capture.clone());
            let stored = service
                .enroll(&session, &self.identity, sample)
                .await
                .map_err(|e| anyhow::anyhow!("{}: {}", file, e))?;
            enrolled.push(stored);
        }

        print_success(&format!(
            "Enrolled {} sample(s) for \"{}\"",
            enrolled.len(),
            self.identity
        ));
        output(cli).write(&enrolled)
    }
}
