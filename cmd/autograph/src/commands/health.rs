use clap::Args;

use autograph_recognition::Recognizer;

use super::{create_recognizer, get_context, output};
use crate::Cli;

/// Check whether the recognition backend is reachable and healthy.
#[derive(Args)]
pub struct HealthCommand {}

impl HealthCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let ctx = get_context(cli)?;
        let health = create_recognizer(&ctx)?.health().await;
        output(cli).write(&health)?;
        if !health.healthy {
            anyhow::bail!("backend is not healthy");
        }
        Ok(())
    }
}
