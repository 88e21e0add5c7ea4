//! Configuration management commands.

use clap::{Args, Subcommand};

use autograph_cli::{Context as CliContext, mask_api_key, print_success};

use super::{get_config, output, verify_mode};
use crate::Cli;

/// Manage CLI configuration.
///
/// Contexts allow you to manage multiple deployments (backend URL, data
/// directory, thresholds), similar to kubectl's context management.
///
/// Configuration is stored in ~/.autograph/config.yaml
#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Subcommand)]
enum ConfigSubcommand {
    /// Add (or replace) a context
    Add {
        /// Context name
        name: String,
        /// Recognition backend base URL (omit for gallery-only operation)
        #[arg(long)]
        base_url: Option<String>,
        /// Backend API key
        #[arg(long)]
        api_key: Option<String>,
        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Maximum retries
        #[arg(long)]
        max_retries: Option<u32>,
        /// Directory for samples and profiles
        #[arg(long)]
        data_dir: Option<String>,
        /// Default acceptance threshold (0-1)
        #[arg(long)]
        threshold: Option<f32>,
        /// Maximum sample size in bytes
        #[arg(long)]
        max_sample_bytes: Option<u64>,
        /// Verification mode: auto, backend or gallery
        #[arg(long)]
        mode: Option<String>,
    },
    /// Set the current context
    Use {
        /// Context name
        name: String,
    },
    /// List all contexts
    #[command(alias = "ls")]
    List,
    /// Show a context (default: current)
    Show {
        /// Context name
        name: Option<String>,
    },
    /// Delete a context
    Delete {
        /// Context name
        name: String,
    },
}

impl ConfigCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.command {
            ConfigSubcommand::Add {
                name,
                base_url,
                api_key,
                timeout,
                max_retries,
                data_dir,
                threshold,
                max_sample_bytes,
                mode,
            } => {
                if let Some(t) = threshold {
                    if !(0.0..=1.0).contains(t) {
                        anyhow::bail!("threshold {} outside [0, 1]", t);
                    }
                }
                let ctx = CliContext {
                    base_url: base_url.clone().unwrap_or_default(),
                    api_key: api_key.clone().unwrap_or_default(),
                    timeout: timeout.unwrap_or(0),
                    max_retries: *max_retries,
                    data_dir: data_dir.clone().unwrap_or_default(),
                    threshold: *threshold,
                    max_sample_bytes: *max_sample_bytes,
                    mode: mode.clone().unwrap_or_default(),
                    ..Default::default()
                };
                verify_mode(&ctx)?;

                let mut cfg = get_config(cli)?;
                cfg.add_context(name, ctx)?;
                print_success(&format!("Context \"{}\" added", name));
                Ok(())
            }

            ConfigSubcommand::Use { name } => {
                let mut cfg = get_config(cli)?;
                cfg.use_context(name)?;
                print_success(&format!("Switched to context \"{}\"", name));
                Ok(())
            }

            ConfigSubcommand::List => {
                let cfg = get_config(cli)?;
                if cfg.contexts.is_empty() {
                    println!("No contexts configured");
                    return Ok(());
                }

                println!("{:<8} {:<20} {:<30} {}", "CURRENT", "NAME", "BASE_URL", "MODE");
                for (name, ctx) in &cfg.contexts {
                    let current = if name == &cfg.current_context { "*" } else { "" };
                    let base_url = if ctx.base_url.is_empty() {
                        "(offline)"
                    } else {
                        &ctx.base_url
                    };
                    let mode = if ctx.mode.is_empty() { "auto" } else { &ctx.mode };
                    println!("{:<8} {:<20} {:<30} {}", current, name, base_url, mode);
                }
                Ok(())
            }

            ConfigSubcommand::Show { name } => {
                let cfg = get_config(cli)?;
                let name = name.as_deref().or(cli.context.as_deref());
                let Some(ctx) = cfg.resolve_context(name) else {
                    anyhow::bail!("no such context; see 'autograph config list'");
                };
                let mut shown = ctx.clone();
                shown.api_key = mask_api_key(&shown.api_key);
                if shown.data_dir.is_empty() {
                    shown.data_dir = ctx.data_dir()?.display().to_string();
                }
                output(cli).write(&shown)
            }

            ConfigSubcommand::Delete { name } => {
                let mut cfg = get_config(cli)?;
                cfg.delete_context(name)?;
                print_success(&format!("Context \"{}\" deleted", name));
                Ok(())
            }
        }
    }
}
