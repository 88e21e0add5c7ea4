//! autograph - signature enrollment and verification from the command line.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    ConfigCommand, EnrollCommand, GalleryCommand, HealthCommand, ProfileCommand, TrainCommand,
    VerifyCommand,
};

/// autograph - signature enrollment and verification.
///
/// Samples and training profiles are kept in the context's data directory;
/// training and backend verification go to the recognition service named by
/// the context's base URL. Without a base URL every verification runs
/// against the enrolled gallery.
///
/// Configuration is stored in ~/.autograph/config.yaml and supports multiple
/// contexts, similar to kubectl's context management.
#[derive(Parser)]
#[command(name = "autograph")]
#[command(about = "Signature enrollment and verification")]
#[command(version)]
pub struct Cli {
    /// Config file (default is ~/.autograph/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Context name to use
    #[arg(short = 'c', long, global = true)]
    pub context: Option<String>,

    /// Output file (default: stdout)
    #[arg(short = 'o', long, global = true)]
    pub output: Option<String>,

    /// Output as JSON (for piping)
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage CLI configuration
    Config(ConfigCommand),
    /// Enroll signature samples for an identity
    Enroll(EnrollCommand),
    /// Inspect an identity's gallery
    Gallery(GalleryCommand),
    /// Train the backend model for an identity
    Train(TrainCommand),
    /// Show or adjust an identity's training profile
    Profile(ProfileCommand),
    /// Verify a signature against an identity
    Verify(VerifyCommand),
    /// Check the recognition backend
    Health(HealthCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Config(cmd) => cmd.run(&cli).await,
        Commands::Enroll(cmd) => cmd.run(&cli).await,
        Commands::Gallery(cmd) => cmd.run(&cli).await,
        Commands::Train(cmd) => cmd.run(&cli).await,
        Commands::Profile(cmd) => cmd.run(&cli).await,
        Commands::Verify(cmd) => cmd.run(&cli).await,
        Commands::Health(cmd) => cmd.run(&cli).await,
    }
}
