mod abandon;
mod check;
mod route;
mod run;
mod show;

pub use abandon::AbandonCommand;
pub use check::CheckConfigCommand;
pub use route::RouteCommand;
pub use run::RunCommand;
pub use show::ShowCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// BSSH fastq copy workflow runner.
#[derive(Parser)]
#[command(name = "bssh-copy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, default_value = "bssh-copy.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Process events from a file or stdin.
    Run(RunCommand),

    /// Show which stage an event would invoke.
    Route(RouteCommand),

    /// Move a run to FAILED by hand.
    Abandon(AbandonCommand),

    /// Print a stored run.
    Show(ShowCommand),

    /// Load and validate the configuration.
    CheckConfig(CheckConfigCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(cmd) => cmd.execute(&self.config).await,
            Commands::Route(cmd) => cmd.execute(&self.config).await,
            Commands::Abandon(cmd) => cmd.execute(&self.config).await,
            Commands::Show(cmd) => cmd.execute(&self.config).await,
            Commands::CheckConfig(cmd) => cmd.execute(&self.config).await,
        }
    }
}
