use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use console::style;

use bssh_copy_runtime::{NdjsonPublisher, StageOutcome};

use crate::wiring;

/// Move a non-terminal run to FAILED and publish the terminal event.
#[derive(Parser)]
pub struct AbandonCommand {
    /// Portal run id of the run to abandon.
    pub portal_run_id: String,

    /// Recorded as the failure message.
    #[arg(short, long)]
    pub reason: String,
}

impl AbandonCommand {
    pub async fn execute(self, config_path: &str) -> Result<()> {
        let config = Arc::new(wiring::load_config(config_path)?);
        wiring::init_logging(&config.logging);

        let machine = wiring::state_machine(config, Arc::new(NdjsonPublisher::stdout())).await?;
        match machine.abandon(&self.portal_run_id, &self.reason).await? {
            StageOutcome::Published { status, .. } => {
                eprintln!(
                    "  {} {} is now {}",
                    style("✓").green(),
                    self.portal_run_id,
                    style(status).bold()
                );
            }
            other => {
                eprintln!("  {} {}", style("-").dim(), other);
            }
        }
        Ok(())
    }
}
