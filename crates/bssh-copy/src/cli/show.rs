use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use bssh_copy_runtime::NdjsonPublisher;

use crate::wiring;

/// Print a stored run as JSON.
#[derive(Parser)]
pub struct ShowCommand {
    /// Portal run id of the run.
    pub portal_run_id: String,
}

impl ShowCommand {
    pub async fn execute(self, config_path: &str) -> Result<()> {
        let config = Arc::new(wiring::load_config(config_path)?);
        wiring::init_logging(&config.logging);

        let machine = wiring::state_machine(config, Arc::new(NdjsonPublisher::stdout())).await?;
        let view = machine.runs().view(&self.portal_run_id).await?;
        println!("{}", serde_json::to_string_pretty(&view)?);
        Ok(())
    }
}
