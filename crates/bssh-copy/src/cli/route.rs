use anyhow::{Context, Result};
use clap::Parser;
use console::style;

use bssh_copy_core::config::CopyConfig;
use bssh_copy_core::event::EventEnvelope;
use bssh_copy_core::router::{EventRouter, Route};

use crate::wiring;

/// Show which stage an event would invoke, without running it.
#[derive(Parser)]
pub struct RouteCommand {
    /// File holding one event envelope as JSON.
    #[arg(short, long)]
    pub event: String,
}

impl RouteCommand {
    pub async fn execute(self, config_path: &str) -> Result<()> {
        let config = wiring::load_config(config_path)?;
        let text = tokio::fs::read_to_string(&self.event)
            .await
            .with_context(|| format!("Failed to read event file {}", self.event))?;
        println!("{}", describe(&config, &text)?);
        Ok(())
    }
}

/// One line naming the stage and what it would act on.
fn describe(config: &CopyConfig, text: &str) -> Result<String> {
    let event = EventEnvelope::from_json(text.trim())?;
    let router = EventRouter::from_config(config);

    let Some(route) = router.route(&event)? else {
        return Ok(format!(
            "{} no rule matches source={} detail-type={}",
            style("-").dim(),
            event.source,
            event.detail_type
        ));
    };

    let subject = match &route {
        Route::DraftCreation(trigger) => format!(
            "instrumentRunId={} projectId={} analysisId={}",
            trigger.instrument_run_id, trigger.project_id, trigger.analysis_id
        ),
        Route::Validation(change) | Route::Execution(change) => {
            format!("portalRunId={}", change.portal_run_id)
        }
        Route::CopyCompletion(sync) => format!(
            "destinationUri={} status={}",
            sync.payload.destination_uri, sync.status
        ),
    };
    Ok(format!("{} {} {}", style("→").green(), style(route.stage()).bold(), subject))
}
