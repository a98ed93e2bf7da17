use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use bssh_copy_core::event::EventEnvelope;
use bssh_copy_core::router::EventRouter;
use bssh_copy_runtime::{ChannelPublisher, Dispatcher, FanoutPublisher, NdjsonPublisher};

use crate::wiring;

/// Process newline-delimited JSON events.
#[derive(Parser)]
pub struct RunCommand {
    /// Events file, or `-` for stdin.
    #[arg(short, long, default_value = "-")]
    pub events: String,

    /// Maximum number of stage invocations in flight.
    #[arg(long, default_value_t = 8)]
    pub max_concurrent: usize,
}

impl RunCommand {
    pub async fn execute(self, config_path: &str) -> Result<()> {
        let config = Arc::new(wiring::load_config(config_path)?);
        wiring::init_logging(&config.logging);

        eprintln!();
        eprintln!(
            "  {} v{}  {}",
            style("bssh-copy").bold().cyan(),
            env!("CARGO_PKG_VERSION"),
            style(format!("{}@{}", config.workflow.name, config.workflow.version)).dim()
        );
        eprintln!();

        let (channel, loopback) = ChannelPublisher::new();
        let publisher = FanoutPublisher::new()
            .with(Arc::new(NdjsonPublisher::stdout()))
            .with(Arc::new(channel));
        let machine = wiring::state_machine(config.clone(), Arc::new(publisher)).await?;
        let dispatcher = Arc::new(Dispatcher::new(
            EventRouter::from_config(&config),
            Arc::new(machine),
            self.max_concurrent,
        ));

        let reader = open_events(&self.events).await?;
        let (tx, rx) = mpsc::channel(self.max_concurrent.max(1) * 4);
        let feeder = tokio::spawn(read_events(reader, tx));

        let signals = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received shutdown signal");
                    dispatcher.shutdown();
                }
            })
        };

        let summary = dispatcher.run(rx, loopback).await?;
        signals.abort();
        feeder.abort();

        eprintln!();
        eprintln!(
            "  {} {} received, {} looped back, {} handled, {} dropped, {} failed",
            style("✓").green(),
            summary.received,
            summary.looped_back,
            summary.handled,
            summary.dropped,
            summary.failed
        );

        if summary.failed > 0 {
            anyhow::bail!("{} event(s) failed; see the log for details", summary.failed);
        }
        Ok(())
    }
}

async fn open_events(path: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if path == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open events file {}", path))?;
    Ok(Box::new(file))
}

/// Forward parsed envelopes until the input ends. Unparseable lines are
/// logged and skipped.
async fn read_events<R>(reader: R, tx: mpsc::Sender<EventEnvelope>) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut forwarded = 0;
    let mut line_no = 0usize;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read events");
                break;
            }
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match EventEnvelope::from_json(&line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            Err(e) => tracing::warn!(line = line_no, error = %e, "Skipping unparseable event"),
        }
    }
    forwarded
}
