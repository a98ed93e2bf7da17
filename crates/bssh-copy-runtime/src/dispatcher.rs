//! In-process event loop.
//!
//! Inbound events and the system's own published events both pass through
//! the router. Each routed event runs as its own task, bounded by a
//! semaphore; the loop ends when the inbound stream is closed and no work
//! is left in flight or looped back.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use bssh_copy_core::error::{CopyError, Result};
use bssh_copy_core::event::EventEnvelope;
use bssh_copy_core::router::EventRouter;

use crate::workflow::{StageOutcome, WorkflowStateMachine};

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Events taken from the inbound stream.
    pub received: u64,
    /// Self-published events routed back in.
    pub looped_back: u64,
    /// Events that ran a stage to an outcome.
    pub handled: u64,
    /// Events no rule matched.
    pub dropped: u64,
    /// Events whose stage returned an error.
    pub failed: u64,
}

impl DispatchSummary {
    fn record(&mut self, result: &Result<Option<StageOutcome>>) {
        match result {
            Ok(Some(_)) => self.handled += 1,
            Ok(None) => self.dropped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Routes events to the state machine.
pub struct Dispatcher {
    router: EventRouter,
    machine: Arc<WorkflowStateMachine>,
    max_concurrent: usize,
    shutdown_tx: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(router: EventRouter, machine: Arc<WorkflowStateMachine>, max_concurrent: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            router,
            machine,
            max_concurrent: max_concurrent.max(1),
            shutdown_tx,
        }
    }

    /// Route one event and run its stage. Unmatched events yield `None`.
    pub async fn dispatch(&self, event: EventEnvelope) -> Result<Option<StageOutcome>> {
        dispatch_one(&self.router, &self.machine, event).await
    }

    /// Process `inbound` and `loopback` until both are drained.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<EventEnvelope>,
        mut loopback: mpsc::UnboundedReceiver<EventEnvelope>,
    ) -> Result<DispatchSummary> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<Result<Option<StageOutcome>>> = JoinSet::new();
        let mut summary = DispatchSummary::default();
        let mut inbound_open = true;

        tracing::info!(max_concurrent = self.max_concurrent, "Event loop started");

        loop {
            if !inbound_open && tasks.is_empty() && loopback.is_empty() {
                break;
            }
            if *shutdown_rx.borrow_and_update() {
                tracing::info!(in_flight = tasks.len(), "Event loop shutting down");
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::info!(in_flight = tasks.len(), "Event loop shutting down");
                    break;
                }
                Some(event) = loopback.recv() => {
                    summary.looped_back += 1;
                    self.spawn(&mut tasks, &semaphore, event).await?;
                }
                event = inbound.recv(), if inbound_open => match event {
                    Some(event) => {
                        summary.received += 1;
                        self.spawn(&mut tasks, &semaphore, event).await?;
                    }
                    None => {
                        tracing::debug!("Inbound stream closed");
                        inbound_open = false;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    record_joined(&mut summary, joined);
                }
                else => break,
            }
        }

        // Let in-flight stages finish; they hold no locks across events.
        while let Some(joined) = tasks.join_next().await {
            record_joined(&mut summary, joined);
        }

        tracing::info!(
            received = summary.received,
            looped_back = summary.looped_back,
            handled = summary.handled,
            dropped = summary.dropped,
            failed = summary.failed,
            "Event loop stopped"
        );
        Ok(summary)
    }

    /// Ask a running loop to stop taking new events.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    async fn spawn(
        &self,
        tasks: &mut JoinSet<Result<Option<StageOutcome>>>,
        semaphore: &Arc<Semaphore>,
        event: EventEnvelope,
    ) -> Result<()> {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| CopyError::Internal(format!("dispatch semaphore closed: {}", e)))?;
        let router = self.router.clone();
        let machine = self.machine.clone();

        tasks.spawn(async move {
            let result = dispatch_one(&router, &machine, event).await;
            drop(permit);
            result
        });
        Ok(())
    }
}

async fn dispatch_one(
    router: &EventRouter,
    machine: &WorkflowStateMachine,
    event: EventEnvelope,
) -> Result<Option<StageOutcome>> {
    let event_id = event.id.clone().unwrap_or_default();
    let route = match router.route(&event) {
        Ok(Some(route)) => route,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::warn!(event_id = %event_id, source = %event.source, error = %e, "Event rejected");
            return Err(e);
        }
    };
    tracing::debug!(event_id = %event_id, stage = %route.stage(), "Dispatching event");
    machine.handle(route).await.map(Some)
}

fn record_joined(
    summary: &mut DispatchSummary,
    joined: std::result::Result<Result<Option<StageOutcome>>, tokio::task::JoinError>,
) {
    match joined {
        Ok(result) => summary.record(&result),
        Err(e) => {
            tracing::error!(error = %e, "Stage task panicked");
            summary.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bssh_copy_core::capability::{AnalysisOutputs, RunRegistry};
    use bssh_copy_core::run::RunStatus;

    use crate::publisher::{ChannelPublisher, FanoutPublisher};
    use crate::registry::InMemoryRunRegistry;
    use crate::testing::{
        copy_sync_event, test_config, upstream_event, MockAnalyses, MockCopyService,
        MockFileIndex, MockSampleSheets, MockSchemaRegistry, RecordingPublisher, SAMPLE_SHEET,
    };
    use crate::workflow::Collaborators;
    use bssh_copy_core::schema::Schema;

    struct Looping {
        dispatcher: Arc<Dispatcher>,
        loopback: mpsc::UnboundedReceiver<EventEnvelope>,
        registry: Arc<InMemoryRunRegistry>,
        recorded: Arc<RecordingPublisher>,
    }

    fn looping() -> Looping {
        let config = Arc::new(test_config());
        let registry = Arc::new(InMemoryRunRegistry::new());
        let (channel, loopback) = ChannelPublisher::new();
        let recorded = Arc::new(RecordingPublisher::new());
        let publisher = FanoutPublisher::new()
            .with(Arc::new(channel))
            .with(recorded.clone());

        let machine = WorkflowStateMachine::new(
            config.clone(),
            Collaborators {
                registry: registry.clone(),
                schemas: Arc::new(MockSchemaRegistry::new(Schema::default_draft("d", "1"))),
                copy_service: Arc::new(MockCopyService::new()),
                files: Arc::new(MockFileIndex::new()),
                sample_sheets: Arc::new(MockSampleSheets::new().with_sheet("R1", SAMPLE_SHEET)),
                analyses: Arc::new(MockAnalyses::new().with_outputs(
                    "P1",
                    "A1",
                    AnalysisOutputs {
                        output_uri: "s3://src/".into(),
                        interop_uris: Vec::new(),
                    },
                )),
                publisher: Arc::new(publisher),
            },
        );

        Looping {
            dispatcher: Arc::new(Dispatcher::new(
                EventRouter::from_config(&config),
                Arc::new(machine),
                4,
            )),
            loopback,
            registry,
            recorded,
        }
    }

    #[tokio::test]
    async fn test_loop_drives_run_to_success() {
        let Looping {
            dispatcher,
            loopback,
            registry,
            recorded,
        } = looping();
        let (tx, rx) = mpsc::channel(16);

        let runner = dispatcher.clone();
        let handle = tokio::spawn(async move { runner.run(rx, loopback).await });

        tx.send(upstream_event("R1", "A1", "P1")).await.unwrap();

        let mut suspended = false;
        for _ in 0..200 {
            let runs = registry.list(Some(RunStatus::Running)).await.unwrap();
            if runs.iter().any(|r| r.is_awaiting_copy()) {
                suspended = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(suspended, "run never reached the copy wait");

        tx.send(copy_sync_event("s3://cache/primary/R1/", &["s3://src/"], "SUCCEEDED"))
            .await
            .unwrap();
        drop(tx);

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.received, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            recorded.statuses(),
            vec![RunStatus::Draft, RunStatus::Ready, RunStatus::Succeeded]
        );
        // The terminal event loops back but matches no rule.
        assert_eq!(summary.dropped, 1);
    }

    #[tokio::test]
    async fn test_loop_stops_when_inbound_closes() {
        let Looping {
            dispatcher,
            loopback,
            ..
        } = looping();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let summary = dispatcher.run(rx, loopback).await.unwrap();
        assert_eq!(summary, DispatchSummary::default());
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let Looping {
            dispatcher,
            loopback,
            ..
        } = looping();
        let (_tx, rx) = mpsc::channel(1);
        let runner = dispatcher.clone();
        let handle = tokio::spawn(async move { runner.run(rx, loopback).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatcher.shutdown();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.received, 0);
    }

    #[tokio::test]
    async fn test_dispatch_drops_unrelated_events() {
        let Looping { dispatcher, .. } = looping();
        let event = EventEnvelope::new("someone.else", "Unrelated", serde_json::json!({}));
        assert!(dispatcher.dispatch(event).await.unwrap().is_none());
    }
}
