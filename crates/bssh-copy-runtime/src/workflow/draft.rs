use bssh_copy_core::capability::Registration;
use bssh_copy_core::error::{ErrorKind, Result};
use bssh_copy_core::event::UpstreamTrigger;
use bssh_copy_core::run::RunStatus;

use super::{StageOutcome, WorkflowStateMachine};
use crate::retry::with_retry;

impl WorkflowStateMachine {
    /// Upstream success: create the DRAFT run and announce it.
    ///
    /// A redelivered trigger whose run is still DRAFT re-announces it, which
    /// lets an upstream update drive another validation attempt.
    pub(super) async fn draft_creation(&self, trigger: UpstreamTrigger) -> Result<StageOutcome> {
        let name = self.create_run.run_name(&trigger);
        tracing::debug!(workflow_run_name = %name, "Draft creation started");

        let trigger = &trigger;
        let registration = match with_retry(&self.config.retry, "create_run", move || {
            self.create_run.execute(trigger)
        })
        .await
        {
            Ok(registration) => registration,
            Err(e) if e.kind() == ErrorKind::DataInvalid => {
                tracing::warn!(workflow_run_name = %name, error = %e, "Draft not created");
                return Ok(StageOutcome::Halted {
                    reason: format!("{}: {}", name, e),
                });
            }
            // No run exists yet, so there is nothing to fail.
            Err(e) => return Err(e),
        };

        match registration {
            Registration::Created(run) => self.published(&run).await,
            Registration::Existing(run) if run.status == RunStatus::Draft => {
                tracing::info!(
                    portal_run_id = %run.portal_run_id,
                    "Run still DRAFT, announcing again"
                );
                self.published(&run).await
            }
            Registration::Existing(run) => Ok(StageOutcome::Skipped {
                reason: format!(
                    "{} already exists as {} at {}",
                    run.workflow_run_name,
                    run.portal_run_id,
                    run.status
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{upstream_event, Harness, SAMPLE_SHEET};
    use bssh_copy_core::capability::RunRegistry;

    #[tokio::test]
    async fn test_creates_draft_and_publishes() {
        let harness = Harness::new();
        harness.sample_sheets.set_sheet("R1", SAMPLE_SHEET);

        let outcome = harness.deliver(upstream_event("R1", "A1", "P1")).await.unwrap();
        let Some(StageOutcome::Published { portal_run_id, status }) = outcome else {
            panic!("unexpected {:?}", outcome);
        };
        assert_eq!(status, RunStatus::Draft);

        let run = harness.registry.get(&portal_run_id).await.unwrap();
        assert_eq!(run.workflow_run_name, "bssh-R1-A1");
        assert_eq!(harness.publisher.statuses(), vec![RunStatus::Draft]);
    }

    #[tokio::test]
    async fn test_duplicate_trigger_creates_one_run() {
        let harness = Harness::new();
        harness.deliver(upstream_event("R1", "A1", "P1")).await.unwrap();
        harness.deliver(upstream_event("R1", "A1", "P1")).await.unwrap();

        assert_eq!(harness.registry.len().await, 1);
        let runs = harness.registry.list(None).await.unwrap();
        assert_eq!(runs[0].workflow_run_name, "bssh-R1-A1");
    }

    #[tokio::test]
    async fn test_trigger_for_advanced_run_is_skipped() {
        let harness = Harness::new();
        let outcome = harness.deliver(upstream_event("R1", "A1", "P1")).await.unwrap();
        let Some(StageOutcome::Published { portal_run_id, .. }) = outcome else {
            panic!("unexpected {:?}", outcome);
        };
        harness
            .registry
            .conditional_update(&portal_run_id, RunStatus::Draft, &|run| {
                run.transition_to(RunStatus::Ready)
            })
            .await
            .unwrap();
        let published = harness.publisher.len();

        let outcome = harness.deliver(upstream_event("R1", "A1", "P1")).await.unwrap();
        assert!(matches!(outcome, Some(StageOutcome::Skipped { .. })));
        assert_eq!(harness.publisher.len(), published);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_create_one_run() {
        let harness = Harness::new();
        let (a, b) = tokio::join!(
            harness.deliver(upstream_event("R1", "A1", "P1")),
            harness.deliver(upstream_event("R1", "A1", "P1")),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(harness.registry.len().await, 1);
    }
}
