use bssh_copy_core::error::Result;
use bssh_copy_core::event::WorkflowRunStateChange;
use bssh_copy_core::router::Stage;

use super::{StageOutcome, WorkflowStateMachine};
use crate::executors::DraftCheck;
use crate::retry::with_retry;

impl WorkflowStateMachine {
    /// Own DRAFT event: promote the run to READY once its draft is complete.
    ///
    /// An incomplete draft ends the stage without publishing. Validation is
    /// only attempted again when another DRAFT event arrives.
    pub(super) async fn validation(&self, change: WorkflowRunStateChange) -> Result<StageOutcome> {
        let portal_run_id = change.portal_run_id.clone();
        let change = &change;
        let checked = with_retry(&self.config.retry, "validate_draft", move || {
            self.validate_draft.execute(&change.portal_run_id, Some(change))
        })
        .await;

        match checked {
            Ok(DraftCheck::Ready(run)) => self.published(&run).await,
            Ok(DraftCheck::Incomplete { run, reason }) => Ok(StageOutcome::Incomplete {
                portal_run_id: run.portal_run_id,
                reason,
            }),
            Err(e) => self.settle(Stage::Validation, &portal_run_id, e).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{draft_event, draft_run, Harness, SAMPLE_SHEET};
    use bssh_copy_core::capability::RunRegistry;
    use bssh_copy_core::run::RunStatus;
    use bssh_copy_core::schema::Schema;

    #[tokio::test]
    async fn test_complete_draft_publishes_ready_once() {
        let harness = Harness::new();
        let mut run = draft_run("R1", "A1");
        run.link_libraries(["L1"]);
        harness.registry.create_or_get(run.clone()).await.unwrap();

        let outcome = harness.deliver(draft_event(&run)).await.unwrap();
        assert!(matches!(
            outcome,
            Some(StageOutcome::Published {
                status: RunStatus::Ready,
                ..
            })
        ));
        assert_eq!(harness.publisher.statuses(), vec![RunStatus::Ready]);
    }

    #[tokio::test]
    async fn test_incomplete_draft_publishes_nothing() {
        let harness = Harness::new();
        let mut run = draft_run("R1", "A1");
        run.link_libraries(["L1"]);
        run.payload.data.remove("engineParameters");
        harness.registry.create_or_get(run.clone()).await.unwrap();

        let outcome = harness.deliver(draft_event(&run)).await.unwrap();
        assert!(matches!(outcome, Some(StageOutcome::Incomplete { .. })));
        assert!(harness.publisher.is_empty());
        assert_eq!(
            harness.registry.get(&run.portal_run_id).await.unwrap().status,
            RunStatus::Draft
        );
    }

    #[tokio::test]
    async fn test_validation_on_ready_run_is_a_no_op() {
        let harness = Harness::new();
        let mut run = draft_run("R1", "A1");
        run.link_libraries(["L1"]);
        let event = draft_event(&run);
        run.transition_to(RunStatus::Ready).unwrap();
        harness.registry.create_or_get(run.clone()).await.unwrap();
        let before = harness.registry.get(&run.portal_run_id).await.unwrap();

        let outcome = harness.deliver(event).await.unwrap();
        assert!(matches!(outcome, Some(StageOutcome::Skipped { .. })));
        assert!(harness.publisher.is_empty());
        assert_eq!(harness.registry.get(&run.portal_run_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_schema_outage_is_retried() {
        let harness = Harness::builder()
            .schema_failures(2)
            .build();
        harness.sample_sheets.set_sheet("R1", SAMPLE_SHEET);
        let run = draft_run("R1", "A1");
        harness.registry.create_or_get(run.clone()).await.unwrap();

        let outcome = harness.deliver(draft_event(&run)).await.unwrap();
        assert!(matches!(
            outcome,
            Some(StageOutcome::Published {
                status: RunStatus::Ready,
                ..
            })
        ));
        assert_eq!(harness.schemas.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_schema_outage_exhausted_fails_run() {
        let harness = Harness::builder().schema_failures(10).build();
        let run = draft_run("R1", "A1");
        harness.registry.create_or_get(run.clone()).await.unwrap();

        harness.deliver(draft_event(&run)).await.unwrap();
        let stored = harness.registry.get(&run.portal_run_id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(
            stored.payload.get_str(&["failure", "errorType"]),
            Some("RetriesExhausted")
        );
        harness.publisher.assert_published(RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_custom_schema_gate() {
        let schema = Schema::new(
            "strict",
            "1",
            serde_json::json!({"type": "object", "required": ["fastqListRows"]}),
        )
        .unwrap();
        let harness = Harness::builder().schema(schema).build();
        let mut run = draft_run("R1", "A1");
        run.link_libraries(["L1"]);
        harness.registry.create_or_get(run.clone()).await.unwrap();

        let outcome = harness.deliver(draft_event(&run)).await.unwrap();
        let Some(StageOutcome::Incomplete { reason, .. }) = outcome else {
            panic!("unexpected {:?}", outcome);
        };
        assert!(reason.contains("fastqListRows"));
    }
}
