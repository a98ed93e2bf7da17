//! The workflow run record and everything stored on it.

mod execution;
mod library;
mod naming;
mod payload;
mod status;

pub use execution::{CopyJob, CopyJobSpec, CopyJobStatus, ExecutionPhase, ExecutionState};
pub use naming::{derive_run_name, generate_portal_run_id};
pub use payload::Payload;
pub use status::RunStatus;

pub(crate) use library::deserialize_libraries;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};

/// Payload data paths written by the draft stage.
pub mod fields {
    pub const INSTRUMENT_RUN_ID: &[&str] = &["inputs", "instrumentRunId"];
    pub const PROJECT_ID: &[&str] = &["inputs", "bsshProjectId"];
    pub const ANALYSIS_ID: &[&str] = &["inputs", "bsshAnalysisId"];
    pub const OUTPUT_URI: &[&str] = &["engineParameters", "outputUri"];
    pub const TAGS: &[&str] = &["tags"];
    pub const COPY_JOB_IDS: &[&str] = &["outputs", "copyJobIds"];
    pub const FAILURE: &[&str] = &["failure"];
}

/// Identifies the workflow definition that produced a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRef {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// One execution instance of the copy workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub portal_run_id: String,
    pub workflow_run_name: String,
    pub status: RunStatus,
    pub workflow: WorkflowRef,
    pub payload: Payload,
    #[serde(default, deserialize_with = "deserialize_libraries")]
    pub linked_libraries: BTreeSet<String>,
    /// Last transition time.
    pub timestamp: DateTime<Utc>,
    /// Execution sub-state; `None` until the run starts executing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionState>,
}

impl WorkflowRun {
    /// Create a new DRAFT run.
    pub fn new_draft(
        portal_run_id: impl Into<String>,
        workflow_run_name: impl Into<String>,
        workflow: WorkflowRef,
        payload_version: impl Into<String>,
    ) -> Self {
        Self {
            portal_run_id: portal_run_id.into(),
            workflow_run_name: workflow_run_name.into(),
            status: RunStatus::Draft,
            workflow,
            payload: Payload::new(payload_version),
            linked_libraries: BTreeSet::new(),
            timestamp: Utc::now(),
            execution: None,
        }
    }

    /// Move to `next`, refusing anything but a forward transition.
    pub fn transition_to(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CopyError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.timestamp = Utc::now();
        Ok(())
    }

    /// Union `libraries` into the linked set. Returns how many were new.
    pub fn link_libraries<I, S>(&mut self, libraries: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.linked_libraries.len();
        self.linked_libraries
            .extend(libraries.into_iter().map(Into::into));
        self.linked_libraries.len() - before
    }

    pub fn instrument_run_id(&self) -> Option<&str> {
        self.payload.get_str(fields::INSTRUMENT_RUN_ID)
    }

    pub fn output_uri(&self) -> Option<&str> {
        self.payload.get_str(fields::OUTPUT_URI)
    }

    /// Whether the run is parked waiting for the copy service.
    pub fn is_awaiting_copy(&self) -> bool {
        self.execution
            .as_ref()
            .is_some_and(|e| e.phase == ExecutionPhase::AwaitingCopy)
    }

    /// Execution state, or an error if the run never started executing.
    pub fn execution_mut(&mut self) -> Result<&mut ExecutionState> {
        let id = self.portal_run_id.clone();
        self.execution
            .as_mut()
            .ok_or_else(|| CopyError::Internal(format!("run {} has no execution state", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run() -> WorkflowRun {
        WorkflowRun::new_draft(
            "20250514abcdef12",
            "bssh-R1-A1",
            WorkflowRef {
                name: "bssh-fastq-to-aws-copy".into(),
                version: "2025.05.14".into(),
            },
            "2025.05.14",
        )
    }

    #[test]
    fn test_new_draft() {
        let run = run();
        assert_eq!(run.status, RunStatus::Draft);
        assert!(run.linked_libraries.is_empty());
        assert!(run.execution.is_none());
        assert!(!run.is_awaiting_copy());
    }

    #[test]
    fn test_transition_updates_timestamp() {
        let mut run = run();
        let before = run.timestamp;
        run.transition_to(RunStatus::Ready).unwrap();
        assert_eq!(run.status, RunStatus::Ready);
        assert!(run.timestamp >= before);
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut run = run();
        run.transition_to(RunStatus::Ready).unwrap();
        let err = run.transition_to(RunStatus::Draft).unwrap_err();
        assert!(matches!(err, CopyError::InvalidTransition { .. }));
        assert_eq!(run.status, RunStatus::Ready);
    }

    #[test]
    fn test_link_libraries_is_a_set() {
        let mut run = run();
        assert_eq!(run.link_libraries(["L2", "L1"]), 2);
        assert_eq!(run.link_libraries(["L1"]), 0);
        assert_eq!(
            run.linked_libraries.iter().collect::<Vec<_>>(),
            vec!["L1", "L2"]
        );
    }

    #[test]
    fn test_serialization_round_trip_keeps_wire_names() {
        let mut run = run();
        run.payload
            .insert_path(fields::INSTRUMENT_RUN_ID, json!("R1"));
        run.link_libraries(["L1"]);
        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["workflowRunName"], "bssh-R1-A1");
        assert_eq!(value["linkedLibraries"], json!(["L1"]));
        assert!(value.get("execution").is_none());

        let back: WorkflowRun = serde_json::from_value(value).unwrap();
        assert_eq!(back.instrument_run_id(), Some("R1"));
        assert_eq!(back, run);
    }
}
