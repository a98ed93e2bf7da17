use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of one external copy job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopyJobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl CopyJobStatus {
    /// Check if the job has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for CopyJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Source and destination of one copy job, before submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyJobSpec {
    pub source_uri_list: Vec<String>,
    pub destination_uri: String,
}

/// A copy job tracked during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyJob {
    pub source_uri_list: Vec<String>,
    pub destination_uri: String,
    pub job_id: String,
    #[serde(default)]
    pub job_status: CopyJobStatus,
}

impl CopyJob {
    /// Create a submitted job.
    pub fn submitted(spec: CopyJobSpec, job_id: impl Into<String>) -> Self {
        Self {
            source_uri_list: spec.source_uri_list,
            destination_uri: spec.destination_uri,
            job_id: job_id.into(),
            job_status: CopyJobStatus::Pending,
        }
    }

    /// Whether a completion signal refers to this job.
    ///
    /// The job id wins when the signal carries one; otherwise the
    /// destination and source list must both match.
    pub fn matches(&self, job_id: Option<&str>, destination_uri: &str, sources: &[String]) -> bool {
        if let Some(id) = job_id {
            return id == self.job_id;
        }
        same_prefix(&self.destination_uri, destination_uri)
            && self.source_uri_list.len() == sources.len()
            && self
                .source_uri_list
                .iter()
                .all(|s| sources.iter().any(|o| same_prefix(s, o)))
    }
}

fn same_prefix(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Where the execution stage stands between its two invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPhase {
    /// Run moved to RUNNING; copy jobs not yet recorded.
    Submitting,
    /// Copy jobs submitted; waiting for the copy service's completion event.
    AwaitingCopy,
    /// Completion received; sync, poll and tagging in progress.
    PostCopy,
}

/// Execution sub-state persisted on a RUNNING run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub phase: ExecutionPhase,
    #[serde(default)]
    pub copy_jobs: Vec<CopyJob>,
    #[serde(default)]
    pub sync_token: Option<String>,
}

impl ExecutionState {
    /// Fresh state at the READY -> RUNNING transition.
    pub fn submitting() -> Self {
        Self {
            phase: ExecutionPhase::Submitting,
            copy_jobs: Vec::new(),
            sync_token: None,
        }
    }

    /// Every copy job finished successfully.
    pub fn all_copies_succeeded(&self) -> bool {
        !self.copy_jobs.is_empty()
            && self
                .copy_jobs
                .iter()
                .all(|j| j.job_status == CopyJobStatus::Succeeded)
    }

    /// Find the job a completion signal refers to.
    pub fn find_job_mut(
        &mut self,
        job_id: Option<&str>,
        destination_uri: &str,
        sources: &[String],
    ) -> Option<&mut CopyJob> {
        self.copy_jobs
            .iter_mut()
            .find(|j| j.matches(job_id, destination_uri, sources))
    }
}
