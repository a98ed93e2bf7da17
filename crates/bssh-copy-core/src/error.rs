use thiserror::Error;

use crate::run::RunStatus;

/// Core error type for copy workflow operations.
#[derive(Error, Debug)]
pub enum CopyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("HTTP error: {message}")]
    Http { message: String, retryable: bool },

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Workflow run not found: {0}")]
    RunNotFound(String),

    #[error("Conflict on run {portal_run_id}: expected {expected}, found {actual}")]
    Conflict {
        portal_run_id: String,
        expected: RunStatus,
        actual: RunStatus,
    },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Stale execution phase: {0}")]
    StalePhase(String),

    #[error("Incomplete draft: {0}")]
    IncompleteDraft(String),

    #[error("Schema fetch failure: {0}")]
    SchemaFetchFailure(String),

    #[error("Manifest unavailable: {0}")]
    ManifestUnavailable(String),

    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Copy job {job_id} failed: {message}")]
    CopyJobFailed { job_id: String, message: String },

    #[error("File manager sync did not complete after {attempts} attempts")]
    SyncTimeout { attempts: u32 },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a stage reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The run already moved past the stage's precondition. Exit quietly.
    PreconditionStale,
    /// Worth retrying with backoff.
    Transient,
    /// Halt the stage and leave the run where it is.
    DataInvalid,
    /// Short-circuit the stage and fail the run.
    Fatal,
}

impl CopyError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } | Self::InvalidTransition { .. } | Self::StalePhase(_) => {
                ErrorKind::PreconditionStale
            }
            Self::Http { retryable, .. } => {
                if *retryable {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Fatal
                }
            }
            Self::Database(_)
            | Self::Sql(_)
            | Self::SchemaFetchFailure(_)
            | Self::ManifestUnavailable(_) => ErrorKind::Transient,
            Self::IncompleteDraft(_)
            | Self::InvalidEvent(_)
            | Self::MalformedManifest(_)
            | Self::Serialization(_) => ErrorKind::DataInvalid,
            Self::Config(_)
            | Self::NotFound(_)
            | Self::RunNotFound(_)
            | Self::CopyJobFailed { .. }
            | Self::SyncTimeout { .. }
            | Self::PermissionDenied(_)
            | Self::RetriesExhausted { .. }
            | Self::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the invoking layer should retry.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Short machine-readable name used in failure payloads.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigurationError",
            Self::Database(_) | Self::Sql(_) => "DatabaseError",
            Self::Serialization(_) => "SerializationError",
            Self::Http { .. } => "HttpError",
            Self::InvalidEvent(_) => "InvalidEvent",
            Self::NotFound(_) => "NotFound",
            Self::RunNotFound(_) => "RunNotFound",
            Self::Conflict { .. } => "Conflict",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::StalePhase(_) => "StalePhase",
            Self::IncompleteDraft(_) => "IncompleteDraft",
            Self::SchemaFetchFailure(_) => "SchemaFetchFailure",
            Self::ManifestUnavailable(_) => "ManifestUnavailable",
            Self::MalformedManifest(_) => "MalformedManifest",
            Self::CopyJobFailed { .. } => "CopyJobFailed",
            Self::SyncTimeout { .. } => "SyncTimeout",
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::RetriesExhausted { .. } => "RetriesExhausted",
            Self::Internal(_) => "InternalError",
        }
    }
}

impl From<serde_json::Error> for CopyError {
    fn from(e: serde_json::Error) -> Self {
        CopyError::Serialization(e.to_string())
    }
}

/// Result type alias using CopyError.
pub type Result<T> = std::result::Result<T, CopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_precondition_stale() {
        let err = CopyError::Conflict {
            portal_run_id: "20250101abcd1234".into(),
            expected: RunStatus::Draft,
            actual: RunStatus::Ready,
        };
        assert_eq!(err.kind(), ErrorKind::PreconditionStale);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_http_kind_follows_retryable_flag() {
        let throttled = CopyError::Http {
            message: "429".into(),
            retryable: true,
        };
        let denied = CopyError::Http {
            message: "400".into(),
            retryable: false,
        };
        assert_eq!(throttled.kind(), ErrorKind::Transient);
        assert_eq!(denied.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_taxonomy() {
        assert!(CopyError::ManifestUnavailable("x".into()).is_retryable());
        assert!(CopyError::SchemaFetchFailure("x".into()).is_retryable());
        assert_eq!(
            CopyError::IncompleteDraft("x".into()).kind(),
            ErrorKind::DataInvalid
        );
        assert_eq!(
            CopyError::SyncTimeout { attempts: 3 }.kind(),
            ErrorKind::Fatal
        );
        assert_eq!(CopyError::NotFound("x".into()).kind(), ErrorKind::Fatal);
        assert_eq!(CopyError::RunNotFound("x".into()).kind(), ErrorKind::Fatal);
        assert_eq!(CopyError::RunNotFound("x".into()).error_type(), "RunNotFound");
    }

    #[test]
    fn test_error_type_names() {
        assert_eq!(
            CopyError::SyncTimeout { attempts: 1 }.error_type(),
            "SyncTimeout"
        );
        let err: CopyError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.error_type(), "SerializationError");
    }
}
