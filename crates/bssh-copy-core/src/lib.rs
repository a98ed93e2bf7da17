//! Domain model of the BSSH fastq copy workflow: run records, event wire
//! formats, routing, schema checks and collaborator interfaces.

pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod router;
pub mod run;
pub mod samplesheet;
pub mod schema;
pub mod uri;

pub use capability::{
    AnalysisOutputSource, AnalysisOutputs, CopyService, EventPublisher, FileIndexService,
    Registration, RunMutation, RunRegistry, SampleSheetSource, SchemaRegistry, SyncState,
};
pub use config::CopyConfig;
pub use error::{CopyError, ErrorKind, Result};
pub use event::{DataCopySync, EventEnvelope, UpstreamTrigger, WorkflowRunStateChange};
pub use router::{EventRouter, Route, Stage};
pub use run::{RunStatus, WorkflowRun};
pub use schema::Schema;
