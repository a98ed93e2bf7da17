pub mod clients;
pub mod dispatcher;
pub mod executors;
pub mod publisher;
pub mod registry;
pub mod retry;
pub mod workflow;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clients::{
    HttpAnalyses, HttpCopyService, HttpFileManager, HttpSampleSheets, HttpSchemaRegistry,
    ServiceClient, StaticSchemaRegistry,
};
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use publisher::{ChannelPublisher, FanoutPublisher, NdjsonPublisher};
pub use registry::{InMemoryRunRegistry, PgRunRegistry};
pub use retry::{poll_until_done, with_retry};
pub use workflow::{Collaborators, StageOutcome, WorkflowStateMachine};
