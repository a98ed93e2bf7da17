//! Task executors.
//!
//! Each executor owns the capabilities it needs, receives its input per call
//! and keeps no state between calls. All of them are safe to invoke again
//! with the same input; retrying is left to the invoking stage.

mod attribute_tagger;
mod create_run;
mod get_run;
mod list_copy_jobs;
mod sync_check;
mod sync_file_manager;
mod validate_draft;

pub use attribute_tagger::AddPortalRunIdAttributes;
pub use create_run::CreateRun;
pub use get_run::GetRunObject;
pub use list_copy_jobs::ListCopyJobs;
pub use sync_check::FilemanagerSyncCheck;
pub use sync_file_manager::SyncFileManager;
pub use validate_draft::{DraftCheck, ValidateDraft};
