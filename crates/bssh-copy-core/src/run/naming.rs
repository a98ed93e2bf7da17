use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a portal run id: `YYYYMMDD` followed by 8 hex characters.
pub fn generate_portal_run_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", now.format("%Y%m%d"), &suffix[..8])
}

/// Derive the run name from upstream identifiers.
///
/// The same identifiers always produce the same name, which is the
/// idempotency key for run creation.
pub fn derive_run_name(prefix: &str, instrument_run_id: &str, analysis_id: &str) -> String {
    format!("{}-{}-{}", prefix, instrument_run_id, analysis_id)
}
