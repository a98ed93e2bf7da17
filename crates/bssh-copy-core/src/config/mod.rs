mod database;
mod retry;
mod services;

pub use database::{DatabaseConfig, RegistryBackend, RegistryConfig};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use services::{LogFormat, LoggingConfig, ServicesConfig};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};

/// Placeholder for the instrument run id in the output URI template.
pub const INSTRUMENT_RUN_ID_PLACEHOLDER: &str = "{instrumentRunId}";

/// Placeholder for the portal run id in the output URI template.
pub const PORTAL_RUN_ID_PLACEHOLDER: &str = "{portalRunId}";

/// Root configuration, read once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Identity of the workflow this process drives.
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// The upstream workflow whose success triggers a draft.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Event bus sources and detail types.
    #[serde(default)]
    pub events: EventsConfig,

    /// Output location of copied data.
    #[serde(default)]
    pub output: OutputConfig,

    /// What gets copied out of the analysis output.
    #[serde(default)]
    pub copy: CopyPlanConfig,

    /// Schema used to validate drafts.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Retry policy for transient step failures.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Bounded poll policy for the file-manager sync check.
    #[serde(default = "RetryPolicy::sync_poll_default")]
    pub sync_poll: RetryPolicy,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowConfig::default(),
            upstream: UpstreamConfig::default(),
            events: EventsConfig::default(),
            output: OutputConfig::default(),
            copy: CopyPlanConfig::default(),
            schema: SchemaConfig::default(),
            retry: RetryPolicy::default(),
            sync_poll: RetryPolicy::sync_poll_default(),
            registry: RegistryConfig::default(),
            database: DatabaseConfig::default(),
            services: ServicesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CopyConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CopyError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);
        let config: Self = toml::from_str(&content)
            .map_err(|e| CopyError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the runtime cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.workflow.name.trim().is_empty() {
            return Err(CopyError::Config("workflow.name must not be empty".into()));
        }
        if self.workflow.version.trim().is_empty() {
            return Err(CopyError::Config(
                "workflow.version must not be empty".into(),
            ));
        }
        if self.upstream.workflow_name.trim().is_empty() {
            return Err(CopyError::Config(
                "upstream.workflow_name must not be empty".into(),
            ));
        }
        if !self
            .output
            .uri_template
            .contains(INSTRUMENT_RUN_ID_PLACEHOLDER)
        {
            return Err(CopyError::Config(format!(
                "output.uri_template must contain {}",
                INSTRUMENT_RUN_ID_PLACEHOLDER
            )));
        }
        if self.retry.max_attempts == 0 || self.sync_poll.max_attempts == 0 {
            return Err(CopyError::Config(
                "retry and sync_poll max_attempts must be at least 1".into(),
            ));
        }
        if self.registry.backend == RegistryBackend::Postgres && self.database.url.is_empty() {
            return Err(CopyError::Config(
                "registry.backend = \"postgres\" requires database.url".into(),
            ));
        }
        Ok(())
    }
}

/// Workflow identity stamped on every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_workflow_name")]
    pub name: String,

    #[serde(default = "default_workflow_version")]
    pub version: String,

    /// Version recorded on every payload.
    #[serde(default = "default_workflow_version")]
    pub payload_version: String,

    /// Prefix of the derived run name.
    #[serde(default = "default_run_name_prefix")]
    pub run_name_prefix: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            name: default_workflow_name(),
            version: default_workflow_version(),
            payload_version: default_workflow_version(),
            run_name_prefix: default_run_name_prefix(),
        }
    }
}

fn default_workflow_name() -> String {
    "bssh-fastq-to-aws-copy".to_string()
}

fn default_workflow_version() -> String {
    "2025.05.14".to_string()
}

fn default_run_name_prefix() -> String {
    "bssh".to_string()
}

/// Upstream trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_workflow")]
    pub workflow_name: String,

    #[serde(default = "default_upstream_status")]
    pub status: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            workflow_name: default_upstream_workflow(),
            status: default_upstream_status(),
        }
    }
}

fn default_upstream_workflow() -> String {
    "BclConvert".to_string()
}

fn default_upstream_status() -> String {
    "SUCCEEDED".to_string()
}

/// Event bus identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Source stamped on events this process publishes.
    #[serde(default = "default_source")]
    pub source: String,

    /// Source of upstream workflow state changes.
    #[serde(default = "default_upstream_source")]
    pub upstream_source: String,

    /// Source of copy completion events.
    #[serde(default = "default_copy_service_source")]
    pub copy_service_source: String,

    #[serde(default = "default_state_change_detail_type")]
    pub state_change_detail_type: String,

    #[serde(default = "default_copy_sync_detail_type")]
    pub copy_sync_detail_type: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            upstream_source: default_upstream_source(),
            copy_service_source: default_copy_service_source(),
            state_change_detail_type: default_state_change_detail_type(),
            copy_sync_detail_type: default_copy_sync_detail_type(),
        }
    }
}

fn default_source() -> String {
    "orcabus.bsshfastqcopy".to_string()
}

fn default_upstream_source() -> String {
    "orcabus.workflowmanager".to_string()
}

fn default_copy_service_source() -> String {
    "orcabus.datacopymanager".to_string()
}

fn default_state_change_detail_type() -> String {
    "WorkflowRunStateChange".to_string()
}

fn default_copy_sync_detail_type() -> String {
    "DataCopySync".to_string()
}

/// Where copied data lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output URI template with `{instrumentRunId}` and optional `{portalRunId}`.
    #[serde(default = "default_uri_template")]
    pub uri_template: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            uri_template: default_uri_template(),
        }
    }
}

fn default_uri_template() -> String {
    "s3://pipeline-cache/byob-icav2/primary/{instrumentRunId}/{portalRunId}/".to_string()
}

impl OutputConfig {
    /// Render the output URI for a run. The result always ends in `/`.
    pub fn render(&self, instrument_run_id: &str, portal_run_id: &str) -> String {
        let mut uri = self
            .uri_template
            .replace(INSTRUMENT_RUN_ID_PLACEHOLDER, instrument_run_id)
            .replace(PORTAL_RUN_ID_PLACEHOLDER, portal_run_id);
        if !uri.ends_with('/') {
            uri.push('/');
        }
        uri
    }
}

/// Layout of the copy jobs built from an analysis output listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyPlanConfig {
    /// Analysis output folders copied into the output URI. Empty copies the
    /// whole analysis output folder.
    #[serde(default = "default_include_dirs")]
    pub include_dirs: Vec<String>,

    /// Folder under the output URI that receives the InterOp files.
    #[serde(default = "default_interop_dir")]
    pub interop_dir: String,

    /// Report copied along with the InterOp files, relative to the analysis
    /// output folder.
    #[serde(default = "default_index_metrics")]
    pub index_metrics_file: String,
}

impl Default for CopyPlanConfig {
    fn default() -> Self {
        Self {
            include_dirs: default_include_dirs(),
            interop_dir: default_interop_dir(),
            index_metrics_file: default_index_metrics(),
        }
    }
}

fn default_include_dirs() -> Vec<String> {
    vec!["Samples".to_string(), "Reports".to_string()]
}

fn default_interop_dir() -> String {
    "InterOp".to_string()
}

fn default_index_metrics() -> String {
    "Reports/IndexMetricsOut.bin".to_string()
}

/// Draft validation schema coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_schema_name")]
    pub name: String,

    #[serde(default = "default_workflow_version")]
    pub version: String,

    /// Local schema document; takes precedence over the schema registry.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            name: default_schema_name(),
            version: default_workflow_version(),
            path: None,
        }
    }
}

fn default_schema_name() -> String {
    "bssh-fastq-to-aws-copy-draft-data".to_string()
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };
    let mut result = content.to_string();
    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_default_config() {
        let config = CopyConfig::default();
        assert_eq!(config.workflow.name, "bssh-fastq-to-aws-copy");
        assert_eq!(config.upstream.workflow_name, "BclConvert");
        assert_eq!(config.sync_poll.max_attempts, 20);
        assert_eq!(config.registry.backend, RegistryBackend::Memory);
        assert_eq!(config.copy.include_dirs, vec!["Samples", "Reports"]);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = CopyConfig::parse_toml("").unwrap();
        assert_eq!(config.events.source, "orcabus.bsshfastqcopy");
        assert_eq!(config.events.copy_sync_detail_type, "DataCopySync");
        assert_eq!(config.sync_poll.backoff, BackoffStrategy::Fixed);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [workflow]
            name = "bssh-fastq-to-aws-copy"
            version = "2025.06.01"
            run_name_prefix = "copy"

            [output]
            uri_template = "s3://cache/primary/{instrumentRunId}/"

            [copy]
            include_dirs = []

            [retry]
            max_attempts = 5
            backoff = "linear"
            base_delay_ms = 10

            [sync_poll]
            max_attempts = 4
            backoff = "fixed"
            base_delay_ms = 1

            [registry]
            backend = "postgres"

            [database]
            url = "postgres://localhost/bssh"
            pool_size = 4

            [services]
            copy_service_url = "https://copy.example.org"
            timeout_secs = 5

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config = CopyConfig::parse_toml(toml).unwrap();
        assert_eq!(config.workflow.version, "2025.06.01");
        assert_eq!(config.workflow.payload_version, "2025.05.14");
        assert_eq!(config.workflow.run_name_prefix, "copy");
        assert!(config.copy.include_dirs.is_empty());
        assert_eq!(config.copy.interop_dir, "InterOp");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff, BackoffStrategy::Linear);
        assert_eq!(config.sync_poll.max_attempts, 4);
        assert_eq!(config.registry.backend, RegistryBackend::Postgres);
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(
            config.services.copy_service_url.as_deref(),
            Some("https://copy.example.org")
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("BSSH_TEST_CACHE_BUCKET", "cache-bucket");
        let toml = r#"
            [output]
            uri_template = "s3://${BSSH_TEST_CACHE_BUCKET}/primary/{instrumentRunId}/"
        "#;

        let config = CopyConfig::parse_toml(toml).unwrap();
        assert_eq!(
            config.output.uri_template,
            "s3://cache-bucket/primary/{instrumentRunId}/"
        );
        std::env::remove_var("BSSH_TEST_CACHE_BUCKET");
    }

    #[test]
    fn test_unset_env_var_left_verbatim() {
        let out = substitute_env_vars("token = \"${BSSH_TEST_DEFINITELY_UNSET}\"");
        assert_eq!(out, "token = \"${BSSH_TEST_DEFINITELY_UNSET}\"");
    }

    #[test]
    fn test_validate_rejects_bad_template() {
        let toml = r#"
            [output]
            uri_template = "s3://cache/primary/"
        "#;
        let err = CopyConfig::parse_toml(toml).unwrap_err();
        assert!(matches!(err, CopyError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_postgres_without_url() {
        let toml = r#"
            [registry]
            backend = "postgres"
        "#;
        assert!(CopyConfig::parse_toml(toml).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let toml = r#"
            [sync_poll]
            max_attempts = 0
        "#;
        assert!(CopyConfig::parse_toml(toml).is_err());
    }

    #[test]
    fn test_render_output_uri() {
        let output = OutputConfig::default();
        assert_eq!(
            output.render("R1", "20250101abcdef12"),
            "s3://pipeline-cache/byob-icav2/primary/R1/20250101abcdef12/"
        );

        let output = OutputConfig {
            uri_template: "s3://cache/primary/{instrumentRunId}".into(),
        };
        assert_eq!(output.render("R1", "x"), "s3://cache/primary/R1/");
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[upstream]\nworkflow_name = \"BclConvert\"").unwrap();
        let config = CopyConfig::from_file(file.path()).unwrap();
        assert_eq!(config.upstream.status, "SUCCEEDED");

        let err = CopyConfig::from_file("/nonexistent/bssh-copy.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
