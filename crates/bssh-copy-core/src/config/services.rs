use serde::{Deserialize, Serialize};

/// Endpoints of the external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Copy service base URL.
    #[serde(default)]
    pub copy_service_url: Option<String>,

    /// File manager (file index) base URL.
    #[serde(default)]
    pub file_manager_url: Option<String>,

    /// Schema registry base URL.
    #[serde(default)]
    pub schema_registry_url: Option<String>,

    /// Sequence run manager base URL, serves sample sheets.
    #[serde(default)]
    pub sequence_run_url: Option<String>,

    /// Analysis service base URL, serves analysis output listings.
    #[serde(default)]
    pub analysis_url: Option<String>,

    /// Bearer token sent to every service.
    #[serde(default)]
    pub token: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            copy_service_url: None,
            file_manager_url: None,
            schema_registry_url: None,
            sequence_run_url: None,
            analysis_url: None,
            token: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
