use serde::{Deserialize, Serialize};

/// Database configuration for the PostgreSQL run registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL.
    #[serde(default)]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Pool checkout timeout in seconds.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_secs: u64,

    /// Re-reads allowed when a conditional update loses an optimistic race.
    #[serde(default = "default_update_retries")]
    pub update_retries: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: default_pool_size(),
            pool_timeout_secs: default_pool_timeout(),
            update_retries: default_update_retries(),
        }
    }
}

fn default_pool_size() -> u32 {
    10
}

fn default_pool_timeout() -> u64 {
    30
}

fn default_update_retries() -> u32 {
    5
}

/// Which run registry implementation backs the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// Process-local map; state is lost on exit.
    #[default]
    Memory,
    /// Durable PostgreSQL table.
    Postgres,
}

/// Run registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,
}
