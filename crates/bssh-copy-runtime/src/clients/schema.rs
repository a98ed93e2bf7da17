use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use bssh_copy_core::capability::SchemaRegistry;
use bssh_copy_core::error::{CopyError, Result};
use bssh_copy_core::schema::Schema;

use super::ServiceClient;

/// Schema registry over HTTP.
pub struct HttpSchemaRegistry {
    client: ServiceClient,
}

impl HttpSchemaRegistry {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn fetch_schema(&self, name: &str, version: &str) -> Result<Schema> {
        let document: Value = self
            .client
            .get_json(&["schemas", name, version], "schema registry")
            .await
            .map_err(|e| match e {
                // A missing schema is usually a registry still being deployed.
                CopyError::NotFound(message) | CopyError::Http { message, .. } => {
                    CopyError::SchemaFetchFailure(message)
                }
                other => other,
            })?;
        Schema::new(name, version, document)
    }
}

/// A schema held in memory, from a local file or the built-in draft schema.
pub struct StaticSchemaRegistry {
    schema: Schema,
}

impl StaticSchemaRegistry {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    /// The built-in draft schema under `name`/`version`.
    pub fn builtin(name: &str, version: &str) -> Self {
        Self::new(Schema::default_draft(name, version))
    }

    /// Load a JSON schema document from disk.
    pub fn from_path(name: &str, version: &str, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CopyError::Config(format!("failed to read schema {}: {}", path.display(), e))
        })?;
        let document: Value = serde_json::from_str(&text).map_err(|e| {
            CopyError::Config(format!("invalid schema {}: {}", path.display(), e))
        })?;
        Ok(Self::new(Schema::new(name, version, document)?))
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn fetch_schema(&self, name: &str, version: &str) -> Result<Schema> {
        if name != self.schema.name || version != self.schema.version {
            return Err(CopyError::SchemaFetchFailure(format!(
                "only {}@{} is available, not {}@{}",
                self.schema.name, self.schema.version, name, version
            )));
        }
        Ok(self.schema.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_builtin_schema() {
        let registry = StaticSchemaRegistry::builtin("draft", "1");
        let schema = registry.fetch_schema("draft", "1").await.unwrap();
        assert_eq!(schema.name, "draft");
        assert!(registry.fetch_schema("draft", "2").await.is_err());
    }

    #[tokio::test]
    async fn test_schema_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"type": "object", "required": ["inputs"]}}"#).unwrap();

        let registry = StaticSchemaRegistry::from_path("draft", "1", file.path()).unwrap();
        let schema = registry.fetch_schema("draft", "1").await.unwrap();
        assert!(schema
            .check_data(&serde_json::Map::new())
            .unwrap_err()
            .to_string()
            .contains("inputs"));
    }

    #[test]
    fn test_schema_file_must_be_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = StaticSchemaRegistry::from_path("draft", "1", file.path()).err();
        assert!(matches!(err, Some(CopyError::Config(_))));
    }
}
