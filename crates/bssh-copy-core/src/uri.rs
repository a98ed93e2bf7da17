//! Object-store URI helpers.

use std::fmt;

use url::Url;

use crate::error::{CopyError, Result};

const SCHEMES: &[&str] = &["s3", "icav2"];

/// A parsed `scheme://bucket/key` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUri {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl StorageUri {
    /// Parse an `s3://` or `icav2://` URI.
    ///
    /// The key is percent-decoded. Query and fragment are dropped.
    pub fn parse(uri: &str) -> Result<Self> {
        let malformed = |what: &str| CopyError::MalformedManifest(format!("{}: {}", what, uri));

        let url = Url::parse(uri).map_err(|e| malformed(&format!("not a storage URI ({})", e)))?;
        let scheme = url.scheme();
        if !SCHEMES.contains(&scheme) {
            return Err(malformed(&format!("unsupported URI scheme {}", scheme)));
        }
        let bucket = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| malformed("URI has no bucket"))?;
        let key = urlencoding::decode(url.path().trim_start_matches('/'))
            .map_err(|e| malformed(&format!("key is not UTF-8 ({})", e)))?;

        Ok(Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            key: key.into_owned(),
        })
    }

    /// Key as a directory prefix, always ending in `/` unless empty.
    pub fn prefix(&self) -> String {
        let trimmed = self.key.trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}/", trimmed)
        }
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

/// Append a directory segment to a URI, producing a trailing `/`.
pub fn join_dir(base: &str, segment: &str) -> String {
    format!(
        "{}/{}/",
        base.trim_end_matches('/'),
        segment.trim_matches('/')
    )
}

/// Append a file name to a directory URI.
pub fn join_file(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}
