//! HTTP clients for the external collaborators.
//!
//! Every client shares one [`ServiceClient`]: a `reqwest::Client` with the
//! configured timeout, a base URL and an optional bearer token. Response
//! status codes are mapped onto `CopyError` so the retry helpers can tell
//! transient failures from permanent ones.

mod analysis;
mod copy;
mod files;
mod sample_sheet;
mod schema;

pub use analysis::HttpAnalyses;
pub use copy::HttpCopyService;
pub use files::HttpFileManager;
pub use sample_sheet::HttpSampleSheets;
pub use schema::{HttpSchemaRegistry, StaticSchemaRegistry};

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use url::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;

use bssh_copy_core::config::ServicesConfig;
use bssh_copy_core::error::{CopyError, Result};

/// Base URL plus credentials for one service.
#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ServiceClient {
    pub fn new(http: reqwest::Client, base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CopyError::Config(format!("invalid service URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(CopyError::Config(format!(
                "service URL {} cannot take a path",
                base_url
            )));
        }
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    /// Client for `base_url` using the shared timeout and token.
    pub fn from_services(services: &ServicesConfig, base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(services.timeout_secs))
            .build()
            .map_err(|e| CopyError::Config(format!("failed to build HTTP client: {}", e)))?;
        Self::new(http, base_url, services.token.clone())
    }

    /// Absolute URL for a path below the base. Each segment is
    /// percent-encoded on its own, so ids may contain `/`.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                CopyError::Config(format!("service URL {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let builder = self.http.request(method, self.endpoint(segments)?);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        let response = builder.send().await.map_err(|e| transport_error(what, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(what, status, &body))
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, segments: &[&str], what: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, segments)?, what).await?;
        decode(response, what).await
    }

    /// GET a body, treating 404 as absent.
    pub async fn get_text_optional(&self, segments: &[&str], what: &str) -> Result<Option<String>> {
        let response = self
            .request(Method::GET, segments)?
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(what, e))?;
        if !status.is_success() {
            return Err(status_error(what, status, &body));
        }
        Ok(Some(body))
    }

    /// Send a JSON body with `method` and decode the JSON response.
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
        what: &str,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(method, segments)?.json(body), what)
            .await?;
        decode(response, what).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    response.json::<T>().await.map_err(|e| CopyError::Http {
        message: format!("{}: undecodable response: {}", what, e),
        retryable: false,
    })
}

fn transport_error(what: &str, e: reqwest::Error) -> CopyError {
    CopyError::Http {
        message: format!("{}: {}", what, e),
        retryable: transport_retryable(e.is_timeout(), e.is_connect()),
    }
}

/// Only timeouts and refused connections are worth another attempt. Builder
/// and request errors repeat identically.
fn transport_retryable(timeout: bool, connect: bool) -> bool {
    timeout || connect
}

/// Map a non-success status onto the error taxonomy.
pub(crate) fn status_error(what: &str, status: StatusCode, body: &str) -> CopyError {
    let message = if body.is_empty() {
        format!("{} returned {}", what, status)
    } else {
        format!("{} returned {}: {}", what, status, truncate(body, 200))
    };
    match status {
        StatusCode::NOT_FOUND => CopyError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CopyError::PermissionDenied(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => CopyError::Http {
            message,
            retryable: true,
        },
        s if s.is_server_error() => CopyError::Http {
            message,
            retryable: true,
        },
        _ => CopyError::Http {
            message,
            retryable: false,
        },
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bssh_copy_core::error::ErrorKind;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error("copy", StatusCode::NOT_FOUND, ""),
            CopyError::NotFound(_)
        ));
        assert!(matches!(
            status_error("copy", StatusCode::FORBIDDEN, "nope"),
            CopyError::PermissionDenied(_)
        ));
        assert_eq!(
            status_error("copy", StatusCode::SERVICE_UNAVAILABLE, "").kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            status_error("copy", StatusCode::TOO_MANY_REQUESTS, "").kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            status_error("copy", StatusCode::BAD_REQUEST, "bad").kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_status_message_is_truncated() {
        let body = "x".repeat(500);
        let err = status_error("schema", StatusCode::BAD_GATEWAY, &body);
        assert!(err.to_string().len() < 300);
    }

    #[test]
    fn test_endpoint_joining() {
        let client =
            ServiceClient::new(reqwest::Client::new(), "https://copy.example.org/", None).unwrap();
        assert_eq!(
            client.endpoint(&["api", "v1", "copy-jobs"]).unwrap().as_str(),
            "https://copy.example.org/api/v1/copy-jobs"
        );

        let nested =
            ServiceClient::new(reqwest::Client::new(), "https://gw.example.org/file/", None).unwrap();
        assert_eq!(
            nested.endpoint(&["api", "v1", "s3"]).unwrap().as_str(),
            "https://gw.example.org/file/api/v1/s3"
        );
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client =
            ServiceClient::new(reqwest::Client::new(), "https://file.example.org", None).unwrap();
        let url = client
            .endpoint(&["api", "v1", "s3", "crawl", "sync", "a/b c"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://file.example.org/api/v1/s3/crawl/sync/a%2Fb%20c"
        );
        let url = client
            .endpoint(&["api", "v1", "sequence", "231116_A01052_0172_BHVLM5DSX7", "sample_sheet"])
            .unwrap();
        assert_eq!(url.path_segments().unwrap().nth(3), Some("231116_A01052_0172_BHVLM5DSX7"));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            ServiceClient::new(reqwest::Client::new(), "not a url", None),
            Err(CopyError::Config(_))
        ));
        assert!(ServiceClient::new(reqwest::Client::new(), "mailto:ops@example.org", None).is_err());
    }

    #[test]
    fn test_transport_retryable() {
        assert!(transport_retryable(true, false));
        assert!(transport_retryable(false, true));
        assert!(!transport_retryable(false, false));
    }

    #[tokio::test]
    async fn test_malformed_request_is_not_retried() {
        let err = reqwest::Client::new()
            .get("http://[::1")
            .send()
            .await
            .unwrap_err();
        assert_eq!(transport_error("copy", err).kind(), ErrorKind::Fatal);
    }
}
