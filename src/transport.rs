//! HTTP transport to the remote collector.
//!
//! Every request carries the three static credential headers and a JSON
//! body. The collector answers `202 Accepted` on success; every other
//! status, including other 2xx codes, counts as a failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use tracing::debug;

use crate::config::Config;

/// Path logs are POSTed to.
pub const LOGS_PATH: &str = "/logs";

/// Path hardware samples are PATCHed to.
pub const HARDWARE_PATH: &str = "/logs/projects/hardware";

/// Header carrying the client id.
pub const CLIENT_HEADER: &str = "X-CLIENT";

/// Header carrying the project key.
pub const KEY_HEADER: &str = "X-KEY";

/// Status code the collector answers with on success.
pub const ACCEPTED: StatusCode = StatusCode::ACCEPTED;

/// Response received from the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: String,
}

impl TransportResponse {
    /// True only for `202 Accepted`.
    pub fn is_accepted(&self) -> bool {
        self.status == ACCEPTED
    }

    /// Body if there is one, otherwise the status code.
    pub fn describe(&self) -> String {
        if self.body.trim().is_empty() {
            self.status.as_u16().to_string()
        } else {
            self.body.clone()
        }
    }
}

/// Errors that can occur while talking to the collector.
#[derive(Debug)]
pub enum TransportError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Request(e) => write!(f, "HTTP request failed: {}", e),
            TransportError::Timeout => write!(f, "Request timed out"),
            TransportError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Request(err)
        }
    }
}

/// Sends serialized payloads to the collector.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Vec<u8>,
    ) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport.
///
/// The underlying client is built once and reused for connection pooling.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the collector described by `config`.
    ///
    /// Certificate verification stays on unless
    /// `config.accept_invalid_certs` is set.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Config` if a credential is not a valid
    /// header value or the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let headers = credential_headers(config)?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            timeout: config.request_timeout,
        })
    }

    /// Collector base URL, without a path.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Vec<u8>,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.url(path);
        debug!(method = %method, url = %url, bytes = body.len(), "Sending to collector");

        let response = self.client.request(method, &url).body(body).send().await?;

        let status = response.status();
        // A body we cannot read still leaves the status to report
        let body = response.text().await.unwrap_or_default();

        debug!(status = status.as_u16(), "Collector responded");
        Ok(TransportResponse { status, body })
    }
}

/// Build the static headers identifying client, secret and project.
fn credential_headers(config: &Config) -> Result<HeaderMap, TransportError> {
    let value = |name: &str, raw: &str| {
        HeaderValue::from_str(raw)
            .map_err(|_| TransportError::Config(format!("invalid {} header value", name)))
    };

    let mut headers = HeaderMap::new();
    headers.insert(CLIENT_HEADER, value(CLIENT_HEADER, &config.client)?);
    headers.insert(AUTHORIZATION, value("Authorization", &config.client_key)?);
    headers.insert(KEY_HEADER, value(KEY_HEADER, &config.project_key)?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}
