//! Cluster info fetcher — one synchronous request/decode cycle against
//! the node's root endpoint.
//!
//! The refresh loop only sees the `ClusterInfoSource` trait; `HttpFetcher`
//! is the production implementation backed by reqwest.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::error::{FetchError, StartupError};
use super::types::ClusterInfo;

/// Anything that can produce a fresh `ClusterInfo`.
#[async_trait]
pub trait ClusterInfoSource: Send + Sync {
    /// Endpoint description used in log fields.
    fn endpoint(&self) -> &str;

    /// Perform one fetch. Must not touch any cache.
    async fn fetch(&self) -> Result<ClusterInfo, FetchError>;
}

/// Fetches `GET <base>/` with a per-call timeout.
#[cfg_attr(test, derive(Debug))]
pub struct HttpFetcher {
    client: reqwest::Client,
    url: Url,
    endpoint: String,
}

impl HttpFetcher {
    /// Resolve the base URL and build the client.
    ///
    /// Fails when the URL does not parse, is not http(s), or the client
    /// cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StartupError> {
        let url = Url::parse(base_url).map_err(|e| StartupError {
            endpoint: redact_raw(base_url),
            reason: e.to_string(),
        })?;
        let endpoint = redact(&url);
        let startup_error = |reason: String| StartupError {
            endpoint: endpoint.clone(),
            reason,
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Err(startup_error(format!(
                "unsupported scheme {:?}, expected http or https",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(startup_error("missing host".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| startup_error(e.to_string()))?;

        Ok(Self {
            client,
            url,
            endpoint,
        })
    }
}

#[async_trait]
impl ClusterInfoSource for HttpFetcher {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self) -> Result<ClusterInfo, FetchError> {
        debug!(endpoint = %self.endpoint, "Fetching cluster info");

        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Network {
                endpoint: self.endpoint.clone(),
                source: source.without_url(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
            });
        }

        let body = resp.bytes().await.map_err(|source| FetchError::Network {
            endpoint: self.endpoint.clone(),
            source: source.without_url(),
        })?;

        serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        })
    }
}

/// Drop credentials from a URL before it ends up in logs or errors.
pub(crate) fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    if !shown.username().is_empty() {
        let _ = shown.set_username("");
    }
    if shown.password().is_some() {
        let _ = shown.set_password(None);
    }
    shown.to_string()
}

/// `redact` for input that did not parse: cut any `user:pass@` prefix
/// from the authority.
fn redact_raw(raw: &str) -> String {
    let (scheme, rest) = match raw.find("://") {
        Some(i) => raw.split_at(i + 3),
        None => ("", raw),
    };
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}{}", scheme, &rest[at + 1..]),
        None => raw.to_string(),
    }
}
