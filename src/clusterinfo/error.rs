//! Error taxonomy for the cluster info retriever.
//!
//! Fetch errors never escape the refresh loop; they are stored in the
//! cache and broadcast as data. Registration and lifecycle errors are
//! returned to the caller.

use std::time::Duration;
use thiserror::Error;

/// A single request/decode cycle against the root endpoint failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to get cluster info from {endpoint}: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cluster info request to {endpoint} failed with HTTP status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("failed to decode cluster info from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl FetchError {
    /// Short machine-friendly kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network { .. } => "network",
            FetchError::Status { .. } => "http_status",
            FetchError::Decode { .. } => "decode",
        }
    }
}

/// Endpoint configuration that can never produce a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cluster info endpoint {endpoint:?}: {reason}")]
pub struct StartupError {
    pub endpoint: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("consumer {0:?} is already registered")]
    DuplicateConsumer(String),

    /// Delivery workers run on the tokio runtime; registration must
    /// happen from within one.
    #[error("consumer {0:?} registered outside a tokio runtime")]
    NoRuntime(String),
}

/// Returned by `Retriever::run`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// The initial fetch did not finish in time. Informational: the loop
    /// keeps running and still applies that fetch once it resolves.
    #[error("initial cluster info call timed out after {0:?}")]
    InitialCallTimeout(Duration),

    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error("cluster info retriever has already been started")]
    AlreadyStarted,
}

/// A consumer could not take an update.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("consumer channel is closed")]
    Closed,

    #[error("{0}")]
    Rejected(String),
}
