//! Cluster info retriever — one shared poller for the node's root
//! endpoint.
//!
//! Collectors that want to label their output with the cluster name
//! register as consumers instead of polling Elasticsearch themselves. The
//! same cache backs the `elasticsearch_clusterinfo_version_info` metric.

pub mod cache;
pub mod consumer;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod retriever;
pub mod types;

pub use cache::{Cache, CacheEntry};
pub use consumer::{ChannelConsumer, Consumer, ConsumerRegistry, DEFAULT_QUEUE_CAPACITY};
pub use error::{ConsumerError, FetchError, RegistrationError, RunError, StartupError};
pub use fetcher::{ClusterInfoSource, HttpFetcher};
pub use metrics::ClusterInfoCollector;
pub use retriever::{LoopState, Retriever, RetrieverConfig, DEFAULT_INITIAL_TIMEOUT};
pub use types::{ClusterInfo, VersionInfo};
