//! Prometheus exporter for Elasticsearch.
//!
//! The centrepiece is the cluster info retriever: a single background
//! poller of the node's root endpoint whose result is cached, exported as
//! a metric, and pushed to every collector that registered interest.

pub mod clusterinfo;
pub mod collector;
pub mod config;
pub mod server;

/// Metric namespace shared by every collector.
pub const NAMESPACE: &str = "elasticsearch";
