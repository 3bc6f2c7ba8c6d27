//! Prometheus adapter for the cluster info cache.
//!
//! Exposes the cached document as a constant `1` gauge whose labels carry
//! the cluster identity and version. Nothing is emitted until the first
//! successful fetch; during an outage the last good document keeps being
//! reported.

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::cache::Cache;
use super::types::ALL_LABELS;

pub const VERSION_INFO_METRIC: &str = "elasticsearch_clusterinfo_version_info";
const VERSION_INFO_HELP: &str = "Constant metric with ES version information as labels";

pub struct ClusterInfoCollector {
    cache: Arc<Cache>,
    desc: Desc,
}

impl ClusterInfoCollector {
    pub fn new(cache: Arc<Cache>) -> prometheus::Result<Self> {
        let desc = Desc::new(
            VERSION_INFO_METRIC.to_string(),
            VERSION_INFO_HELP.to_string(),
            ALL_LABELS.iter().map(|l| l.to_string()).collect(),
            HashMap::new(),
        )?;
        Ok(Self { cache, desc })
    }
}

impl Collector for ClusterInfoCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let entry = self.cache.get();
        let Some(document) = entry.document.as_ref() else {
            return Vec::new();
        };

        // Label names come from the current document only; a fresh vec per
        // scrape means a change in shape never clashes with an older one.
        let labels = document.labels();
        let names: Vec<&str> = labels.keys().copied().collect();
        let values: Vec<&str> = labels.values().map(String::as_str).collect();

        let gauge = match GaugeVec::new(Opts::new(VERSION_INFO_METRIC, VERSION_INFO_HELP), &names) {
            Ok(g) => g,
            Err(e) => {
                warn!("Failed to build cluster info metric: {}", e);
                return Vec::new();
            }
        };
        match gauge.get_metric_with_label_values(&values) {
            Ok(g) => g.set(1.0),
            Err(e) => {
                warn!("Failed to label cluster info metric: {}", e);
                return Vec::new();
            }
        }
        gauge.collect()
    }
}
