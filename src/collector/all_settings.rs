//! All-settings scraper — counts indices blocked by the disk watermark.
//!
//! Hits `GET /_all/_settings` on every scrape and reports how many
//! indices carry `index.blocks.read_only_allow_delete = "true"`. Gauges
//! are labelled with the cluster name pushed by the cluster info
//! retriever.

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, IntCounter, Opts};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::clusterinfo::fetcher::redact;
use crate::clusterinfo::{CacheEntry, Consumer, ConsumerError};

const SUBSYSTEM: &str = "allsettings_stats";
const UNKNOWN_CLUSTER: &str = "unknown_cluster";

// ── Response ────────────────────────────────────────────────────────

/// Index name → settings.
pub type AllSettingsResponse = HashMap<String, IndexSettings>;

#[derive(Debug, Default, Deserialize)]
pub struct IndexSettings {
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub index: IndexInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexInfo {
    #[serde(default)]
    pub blocks: Blocks,
}

#[derive(Debug, Default, Deserialize)]
pub struct Blocks {
    #[serde(default)]
    pub read_only_allow_delete: Option<String>,
}

/// Number of indices with the read-only-allow-delete block set.
pub fn count_read_only(settings: &AllSettingsResponse) -> usize {
    settings
        .values()
        .filter(|s| s.settings.index.blocks.read_only_allow_delete.as_deref() == Some("true"))
        .count()
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to get from {endpoint}: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request to {endpoint} failed with code {status}")]
    Status { endpoint: String, status: u16 },

    #[error("failed to parse settings JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

// ── Collector ───────────────────────────────────────────────────────

pub struct AllSettings {
    client: reqwest::Client,
    url: Url,
    /// `url` without credentials, for errors and logs
    endpoint: String,
    cluster: RwLock<String>,
    /// Cluster label the gauge series currently carry
    series_cluster: Mutex<Option<String>>,

    up: GaugeVec,
    read_only_indices: GaugeVec,
    total_scrapes: IntCounter,
    json_parse_failures: IntCounter,
}

impl AllSettings {
    pub fn new(client: reqwest::Client, base: &Url) -> prometheus::Result<Self> {
        let mut url = base.clone();
        url.set_path(&format!("{}/_all/_settings", base.path().trim_end_matches('/')));

        Ok(Self {
            client,
            endpoint: redact(&url),
            url,
            cluster: RwLock::new(UNKNOWN_CLUSTER.to_string()),
            series_cluster: Mutex::new(None),

            up: GaugeVec::new(
                opts("up", "Was the last scrape of the ElasticSearch all settings endpoint successful."),
                &["cluster"],
            )?,
            read_only_indices: GaugeVec::new(
                opts("read_only_indices", "Current number of read only indices within cluster"),
                &["cluster"],
            )?,
            total_scrapes: IntCounter::with_opts(opts(
                "total_scrapes",
                "Current total ElasticSearch all settings scrapes.",
            ))?,
            json_parse_failures: IntCounter::with_opts(opts(
                "json_parse_failures",
                "Number of errors while parsing JSON.",
            ))?,
        })
    }

    fn cluster(&self) -> String {
        self.cluster
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    async fn fetch(&self) -> Result<AllSettingsResponse, ScrapeError> {
        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|source| ScrapeError::Network {
                endpoint: self.endpoint.clone(),
                source: source.without_url(),
            })?;

        if !resp.status().is_success() {
            return Err(ScrapeError::Status {
                endpoint: self.endpoint.clone(),
                status: resp.status().as_u16(),
            });
        }

        let body = resp.bytes().await.map_err(|source| ScrapeError::Network {
            endpoint: self.endpoint.clone(),
            source: source.without_url(),
        })?;
        serde_json::from_slice(&body).map_err(|e| {
            self.json_parse_failures.inc();
            ScrapeError::Decode(e)
        })
    }

    /// Fetch the settings and update the gauges. Called once per scrape,
    /// before the registry is gathered.
    pub async fn scrape(&self) {
        self.total_scrapes.inc();
        let result = self.fetch().await;

        let cluster = self.cluster();
        let (up, read_only) = match &result {
            Ok(settings) => (1.0, count_read_only(settings) as f64),
            Err(e) => {
                warn!(
                    cluster = %cluster,
                    endpoint = %self.endpoint,
                    "Failed to fetch and decode all settings stats: {}",
                    e
                );
                (0.0, 0.0)
            }
        };

        // Concurrent scrapes must not interleave a relabel.
        let mut series_cluster = self
            .series_cluster
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        self.up.with_label_values(&[cluster.as_str()]).set(up);
        self.read_only_indices
            .with_label_values(&[cluster.as_str()])
            .set(read_only);

        // New series are in place before the old ones go, so a gather
        // never sees an empty family.
        if let Some(old) = series_cluster.as_deref() {
            if old != cluster {
                let _ = self.up.remove_label_values(&[old]);
                let _ = self.read_only_indices.remove_label_values(&[old]);
            }
        }
        *series_cluster = Some(cluster);
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help)
        .namespace(crate::NAMESPACE)
        .subsystem(SUBSYSTEM)
}

impl Collector for AllSettings {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = self.up.desc();
        descs.extend(self.total_scrapes.desc());
        descs.extend(self.read_only_indices.desc());
        descs.extend(self.json_parse_failures.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families = self.up.collect();
        families.extend(self.total_scrapes.collect());
        families.extend(self.read_only_indices.collect());
        families.extend(self.json_parse_failures.collect());
        families
    }
}

impl Consumer for AllSettings {
    fn name(&self) -> &str {
        "all_settings"
    }

    fn update(&self, entry: Arc<CacheEntry>) -> Result<(), ConsumerError> {
        if let Some(doc) = &entry.document {
            let mut cluster = self
                .cluster
                .write()
                .map_err(|_| ConsumerError::Rejected("cluster label lock poisoned".into()))?;
            *cluster = doc.cluster_name.clone();
        }
        Ok(())
    }
}
