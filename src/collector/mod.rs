//! Endpoint scrapers and small collectors registered next to the
//! cluster info metric.

pub mod all_settings;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use std::sync::Arc;

pub use all_settings::AllSettings;

/// Registers an `Arc`-shared collector with a prometheus `Registry` while
/// other owners (scrape hooks, the retriever) keep their own handle.
pub struct Shared<C>(pub Arc<C>);

impl<C: Collector> Collector for Shared<C> {
    fn desc(&self) -> Vec<&Desc> {
        self.0.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.0.collect()
    }
}

/// `elasticsearch_exporter_build_info{version}` set to 1.
pub fn build_info() -> prometheus::Result<GaugeVec> {
    let gauge = GaugeVec::new(
        Opts::new(
            "exporter_build_info",
            "A metric with a constant '1' value labeled by the exporter version.",
        )
        .namespace(crate::NAMESPACE),
        &["version"],
    )?;
    gauge.with_label_values(&[env!("CARGO_PKG_VERSION")]).set(1.0);
    Ok(gauge)
}
