//! Cluster info document — the decoded response of `GET /` on an
//! Elasticsearch node.
//!
//! The retriever treats this as an immutable snapshot: every successful
//! fetch produces a fresh value that replaces the previous one wholesale.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Labels ──────────────────────────────────────────────────────────

pub const LABEL_CLUSTER: &str = "cluster";
pub const LABEL_CLUSTER_UUID: &str = "cluster_uuid";
pub const LABEL_VERSION: &str = "version";
pub const LABEL_BUILD_HASH: &str = "build_hash";
pub const LABEL_BUILD_DATE: &str = "build_date";
pub const LABEL_LUCENE_VERSION: &str = "lucene_version";
pub const LABEL_BUILD_FLAVOR: &str = "build_flavor";
pub const LABEL_BUILD_TYPE: &str = "build_type";

/// Every label name a document can produce, in exposition order.
pub const ALL_LABELS: &[&str] = &[
    LABEL_CLUSTER,
    LABEL_CLUSTER_UUID,
    LABEL_VERSION,
    LABEL_BUILD_HASH,
    LABEL_BUILD_DATE,
    LABEL_LUCENE_VERSION,
    LABEL_BUILD_FLAVOR,
    LABEL_BUILD_TYPE,
];

// ── Document ────────────────────────────────────────────────────────

/// Node and cluster identity as reported by the root endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Name of the node that answered
    pub name: String,
    pub cluster_name: String,
    pub cluster_uuid: String,
    pub version: VersionInfo,
    #[serde(default)]
    pub tagline: String,
}

/// Build information of the answering node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub number: String,
    /// Only reported by 6.3+ ("default" / "oss")
    #[serde(default)]
    pub build_flavor: Option<String>,
    #[serde(default)]
    pub build_type: Option<String>,
    pub build_hash: String,
    pub build_date: String,
    #[serde(default)]
    pub build_snapshot: bool,
    pub lucene_version: String,
    #[serde(default)]
    pub minimum_wire_compatibility_version: Option<String>,
    #[serde(default)]
    pub minimum_index_compatibility_version: Option<String>,
}

impl ClusterInfo {
    /// The label set this document contributes to metrics.
    ///
    /// Optional build fields only appear when the node reports them, so
    /// two documents from different nodes may differ in shape.
    pub fn labels(&self) -> BTreeMap<&'static str, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_CLUSTER, self.cluster_name.clone());
        labels.insert(LABEL_CLUSTER_UUID, self.cluster_uuid.clone());
        labels.insert(LABEL_VERSION, self.version.number.clone());
        labels.insert(LABEL_BUILD_HASH, self.version.build_hash.clone());
        labels.insert(LABEL_BUILD_DATE, self.version.build_date.clone());
        labels.insert(LABEL_LUCENE_VERSION, self.version.lucene_version.clone());
        if let Some(flavor) = &self.version.build_flavor {
            labels.insert(LABEL_BUILD_FLAVOR, flavor.clone());
        }
        if let Some(build_type) = &self.version.build_type {
            labels.insert(LABEL_BUILD_TYPE, build_type.clone());
        }
        labels
    }
}

#[cfg(test)]
pub(crate) fn sample(cluster_name: &str, number: &str) -> ClusterInfo {
    ClusterInfo {
        name: "node-1".into(),
        cluster_name: cluster_name.into(),
        cluster_uuid: "3qps7bcWTqyzV49ApmPVfw".into(),
        version: VersionInfo {
            number: number.into(),
            build_flavor: None,
            build_type: None,
            build_hash: "0fbcaba".into(),
            build_date: "2018-05-10T17:12:23.505Z".into(),
            build_snapshot: false,
            lucene_version: "7.3.1".into(),
            minimum_wire_compatibility_version: None,
            minimum_index_compatibility_version: None,
        },
        tagline: "You Know, for Search".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ES_6_3_ROOT: &str = r#"{
        "name": "es-data-0",
        "cluster_name": "elasticsearch",
        "cluster_uuid": "Ii5M0EKZSqa9lR_8LeuMcw",
        "version": {
            "number": "6.3.0",
            "build_flavor": "default",
            "build_type": "tar",
            "build_hash": "424e937",
            "build_date": "2018-06-11T23:38:03.357887Z",
            "build_snapshot": false,
            "lucene_version": "7.3.1",
            "minimum_wire_compatibility_version": "5.6.0",
            "minimum_index_compatibility_version": "5.0.0"
        },
        "tagline": "You Know, for Search"
    }"#;

    const ES_5_ROOT: &str = r#"{
        "name": "gOHeGzS",
        "cluster_name": "elasticsearch",
        "cluster_uuid": "3qps7bcWTqyzV49ApmPVfw",
        "version": {
            "number": "5.6.9",
            "build_hash": "877a590",
            "build_date": "2018-04-12T16:25:14.838Z",
            "build_snapshot": false,
            "lucene_version": "6.6.1"
        },
        "tagline": "You Know, for Search"
    }"#;

    #[test]
    fn test_decode_with_build_flavor() {
        let info: ClusterInfo = serde_json::from_str(ES_6_3_ROOT).unwrap();
        assert_eq!(info.cluster_name, "elasticsearch");
        assert_eq!(info.version.number, "6.3.0");
        assert_eq!(info.version.build_flavor.as_deref(), Some("default"));

        let labels = info.labels();
        assert_eq!(labels.len(), ALL_LABELS.len());
        assert_eq!(labels[LABEL_BUILD_TYPE], "tar");
    }

    #[test]
    fn test_labels_omit_unreported_fields() {
        let info: ClusterInfo = serde_json::from_str(ES_5_ROOT).unwrap();
        let labels = info.labels();
        assert_eq!(labels.len(), 6);
        assert!(!labels.contains_key(LABEL_BUILD_FLAVOR));
        assert_eq!(labels[LABEL_CLUSTER], "elasticsearch");
        assert_eq!(labels[LABEL_VERSION], "5.6.9");
        assert_eq!(labels[LABEL_LUCENE_VERSION], "6.6.1");
    }

    #[test]
    fn test_decode_rejects_missing_version() {
        let body = r#"{"name":"n","cluster_name":"c","cluster_uuid":"u"}"#;
        assert!(serde_json::from_str::<ClusterInfo>(body).is_err());
    }
}
