//! Prometheus metrics for the Lookout sidecar.
//!
//! Core logic reports through the [`Telemetry`] trait so the sink can never
//! block or fail an observation path; the prometheus implementation just sets
//! gauges on the global registry.

use lazy_static::lazy_static;
use prometheus::{register_gauge_vec, register_int_gauge, GaugeVec, IntGauge};

lazy_static! {
    /// Number of healthy cluster nodes, as of the last scan.
    pub static ref HEALTHY_NODES: IntGauge = register_int_gauge!(
        "lookout_healthy_nodes",
        "Number of healthy cluster nodes"
    )
    .unwrap();

    /// Collection size on disk, per pod and collection.
    pub static ref COLLECTION_SIZE: GaugeVec = register_gauge_vec!(
        "lookout_collection_size_bytes",
        "Collection size on disk in bytes",
        &["pod", "collection"]
    )
    .unwrap();
}

/// Fire-and-forget telemetry sink.
pub trait Telemetry: Send + Sync {
    /// Record how many nodes were healthy after a scan.
    fn record_healthy_nodes(&self, count: usize);

    /// Record a collection's on-disk size for one pod.
    fn record_collection_size(&self, pod: &str, collection: &str, bytes: u64);
}

/// Prometheus-backed sink.
pub struct PrometheusTelemetry;

impl Telemetry for PrometheusTelemetry {
    fn record_healthy_nodes(&self, count: usize) {
        HEALTHY_NODES.set(count as i64);
    }

    fn record_collection_size(&self, pod: &str, collection: &str, bytes: u64) {
        COLLECTION_SIZE
            .with_label_values(&[pod, collection])
            .set(bytes as f64);
    }
}

/// Sink that drops everything; used in tests.
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record_healthy_nodes(&self, _count: usize) {}

    fn record_collection_size(&self, _pod: &str, _collection: &str, _bytes: u64) {}
}
