//! Lookout - an operational sidecar for multi-node vector-database clusters.
//!
//! Lookout observes a cluster from the outside: it polls every configured
//! node, reconstructs a consistent view of membership, flags split-brain
//! conditions, and assembles collection/snapshot inventories across three
//! storage backends with graceful fallback.
//!
//! # Features
//!
//! - **Concurrent health polling**: bounded per-node probes, fan-out/fan-in,
//!   cancellation-aware.
//! - **Split-brain detection**: majority membership view over peer-id sets;
//!   divergent nodes are flagged, never guessed at.
//! - **Fallback retrieval**: object storage, node-local disk over the
//!   Kubernetes exec channel, and the cluster's own HTTP API, in priority
//!   order with single-flight caching.
//! - **Integrity-checked downloads**: multiplexed exec streams demultiplexed
//!   byte-exactly, base64-unwrapped, SHA-256-verified.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Lookout                           │
//! ├──────────────────────────────────────────────────────────┤
//! │  Cluster Observer: Health Poller | Split-Brain Detector  │
//! ├──────────────────────────────────────────────────────────┤
//! │  Storage Orchestrator: Object Storage | API | Node Disk  │
//! ├──────────────────────────────────────────────────────────┤
//! │  Transports: HTTP Client | Kubernetes Exec Channel       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use lookout::config::LookoutConfig;
//!
//! #[tokio::main]
//! async fn main() -> lookout::Result<()> {
//!     let config = LookoutConfig::development();
//!     lookout::run(config).await
//! }
//! ```

pub mod client;
pub mod cluster;
pub mod config;
pub mod discovery;
pub mod error;
pub mod exec;
pub mod storage;
pub mod telemetry;
pub mod types;

pub use error::{LookoutError, Result};

use crate::client::{ClientFactory, HttpClientFactory};
use crate::cluster::{ClusterMonitor, HealthPoller};
use crate::config::LookoutConfig;
use crate::discovery::{EnvDiscovery, NodeDiscovery, StaticDiscovery};
use crate::exec::ExecTransport;
use crate::storage::{
    DiskBackend, S3StoreProvider, StaticObjectStorageConfig, StorageOrchestrator,
};
use crate::telemetry::{PrometheusTelemetry, Telemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Default connect timeout for per-node HTTP clients.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The assembled sidecar: the cluster monitor plus the storage surface
/// consumed by external controllers.
pub struct Sidecar {
    /// Owns the poll loop and the shared cluster state.
    pub monitor: Arc<ClusterMonitor>,
    /// Collection/snapshot operations over the fallback pipeline.
    pub storage: StorageOrchestrator,
}

impl Sidecar {
    /// Wire up every component from configuration.
    pub async fn from_config(config: &LookoutConfig) -> Result<Self> {
        config.validate()?;

        let factory: Arc<dyn ClientFactory> = Arc::new(HttpClientFactory::new(
            config.cluster.api_key.clone(),
            CONNECT_TIMEOUT,
            config.cluster.request_timeout,
        ));
        let telemetry: Arc<dyn Telemetry> = Arc::new(PrometheusTelemetry);

        let discovery: Arc<dyn NodeDiscovery> = if config.cluster.nodes.is_empty() {
            Arc::new(EnvDiscovery::new(
                EnvDiscovery::DEFAULT_VAR,
                config.cluster.api_port,
                Some(config.exec.namespace.clone()),
            ))
        } else {
            Arc::new(StaticDiscovery::from_entries(
                &config.cluster.nodes,
                config.cluster.api_port,
                Some(config.exec.namespace.as_str()),
            )?)
        };

        let poller = HealthPoller::new(
            factory.clone(),
            telemetry.clone(),
            config.cluster.probe_timeout,
            config.cluster.check_collections,
        );
        let monitor = Arc::new(ClusterMonitor::new(
            poller,
            discovery,
            config.cluster.poll_interval,
        ));

        let disk = ExecTransport::connect(
            config.exec.namespace.clone(),
            config.exec.container.clone(),
        )
        .await
        .map(|transport| {
            DiskBackend::new(
                Arc::new(transport),
                telemetry.clone(),
                config.storage.collections_path.clone(),
                config.storage.snapshots_path.clone(),
            )
        });

        let object = Arc::new(S3StoreProvider::new(
            Arc::new(StaticObjectStorageConfig(
                config.storage.object_storage.clone(),
            )),
            config.storage.snapshots_prefix.clone(),
        ));

        let storage = StorageOrchestrator::new(
            monitor.clone(),
            object,
            disk,
            factory,
            Some(config.exec.namespace.clone()),
            config.storage.inventory_ttl,
        );

        Ok(Self { monitor, storage })
    }

    /// Drive the background poll loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        self.monitor.run(cancel).await;
    }
}

/// Run the sidecar until SIGINT.
pub async fn run(config: LookoutConfig) -> Result<()> {
    let sidecar = Sidecar::from_config(&config).await?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    sidecar.run(cancel).await;
    Ok(())
}
