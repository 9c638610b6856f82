//! Storage orchestration for Lookout.
//!
//! The orchestrator assembles collection and snapshot inventories by trying
//! backends in a fixed priority order:
//!
//! 1. **Object storage**, when its configuration resolves as usable
//! 2. **Node-local disk**, when pod identities are known and the exec
//!    transport is available
//! 3. **Cluster HTTP API**, when nothing higher-priority yielded results
//!
//! An *empty success* falls through to the next backend; an *error* aborts
//! the cycle without caching, so the next call retries from the top instead
//! of trusting a possibly-wrong empty answer. Successful inventories are
//! cached with single-flight protection.

mod api;
mod cache;
mod disk;
mod object;

pub use api::ApiBackend;
pub use cache::SingleFlightCache;
pub use disk::DiskBackend;
pub use object::{
    decode_key, object_key, ObjectStorageConfigProvider, ObjectStore, ObjectStoreProvider,
    S3SnapshotStore, S3StoreProvider, StaticObjectStorageConfig,
};

use crate::client::{ByteStream, ClientFactory};
use crate::cluster::ClusterMonitor;
use crate::error::{LookoutError, Result};
use crate::types::{
    ClusterState, CollectionRecord, NodeHealth, SnapshotRecord, SnapshotSource,
};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a deletion should be carried out, with the identity that backend
/// needs.
#[derive(Debug, Clone)]
pub enum SnapshotLocation {
    /// Delete the object under the snapshots prefix.
    ObjectStorage,
    /// Delete the file on one pod's disk.
    NodeDisk {
        pod: String,
        namespace: Option<String>,
    },
    /// Delete through one node's HTTP API.
    ClusterApi { node_url: String },
}

impl SnapshotLocation {
    fn source(&self) -> SnapshotSource {
        match self {
            SnapshotLocation::ObjectStorage => SnapshotSource::ObjectStorage,
            SnapshotLocation::NodeDisk { .. } => SnapshotSource::NodeDisk,
            SnapshotLocation::ClusterApi { .. } => SnapshotSource::ClusterApi,
        }
    }
}

/// The produced surface of the sidecar: cluster state plus
/// collection/snapshot operations, consumed by thin controllers.
pub struct StorageOrchestrator {
    monitor: Arc<ClusterMonitor>,
    object: Arc<dyn ObjectStoreProvider>,
    disk: Option<DiskBackend>,
    api: ApiBackend,
    factory: Arc<dyn ClientFactory>,
    namespace: Option<String>,
    collections_cache: SingleFlightCache<Vec<CollectionRecord>>,
    snapshots_cache: SingleFlightCache<Vec<SnapshotRecord>>,
}

impl StorageOrchestrator {
    pub fn new(
        monitor: Arc<ClusterMonitor>,
        object: Arc<dyn ObjectStoreProvider>,
        disk: Option<DiskBackend>,
        factory: Arc<dyn ClientFactory>,
        namespace: Option<String>,
        inventory_ttl: Duration,
    ) -> Self {
        Self {
            monitor,
            object,
            disk,
            api: ApiBackend::new(factory.clone()),
            factory,
            namespace,
            collections_cache: SingleFlightCache::new(inventory_ttl),
            snapshots_cache: SingleFlightCache::new(inventory_ttl),
        }
    }

    /// The current cluster state, scanning once if no cycle has run yet.
    pub async fn cluster_state(&self) -> Result<ClusterState> {
        if let Some(state) = self.monitor.state().await {
            return Ok(state);
        }
        self.monitor.refresh(&CancellationToken::new()).await
    }

    /// The collection inventory, served from cache unless stale or forced.
    pub async fn collections_info(&self, force_refresh: bool) -> Result<Vec<CollectionRecord>> {
        self.collections_cache
            .get_or_fetch(force_refresh, || self.fetch_collections())
            .await
    }

    /// The snapshot inventory, served from cache unless stale or forced.
    pub async fn snapshots_info(&self, force_refresh: bool) -> Result<Vec<SnapshotRecord>> {
        self.snapshots_cache
            .get_or_fetch(force_refresh, || self.fetch_snapshots())
            .await
    }

    /// Create a snapshot of a collection on every healthy node.
    pub async fn create_snapshot(&self, collection: &str) -> Result<Vec<SnapshotRecord>> {
        let state = self.cluster_state().await?;
        let healthy: Vec<NodeHealth> = state.healthy_nodes().cloned().collect();
        if healthy.is_empty() {
            return Err(LookoutError::NoClusterState(
                "no healthy nodes to snapshot".into(),
            ));
        }

        let creations = healthy.iter().map(|node| async move {
            let client = self.factory.client_for_url(&node.url);
            client
                .create_snapshot(collection)
                .await
                .map(|description| (node, description))
        });

        let mut records = Vec::new();
        let mut failures = 0usize;
        for result in join_all(creations).await {
            match result {
                Ok((node, description)) => {
                    info!(node = %node.url, snapshot = %description.name, "snapshot created");
                    records.push(SnapshotRecord {
                        collection: collection.to_string(),
                        snapshot: description.name,
                        node_url: Some(node.url.clone()),
                        pod: node.pod.clone(),
                        peer_id: node.peer_id.clone(),
                        namespace: node.namespace.clone(),
                        size_bytes: description.size,
                        source: SnapshotSource::ClusterApi,
                        issues: Vec::new(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "snapshot creation failed on one node");
                    failures += 1;
                }
            }
        }

        if failures == healthy.len() {
            return Err(LookoutError::BackendFailed(
                "snapshot creation failed on every node".into(),
            ));
        }

        self.snapshots_cache.invalidate().await;
        Ok(records)
    }

    /// Delete a snapshot from an explicitly chosen backend.
    pub async fn delete_snapshot(
        &self,
        location: SnapshotLocation,
        collection: &str,
        snapshot: &str,
    ) -> Result<()> {
        match &location {
            SnapshotLocation::ObjectStorage => {
                let store = self
                    .object
                    .store(self.namespace.as_deref())
                    .await?
                    .ok_or_else(|| {
                        LookoutError::ObjectStorage("object storage is not configured".into())
                    })?;
                store.delete_snapshot(collection, snapshot).await?;
            }
            SnapshotLocation::NodeDisk { pod, namespace } => {
                let disk = self.disk.as_ref().ok_or(LookoutError::ExecUnavailable)?;
                debug!(
                    %pod,
                    namespace = namespace.as_deref().unwrap_or("-"),
                    "deleting snapshot from node disk"
                );
                disk.delete_snapshot(pod, collection, snapshot).await?;
            }
            SnapshotLocation::ClusterApi { node_url } => {
                let client = self.factory.client_for_url(node_url);
                client.delete_snapshot(collection, snapshot).await?;
            }
        }

        info!(
            source = %location.source(),
            %collection,
            %snapshot,
            "snapshot deleted"
        );
        self.snapshots_cache.invalidate().await;
        Ok(())
    }

    /// Download a snapshot, trying object storage, then the cluster API,
    /// then node disk, until one backend yields a stream.
    pub async fn download_snapshot(
        &self,
        collection: &str,
        snapshot: &str,
    ) -> Result<(ByteStream, SnapshotSource)> {
        if let Some(store) = self.object.store(self.namespace.as_deref()).await? {
            match store.download_snapshot(collection, snapshot).await {
                Ok(Some(stream)) => return Ok((stream, SnapshotSource::ObjectStorage)),
                Ok(None) => debug!(%snapshot, "snapshot not in object storage; trying next backend"),
                Err(e) => warn!(error = %e, "object storage download failed; trying next backend"),
            }
        }

        let state = self.cluster_state().await?;
        for node in state.healthy_nodes() {
            let client = self.factory.client_for_url(&node.url);
            match client.download_snapshot(collection, snapshot).await {
                Ok(Some(stream)) => return Ok((stream, SnapshotSource::ClusterApi)),
                Ok(None) => {}
                Err(e) => {
                    warn!(node = %node.url, error = %e, "API download failed; trying next node")
                }
            }
        }

        if let Some(disk) = &self.disk {
            for target in state.pod_targets() {
                match disk.download_snapshot(&target.pod, collection, snapshot).await {
                    Ok(Some(stream)) => return Ok((stream, SnapshotSource::NodeDisk)),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(pod = %target.pod, error = %e, "disk download failed; trying next pod")
                    }
                }
            }
        }

        Err(LookoutError::SnapshotNotFound(format!(
            "{}/{}",
            collection, snapshot
        )))
    }

    /// Replicate a shard between two peers through one node's API.
    pub async fn replicate_shards(
        &self,
        node_url: &str,
        collection: &str,
        shard_id: u32,
        from_peer: u64,
        to_peer: u64,
    ) -> Result<bool> {
        let client = self.factory.client_for_url(node_url);
        client
            .replicate_shard(collection, shard_id, from_peer, to_peer)
            .await
    }

    /// Restore a collection from a snapshot location through one node's API.
    ///
    /// Recovery is an operator-driven action; nothing here triggers it
    /// automatically.
    pub async fn recover_from_snapshot(
        &self,
        node_url: &str,
        collection: &str,
        location: &str,
    ) -> Result<bool> {
        let client = self.factory.client_for_url(node_url);
        client.recover_from_snapshot(collection, location).await
    }

    async fn fetch_collections(&self) -> Result<Vec<CollectionRecord>> {
        if let Some(store) = self.object.store(self.namespace.as_deref()).await? {
            let records = store.list_collections().await?;
            if !records.is_empty() {
                return Ok(records);
            }
            debug!("object storage yielded no collections; falling through");
        }

        let state = self.cluster_state().await?;

        if let Some(disk) = &self.disk {
            let pods = state.pod_targets();
            if !pods.is_empty() {
                let records = disk.list_collections(&pods).await?;
                if !records.is_empty() {
                    return Ok(records);
                }
                debug!("node disks yielded no collections; falling through");
            }
        }

        let healthy: Vec<NodeHealth> = state.healthy_nodes().cloned().collect();
        self.api.list_collections(&healthy).await
    }

    async fn fetch_snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        if let Some(store) = self.object.store(self.namespace.as_deref()).await? {
            let records = store.list_snapshots().await?;
            if !records.is_empty() {
                return Ok(records);
            }
            debug!("object storage yielded no snapshots; falling through");
        }

        let state = self.cluster_state().await?;

        if let Some(disk) = &self.disk {
            let pods = state.pod_targets();
            if !pods.is_empty() {
                let records = disk.list_snapshots(&pods).await?;
                if !records.is_empty() {
                    return Ok(records);
                }
                debug!("node disks yielded no snapshots; falling through");
            }
        }

        let healthy: Vec<NodeHealth> = state.healthy_nodes().cloned().collect();
        let mut records = self.api.list_snapshots(&healthy).await?;
        self.cross_check_disk(&state, &mut records).await;
        Ok(records)
    }

    /// Flag API-listed snapshots that are absent from their pod's disk. Best
    /// effort: a failing cross-check never fails the sweep.
    async fn cross_check_disk(&self, state: &ClusterState, records: &mut [SnapshotRecord]) {
        let Some(disk) = &self.disk else { return };

        for target in state.pod_targets() {
            match disk.snapshot_files(&target).await {
                Ok(files) => {
                    let on_disk: HashSet<(String, String)> = files.into_iter().collect();
                    for record in records
                        .iter_mut()
                        .filter(|r| r.pod.as_deref() == Some(target.pod.as_str()))
                    {
                        let key = (record.collection.clone(), record.snapshot.clone());
                        if !on_disk.contains(&key) {
                            record
                                .issues
                                .push("exists in API but missing from disk".to_string());
                        }
                    }
                }
                Err(e) => {
                    debug!(pod = %target.pod, error = %e, "disk cross-check skipped");
                }
            }
        }
    }
}
