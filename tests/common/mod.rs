//! Common test utilities for integration tests.
//!
//! Provides a simulated cluster reachable through a mock client factory, a
//! scripted object store, and a scripted exec transport, so scans and
//! inventory sweeps run without any real network or cluster.

use async_trait::async_trait;
use lookout::client::{
    ByteStream, ClientFactory, ClusterApi, ClusterInfo, CollectionInfo, PeerInfo, RaftInfo,
    SnapshotDescription,
};
use lookout::cluster::{ClusterMonitor, HealthPoller};
use lookout::discovery::StaticDiscovery;
use lookout::error::{LookoutError, Result};
use lookout::exec::{ExecStream, RemoteExec, StreamOptions};
use lookout::storage::{
    DiskBackend, ObjectStore, ObjectStoreProvider, StorageOrchestrator,
};
use lookout::telemetry::NoopTelemetry;
use lookout::types::{CollectionRecord, NodeEndpoint, SnapshotRecord, SnapshotSource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted behavior for one simulated node.
#[derive(Clone, Default)]
pub struct SimNode {
    /// The node's own peer id; `None` makes the probe response unresolvable.
    pub peer_id: Option<u64>,
    /// Peer ids the node reports (its own id is added automatically).
    pub peers: Vec<u64>,
    /// The leader this node believes in.
    pub leader: Option<u64>,
    /// Probe latency.
    pub delay: Option<Duration>,
    /// Fail the probe at the transport level.
    pub connection_error: bool,
    /// Collections served by the listing endpoint.
    pub collections: Vec<String>,
    /// Snapshots per collection.
    pub snapshots: Vec<(String, SnapshotDescription)>,
    /// Fail the collections listing.
    pub fail_collections: bool,
}

impl SimNode {
    pub fn healthy(peer_id: u64, peers: &[u64], leader: u64) -> Self {
        Self {
            peer_id: Some(peer_id),
            peers: peers.to_vec(),
            leader: Some(leader),
            ..Default::default()
        }
    }
}

/// Counts API calls across every simulated node.
#[derive(Default)]
pub struct CallLog {
    pub cluster_info: AtomicUsize,
    pub collections: AtomicUsize,
    pub snapshots: AtomicUsize,
    pub downloads: AtomicUsize,
    pub deletes: AtomicUsize,
    pub creates: AtomicUsize,
}

impl CallLog {
    pub fn snapshots_listed(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    pub fn collections_listed(&self) -> usize {
        self.collections.load(Ordering::SeqCst)
    }
}

/// A simulated cluster and the factory that reaches it.
pub struct ClusterSim {
    nodes: Vec<(String, SimNode)>,
    pub calls: Arc<CallLog>,
}

impl ClusterSim {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            calls: Arc::new(CallLog::default()),
        }
    }

    /// Register a node under `http://{host}:6333`.
    pub fn node(mut self, host: &str, node: SimNode) -> Self {
        self.nodes.push((format!("http://{}:6333", host), node));
        self
    }

    /// Endpoints in registration order.
    pub fn endpoints(&self) -> Vec<NodeEndpoint> {
        self.nodes
            .iter()
            .map(|(url, _)| {
                let host = url
                    .strip_prefix("http://")
                    .and_then(|rest| rest.rsplit_once(':'))
                    .map(|(host, _)| host)
                    .unwrap();
                let mut endpoint = NodeEndpoint::new(host, 6333);
                endpoint.pod = host.split_once('.').map(|(pod, _)| pod.to_string());
                endpoint.namespace = Some("vector".to_string());
                endpoint
            })
            .collect()
    }

    pub fn factory(&self) -> Arc<dyn ClientFactory> {
        Arc::new(SimFactory {
            nodes: self.nodes.iter().cloned().collect(),
            calls: self.calls.clone(),
        })
    }

    /// A monitor polling this cluster with short timeouts.
    pub fn monitor(&self) -> Arc<ClusterMonitor> {
        self.monitor_with_timeout(Duration::from_secs(2), false)
    }

    pub fn monitor_with_timeout(
        &self,
        probe_timeout: Duration,
        check_collections: bool,
    ) -> Arc<ClusterMonitor> {
        let poller = HealthPoller::new(
            self.factory(),
            Arc::new(NoopTelemetry),
            probe_timeout,
            check_collections,
        );
        Arc::new(ClusterMonitor::new(
            poller,
            Arc::new(StaticDiscovery::new(self.endpoints())),
            Duration::from_secs(30),
        ))
    }

    /// An orchestrator over this cluster with the given higher-priority
    /// backends.
    pub fn orchestrator(
        &self,
        object: Arc<dyn ObjectStoreProvider>,
        disk: Option<DiskBackend>,
    ) -> StorageOrchestrator {
        StorageOrchestrator::new(
            self.monitor(),
            object,
            disk,
            self.factory(),
            Some("vector".to_string()),
            Duration::from_secs(60),
        )
    }
}

struct SimFactory {
    nodes: HashMap<String, SimNode>,
    calls: Arc<CallLog>,
}

impl ClientFactory for SimFactory {
    fn client(&self, endpoint: &NodeEndpoint) -> Arc<dyn ClusterApi> {
        self.client_for_url(&endpoint.url())
    }

    fn client_for_url(&self, url: &str) -> Arc<dyn ClusterApi> {
        Arc::new(SimClient {
            node: self.nodes.get(url).cloned().unwrap_or(SimNode {
                connection_error: true,
                ..Default::default()
            }),
            calls: self.calls.clone(),
        })
    }
}

struct SimClient {
    node: SimNode,
    calls: Arc<CallLog>,
}

#[async_trait]
impl ClusterApi for SimClient {
    async fn cluster_info(&self) -> Result<ClusterInfo> {
        self.calls.cluster_info.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.node.delay {
            tokio::time::sleep(delay).await;
        }
        if self.node.connection_error {
            return Err(LookoutError::ConnectionFailed("connection refused".into()));
        }

        let mut peers: HashMap<String, PeerInfo> = self
            .node
            .peers
            .iter()
            .map(|p| (p.to_string(), PeerInfo::default()))
            .collect();
        if let Some(own) = self.node.peer_id {
            peers.entry(own.to_string()).or_default();
        }

        Ok(ClusterInfo {
            peer_id: self.node.peer_id,
            peers,
            raft_info: Some(RaftInfo {
                leader: self.node.leader,
                ..Default::default()
            }),
            consensus_thread_status: None,
            message_send_failures: HashMap::new(),
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.calls.collections.fetch_add(1, Ordering::SeqCst);
        if self.node.fail_collections {
            return Err(LookoutError::Network("503 Service Unavailable".into()));
        }
        Ok(self.node.collections.clone())
    }

    async fn collection_info(&self, _collection: &str) -> Result<CollectionInfo> {
        Ok(CollectionInfo::default())
    }

    async fn create_snapshot(&self, collection: &str) -> Result<SnapshotDescription> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        Ok(SnapshotDescription {
            name: format!(
                "{}-{}-2024-06-01.snapshot",
                collection,
                self.node.peer_id.unwrap_or_default()
            ),
            size: Some(1024),
            creation_time: None,
            checksum: None,
        })
    }

    async fn list_snapshots(&self, collection: &str) -> Result<Vec<SnapshotDescription>> {
        self.calls.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .node
            .snapshots
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, description)| description.clone())
            .collect())
    }

    async fn delete_snapshot(&self, _collection: &str, _snapshot: &str) -> Result<()> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download_snapshot(
        &self,
        collection: &str,
        snapshot: &str,
    ) -> Result<Option<ByteStream>> {
        self.calls.downloads.fetch_add(1, Ordering::SeqCst);
        let present = self
            .node
            .snapshots
            .iter()
            .any(|(c, d)| c == collection && d.name == snapshot);
        if present {
            let bytes: Vec<u8> = b"api-snapshot-bytes".to_vec();
            Ok(Some(Box::pin(std::io::Cursor::new(bytes))))
        } else {
            Ok(None)
        }
    }

    async fn recover_from_snapshot(&self, _collection: &str, _location: &str) -> Result<bool> {
        Ok(true)
    }

    async fn replicate_shard(
        &self,
        _collection: &str,
        _shard_id: u32,
        _from_peer: u64,
        _to_peer: u64,
    ) -> Result<bool> {
        Ok(true)
    }
}

/// Scripted object store.
#[derive(Default)]
pub struct SimObjectStore {
    pub snapshots: Vec<(String, String, u64)>,
    pub fail_listing: bool,
    pub list_calls: AtomicUsize,
    pub deleted: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ObjectStore for SimObjectStore {
    async fn list_snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing {
            return Err(LookoutError::ObjectStorage("listing failed".into()));
        }
        Ok(self
            .snapshots
            .iter()
            .map(|(collection, snapshot, size)| SnapshotRecord {
                collection: collection.clone(),
                snapshot: snapshot.clone(),
                node_url: None,
                pod: None,
                peer_id: None,
                namespace: None,
                size_bytes: Some(*size),
                source: SnapshotSource::ObjectStorage,
                issues: Vec::new(),
            })
            .collect())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing {
            return Err(LookoutError::ObjectStorage("listing failed".into()));
        }
        let mut names: Vec<String> = self
            .snapshots
            .iter()
            .map(|(collection, _, _)| collection.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names
            .into_iter()
            .map(|collection| CollectionRecord {
                collection,
                node_url: None,
                pod: None,
                peer_id: None,
                namespace: None,
                size_bytes: None,
                source: SnapshotSource::ObjectStorage,
                issues: Vec::new(),
            })
            .collect())
    }

    async fn delete_snapshot(&self, collection: &str, snapshot: &str) -> Result<()> {
        self.deleted
            .lock()
            .unwrap()
            .push((collection.to_string(), snapshot.to_string()));
        Ok(())
    }

    async fn download_snapshot(
        &self,
        collection: &str,
        snapshot: &str,
    ) -> Result<Option<ByteStream>> {
        let present = self
            .snapshots
            .iter()
            .any(|(c, s, _)| c == collection && s == snapshot);
        if present {
            let bytes: Vec<u8> = b"object-store-bytes".to_vec();
            Ok(Some(Box::pin(std::io::Cursor::new(bytes))))
        } else {
            Ok(None)
        }
    }
}

/// Provider wrapping an optional scripted store.
pub struct SimStoreProvider(pub Option<Arc<SimObjectStore>>);

#[async_trait]
impl ObjectStoreProvider for SimStoreProvider {
    async fn store(&self, _namespace: Option<&str>) -> Result<Option<Arc<dyn ObjectStore>>> {
        Ok(self
            .0
            .clone()
            .map(|store| store as Arc<dyn ObjectStore>))
    }
}

/// No object storage configured.
pub fn no_object_store() -> Arc<dyn ObjectStoreProvider> {
    Arc::new(SimStoreProvider(None))
}

/// Scripted exec transport: maps shell scripts to output lines.
#[derive(Default)]
pub struct SimExec {
    responses: HashMap<String, Vec<String>>,
}

impl SimExec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, script: &str, lines: &[&str]) -> Self {
        self.responses.insert(
            script.to_string(),
            lines.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// A disk backend over this transport with the default test paths.
    pub fn into_backend(self) -> DiskBackend {
        DiskBackend::new(
            Arc::new(self),
            Arc::new(NoopTelemetry),
            "/data/storage/collections",
            "/data/snapshots",
        )
    }
}

#[async_trait]
impl RemoteExec for SimExec {
    async fn command_lines(&self, _pod: &str, command: &[String]) -> Result<Vec<String>> {
        let script = command.last().cloned().unwrap_or_default();
        Ok(self.responses.get(&script).cloned().unwrap_or_default())
    }

    async fn open_stream(
        &self,
        _pod: &str,
        _command: &[String],
        _options: StreamOptions,
    ) -> Result<ExecStream> {
        Ok(Box::pin(std::io::Cursor::new(b"disk-snapshot-bytes".to_vec())))
    }
}

/// A snapshot description named so the given peer owns it.
pub fn snapshot_owned_by(collection: &str, peer_id: u64, size: u64) -> SnapshotDescription {
    SnapshotDescription {
        name: format!("{}-{}-2024-06-01.snapshot", collection, peer_id),
        size: Some(size),
        creation_time: None,
        checksum: None,
    }
}
