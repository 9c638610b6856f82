//! Core type definitions for Lookout.
//!
//! This module contains the data model shared across the cluster observer and
//! the storage orchestrator:
//!
//! - [`NodeEndpoint`]: a node as produced by discovery, immutable per poll cycle
//! - [`NodeHealth`]: one node's health record within a single poll cycle
//! - [`ClusterState`]: the full per-cycle view of the cluster
//! - [`CollectionRecord`] / [`SnapshotRecord`]: normalized inventory entries
//!   produced by the fallback retrieval pipeline
//!
//! # Invariants
//!
//! A [`NodeHealth`] carries an error kind if and only if it is unhealthy, and
//! exactly one kind per cycle. Records are fully rebuilt each cycle; the only
//! in-cycle mutation is the split-brain detector demoting healthy nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A node endpoint produced by discovery.
///
/// Immutable for the duration of a poll cycle. The pod identity is only
/// present when the sidecar runs next to an orchestrated cluster and enables
/// the node-local-disk storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// Hostname or service DNS name.
    pub host: String,
    /// HTTP API port.
    pub port: u16,
    /// Kubernetes namespace, when known.
    pub namespace: Option<String>,
    /// Pod name, when the host resolves to a pod.
    pub pod: Option<String>,
}

impl NodeEndpoint {
    /// Create an endpoint with no orchestration identity.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            namespace: None,
            pod: None,
        }
    }

    /// Base URL of the node's HTTP API.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Why a node was reported unhealthy.
///
/// Exactly one kind is attached per unhealthy node per cycle, chosen by
/// first-detected-wins precedence in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeErrorKind {
    /// The cluster-info probe did not answer within its deadline.
    Timeout,
    /// The probe failed at the transport level.
    ConnectionError,
    /// The probe answered but carried no resolvable peer identifier.
    InvalidResponse,
    /// The node answered its probe but could not enumerate collections.
    CollectionsFetchError,
    /// The node reports its consensus thread as not working.
    ConsensusThreadError,
    /// The node reports message delivery failures towards peers.
    MessageSendFailures,
    /// The node's membership view disagrees with the majority.
    ClusterSplit,
}

impl NodeErrorKind {
    /// Short human-readable label. This is the single rendering site for
    /// error kinds; everything user-facing goes through it.
    pub fn label(&self) -> &'static str {
        match self {
            NodeErrorKind::Timeout => "timeout",
            NodeErrorKind::ConnectionError => "connection error",
            NodeErrorKind::InvalidResponse => "invalid response",
            NodeErrorKind::CollectionsFetchError => "collections fetch failed",
            NodeErrorKind::ConsensusThreadError => "consensus thread not working",
            NodeErrorKind::MessageSendFailures => "message send failures",
            NodeErrorKind::ClusterSplit => "cluster split",
        }
    }
}

impl fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Health record for a single node within one poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHealth {
    /// Base URL of the node's HTTP API.
    pub url: String,
    /// The node's own peer identifier, when resolvable.
    pub peer_id: Option<String>,
    /// Whether the node passed every check this cycle.
    pub is_healthy: bool,
    /// Whether the node reports itself as the current consensus leader.
    pub is_leader: bool,
    /// The node's own peer id plus every peer it reports.
    pub peer_ids: HashSet<String>,
    /// Human-readable failure description, when unhealthy.
    pub error: Option<String>,
    /// Failure classification, when unhealthy.
    pub error_kind: Option<NodeErrorKind>,
    /// Pod name, when known.
    pub pod: Option<String>,
    /// Kubernetes namespace, when known.
    pub namespace: Option<String>,
    /// When this record was produced.
    pub last_seen: DateTime<Utc>,
}

impl NodeHealth {
    /// Build a healthy record.
    pub fn healthy(
        endpoint: &NodeEndpoint,
        peer_id: String,
        is_leader: bool,
        peer_ids: HashSet<String>,
    ) -> Self {
        Self {
            url: endpoint.url(),
            peer_id: Some(peer_id),
            is_healthy: true,
            is_leader,
            peer_ids,
            error: None,
            error_kind: None,
            pod: endpoint.pod.clone(),
            namespace: endpoint.namespace.clone(),
            last_seen: Utc::now(),
        }
    }

    /// Build an unhealthy record.
    pub fn unhealthy(
        endpoint: &NodeEndpoint,
        kind: NodeErrorKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            url: endpoint.url(),
            peer_id: None,
            is_healthy: false,
            is_leader: false,
            peer_ids: HashSet::new(),
            error: Some(error.into()),
            error_kind: Some(kind),
            pod: endpoint.pod.clone(),
            namespace: endpoint.namespace.clone(),
            last_seen: Utc::now(),
        }
    }

    /// Demote a healthy node, attaching its one error kind for this cycle.
    pub fn demote(&mut self, kind: NodeErrorKind, reason: impl Into<String>) {
        self.is_healthy = false;
        self.error_kind = Some(kind);
        self.error = Some(reason.into());
    }
}

/// Point-in-time view of the whole cluster, rebuilt every poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterState {
    /// One record per configured node.
    pub nodes: Vec<NodeHealth>,
    /// When the scan that produced this state completed.
    pub last_updated: DateTime<Utc>,
}

impl ClusterState {
    /// Wrap a finished scan.
    pub fn new(nodes: Vec<NodeHealth>) -> Self {
        Self {
            nodes,
            last_updated: Utc::now(),
        }
    }

    /// Iterate over the currently-healthy nodes.
    pub fn healthy_nodes(&self) -> impl Iterator<Item = &NodeHealth> {
        self.nodes.iter().filter(|n| n.is_healthy)
    }

    /// Healthy nodes that carry a pod identity, as remote-exec targets.
    pub fn pod_targets(&self) -> Vec<PodTarget> {
        self.healthy_nodes()
            .filter_map(|n| {
                n.pod.as_ref().map(|pod| PodTarget {
                    pod: pod.clone(),
                    namespace: n.namespace.clone(),
                    node_url: n.url.clone(),
                    peer_id: n.peer_id.clone(),
                })
            })
            .collect()
    }

    /// Derive the aggregate health summary.
    pub fn summary(&self) -> ClusterHealthSummary {
        let healthy = self.healthy_nodes().count();
        let total = self.nodes.len();
        let issues: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| !n.is_healthy)
            .map(|n| {
                let label = n.error_kind.map(|k| k.label()).unwrap_or("unknown");
                match &n.error {
                    Some(detail) => format!("{}: {}: {}", n.url, label, detail),
                    None => format!("{}: {}", n.url, label),
                }
            })
            .collect();

        ClusterHealthSummary {
            is_healthy: total > 0 && healthy == total,
            healthy,
            total,
            issues,
        }
    }
}

/// Aggregate cluster health derived from a [`ClusterState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHealthSummary {
    /// True when every configured node passed every check.
    pub is_healthy: bool,
    /// Number of healthy nodes.
    pub healthy: usize,
    /// Number of configured nodes.
    pub total: usize,
    /// One entry per unhealthy node.
    pub issues: Vec<String>,
}

/// A healthy node addressed as a pod, for the remote-exec backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTarget {
    /// Pod name.
    pub pod: String,
    /// Kubernetes namespace, when known.
    pub namespace: Option<String>,
    /// The node's HTTP API URL.
    pub node_url: String,
    /// The node's peer identifier.
    pub peer_id: Option<String>,
}

/// Which storage backend produced a record, and which backend a deletion or
/// download should address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    /// Object storage (S3-compatible).
    ObjectStorage,
    /// The database's native HTTP API.
    ClusterApi,
    /// Node-local disk reached through the remote-exec transport.
    NodeDisk,
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SnapshotSource::ObjectStorage => "object-storage",
            SnapshotSource::ClusterApi => "cluster-api",
            SnapshotSource::NodeDisk => "node-disk",
        };
        f.write_str(s)
    }
}

/// One collection as seen by a storage backend at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRecord {
    /// Collection name.
    pub collection: String,
    /// Owning node's API URL, when attributable.
    pub node_url: Option<String>,
    /// Owning pod, when known.
    pub pod: Option<String>,
    /// Owning node's peer identifier, when known.
    pub peer_id: Option<String>,
    /// Kubernetes namespace, when known.
    pub namespace: Option<String>,
    /// On-disk size in bytes, when the backend could resolve it.
    pub size_bytes: Option<u64>,
    /// Backend that produced this record.
    pub source: SnapshotSource,
    /// Advisory issues attached during the sweep.
    pub issues: Vec<String>,
}

/// One snapshot as seen by a storage backend at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Collection the snapshot belongs to.
    pub collection: String,
    /// Snapshot file name.
    pub snapshot: String,
    /// Owning node's API URL, when attributable.
    pub node_url: Option<String>,
    /// Owning pod, when known.
    pub pod: Option<String>,
    /// Owning node's peer identifier, when known.
    pub peer_id: Option<String>,
    /// Kubernetes namespace, when known.
    pub namespace: Option<String>,
    /// Size in bytes, when the backend could resolve it.
    pub size_bytes: Option<u64>,
    /// Backend that produced this record.
    pub source: SnapshotSource,
    /// Advisory issues attached during the sweep.
    pub issues: Vec<String>,
}
