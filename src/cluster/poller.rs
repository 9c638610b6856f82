//! Concurrent node health scanning.
//!
//! The poller probes every configured node's cluster-info endpoint in
//! parallel and joins on all of them, so one slow node cannot stretch the
//! cycle beyond its own probe deadline. Each probe observes both the caller's
//! cancellation and its own timeout; caller cancellation aborts the whole
//! scan rather than producing fake per-node timeout records.

use crate::client::{ClientFactory, ClusterApi, ClusterInfo};
use crate::error::{LookoutError, Result};
use crate::telemetry::Telemetry;
use crate::types::{ClusterState, NodeEndpoint, NodeErrorKind, NodeHealth};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of one full scan.
pub struct ScanOutcome {
    /// One record per configured node.
    pub state: ClusterState,
    /// Degradations to apply after split detection has run, so that a node
    /// receives exactly one error kind per cycle.
    pub advisories: Vec<NodeAdvisory>,
}

/// A consensus-level degradation observed during the scan but applied late.
#[derive(Debug, Clone)]
pub struct NodeAdvisory {
    /// URL of the affected node.
    pub url: String,
    /// `ConsensusThreadError` or `MessageSendFailures`.
    pub kind: NodeErrorKind,
    /// Human-readable detail.
    pub detail: String,
}

/// Concurrent cluster-health scanner.
pub struct HealthPoller {
    factory: Arc<dyn ClientFactory>,
    telemetry: Arc<dyn Telemetry>,
    probe_timeout: Duration,
    check_collections: bool,
}

impl HealthPoller {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        telemetry: Arc<dyn Telemetry>,
        probe_timeout: Duration,
        check_collections: bool,
    ) -> Self {
        Self {
            factory,
            telemetry,
            probe_timeout,
            check_collections,
        }
    }

    /// Probe every endpoint concurrently and assemble the cycle's state.
    ///
    /// Individual node failures become unhealthy records; only caller
    /// cancellation fails the scan itself.
    pub async fn scan(
        &self,
        endpoints: &[NodeEndpoint],
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome> {
        let probes = endpoints.iter().map(|ep| self.probe(ep, cancel));
        let results: Vec<Result<(NodeHealth, Option<NodeAdvisory>)>> = join_all(probes).await;

        let mut nodes = Vec::with_capacity(endpoints.len());
        let mut advisories = Vec::new();
        for result in results {
            let (node, advisory) = result?;
            nodes.push(node);
            advisories.extend(advisory);
        }

        let healthy = nodes.iter().filter(|n| n.is_healthy).count();
        self.telemetry.record_healthy_nodes(healthy);
        debug!(healthy, total = nodes.len(), "cluster scan finished");

        Ok(ScanOutcome {
            state: ClusterState::new(nodes),
            advisories,
        })
    }

    /// Probe a single node: connectivity, peer-set capture, then the
    /// optional collections check, in that order.
    async fn probe(
        &self,
        endpoint: &NodeEndpoint,
        cancel: &CancellationToken,
    ) -> Result<(NodeHealth, Option<NodeAdvisory>)> {
        let client = self.factory.client(endpoint);

        let info = match self.bounded(cancel, client.cluster_info()).await? {
            Ok(info) => info,
            Err(BoundedError::Deadline) => {
                return Ok((
                    NodeHealth::unhealthy(
                        endpoint,
                        NodeErrorKind::Timeout,
                        format!("no response within {}ms", self.probe_timeout.as_millis()),
                    ),
                    None,
                ));
            }
            Err(BoundedError::Call(e)) => {
                let kind = classify_transport_error(&e);
                return Ok((NodeHealth::unhealthy(endpoint, kind, e.to_string()), None));
            }
        };

        let Some(peer_id) = info.peer_id else {
            return Ok((
                NodeHealth::unhealthy(
                    endpoint,
                    NodeErrorKind::InvalidResponse,
                    "cluster info carried no peer id",
                ),
                None,
            ));
        };
        let peer_id = peer_id.to_string();

        let mut peer_ids: HashSet<String> = info.peers.keys().cloned().collect();
        peer_ids.insert(peer_id.clone());

        let is_leader = info
            .raft_info
            .as_ref()
            .and_then(|raft| raft.leader)
            .map(|leader| leader.to_string() == peer_id)
            .unwrap_or(false);

        let mut node = NodeHealth::healthy(endpoint, peer_id, is_leader, peer_ids);

        // An accessible node that cannot serve its collections is not healthy,
        // even though the probe itself succeeded.
        if self.check_collections {
            match self.bounded(cancel, client.list_collections()).await? {
                Ok(_) => {}
                Err(BoundedError::Deadline) => {
                    node.demote(
                        NodeErrorKind::CollectionsFetchError,
                        format!(
                            "collections listing timed out after {}ms",
                            self.probe_timeout.as_millis()
                        ),
                    );
                }
                Err(BoundedError::Call(e)) => {
                    node.demote(
                        NodeErrorKind::CollectionsFetchError,
                        format!("collections listing failed: {}", e),
                    );
                }
            }
        }

        let advisory = consensus_advisory(&node, &info);
        Ok((node, advisory))
    }

    /// Run a node call under the scan's cancellation and the per-call
    /// deadline, whichever fires first. Caller cancellation re-raises.
    async fn bounded<T>(
        &self,
        cancel: &CancellationToken,
        call: impl std::future::Future<Output = Result<T>>,
    ) -> Result<std::result::Result<T, BoundedError>> {
        tokio::select! {
            _ = cancel.cancelled() => Err(LookoutError::Cancelled),
            outcome = tokio::time::timeout(self.probe_timeout, call) => match outcome {
                Err(_elapsed) => Ok(Err(BoundedError::Deadline)),
                Ok(Err(e)) => Ok(Err(BoundedError::Call(e))),
                Ok(Ok(value)) => Ok(Ok(value)),
            },
        }
    }
}

/// How a bounded node call failed, short of cancellation.
enum BoundedError {
    /// The per-call deadline elapsed.
    Deadline,
    /// The call itself failed.
    Call(LookoutError),
}

fn classify_transport_error(e: &LookoutError) -> NodeErrorKind {
    match e {
        LookoutError::Timeout(_) => NodeErrorKind::Timeout,
        LookoutError::InvalidResponse(_) | LookoutError::Serialization(_) => {
            NodeErrorKind::InvalidResponse
        }
        _ => NodeErrorKind::ConnectionError,
    }
}

/// Consensus-level degradations reported by an otherwise healthy node.
fn consensus_advisory(node: &NodeHealth, info: &ClusterInfo) -> Option<NodeAdvisory> {
    if !node.is_healthy {
        return None;
    }

    if let Some(status) = &info.consensus_thread_status {
        if !status.is_working() {
            let detail = match &status.err_message {
                Some(msg) => format!("consensus thread stopped: {}", msg),
                None => "consensus thread is not working".to_string(),
            };
            return Some(NodeAdvisory {
                url: node.url.clone(),
                kind: NodeErrorKind::ConsensusThreadError,
                detail,
            });
        }
    }

    if !info.message_send_failures.is_empty() {
        let mut peers: Vec<&str> = info
            .message_send_failures
            .keys()
            .map(String::as_str)
            .collect();
        peers.sort_unstable();
        return Some(NodeAdvisory {
            url: node.url.clone(),
            kind: NodeErrorKind::MessageSendFailures,
            detail: format!("message delivery failing towards: {}", peers.join(", ")),
        });
    }

    None
}
