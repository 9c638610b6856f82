//! Background cluster monitoring.
//!
//! The monitor owns the shared [`ClusterState`] and drives the poll cycle:
//! discover endpoints, scan them, run split detection, apply consensus-level
//! advisories, publish. Consumers read the last published state; the loop
//! treats cancellation as clean shutdown and keeps running through internal
//! errors.

use crate::cluster::poller::{HealthPoller, ScanOutcome};
use crate::cluster::split_brain::{self, MajorityView};
use crate::discovery::NodeDiscovery;
use crate::error::{LookoutError, Result};
use crate::types::ClusterState;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns the poll loop and the latest published cluster state.
pub struct ClusterMonitor {
    poller: HealthPoller,
    discovery: Arc<dyn NodeDiscovery>,
    poll_interval: Duration,
    state: RwLock<Option<ClusterState>>,
    /// Last logged majority view; kept only so consensus changes are logged
    /// once instead of every cycle. Recomputed fresh each cycle regardless.
    last_majority: RwLock<Option<HashSet<String>>>,
}

impl ClusterMonitor {
    pub fn new(
        poller: HealthPoller,
        discovery: Arc<dyn NodeDiscovery>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            poller,
            discovery,
            poll_interval,
            state: RwLock::new(None),
            last_majority: RwLock::new(None),
        }
    }

    /// The last published state, if a cycle has completed.
    pub async fn state(&self) -> Option<ClusterState> {
        self.state.read().await.clone()
    }

    /// Run one full cycle now and publish the result.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<ClusterState> {
        let endpoints = self.discovery.nodes().await?;
        let ScanOutcome {
            mut state,
            advisories,
        } = self.poller.scan(&endpoints, cancel).await?;

        let majority = split_brain::detect(&mut state.nodes);
        self.log_majority_change(majority.as_ref()).await;

        // Consensus-level degradations apply only after split detection, so a
        // split-flagged node is not double-flagged.
        for advisory in advisories {
            if let Some(node) = state
                .nodes
                .iter_mut()
                .find(|n| n.url == advisory.url && n.is_healthy)
            {
                node.demote(advisory.kind, advisory.detail);
            }
        }

        *self.state.write().await = Some(state.clone());
        Ok(state)
    }

    /// Poll on a fixed interval until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cluster monitor stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.refresh(&cancel).await {
                Ok(state) => {
                    let summary = state.summary();
                    debug!(
                        healthy = summary.healthy,
                        total = summary.total,
                        "cluster state refreshed"
                    );
                }
                Err(LookoutError::Cancelled) => {
                    info!("cluster monitor stopped");
                    return;
                }
                Err(e) => {
                    // Keep polling; a failed cycle leaves the previous state up.
                    warn!(error = %e, "cluster scan cycle failed");
                }
            }
        }
    }

    async fn log_majority_change(&self, majority: Option<&MajorityView>) {
        let mut last = self.last_majority.write().await;
        match majority {
            Some(view) => {
                if last.as_ref() != Some(&view.peer_ids) {
                    let mut peers: Vec<&str> =
                        view.peer_ids.iter().map(String::as_str).collect();
                    peers.sort_unstable();
                    info!(
                        peers = peers.join(","),
                        supporters = view.supporters,
                        considered = view.considered,
                        "majority membership view established"
                    );
                    *last = Some(view.peer_ids.clone());
                }
            }
            None => {
                if last.take().is_some() {
                    info!("majority membership view lost");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientFactory, ClusterApi, ClusterInfo, RaftInfo};
    use crate::discovery::StaticDiscovery;
    use crate::telemetry::NoopTelemetry;
    use crate::types::{NodeEndpoint, NodeErrorKind};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct ScriptedClient {
        info: ClusterInfo,
    }

    #[async_trait]
    impl ClusterApi for ScriptedClient {
        async fn cluster_info(&self) -> Result<ClusterInfo> {
            Ok(self.info.clone())
        }

        async fn list_collections(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn collection_info(&self, _c: &str) -> Result<crate::client::CollectionInfo> {
            Ok(Default::default())
        }

        async fn create_snapshot(&self, _c: &str) -> Result<crate::client::SnapshotDescription> {
            unimplemented!()
        }

        async fn list_snapshots(
            &self,
            _c: &str,
        ) -> Result<Vec<crate::client::SnapshotDescription>> {
            Ok(vec![])
        }

        async fn delete_snapshot(&self, _c: &str, _s: &str) -> Result<()> {
            Ok(())
        }

        async fn download_snapshot(
            &self,
            _c: &str,
            _s: &str,
        ) -> Result<Option<crate::client::ByteStream>> {
            Ok(None)
        }

        async fn recover_from_snapshot(&self, _c: &str, _l: &str) -> Result<bool> {
            Ok(true)
        }

        async fn replicate_shard(&self, _c: &str, _s: u32, _f: u64, _t: u64) -> Result<bool> {
            Ok(true)
        }
    }

    struct ScriptedFactory {
        infos: HashMap<String, ClusterInfo>,
    }

    impl ClientFactory for ScriptedFactory {
        fn client(&self, endpoint: &NodeEndpoint) -> Arc<dyn ClusterApi> {
            self.client_for_url(&endpoint.url())
        }

        fn client_for_url(&self, url: &str) -> Arc<dyn ClusterApi> {
            Arc::new(ScriptedClient {
                info: self.infos.get(url).cloned().unwrap_or_default(),
            })
        }
    }

    fn info(peer_id: u64, peers: &[u64]) -> ClusterInfo {
        ClusterInfo {
            peer_id: Some(peer_id),
            peers: peers
                .iter()
                .map(|p| (p.to_string(), Default::default()))
                .collect(),
            raft_info: Some(RaftInfo::default()),
            consensus_thread_status: None,
            message_send_failures: HashMap::new(),
        }
    }

    fn monitor(infos: HashMap<String, ClusterInfo>, hosts: &[&str]) -> ClusterMonitor {
        let poller = HealthPoller::new(
            Arc::new(ScriptedFactory { infos }),
            Arc::new(NoopTelemetry),
            Duration::from_secs(1),
            false,
        );
        let endpoints = hosts
            .iter()
            .map(|h| NodeEndpoint::new(*h, 6333))
            .collect();
        ClusterMonitor::new(
            poller,
            Arc::new(StaticDiscovery::new(endpoints)),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_refresh_publishes_state_with_split_detection() {
        let mut infos = HashMap::new();
        infos.insert("http://a:6333".into(), info(1, &[1, 2, 3]));
        infos.insert("http://b:6333".into(), info(2, &[1, 2, 3]));
        infos.insert("http://c:6333".into(), info(3, &[1, 3]));

        let monitor = monitor(infos, &["a", "b", "c"]);
        assert!(monitor.state().await.is_none());

        let state = monitor.refresh(&CancellationToken::new()).await.unwrap();
        let split: Vec<_> = state
            .nodes
            .iter()
            .filter(|n| n.error_kind == Some(NodeErrorKind::ClusterSplit))
            .collect();
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].url, "http://c:6333");

        // Published and readable.
        assert!(monitor.state().await.is_some());
    }

    #[tokio::test]
    async fn test_run_exits_cleanly_on_cancellation() {
        let monitor = monitor(HashMap::new(), &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Must return rather than hang on the interval.
        monitor.run(cancel).await;
    }
}
