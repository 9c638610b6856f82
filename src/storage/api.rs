//! Cluster-API storage backend.
//!
//! Sweeps every healthy node's HTTP API: collections straight off the
//! listing endpoint, snapshots per collection per node. A snapshot listing
//! does not say which node owns the file, but snapshot filenames embed the
//! owning node's peer id; records are attributed by substring match and
//! deduplicated on `(node url, collection, snapshot)`.

use crate::client::ClientFactory;
use crate::error::{LookoutError, Result};
use crate::types::{CollectionRecord, NodeHealth, SnapshotRecord, SnapshotSource};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Inventory sweeps over the database's native HTTP API.
pub struct ApiBackend {
    factory: Arc<dyn ClientFactory>,
}

impl ApiBackend {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// One record per collection per node.
    ///
    /// Individual node failures are logged and skipped; every node failing
    /// raises, so an empty result is never mistaken for a healthy answer.
    pub async fn list_collections(&self, nodes: &[NodeHealth]) -> Result<Vec<CollectionRecord>> {
        let sweeps = nodes.iter().map(|node| async move {
            let client = self.factory.client_for_url(&node.url);
            client
                .list_collections()
                .await
                .map(|collections| (node, collections))
        });

        let mut records = Vec::new();
        let mut failures = 0usize;
        for result in join_all(sweeps).await {
            match result {
                Ok((node, collections)) => {
                    for collection in collections {
                        records.push(CollectionRecord {
                            collection,
                            node_url: Some(node.url.clone()),
                            pod: node.pod.clone(),
                            peer_id: node.peer_id.clone(),
                            namespace: node.namespace.clone(),
                            size_bytes: None,
                            source: SnapshotSource::ClusterApi,
                            issues: Vec::new(),
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "collections sweep failed for one node");
                    failures += 1;
                }
            }
        }

        if !nodes.is_empty() && failures == nodes.len() {
            return Err(LookoutError::BackendFailed(
                "collections listing failed on every node".into(),
            ));
        }
        Ok(records)
    }

    /// One record per snapshot, attributed to its owning node.
    pub async fn list_snapshots(&self, nodes: &[NodeHealth]) -> Result<Vec<SnapshotRecord>> {
        let sweeps = nodes.iter().map(|node| async move {
            let client = self.factory.client_for_url(&node.url);
            let collections = client.list_collections().await?;

            let mut listed = Vec::new();
            for collection in collections {
                match client.list_snapshots(&collection).await {
                    Ok(snapshots) => listed.push((collection, snapshots)),
                    Err(e) => {
                        warn!(
                            node = %node.url,
                            collection = %collection,
                            error = %e,
                            "snapshot listing failed for one collection"
                        );
                    }
                }
            }
            Ok::<_, LookoutError>((node, listed))
        });

        let mut records = Vec::new();
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        let mut failures = 0usize;

        for result in join_all(sweeps).await {
            match result {
                Ok((node, listed)) => {
                    for (collection, snapshots) in listed {
                        for snapshot in snapshots {
                            let owner = owner_of(&snapshot.name, nodes).unwrap_or(node);
                            let dedupe_key = (
                                owner.url.clone(),
                                collection.clone(),
                                snapshot.name.clone(),
                            );
                            if !seen.insert(dedupe_key) {
                                continue;
                            }
                            records.push(SnapshotRecord {
                                collection: collection.clone(),
                                snapshot: snapshot.name,
                                node_url: Some(owner.url.clone()),
                                pod: owner.pod.clone(),
                                peer_id: owner.peer_id.clone(),
                                namespace: owner.namespace.clone(),
                                size_bytes: snapshot.size,
                                source: SnapshotSource::ClusterApi,
                                issues: Vec::new(),
                            });
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "snapshot sweep failed for one node");
                    failures += 1;
                }
            }
        }

        if !nodes.is_empty() && failures == nodes.len() {
            return Err(LookoutError::BackendFailed(
                "snapshot listing failed on every node".into(),
            ));
        }
        Ok(records)
    }
}

/// The node whose peer id appears in the snapshot filename, if any.
fn owner_of<'a>(snapshot_name: &str, nodes: &'a [NodeHealth]) -> Option<&'a NodeHealth> {
    nodes.iter().find(|node| {
        node.peer_id
            .as_deref()
            .is_some_and(|peer_id| snapshot_name.contains(peer_id))
    })
}
