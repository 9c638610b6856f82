//! Node-local-disk storage backend.
//!
//! Reaches each node's filesystem through the remote-exec transport: list
//! the collection and snapshot directories, stat entries for sizes, stream
//! snapshot files out base64-armored with checksum verification against the
//! companion `.checksum` file.
//!
//! Command failures on a pod read as empty listings (the shell wrote to
//! stderr, which the transport logs); only transport-level failures count as
//! a pod failing the sweep.

use crate::error::{LookoutError, Result};
use crate::exec::{ExecStream, RemoteExec, StreamOptions};
use crate::telemetry::Telemetry;
use crate::types::{CollectionRecord, PodTarget, SnapshotRecord, SnapshotSource};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Snapshot and collection access on the nodes' own disks.
pub struct DiskBackend {
    exec: Arc<dyn RemoteExec>,
    telemetry: Arc<dyn Telemetry>,
    collections_path: String,
    snapshots_path: String,
}

impl DiskBackend {
    pub fn new(
        exec: Arc<dyn RemoteExec>,
        telemetry: Arc<dyn Telemetry>,
        collections_path: impl Into<String>,
        snapshots_path: impl Into<String>,
    ) -> Self {
        Self {
            exec,
            telemetry,
            collections_path: collections_path.into(),
            snapshots_path: snapshots_path.into(),
        }
    }

    /// One record per collection directory per pod, with on-disk sizes.
    pub async fn list_collections(&self, pods: &[PodTarget]) -> Result<Vec<CollectionRecord>> {
        let sweeps = pods.iter().map(|pod| async move {
            self.pod_collections(pod).await.map_err(|e| (pod, e))
        });
        collect_sweeps(join_all(sweeps).await, pods.len(), "collections")
    }

    /// One record per snapshot file per pod.
    pub async fn list_snapshots(&self, pods: &[PodTarget]) -> Result<Vec<SnapshotRecord>> {
        let sweeps = pods.iter().map(|pod| async move {
            self.pod_snapshots(pod).await.map_err(|e| (pod, e))
        });
        collect_sweeps(join_all(sweeps).await, pods.len(), "snapshots")
    }

    /// Snapshot file names present on one pod, as `(collection, snapshot)`
    /// pairs. Used to cross-check API listings against disk reality.
    pub async fn snapshot_files(&self, pod: &PodTarget) -> Result<Vec<(String, String)>> {
        let collections = self
            .exec
            .command_lines(&pod.pod, &shell(format!("ls {}", quoted(&self.snapshots_path))))
            .await?;

        let mut files = Vec::new();
        for collection in collections {
            let dir = format!("{}/{}", self.snapshots_path, collection);
            let entries = self
                .exec
                .command_lines(&pod.pod, &shell(format!("ls {}", quoted(&dir))))
                .await?;
            for entry in entries {
                if !entry.ends_with(".checksum") {
                    files.push((collection.clone(), entry));
                }
            }
        }
        Ok(files)
    }

    /// Delete a snapshot file and its companion checksum.
    pub async fn delete_snapshot(
        &self,
        pod: &str,
        collection: &str,
        snapshot: &str,
    ) -> Result<()> {
        let path = self.snapshot_path(collection, snapshot);
        let script = format!("rm -f {} {}", quoted(&path), quoted(&format!("{}.checksum", path)));
        self.exec.command_lines(pod, &shell(script)).await?;
        debug!(%pod, %path, "deleted snapshot from node disk");
        Ok(())
    }

    /// Stream a snapshot file, or `None` when the pod does not have it.
    ///
    /// The remote side base64-encodes the bytes so the exec channel cannot
    /// corrupt them with newline translation; the companion checksum file,
    /// when present, drives SHA-256 verification of the decoded stream.
    pub async fn download_snapshot(
        &self,
        pod: &str,
        collection: &str,
        snapshot: &str,
    ) -> Result<Option<ExecStream>> {
        let path = self.snapshot_path(collection, snapshot);

        let exists = self
            .exec
            .command_lines(
                pod,
                &shell(format!("test -f {} && echo present", quoted(&path))),
            )
            .await?;
        if !exists.iter().any(|line| line == "present") {
            return Ok(None);
        }

        let expected_sha256 = self.read_checksum(pod, &path).await;
        let stream = self
            .exec
            .open_stream(
                pod,
                &shell(format!("base64 {}", quoted(&path))),
                StreamOptions {
                    base64: true,
                    expected_sha256,
                },
            )
            .await?;
        Ok(Some(stream))
    }

    async fn pod_collections(&self, pod: &PodTarget) -> Result<Vec<CollectionRecord>> {
        let names = self
            .exec
            .command_lines(
                &pod.pod,
                &shell(format!("ls {}", quoted(&self.collections_path))),
            )
            .await?;

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            let dir = format!("{}/{}", self.collections_path, name);
            let size_bytes = self.dir_size(&pod.pod, &dir).await;
            let mut issues = Vec::new();
            match size_bytes {
                Some(bytes) => {
                    self.telemetry.record_collection_size(&pod.pod, &name, bytes);
                }
                None => issues.push("on-disk size unavailable".to_string()),
            }
            records.push(CollectionRecord {
                collection: name,
                node_url: Some(pod.node_url.clone()),
                pod: Some(pod.pod.clone()),
                peer_id: pod.peer_id.clone(),
                namespace: pod.namespace.clone(),
                size_bytes,
                source: SnapshotSource::NodeDisk,
                issues,
            });
        }
        Ok(records)
    }

    async fn pod_snapshots(&self, pod: &PodTarget) -> Result<Vec<SnapshotRecord>> {
        let collections = self
            .exec
            .command_lines(&pod.pod, &shell(format!("ls {}", quoted(&self.snapshots_path))))
            .await?;

        let mut records = Vec::new();
        for collection in collections {
            let dir = format!("{}/{}", self.snapshots_path, collection);
            let entries = self
                .exec
                .command_lines(&pod.pod, &shell(format!("ls {}", quoted(&dir))))
                .await?;

            for entry in entries {
                if entry.ends_with(".checksum") {
                    continue;
                }
                let path = format!("{}/{}", dir, entry);
                let size_bytes = self.file_size(&pod.pod, &path).await;
                let mut issues = Vec::new();
                if size_bytes.is_none() {
                    issues.push("listed on disk but stat failed".to_string());
                }
                records.push(SnapshotRecord {
                    collection: collection.clone(),
                    snapshot: entry,
                    node_url: Some(pod.node_url.clone()),
                    pod: Some(pod.pod.clone()),
                    peer_id: pod.peer_id.clone(),
                    namespace: pod.namespace.clone(),
                    size_bytes,
                    source: SnapshotSource::NodeDisk,
                    issues,
                });
            }
        }
        Ok(records)
    }

    async fn dir_size(&self, pod: &str, dir: &str) -> Option<u64> {
        let lines = self
            .exec
            .command_lines(pod, &shell(format!("du -sb {}", quoted(dir))))
            .await
            .ok()?;
        lines
            .first()
            .and_then(|line| line.split_whitespace().next())
            .and_then(|size| size.parse().ok())
    }

    async fn file_size(&self, pod: &str, path: &str) -> Option<u64> {
        let lines = self
            .exec
            .command_lines(pod, &shell(format!("stat -c %s {}", quoted(path))))
            .await
            .ok()?;
        lines.first().and_then(|line| line.parse().ok())
    }

    /// Expected digest from the companion checksum file, when one exists and
    /// looks like a SHA-256 hex digest.
    async fn read_checksum(&self, pod: &str, path: &str) -> Option<String> {
        let lines = self
            .exec
            .command_lines(
                pod,
                &shell(format!(
                    "cat {} 2>/dev/null || true",
                    quoted(&format!("{}.checksum", path))
                )),
            )
            .await
            .ok()?;
        let digest = lines.first()?.split_whitespace().next()?;
        if digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(digest.to_string())
        } else {
            warn!(%pod, %path, "checksum file present but not a sha256 digest");
            None
        }
    }

    fn snapshot_path(&self, collection: &str, snapshot: &str) -> String {
        format!("{}/{}/{}", self.snapshots_path, collection, snapshot)
    }
}

fn shell(script: String) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script]
}

fn quoted(path: &str) -> String {
    format!("'{}'", path)
}

/// Merge per-pod sweep results, tolerating partial failure but raising when
/// every pod failed.
fn collect_sweeps<T>(
    results: Vec<std::result::Result<Vec<T>, (&PodTarget, LookoutError)>>,
    pod_count: usize,
    what: &str,
) -> Result<Vec<T>> {
    let mut records = Vec::new();
    let mut failures = 0usize;
    for result in results {
        match result {
            Ok(items) => records.extend(items),
            Err((pod, e)) => {
                warn!(pod = %pod.pod, error = %e, "node-disk sweep failed for one pod");
                failures += 1;
            }
        }
    }
    if pod_count > 0 && failures == pod_count {
        return Err(LookoutError::BackendFailed(format!(
            "node-disk {} sweep failed on every pod",
            what
        )));
    }
    Ok(records)
}
