//! Client library for the vector database's native HTTP API.
//!
//! One [`NodeClient`] per node, built through a [`ClientFactory`] so the
//! poller and the storage backends can be exercised against mock clients.

use crate::error::{LookoutError, Result};
use crate::types::NodeEndpoint;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

/// Default connection timeout for client requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout for client operations.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Header used for API-key authentication.
const API_KEY_HEADER: &str = "api-key";

/// Envelope every API response arrives in.
#[derive(Debug, Clone, Deserialize)]
struct ApiEnvelope<T> {
    result: Option<T>,
}

/// Cluster membership and consensus status as reported by one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterInfo {
    /// This node's peer identifier.
    pub peer_id: Option<u64>,
    /// Every peer the node currently knows about, keyed by peer id.
    #[serde(default)]
    pub peers: HashMap<String, PeerInfo>,
    /// Consensus-level view.
    pub raft_info: Option<RaftInfo>,
    /// Health of the node's consensus thread.
    pub consensus_thread_status: Option<ConsensusThreadStatus>,
    /// Peers the node failed to deliver messages to, keyed by peer URI.
    #[serde(default)]
    pub message_send_failures: HashMap<String, MessageSendFailure>,
}

/// One peer as reported in the cluster info.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeerInfo {
    /// The peer's advertised URI.
    pub uri: Option<String>,
}

/// Consensus-level cluster view.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RaftInfo {
    /// Current leader's peer id.
    pub leader: Option<u64>,
    /// Current term.
    pub term: Option<u64>,
    /// Commit index.
    pub commit: Option<u64>,
    /// This node's consensus role.
    pub role: Option<String>,
}

/// Health of a node's consensus thread.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsensusThreadStatus {
    /// `working` when the thread is alive.
    pub consensus_thread_status: Option<String>,
    /// Failure detail when the thread stopped.
    pub err_message: Option<String>,
}

impl ConsensusThreadStatus {
    /// Whether the node reports its consensus thread as working.
    pub fn is_working(&self) -> bool {
        match self.consensus_thread_status.as_deref() {
            Some(status) => status.eq_ignore_ascii_case("working"),
            None => true,
        }
    }
}

/// Delivery failures towards one peer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageSendFailure {
    /// Consecutive failed sends.
    pub count: Option<u64>,
    /// Most recent failure description.
    pub latest_error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CollectionsResult {
    #[serde(default)]
    collections: Vec<CollectionDescription>,
}

#[derive(Debug, Clone, Deserialize)]
struct CollectionDescription {
    name: String,
}

/// Collection detail used by the secondary health check and size reporting.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionInfo {
    /// Collection status string.
    pub status: Option<String>,
    /// Number of points stored.
    pub points_count: Option<u64>,
}

/// One snapshot as listed by the API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotDescription {
    /// Snapshot file name.
    pub name: String,
    /// Size in bytes.
    pub size: Option<u64>,
    /// Creation timestamp, as reported.
    pub creation_time: Option<String>,
    /// SHA-256 checksum, when the server computed one.
    pub checksum: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecoverRequest<'a> {
    location: &'a str,
}

#[derive(Debug, Serialize)]
struct ReplicateShardRequest {
    replicate_shard: ReplicateShardBody,
}

#[derive(Debug, Serialize)]
struct ReplicateShardBody {
    shard_id: u32,
    from_peer_id: u64,
    to_peer_id: u64,
}

/// A byte stream handed back by a download call.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Narrow interface to one node's HTTP API.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch the node's view of cluster membership and consensus.
    async fn cluster_info(&self) -> Result<ClusterInfo>;

    /// List collection names.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Fetch one collection's detail.
    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo>;

    /// Create a snapshot of a collection on this node.
    async fn create_snapshot(&self, collection: &str) -> Result<SnapshotDescription>;

    /// List this node's snapshots of a collection.
    async fn list_snapshots(&self, collection: &str) -> Result<Vec<SnapshotDescription>>;

    /// Delete one of this node's snapshots.
    async fn delete_snapshot(&self, collection: &str, snapshot: &str) -> Result<()>;

    /// Stream a snapshot's bytes, or `None` when the node does not have it.
    async fn download_snapshot(
        &self,
        collection: &str,
        snapshot: &str,
    ) -> Result<Option<ByteStream>>;

    /// Restore a collection from a snapshot location.
    async fn recover_from_snapshot(&self, collection: &str, location: &str) -> Result<bool>;

    /// Replicate a shard between two peers.
    async fn replicate_shard(
        &self,
        collection: &str,
        shard_id: u32,
        from_peer: u64,
        to_peer: u64,
    ) -> Result<bool>;
}

/// reqwest-backed [`ClusterApi`] implementation.
#[derive(Clone)]
pub struct NodeClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl NodeClient {
    /// Create a client with default timeouts.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_timeouts(
            base_url,
            api_key,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// Create a client with custom timeouts.
    pub fn with_timeouts(
        base_url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::GET, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder
    }

    async fn json_result<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LookoutError::InvalidResponse(format!(
                "{} from {}: {}",
                status,
                self.base_url,
                body.chars().take(200).collect::<String>()
            )));
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        envelope.result.ok_or_else(|| {
            LookoutError::InvalidResponse(format!("{}: response carried no result", self.base_url))
        })
    }
}

#[async_trait]
impl ClusterApi for NodeClient {
    async fn cluster_info(&self) -> Result<ClusterInfo> {
        self.json_result(self.get("/cluster")).await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let result: CollectionsResult = self.json_result(self.get("/collections")).await?;
        Ok(result.collections.into_iter().map(|c| c.name).collect())
    }

    async fn collection_info(&self, collection: &str) -> Result<CollectionInfo> {
        self.json_result(self.get(&format!("/collections/{}", collection)))
            .await
    }

    async fn create_snapshot(&self, collection: &str) -> Result<SnapshotDescription> {
        self.json_result(self.request(
            reqwest::Method::POST,
            &format!("/collections/{}/snapshots", collection),
        ))
        .await
    }

    async fn list_snapshots(&self, collection: &str) -> Result<Vec<SnapshotDescription>> {
        self.json_result(self.get(&format!("/collections/{}/snapshots", collection)))
            .await
    }

    async fn delete_snapshot(&self, collection: &str, snapshot: &str) -> Result<()> {
        let _: bool = self
            .json_result(self.request(
                reqwest::Method::DELETE,
                &format!("/collections/{}/snapshots/{}", collection, snapshot),
            ))
            .await?;
        Ok(())
    }

    async fn download_snapshot(
        &self,
        collection: &str,
        snapshot: &str,
    ) -> Result<Option<ByteStream>> {
        let response = self
            .get(&format!("/collections/{}/snapshots/{}", collection, snapshot))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LookoutError::Network(format!(
                "{} downloading {}/{} from {}",
                response.status(),
                collection,
                snapshot,
                self.base_url
            )));
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Some(Box::pin(StreamReader::new(stream))))
    }

    async fn recover_from_snapshot(&self, collection: &str, location: &str) -> Result<bool> {
        self.json_result(
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{}/snapshots/recover", collection),
            )
            .json(&RecoverRequest { location }),
        )
        .await
    }

    async fn replicate_shard(
        &self,
        collection: &str,
        shard_id: u32,
        from_peer: u64,
        to_peer: u64,
    ) -> Result<bool> {
        self.json_result(
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{}/cluster", collection),
            )
            .json(&ReplicateShardRequest {
                replicate_shard: ReplicateShardBody {
                    shard_id,
                    from_peer_id: from_peer,
                    to_peer_id: to_peer,
                },
            }),
        )
        .await
    }
}

/// Builds per-node API clients. The seam the poller and backends mock in tests.
pub trait ClientFactory: Send + Sync {
    /// Client for a discovered endpoint.
    fn client(&self, endpoint: &NodeEndpoint) -> Arc<dyn ClusterApi>;

    /// Client for a node already known by URL (inventory records).
    fn client_for_url(&self, url: &str) -> Arc<dyn ClusterApi>;
}

/// Production factory producing [`NodeClient`]s.
pub struct HttpClientFactory {
    api_key: Option<String>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(
        api_key: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            api_key,
            connect_timeout,
            request_timeout,
        }
    }
}

impl ClientFactory for HttpClientFactory {
    fn client(&self, endpoint: &NodeEndpoint) -> Arc<dyn ClusterApi> {
        self.client_for_url(&endpoint.url())
    }

    fn client_for_url(&self, url: &str) -> Arc<dyn ClusterApi> {
        Arc::new(NodeClient::with_timeouts(
            url,
            self.api_key.clone(),
            self.connect_timeout,
            self.request_timeout,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_info_deserializes() {
        let payload = r#"{
            "result": {
                "peer_id": 42,
                "peers": {
                    "42": {"uri": "http://db-0:6335/"},
                    "43": {"uri": "http://db-1:6335/"}
                },
                "raft_info": {"term": 7, "commit": 101, "leader": 42, "role": "Leader"},
                "consensus_thread_status": {"consensus_thread_status": "working"},
                "message_send_failures": {}
            },
            "status": "ok",
            "time": 0.001
        }"#;
        let envelope: ApiEnvelope<ClusterInfo> = serde_json::from_str(payload).unwrap();
        let info = envelope.result.unwrap();
        assert_eq!(info.peer_id, Some(42));
        assert_eq!(info.peers.len(), 2);
        assert_eq!(info.raft_info.unwrap().leader, Some(42));
        assert!(info.consensus_thread_status.unwrap().is_working());
    }

    #[test]
    fn test_cluster_info_tolerates_missing_fields() {
        let payload = r#"{"result": {"peer_id": 1}, "status": "ok", "time": 0.0}"#;
        let envelope: ApiEnvelope<ClusterInfo> = serde_json::from_str(payload).unwrap();
        let info = envelope.result.unwrap();
        assert!(info.peers.is_empty());
        assert!(info.raft_info.is_none());
    }

    #[test]
    fn test_consensus_thread_status_parsing() {
        let working = ConsensusThreadStatus {
            consensus_thread_status: Some("working".into()),
            err_message: None,
        };
        assert!(working.is_working());

        let stopped = ConsensusThreadStatus {
            consensus_thread_status: Some("stopped_with_err".into()),
            err_message: Some("panic".into()),
        };
        assert!(!stopped.is_working());
    }

    #[test]
    fn test_snapshot_list_deserializes() {
        let payload = r#"{
            "result": [
                {"name": "orders-42-2024-03-01.snapshot", "size": 1048576,
                 "creation_time": "2024-03-01T10:00:00", "checksum": "ab12"}
            ],
            "status": "ok", "time": 0.0
        }"#;
        let envelope: ApiEnvelope<Vec<SnapshotDescription>> =
            serde_json::from_str(payload).unwrap();
        let snapshots = envelope.result.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].size, Some(1048576));
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = NodeClient::new("http://db-0:6333/", None);
        assert_eq!(client.base_url, "http://db-0:6333");
    }
}
