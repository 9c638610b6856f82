//! Configuration module for Lookout.

use crate::error::{LookoutError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for a Lookout sidecar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookoutConfig {
    /// Cluster observation settings.
    pub cluster: ClusterConfig,
    /// Storage orchestration settings.
    pub storage: StorageSettings,
    /// Remote-exec transport settings.
    pub exec: ExecConfig,
}

impl LookoutConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LookoutError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| LookoutError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.api_port == 0 {
            return Err(LookoutError::InvalidConfig {
                field: "cluster.api_port".to_string(),
                reason: "API port must be non-zero".to_string(),
            });
        }

        if self.cluster.probe_timeout.is_zero() {
            return Err(LookoutError::InvalidConfig {
                field: "cluster.probe_timeout".to_string(),
                reason: "Probe timeout must be non-zero".to_string(),
            });
        }

        if self.cluster.poll_interval < self.cluster.probe_timeout {
            return Err(LookoutError::InvalidConfig {
                field: "cluster.poll_interval".to_string(),
                reason: "Poll interval must not be shorter than the probe timeout".to_string(),
            });
        }

        if let Some(object) = &self.storage.object_storage {
            if object.enabled && object.bucket.is_empty() {
                return Err(LookoutError::InvalidConfig {
                    field: "storage.object_storage.bucket".to_string(),
                    reason: "Bucket is required when object storage is enabled".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Create a minimal development configuration for a single local node.
    pub fn development() -> Self {
        Self {
            cluster: ClusterConfig {
                nodes: vec!["127.0.0.1:6333".to_string()],
                ..ClusterConfig::default()
            },
            storage: StorageSettings::default(),
            exec: ExecConfig::default(),
        }
    }
}

/// Cluster observation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Static node list (`host:port` entries). Empty when discovery is
    /// driven by the environment instead.
    pub nodes: Vec<String>,
    /// Default API port for entries that omit one.
    pub api_port: u16,
    /// API key sent with every request, when the cluster requires one.
    pub api_key: Option<String>,
    /// Interval between poll cycles.
    pub poll_interval: Duration,
    /// Deadline for a single node's cluster-info probe.
    pub probe_timeout: Duration,
    /// Deadline for non-probe API requests.
    pub request_timeout: Duration,
    /// Whether a successful probe is additionally required to enumerate
    /// collections before the node counts as healthy.
    pub check_collections: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            api_port: 6333,
            api_key: None,
            poll_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            check_collections: true,
        }
    }
}

/// Storage orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Object-storage key prefix for snapshots.
    pub snapshots_prefix: String,
    /// Collections directory on a node's local disk.
    pub collections_path: String,
    /// Snapshots directory on a node's local disk.
    pub snapshots_path: String,
    /// How long a fetched inventory stays fresh.
    pub inventory_ttl: Duration,
    /// Object storage connection, when configured.
    pub object_storage: Option<ObjectStorageConfig>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            snapshots_prefix: "snapshots".to_string(),
            collections_path: "/data/storage/collections".to_string(),
            snapshots_path: "/data/snapshots".to_string(),
            inventory_ttl: Duration::from_secs(60),
            object_storage: None,
        }
    }
}

/// Object storage (S3-compatible) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// Custom endpoint URL; unset for the provider default.
    pub endpoint: Option<String>,
    /// Access key.
    pub access_key: String,
    /// Secret key.
    pub secret_key: String,
    /// Bucket holding the snapshot objects.
    pub bucket: String,
    /// Region name.
    pub region: String,
    /// Whether this backend participates in retrieval at all.
    pub enabled: bool,
}

impl ObjectStorageConfig {
    /// Whether the configuration resolves to a usable backend.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.bucket.is_empty()
    }
}

/// Remote-exec transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Namespace the database pods run in.
    pub namespace: String,
    /// Container to exec into; unset for the pod default.
    pub container: Option<String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            container: None,
        }
    }
}
