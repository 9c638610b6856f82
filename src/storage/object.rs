//! Object-storage backend for snapshot inventories.
//!
//! Snapshots live under a two-level key layout:
//! `{prefix}/{encoded collection}/{encoded snapshot}`. Segment encoding is
//! standard percent-encoding with one deviation the storage side requires:
//! the tilde, normally unreserved, is escaped to `%7E`.

use crate::client::ByteStream;
use crate::config::ObjectStorageConfig;
use crate::error::{LookoutError, Result};
use crate::types::{CollectionRecord, SnapshotRecord, SnapshotSource};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Percent-encoding set for key segments: encode everything outside
/// `[A-Za-z0-9._-]`. Leaving `~` in the set forces it to `%7E`.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.');

/// Build the object key for one snapshot.
pub fn object_key(prefix: &str, collection: &str, snapshot: &str) -> String {
    format!(
        "{}/{}/{}",
        prefix.trim_end_matches('/'),
        utf8_percent_encode(collection, KEY_SEGMENT),
        utf8_percent_encode(snapshot, KEY_SEGMENT)
    )
}

/// Decode a listed key back into `(collection, snapshot)`.
///
/// Keys outside the two-level layout (stray objects, directory markers) are
/// skipped by returning `None`.
pub fn decode_key(prefix: &str, key: &str) -> Option<(String, String)> {
    let rest = key.strip_prefix(prefix.trim_end_matches('/'))?;
    let rest = rest.strip_prefix('/')?;
    let (collection, snapshot) = rest.split_once('/')?;
    if snapshot.is_empty() || snapshot.contains('/') {
        return None;
    }
    let collection = percent_decode_str(collection).decode_utf8().ok()?;
    let snapshot = percent_decode_str(snapshot).decode_utf8().ok()?;
    Some((collection.into_owned(), snapshot.into_owned()))
}

/// Snapshot operations against one configured object store. Mocked in tests;
/// implemented by [`S3SnapshotStore`] in production.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// One record per snapshot object under the prefix.
    async fn list_snapshots(&self) -> Result<Vec<SnapshotRecord>>;

    /// Distinct collections appearing under the prefix.
    async fn list_collections(&self) -> Result<Vec<CollectionRecord>>;

    /// Delete one snapshot object.
    async fn delete_snapshot(&self, collection: &str, snapshot: &str) -> Result<()>;

    /// Stream one snapshot object, or `None` when it does not exist.
    async fn download_snapshot(
        &self,
        collection: &str,
        snapshot: &str,
    ) -> Result<Option<ByteStream>>;
}

/// Resolves the object store for a sweep, when one is configured and usable.
#[async_trait]
pub trait ObjectStoreProvider: Send + Sync {
    async fn store(&self, namespace: Option<&str>) -> Result<Option<Arc<dyn ObjectStore>>>;
}

/// Source of object-storage configuration; cached and invalidated by its
/// owner, consumed as a pure input here.
#[async_trait]
pub trait ObjectStorageConfigProvider: Send + Sync {
    async fn config(&self, namespace: Option<&str>) -> Option<ObjectStorageConfig>;
}

/// Fixed configuration taken from the sidecar's own config file.
pub struct StaticObjectStorageConfig(pub Option<ObjectStorageConfig>);

#[async_trait]
impl ObjectStorageConfigProvider for StaticObjectStorageConfig {
    async fn config(&self, _namespace: Option<&str>) -> Option<ObjectStorageConfig> {
        self.0.clone()
    }
}

/// Production provider: resolves configuration and connects an S3 client.
pub struct S3StoreProvider {
    config: Arc<dyn ObjectStorageConfigProvider>,
    prefix: String,
}

impl S3StoreProvider {
    pub fn new(config: Arc<dyn ObjectStorageConfigProvider>, prefix: impl Into<String>) -> Self {
        Self {
            config,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl ObjectStoreProvider for S3StoreProvider {
    async fn store(&self, namespace: Option<&str>) -> Result<Option<Arc<dyn ObjectStore>>> {
        let Some(config) = self.config.config(namespace).await else {
            return Ok(None);
        };
        if !config.is_usable() {
            debug!("object storage configured but not usable; skipping backend");
            return Ok(None);
        }
        let store = S3SnapshotStore::connect(&config, &self.prefix).await?;
        Ok(Some(Arc::new(store)))
    }
}

/// S3-compatible snapshot store.
pub struct S3SnapshotStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3SnapshotStore {
    /// Build a client for the configured endpoint and credentials.
    pub async fn connect(config: &ObjectStorageConfig, prefix: &str) -> Result<Self> {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "lookout-config",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        // Path-style addressing keeps custom endpoints (MinIO and friends)
        // working without wildcard DNS.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            prefix: prefix.trim_end_matches('/').to_string(),
        })
    }

    async fn list_keys(&self) -> Result<Vec<(String, String, Option<u64>)>> {
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(format!("{}/", self.prefix));
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|e| LookoutError::ObjectStorage(e.to_string()))?;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                if let Some((collection, snapshot)) = decode_key(&self.prefix, key) {
                    let size = object.size().and_then(|s| u64::try_from(s).ok());
                    entries.push((collection, snapshot, size));
                }
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl ObjectStore for S3SnapshotStore {
    async fn list_snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        let records = self
            .list_keys()
            .await?
            .into_iter()
            .map(|(collection, snapshot, size_bytes)| SnapshotRecord {
                collection,
                snapshot,
                node_url: None,
                pod: None,
                peer_id: None,
                namespace: None,
                size_bytes,
                source: SnapshotSource::ObjectStorage,
                issues: Vec::new(),
            })
            .collect();
        Ok(records)
    }

    async fn list_collections(&self) -> Result<Vec<CollectionRecord>> {
        let collections: BTreeSet<String> = self
            .list_keys()
            .await?
            .into_iter()
            .map(|(collection, _, _)| collection)
            .collect();

        Ok(collections
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
        let key = object_key(&self.prefix, collection, snapshot);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| LookoutError::ObjectStorage(e.to_string()))?;
        debug!(%key, "deleted snapshot object");
        Ok(())
    }

    async fn download_snapshot(
        &self,
        collection: &str,
        snapshot: &str,
    ) -> Result<Option<ByteStream>> {
        let key = object_key(&self.prefix, collection, snapshot);
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(Box::pin(output.body.into_async_read()))),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(LookoutError::ObjectStorage(service_err.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_encodes_segments() {
        assert_eq!(
            object_key("snapshots", "my collection", "orders-42.snapshot"),
            "snapshots/my%20collection/orders-42.snapshot"
        );
    }

    #[test]
    fn test_object_key_escapes_tilde() {
        // `~` is unreserved in standard percent-encoding; the storage side
        // still requires it escaped.
        assert_eq!(
            object_key("snapshots", "col", "snap~1.snapshot"),
            "snapshots/col/snap%7E1.snapshot"
        );
    }

    #[test]
    fn test_object_key_escapes_separators_in_names() {
        assert_eq!(
            object_key("snapshots/", "a/b", "s"),
            "snapshots/a%2Fb/s"
        );
    }

    #[test]
    fn test_decode_key_round_trip() {
        let key = object_key("snapshots", "my collection", "snap~1.snapshot");
        let (collection, snapshot) = decode_key("snapshots", &key).unwrap();
        assert_eq!(collection, "my collection");
        assert_eq!(snapshot, "snap~1.snapshot");
    }

    #[test]
    fn test_decode_key_rejects_foreign_layouts() {
        assert!(decode_key("snapshots", "snapshots/only-one-level").is_none());
        assert!(decode_key("snapshots", "other-prefix/a/b").is_none());
        assert!(decode_key("snapshots", "snapshots/a/b/c").is_none());
        assert!(decode_key("snapshots", "snapshots/a/").is_none());
    }
}
