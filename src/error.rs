//! Error types for Lookout.
//!
//! This module provides a unified error type [`LookoutError`] for all Lookout
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! Errors are organized into the following categories:
//!
//! - **Cluster observation**: node probing, cancellation, and scan failures
//! - **Storage orchestration**: backend sweeps, snapshot lookup, object storage
//! - **Remote execution**: the pod exec transport
//! - **Configuration**: invalid settings or missing configuration
//! - **Network/Serialization**: transport and decoding failures
//!
//! Node-level probe outcomes are deliberately *not* errors: a node that fails
//! its health check becomes an unhealthy [`crate::types::NodeHealth`] record,
//! and the scan itself still succeeds. Only cancellation and infrastructure
//! failures surface through this type.

use std::io;
use thiserror::Error;

/// Main error type for Lookout operations.
#[derive(Error, Debug)]
pub enum LookoutError {
    // Cluster observation errors
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid response from node: {0}")]
    InvalidResponse(String),

    #[error("No cluster state available: {0}")]
    NoClusterState(String),

    // Storage orchestration errors
    #[error("Object storage error: {0}")]
    ObjectStorage(String),

    #[error("Backend sweep failed: {0}")]
    BackendFailed(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    // Remote execution errors
    #[error("Remote exec transport unavailable")]
    ExecUnavailable,

    #[error("Remote exec failed: {0}")]
    Exec(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // External errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LookoutError {
    /// Check if error is retryable on a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LookoutError::Timeout(_)
                | LookoutError::ConnectionFailed(_)
                | LookoutError::Network(_)
                | LookoutError::BackendFailed(_)
                | LookoutError::NoClusterState(_)
        )
    }
}

impl From<serde_json::Error> for LookoutError {
    fn from(e: serde_json::Error) -> Self {
        LookoutError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for LookoutError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LookoutError::Timeout(0)
        } else if e.is_connect() {
            LookoutError::ConnectionFailed(e.to_string())
        } else if e.is_decode() {
            LookoutError::InvalidResponse(e.to_string())
        } else {
            LookoutError::Network(e.to_string())
        }
    }
}

/// Result type alias for Lookout operations.
pub type Result<T> = std::result::Result<T, LookoutError>;
