//! Cluster observation for Lookout.
//!
//! This module turns a discovered node list into a per-cycle view of cluster
//! health:
//! - Concurrent health polling with bounded per-node probes
//! - Majority-based split-brain detection
//! - The background monitor owning the shared state

mod monitor;
mod poller;
pub mod split_brain;

pub use monitor::ClusterMonitor;
pub use poller::{HealthPoller, NodeAdvisory, ScanOutcome};
pub use split_brain::MajorityView;
