//! Split-brain detection over per-node membership views.
//!
//! After a scan, every healthy node carries the peer-id set it believes the
//! cluster consists of. When a strict majority of those nodes agree on one
//! exact set, that set is the cluster's majority view and any healthy node
//! holding a different view is demoted with [`NodeErrorKind::ClusterSplit`].
//!
//! When no strict majority exists the cycle is skipped entirely: guessing a
//! membership view during a partition would flag the wrong side. A 1-1
//! disagreement between two nodes therefore never establishes a majority.
//!
//! The view is recomputed from scratch every cycle and returned to the
//! caller; nothing here survives across cycles.

use crate::types::{NodeErrorKind, NodeHealth};
use std::collections::HashSet;
use tracing::{debug, warn};

/// The membership view held by a strict majority of healthy nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MajorityView {
    /// The agreed peer-id set.
    pub peer_ids: HashSet<String>,
    /// How many nodes hold exactly this set.
    pub supporters: usize,
    /// How many healthy, peer-reporting nodes were considered.
    pub considered: usize,
}

/// Run split-brain detection over one cycle's node records.
///
/// Only healthy nodes reporting a non-empty peer-id set are considered; nodes
/// already unhealthy from the scan are never touched. Returns the majority
/// view when one exists, demoting divergent nodes in place.
pub fn detect(nodes: &mut [NodeHealth]) -> Option<MajorityView> {
    let considered: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.is_healthy && !n.peer_ids.is_empty())
        .map(|(i, _)| i)
        .collect();

    if considered.is_empty() {
        return None;
    }

    // Group by exact set equality; the node count stays small enough that a
    // linear scan per node beats hashing sets.
    let mut groups: Vec<(&HashSet<String>, usize)> = Vec::new();
    for &idx in &considered {
        let view = &nodes[idx].peer_ids;
        match groups.iter_mut().find(|(set, _)| *set == view) {
            Some((_, count)) => *count += 1,
            None => groups.push((view, 1)),
        }
    }

    let (majority_set, supporters) = groups
        .iter()
        .max_by_key(|(_, count)| *count)
        .map(|(set, count)| ((*set).clone(), *count))?;

    // Strict majority: more than half of the considered nodes. A 1-1 split
    // leaves both groups at exactly half and establishes nothing.
    if supporters * 2 <= considered.len() {
        debug!(
            groups = groups.len(),
            considered = considered.len(),
            "no majority membership view; skipping split detection this cycle"
        );
        return None;
    }

    for &idx in &considered {
        if nodes[idx].peer_ids != majority_set {
            let reason = describe_divergence(&majority_set, &nodes[idx].peer_ids);
            warn!(
                node = %nodes[idx].url,
                %reason,
                "node membership view diverges from majority"
            );
            nodes[idx].demote(NodeErrorKind::ClusterSplit, reason);
        }
    }

    Some(MajorityView {
        peer_ids: majority_set,
        supporters,
        considered: considered.len(),
    })
}

/// Human-readable description of how a node's view differs from the majority.
fn describe_divergence(majority: &HashSet<String>, actual: &HashSet<String>) -> String {
    let mut missing: Vec<&str> = majority
        .difference(actual)
        .map(String::as_str)
        .collect();
    let mut unexpected: Vec<&str> = actual
        .difference(majority)
        .map(String::as_str)
        .collect();
    missing.sort_unstable();
    unexpected.sort_unstable();

    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing peer(s) {}", missing.join(", ")));
    }
    if !unexpected.is_empty() {
        parts.push(format!("unexpected peer(s) {}", unexpected.join(", ")));
    }

    format!(
        "membership view disagrees with majority: {}",
        parts.join("; ")
    )
}
