//! Cluster scoring: per-node statistics and the compCV variance-based
//! imbalance score used by both the allocator (to rank candidates) and the
//! balancer (to decide whether a move is an improvement).

use crate::model::{ClusterSnapshot, NodeIdx};
use serde::{Deserialize, Serialize};

/// Per-node utilization ratios, all in `[0, ~1]` for a healthy node
/// (a node can exceed 1.0 transiently if overcommitted).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub mem_ratio: f64,
    pub disk_ratio: f64,
    pub cpu_ratio: f64,
    pub spindle_ratio: f64,
    /// Count of primary instances, normalized against the group's largest
    /// node instance count, to penalize concentration.
    pub instance_count_ratio: f64,
}

impl NodeStats {
    pub fn compute(snap: &ClusterSnapshot, node: NodeIdx, max_instance_count: f64) -> NodeStats {
        let n = &snap.nodes[node];

        let mem_ratio = ratio(n.total_mem_mib, n.free_mem_mib);
        let disk_ratio = ratio(n.total_disk_mib, n.free_disk_mib);
        let cpu_ratio = n.cpu_ratio_used();
        let spindle_ratio = match (n.total_spindles, n.free_spindles) {
            (Some(total), Some(free)) if total > 0 => {
                1.0 - (free as f64 / total as f64)
            }
            _ => 0.0,
        };

        let count = snap.instances_on_node(node).count() as f64;
        let instance_count_ratio = if max_instance_count > 0.0 {
            count / max_instance_count
        } else {
            0.0
        };

        NodeStats {
            mem_ratio,
            disk_ratio,
            cpu_ratio,
            spindle_ratio,
            instance_count_ratio,
        }
    }
}

fn ratio(total: u64, free: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        1.0 - (free as f64 / total as f64)
    }
}

/// Weights applied to each per-dimension variance term when folding
/// [`NodeStats`] across the cluster into a single scalar score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub mem: f64,
    pub disk: f64,
    pub cpu: f64,
    pub spindles: f64,
    pub instance_count: f64,
    /// Added once per offline node still hosting an instance, and once per
    /// N+1 violation among online nodes. Large enough that it lexically
    /// dominates any variance difference, so invariant violations are
    /// always removed before balance is refined further.
    pub penalty: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            mem: 1.0,
            disk: 1.0,
            cpu: 1.0,
            spindles: 1.0,
            instance_count: 0.5,
            penalty: 1000.0,
        }
    }
}

fn variance(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64
}

/// Count of nodes this score must penalize: every offline node still
/// hosting an instance (primary or secondary), every online node that
/// violates N+1, and every online node whose vcpu-ratio cap is exceeded.
/// Counted separately from the variance terms so a single invariant
/// violation always outweighs any balance refinement.
fn penalty_count(snap: &ClusterSnapshot) -> u64 {
    let mut count = 0u64;
    for (i, node) in snap.nodes.iter().enumerate() {
        if node.offline {
            if snap.instances_on_node(i).next().is_some() {
                count += 1;
            }
            continue;
        }
        if !node.check_n1() {
            count += 1;
        }
        if let Some(group) = snap.groups.get(node.group) {
            if node.used_cpu > node.total_cpu * group.ipolicy.vcpu_ratio {
                count += 1;
            }
        }
    }
    count
}

/// The cluster imbalance score ("compCV"): a weighted sum of per-dimension
/// variances across all usable nodes, plus a penalty term for every
/// offline-but-hosting node and every N+1 violation. Lower is more
/// balanced; 0.0 is a perfectly uniform, fully-invariant-clean cluster.
/// Offline nodes are excluded from the variance terms, since they carry
/// no load to balance and would otherwise drag every ratio toward zero —
/// but they still contribute to the penalty term if they host an
/// instance, which the penalty term's weight is large enough to
/// lexicographically dominate.
pub fn compute_cv(snap: &ClusterSnapshot, weights: &ScoreWeights) -> f64 {
    let usable: Vec<NodeIdx> = (0..snap.nodes.len())
        .filter(|&i| snap.nodes[i].is_usable())
        .collect();

    let penalty = weights.penalty * penalty_count(snap) as f64;

    if usable.is_empty() {
        return penalty;
    }

    let max_count = usable
        .iter()
        .map(|&i| snap.instances_on_node(i).count())
        .max()
        .unwrap_or(0) as f64;

    let stats: Vec<NodeStats> = usable
        .iter()
        .map(|&i| NodeStats::compute(snap, i, max_count))
        .collect();

    let mem: Vec<f64> = stats.iter().map(|s| s.mem_ratio).collect();
    let disk: Vec<f64> = stats.iter().map(|s| s.disk_ratio).collect();
    let cpu: Vec<f64> = stats.iter().map(|s| s.cpu_ratio).collect();
    let spindles: Vec<f64> = stats.iter().map(|s| s.spindle_ratio).collect();
    let counts: Vec<f64> = stats.iter().map(|s| s.instance_count_ratio).collect();

    penalty
        + weights.mem * variance(&mem)
        + weights.disk * variance(&disk)
        + weights.cpu * variance(&cpu)
        + weights.spindles * variance(&spindles)
        + weights.instance_count * variance(&counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_fixtures::*;
    use crate::model::ClusterSnapshot;
    use std::collections::BTreeSet;

    #[test]
    fn uniform_cluster_scores_zero() {
        let group = basic_group("default");
        let nodes = vec![
            basic_node("n1", 0, 8192, 102400),
            basic_node("n2", 0, 8192, 102400),
        ];
        let snap = ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new());
        assert_eq!(compute_cv(&snap, &ScoreWeights::default()), 0.0);
    }

    #[test]
    fn lopsided_cluster_scores_above_zero() {
        let group = basic_group("default");
        let nodes = vec![
            basic_node("n1", 0, 8192, 102400),
            basic_node("n2", 0, 8192, 102400),
        ];
        let mut snap = ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new());
        snap.instances.push(plain_instance("i1", 0, 0, 6000, 80000));
        snap.reindex();

        assert!(compute_cv(&snap, &ScoreWeights::default()) > 0.0);
    }

    #[test]
    fn balancing_a_move_reduces_score() {
        let group = basic_group("default");
        let nodes = vec![
            basic_node("n1", 0, 8192, 102400),
            basic_node("n2", 0, 8192, 102400),
        ];
        let mut snap = ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new());
        snap.instances.push(plain_instance("i1", 0, 0, 2000, 20000));
        snap.instances.push(plain_instance("i2", 0, 0, 2000, 20000));
        snap.reindex();

        let before = compute_cv(&snap, &ScoreWeights::default());
        let after_move = crate::model::apply_primary_move(&snap, 1, 1).unwrap();
        let after = compute_cv(&after_move, &ScoreWeights::default());
        assert!(after < before);
    }

    #[test]
    fn offline_nodes_excluded_from_score() {
        let group = basic_group("default");
        let mut nodes = vec![basic_node("n1", 0, 8192, 102400)];
        let mut offline = basic_node("n2", 0, 8192, 102400);
        offline.offline = true;
        nodes.push(offline);
        let snap = ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new());
        assert_eq!(compute_cv(&snap, &ScoreWeights::default()), 0.0);
    }

    #[test]
    fn n1_violation_adds_penalty_term() {
        let group = basic_group("default");
        let nodes = vec![
            basic_node("n1", 0, 8192, 102400),
            basic_node("n2", 0, 8192, 102400),
        ];
        let mut snap = ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new());
        snap.nodes[0].peer_mem.insert(0, 9000);
        let weights = ScoreWeights::default();
        assert_eq!(compute_cv(&snap, &weights), weights.penalty);
    }

    #[test]
    fn offline_node_hosting_an_instance_adds_penalty_term() {
        let group = basic_group("default");
        let mut nodes = vec![basic_node("n1", 0, 8192, 102400)];
        let mut offline = basic_node("n2", 0, 8192, 102400);
        offline.offline = true;
        nodes.push(offline);
        let mut snap = ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new());
        snap.instances.push(plain_instance("i1", 1, 0, 1024, 10240));
        snap.reindex();

        let weights = ScoreWeights::default();
        assert_eq!(compute_cv(&snap, &weights), weights.penalty);
    }
}
