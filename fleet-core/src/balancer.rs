//! Balancer: hill-descent rebalancing of an already-valid cluster.
//!
//! Each step enumerates every feasible move of every movable instance,
//! simulates it, and takes the single move with the most negative ΔCV.
//! Stops when no move improves the score by more than `epsilon`, when
//! `max_moves` is reached, or immediately if the input snapshot is already
//! invalid (the "bad-items short circuit": balancing cannot fix a cluster
//! that violates invariants before the first move is even considered).

use crate::allocator::{apply_move, Move, MoveKind};
use crate::model::{self, is_valid, ClusterSnapshot, DiskTemplate, GroupIdx, InstanceIdx, NodeIdx};
use crate::scoring::{compute_cv, ScoreWeights};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceLimits {
    pub max_moves: usize,
    /// Caps moves that require a full disk copy or resync: a primary
    /// move of a non-replicated instance, a secondary replacement, or a
    /// replace-and-migrate. Once reached, these move types stop
    /// contributing candidates — the balancer keeps going with whatever
    /// cheaper moves remain.
    pub max_disk_moves: usize,
    /// Caps moves that migrate a running instance's memory state: a
    /// failover, or the migrate half of a replace-and-migrate.
    pub max_cpu_moves: usize,
    pub epsilon: f64,
    pub allow_cross_group: bool,
}

impl Default for BalanceLimits {
    fn default() -> Self {
        BalanceLimits {
            max_moves: 100,
            max_disk_moves: usize::MAX,
            max_cpu_moves: usize::MAX,
            epsilon: 1e-4,
            allow_cross_group: false,
        }
    }
}

/// Whether `kind` (for an instance of the given `template`) requires a full
/// disk copy or resync, and so is subject to `max_disk_moves`. A primary
/// move of a replicated (DRBD) instance keeps the in-sync secondary and so
/// needs no disk copy; a primary move of a non-replicated instance does.
fn is_disk_move(kind: MoveKind, template: DiskTemplate) -> bool {
    match kind {
        MoveKind::Failover => false,
        MoveKind::PrimaryMove { .. } => !template.is_replicated(),
        MoveKind::SecondaryMove { .. } => true,
        MoveKind::ReplaceAndMigrate { .. } => true,
    }
}

/// Whether `kind` migrates a running instance's live memory state, and so
/// is subject to `max_cpu_moves`.
fn is_cpu_move(kind: MoveKind) -> bool {
    matches!(kind, MoveKind::Failover | MoveKind::ReplaceAndMigrate { .. })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResult {
    pub moves: Vec<Move>,
    pub initial_cv: f64,
    pub final_cv: f64,
    pub bad_input: bool,
}

/// Run hill-descent balancing starting from `snap`.
pub fn balance(snap: &ClusterSnapshot, limits: &BalanceLimits) -> BalanceResult {
    balance_weighted(snap, limits, &ScoreWeights::default())
}

pub fn balance_weighted(snap: &ClusterSnapshot, limits: &BalanceLimits, weights: &ScoreWeights) -> BalanceResult {
    let initial_cv = compute_cv(snap, weights);

    if !is_valid(snap) {
        return BalanceResult {
            moves: Vec::new(),
            initial_cv,
            final_cv: initial_cv,
            bad_input: true,
        };
    }

    let mut current = snap.clone();
    let mut current_cv = initial_cv;
    let mut moves = Vec::new();
    let mut disk_moves_used = 0usize;
    let mut cpu_moves_used = 0usize;

    while moves.len() < limits.max_moves {
        let disk_moves_left = disk_moves_used < limits.max_disk_moves;
        let cpu_moves_left = cpu_moves_used < limits.max_cpu_moves;
        match best_step(&current, current_cv, limits, weights, disk_moves_left, cpu_moves_left) {
            Some((next, mv)) => {
                let template = current.instances[mv.instance].disk_template;
                if is_disk_move(mv.kind, template) {
                    disk_moves_used += 1;
                }
                if is_cpu_move(mv.kind) {
                    cpu_moves_used += 1;
                }
                current = next;
                current_cv = mv.resulting_cv;
                moves.push(mv);
            }
            None => break,
        }
    }

    BalanceResult {
        moves,
        initial_cv,
        final_cv: current_cv,
        bad_input: false,
    }
}

/// Every candidate move type tried per instance, in the fixed order used
/// for tie-breaking when two moves yield an equal ΔCV.
fn candidate_kinds(inst: &model::Instance, nodes: &[NodeIdx], current_node_names: &[(NodeIdx, &str)]) -> Vec<MoveKind> {
    let mut kinds = Vec::new();

    if inst.secondary.is_some() {
        kinds.push(MoveKind::Failover);
    }

    for &n in nodes {
        if n != inst.primary && Some(n) != inst.secondary {
            kinds.push(MoveKind::PrimaryMove { new_primary: n });
        }
    }

    if inst.disk_template.is_replicated() {
        for &n in nodes {
            if n != inst.primary && Some(n) != inst.secondary {
                kinds.push(MoveKind::SecondaryMove { new_secondary: n });
                kinds.push(MoveKind::ReplaceAndMigrate { new_secondary: n });
            }
        }
    }

    let _ = current_node_names;
    kinds
}

// Group-boundary exclusion is enforced in `best_step` by restricting the
// candidate node set, not here; every movable instance is a candidate.
fn movable_instances(snap: &ClusterSnapshot, _limits: &BalanceLimits) -> Vec<InstanceIdx> {
    snap.instances
        .iter()
        .enumerate()
        .filter(|(_, inst)| inst.is_movable())
        .map(|(i, _)| i)
        .collect()
}

fn best_step(
    current: &ClusterSnapshot,
    current_cv: f64,
    limits: &BalanceLimits,
    weights: &ScoreWeights,
    disk_moves_left: bool,
    cpu_moves_left: bool,
) -> Option<(ClusterSnapshot, Move)> {
    let mut best: Option<(ClusterSnapshot, Move)> = None;

    for inst_idx in movable_instances(current, limits) {
        let inst = current.instances[inst_idx].clone();
        let group_nodes: Vec<NodeIdx> = if limits.allow_cross_group {
            (0..current.nodes.len()).collect()
        } else {
            current.nodes_in_group(inst.group).collect()
        };
        let usable: Vec<NodeIdx> = group_nodes
            .into_iter()
            .filter(|&n| current.nodes[n].is_usable() && !current.nodes[n].drained)
            .collect();

        for kind in candidate_kinds(&inst, &usable, &[]) {
            if !disk_moves_left && is_disk_move(kind, inst.disk_template) {
                continue;
            }
            if !cpu_moves_left && is_cpu_move(kind) {
                continue;
            }
            let Ok(next) = apply_move(current, inst_idx, kind) else {
                continue;
            };
            if !is_valid(&next) {
                continue;
            }
            let cv = compute_cv(&next, weights);
            let delta = cv - current_cv;
            if delta >= -limits.epsilon {
                continue;
            }

            let candidate_mv = Move {
                instance: inst_idx,
                kind,
                resulting_cv: cv,
            };

            best = match best {
                None => Some((next, candidate_mv)),
                Some((_, ref cur_mv)) if cv < cur_mv.resulting_cv - f64::EPSILON => Some((next, candidate_mv)),
                Some((ref cur_snap, ref cur_mv))
                    if (cv - cur_mv.resulting_cv).abs() <= f64::EPSILON
                        && tie_break_key(current, inst_idx, kind) < tie_break_key(current, cur_mv.instance, cur_mv.kind) =>
                {
                    Some((next, candidate_mv))
                }
                Some(existing) => Some(existing),
            };
        }
    }

    best
}

fn move_type_rank(kind: MoveKind) -> u8 {
    match kind {
        MoveKind::Failover => 0,
        MoveKind::PrimaryMove { .. } => 1,
        MoveKind::SecondaryMove { .. } => 2,
        MoveKind::ReplaceAndMigrate { .. } => 3,
    }
}

fn tie_break_key(snap: &ClusterSnapshot, inst_idx: InstanceIdx, kind: MoveKind) -> (String, u8) {
    (snap.instances[inst_idx].name.clone(), move_type_rank(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_fixtures::*;
    use std::collections::BTreeSet;

    fn skewed_cluster() -> ClusterSnapshot {
        let group = basic_group("default");
        let nodes = vec![
            basic_node("n1", 0, 8192, 102400),
            basic_node("n2", 0, 8192, 102400),
        ];
        let mut snap = ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new());
        snap.instances.push(plain_instance("i1", 0, 0, 3000, 30000));
        snap.instances.push(plain_instance("i2", 0, 0, 3000, 30000));
        snap.reindex();
        snap
    }

    #[test]
    fn balance_reduces_cv_on_skewed_cluster() {
        let snap = skewed_cluster();
        let result = balance(&snap, &BalanceLimits::default());
        assert!(!result.bad_input);
        assert!(result.final_cv <= result.initial_cv);
        assert!(!result.moves.is_empty());
    }

    #[test]
    fn balance_short_circuits_on_invalid_input() {
        let mut snap = skewed_cluster();
        snap.nodes[0].peer_mem.insert(99, 999_999);
        let result = balance(&snap, &BalanceLimits::default());
        assert!(result.bad_input);
        assert!(result.moves.is_empty());
    }

    #[test]
    fn balance_terminates_on_already_balanced_cluster() {
        let group = basic_group("default");
        let nodes = vec![
            basic_node("n1", 0, 8192, 102400),
            basic_node("n2", 0, 8192, 102400),
        ];
        let snap = ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new());
        let result = balance(&snap, &BalanceLimits::default());
        assert!(result.moves.is_empty());
        assert_eq!(result.initial_cv, result.final_cv);
    }

    #[test]
    fn balance_respects_max_moves_cap() {
        let snap = skewed_cluster();
        let limits = BalanceLimits {
            max_moves: 1,
            ..BalanceLimits::default()
        };
        let result = balance(&snap, &limits);
        assert!(result.moves.len() <= 1);
    }

    #[test]
    fn balance_respects_max_disk_moves_cap() {
        // skewed_cluster only has plain (non-replicated) instances, so every
        // candidate move for them is a primary move that counts as a disk
        // move. Capping max_disk_moves at zero must leave the balancer
        // unable to make any move at all.
        let snap = skewed_cluster();
        let limits = BalanceLimits {
            max_disk_moves: 0,
            ..BalanceLimits::default()
        };
        let result = balance(&snap, &limits);
        assert!(!result.bad_input);
        assert!(result.moves.is_empty());
        assert_eq!(result.final_cv, result.initial_cv);
    }

    #[test]
    fn balance_respects_max_cpu_moves_cap() {
        // n1 hosts a pinned (non-auto_balance) instance plus the primary of
        // a DRBD instance whose secondary is n2; node load is set up by
        // hand so free/used fields already reflect that placement. With
        // just two nodes in the group, a failover is the *only* candidate
        // move for the DRBD instance (there's no third node to
        // primary/secondary-move onto), and it fully re-balances mem,
        // disk, cpu and spindle usage between the two nodes. Capping
        // max_cpu_moves at zero must leave the balancer unable to improve
        // at all.
        let group = basic_group("default");
        let mut n1 = basic_node("n1", 0, 8192, 102400);
        n1.free_mem_mib -= 2000;
        n1.free_disk_mib -= 20000;
        n1.used_cpu = 4.0;
        n1.free_spindles = Some(10);
        let mut n2 = basic_node("n2", 0, 8192, 102400);
        n2.peer_mem.insert(1, 1000);
        let nodes = vec![n1, n2];

        let mut pinned = plain_instance("pinned", 0, 0, 1000, 10000);
        pinned.auto_balance = false;
        let drbd = drbd_instance("i1", 0, 1, 0, 1000, 10000);

        let mut snap = ClusterSnapshot::new(1, vec![group], nodes, vec![pinned, drbd], BTreeSet::new());
        snap.reindex();
        assert!(is_valid(&snap));

        let uncapped = balance(&snap, &BalanceLimits::default());
        assert!(!uncapped.moves.is_empty());
        assert!(uncapped.moves.iter().any(|mv| is_cpu_move(mv.kind)));
        assert!(uncapped.final_cv < uncapped.initial_cv);

        let limits = BalanceLimits {
            max_cpu_moves: 0,
            ..BalanceLimits::default()
        };
        let capped = balance(&snap, &limits);
        assert!(!capped.bad_input);
        assert!(capped.moves.is_empty());
        assert_eq!(capped.final_cv, capped.initial_cv);
    }
}
