//! Allocator: constructive placement of new and relocated instances.
//!
//! Every entry point here is a pure function over a [`ClusterSnapshot`]: it
//! enumerates candidate placements, simulates each with the move primitives
//! from [`crate::model`], scores the resulting snapshot with
//! [`crate::scoring::compute_cv`], and returns either the best-scoring
//! feasible placement or a [`FailStats`] histogram explaining every
//! rejection.

use crate::model::{
    self, AllocPolicy, ClusterSnapshot, DiskTemplate, FailMode, FailStats, GroupIdx, InstanceIdx,
    InstanceSpec, NodeIdx,
};
use crate::scoring::{compute_cv, ScoreWeights};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Extra candidate-node requirements beyond raw capacity: required node
/// tags and required network links (NIC link names that must be present
/// in the node's network set). Checked against every candidate primary
/// node in addition to the capacity and policy checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementConstraints {
    #[serde(default)]
    pub required_node_tags: BTreeSet<String>,
    #[serde(default)]
    pub required_networks: Vec<String>,
}

fn check_constraints(node: &model::Node, constraints: &PlacementConstraints) -> Result<(), FailMode> {
    if !constraints.required_node_tags.iter().all(|t| node.tags.contains(t)) {
        return Err(FailMode::Tags);
    }
    if !constraints.required_networks.iter().all(|n| node.networks.contains(n)) {
        return Err(FailMode::Network);
    }
    Ok(())
}

/// The outcome of a single move, used to report a plan without re-deriving
/// it from a snapshot diff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MoveKind {
    PrimaryMove { new_primary: NodeIdx },
    SecondaryMove { new_secondary: NodeIdx },
    Failover,
    ReplaceAndMigrate { new_secondary: NodeIdx },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Move {
    pub instance: InstanceIdx,
    pub kind: MoveKind,
    /// compCV of the cluster immediately after this move is applied.
    pub resulting_cv: f64,
}

/// Result of a single-instance allocation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocResult {
    pub success: bool,
    pub group: Option<GroupIdx>,
    pub primary: Option<NodeIdx>,
    pub secondary: Option<NodeIdx>,
    pub cv: f64,
    pub fail_stats: FailStats,
}

impl AllocResult {
    fn infeasible(fail_stats: FailStats) -> Self {
        AllocResult {
            success: false,
            group: None,
            primary: None,
            secondary: None,
            cv: f64::INFINITY,
            fail_stats,
        }
    }
}

/// Which roles `multi_evacuate` must clear from the given nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvacMode {
    PrimaryOnly,
    SecondaryOnly,
    Both,
}

/// Candidate node groups ordered `Preferred < LastResort`, excluding
/// `Unallocable` groups entirely. Ties within a policy tier are broken by
/// group name, for determinism.
fn candidate_groups(snap: &ClusterSnapshot) -> Vec<GroupIdx> {
    let mut groups: Vec<GroupIdx> = (0..snap.groups.len())
        .filter(|&g| snap.groups[g].alloc_policy != AllocPolicy::Unallocable)
        .collect();
    groups.sort_by(|&a, &b| {
        snap.groups[a]
            .alloc_policy
            .cmp(&snap.groups[b].alloc_policy)
            .then_with(|| snap.groups[a].name.cmp(&snap.groups[b].name))
    });
    groups
}

fn usable_nodes_in_group(snap: &ClusterSnapshot, group: GroupIdx) -> Vec<NodeIdx> {
    let mut nodes: Vec<NodeIdx> = snap
        .nodes_in_group(group)
        .filter(|&n| snap.nodes[n].is_usable() && !snap.nodes[n].drained)
        .collect();
    nodes.sort_by(|&a, &b| snap.nodes[a].name.cmp(&snap.nodes[b].name));
    nodes
}

fn check_policy(snap: &ClusterSnapshot, group: GroupIdx, spec: &InstanceSpec, template: DiskTemplate) -> Result<(), FailMode> {
    let pol = &snap.groups[group].ipolicy;
    if !spec.fits_within(&pol.min_spec, &pol.max_spec) {
        return Err(FailMode::Policy);
    }
    if !pol.enabled_disk_templates.contains(&template) {
        return Err(FailMode::Policy);
    }
    Ok(())
}

fn check_node_capacity(node: &model::Node, spec: &InstanceSpec, vcpu_ratio: f64) -> Result<(), FailMode> {
    if node.free_mem_mib < spec.mem_mib {
        return Err(FailMode::Mem);
    }
    if node.free_disk_mib < spec.disk_mib {
        return Err(FailMode::Disk);
    }
    if node.used_cpu + spec.vcpus as f64 > node.total_cpu * vcpu_ratio {
        return Err(FailMode::Cpu);
    }
    if let Some(free) = node.free_spindles {
        if free < spec.spindles {
            return Err(FailMode::Spindles);
        }
    }
    Ok(())
}

/// Construct a placeholder instance record to simulate an allocation
/// without mutating the caller's instance list.
fn hypothetical_instance(
    spec: &InstanceSpec,
    primary: NodeIdx,
    secondary: Option<NodeIdx>,
    group: GroupIdx,
    template: DiskTemplate,
) -> model::Instance {
    model::Instance {
        name: "__candidate__".to_string(),
        primary,
        secondary,
        group,
        mem_mib: spec.mem_mib,
        disk_mib: spec.disk_mib,
        disk_sizes: vec![spec.disk_mib],
        disk_spindles: vec![Some(spec.spindles)],
        vcpus: spec.vcpus,
        admin_state: model::AdminState::Up,
        disk_template: template,
        auto_balance: true,
        tags: Default::default(),
        drbd_disks: if template.is_replicated() {
            vec![model::DrbdDiskMeta {
                port: 0,
                minor_a: 0,
                minor_b: 0,
                secret: String::new(),
            }]
        } else {
            Vec::new()
        },
        nic_ips: vec![None],
        nic_links: vec![None],
    }
}

/// Simulate placing a fresh instance at `(primary, secondary)` and score
/// the result, without touching `snap`.
fn try_place(
    snap: &ClusterSnapshot,
    group: GroupIdx,
    spec: &InstanceSpec,
    template: DiskTemplate,
    primary: NodeIdx,
    secondary: Option<NodeIdx>,
    weights: &ScoreWeights,
    constraints: &PlacementConstraints,
) -> Result<(ClusterSnapshot, f64), FailMode> {
    check_node_capacity(&snap.nodes[primary], spec, snap.groups[group].ipolicy.vcpu_ratio)?;
    check_constraints(&snap.nodes[primary], constraints)?;
    if let Some(sec) = secondary {
        if snap.nodes[sec].free_disk_mib < spec.disk_mib {
            return Err(FailMode::Disk);
        }
    }

    let mut candidate = snap.clone();
    let inst = hypothetical_instance(spec, primary, secondary, group, template);
    let inst_idx = candidate.instances.len();
    candidate.instances.push(inst);
    candidate.reindex();

    model::debit_primary(&mut candidate.nodes[primary], &candidate.instances[inst_idx].clone());
    if let Some(sec) = secondary {
        candidate.nodes[sec]
            .peer_mem
            .insert(inst_idx, spec.mem_mib);
    }

    if !candidate.nodes[primary].check_n1() {
        return Err(FailMode::N1);
    }
    if let Some(sec) = secondary {
        if !candidate.nodes[sec].check_n1() {
            return Err(FailMode::N1);
        }
    }

    let cv = compute_cv(&candidate, weights);
    Ok((candidate, cv))
}

/// Allocate a fresh instance. Enumerates candidate groups in
/// `Preferred < LastResort` order; within the first *tier* (the set of
/// groups sharing the best represented policy) that has at least one
/// feasible placement, every group in that tier is evaluated — each
/// enumerates single nodes (diskless/plain templates) or ordered node
/// pairs (replicated templates), scored by the resulting cluster compCV —
/// and the group whose best candidate scores lowest wins. Ties are broken
/// by `(primary name, secondary name)` lexicographic order.
pub fn allocate_new(snap: &ClusterSnapshot, spec: &InstanceSpec, template: DiskTemplate) -> AllocResult {
    allocate_new_weighted(snap, spec, template, &ScoreWeights::default())
}

pub fn allocate_new_weighted(
    snap: &ClusterSnapshot,
    spec: &InstanceSpec,
    template: DiskTemplate,
    weights: &ScoreWeights,
) -> AllocResult {
    allocate_new_constrained(snap, spec, template, weights, &PlacementConstraints::default())
}

/// Full form of [`allocate_new`] taking explicit score weights and
/// candidate-node constraints (required tags, required network links).
pub fn allocate_new_constrained(
    snap: &ClusterSnapshot,
    spec: &InstanceSpec,
    template: DiskTemplate,
    weights: &ScoreWeights,
    constraints: &PlacementConstraints,
) -> AllocResult {
    let mut fail_stats = FailStats::new();
    let groups = candidate_groups(snap);
    if groups.is_empty() {
        fail_stats.record(FailMode::Policy);
        return AllocResult::infeasible(fail_stats);
    }

    let mut tier_start = 0;
    while tier_start < groups.len() {
        let tier_policy = snap.groups[groups[tier_start]].alloc_policy;
        let mut tier_end = tier_start;
        while tier_end < groups.len() && snap.groups[groups[tier_end]].alloc_policy == tier_policy {
            tier_end += 1;
        }
        let tier = &groups[tier_start..tier_end];

        let mut tier_best: Option<(GroupIdx, NodeIdx, Option<NodeIdx>, f64)> = None;

        for &group in tier {
            if check_policy(snap, group, spec, template).is_err() {
                fail_stats.record(FailMode::Policy);
                continue;
            }

            let nodes = usable_nodes_in_group(snap, group);
            let mut best: Option<(NodeIdx, Option<NodeIdx>, f64)> = None;

            if template.is_replicated() {
                for &primary in &nodes {
                    for &secondary in &nodes {
                        if primary == secondary {
                            continue;
                        }
                        match try_place(snap, group, spec, template, primary, Some(secondary), weights, constraints) {
                            Ok((_, cv)) => {
                                best = pick_better(best, (primary, Some(secondary), cv), snap);
                            }
                            Err(mode) => fail_stats.record(mode),
                        }
                    }
                }
            } else {
                for &primary in &nodes {
                    match try_place(snap, group, spec, template, primary, None, weights, constraints) {
                        Ok((_, cv)) => {
                            best = pick_better(best, (primary, None, cv), snap);
                        }
                        Err(mode) => fail_stats.record(mode),
                    }
                }
            }

            if let Some((primary, secondary, cv)) = best {
                tier_best = pick_better_group(tier_best, (group, primary, secondary, cv), snap);
            }
        }

        if let Some((group, primary, secondary, cv)) = tier_best {
            return AllocResult {
                success: true,
                group: Some(group),
                primary: Some(primary),
                secondary,
                cv,
                fail_stats,
            };
        }

        tier_start = tier_end;
    }

    AllocResult::infeasible(fail_stats)
}

fn pick_better(
    current: Option<(NodeIdx, Option<NodeIdx>, f64)>,
    candidate: (NodeIdx, Option<NodeIdx>, f64),
    snap: &ClusterSnapshot,
) -> Option<(NodeIdx, Option<NodeIdx>, f64)> {
    match current {
        None => Some(candidate),
        Some(cur) => {
            if candidate.2 < cur.2 - f64::EPSILON {
                Some(candidate)
            } else if (candidate.2 - cur.2).abs() <= f64::EPSILON {
                let cur_key = (snap.nodes[cur.0].name.clone(), cur.1.map(|i| snap.nodes[i].name.clone()));
                let cand_key = (
                    snap.nodes[candidate.0].name.clone(),
                    candidate.1.map(|i| snap.nodes[i].name.clone()),
                );
                if cand_key < cur_key {
                    Some(candidate)
                } else {
                    Some(cur)
                }
            } else {
                Some(cur)
            }
        }
    }
}

/// Same comparison as [`pick_better`], lifted to also carry the
/// candidate's group so the best-scoring group within a policy tier can be
/// selected without a second, separate tie-break rule: group identity
/// never participates in the comparison, only the node-name rule does.
fn pick_better_group(
    current: Option<(GroupIdx, NodeIdx, Option<NodeIdx>, f64)>,
    candidate: (GroupIdx, NodeIdx, Option<NodeIdx>, f64),
    snap: &ClusterSnapshot,
) -> Option<(GroupIdx, NodeIdx, Option<NodeIdx>, f64)> {
    match current {
        None => Some(candidate),
        Some(cur) => {
            if candidate.3 < cur.3 - f64::EPSILON {
                Some(candidate)
            } else if (candidate.3 - cur.3).abs() <= f64::EPSILON {
                let cur_key = (snap.nodes[cur.1].name.clone(), cur.2.map(|i| snap.nodes[i].name.clone()));
                let cand_key = (
                    snap.nodes[candidate.1].name.clone(),
                    candidate.2.map(|i| snap.nodes[i].name.clone()),
                );
                if cand_key < cur_key {
                    Some(candidate)
                } else {
                    Some(cur)
                }
            } else {
                Some(cur)
            }
        }
    }
}

/// Relocate an existing instance's secondary (DRBD) or whole placement
/// (non-replicated) away from its current node(s), excluding `excluded`
/// from consideration. Reuses [`allocate_new`]'s candidate search over a
/// hypothetical snapshot with the instance already removed.
pub fn relocate(snap: &ClusterSnapshot, inst_idx: InstanceIdx, excluded: &[NodeIdx]) -> AllocResult {
    let inst = &snap.instances[inst_idx];
    let spec = inst.spec();
    let template = inst.disk_template;
    let group = inst.group;

    let mut without = snap.clone();
    let removed = without.instances[inst_idx].clone();
    model::credit_primary(&mut without.nodes[removed.primary], &removed);
    if let Some(sec) = removed.secondary {
        model::credit_secondary(&mut without.nodes[sec], &removed, inst_idx);
    }

    let mut fail_stats = FailStats::new();
    let weights = ScoreWeights::default();
    let nodes: Vec<NodeIdx> = usable_nodes_in_group(&without, group)
        .into_iter()
        .filter(|n| !excluded.contains(n))
        .collect();

    let mut best: Option<(NodeIdx, Option<NodeIdx>, f64)> = None;

    if template.is_replicated() {
        let keep_primary = removed.primary;
        for &secondary in &nodes {
            if secondary == keep_primary || excluded.contains(&keep_primary) {
                continue;
            }
            match try_place(&without, group, &spec, template, keep_primary, Some(secondary), &weights, &PlacementConstraints::default()) {
                Ok((_, cv)) => best = pick_better(best, (keep_primary, Some(secondary), cv), &without),
                Err(mode) => fail_stats.record(mode),
            }
        }
    } else {
        for &primary in &nodes {
            match try_place(&without, group, &spec, template, primary, None, &weights, &PlacementConstraints::default()) {
                Ok((_, cv)) => best = pick_better(best, (primary, None, cv), &without),
                Err(mode) => fail_stats.record(mode),
            }
        }
    }

    match best {
        Some((primary, secondary, cv)) => AllocResult {
            success: true,
            group: Some(group),
            primary: Some(primary),
            secondary,
            cv,
            fail_stats,
        },
        None => AllocResult::infeasible(fail_stats),
    }
}

/// Evacuate the given nodes of the roles named by `mode`, producing one
/// `Move` per evacuated instance in stable `(node order, instance name)`
/// order. Fails as a whole (returning the accumulated `FailStats`) if any
/// single instance cannot be evacuated, since a partial evacuation is not a
/// meaningful plan to execute.
pub fn multi_evacuate(snap: &ClusterSnapshot, nodes: &[NodeIdx], mode: EvacMode) -> Result<Vec<Move>, FailStats> {
    let mut working = snap.clone();
    let mut moves = Vec::new();
    let mut fail_stats = FailStats::new();
    let weights = ScoreWeights::default();

    let mut targets: Vec<InstanceIdx> = working
        .instances
        .iter()
        .enumerate()
        .filter(|(_, inst)| {
            let on_primary = nodes.contains(&inst.primary) && matches!(mode, EvacMode::PrimaryOnly | EvacMode::Both);
            let on_secondary = inst
                .secondary
                .map(|s| nodes.contains(&s))
                .unwrap_or(false)
                && matches!(mode, EvacMode::SecondaryOnly | EvacMode::Both);
            inst.is_movable() && (on_primary || on_secondary)
        })
        .map(|(i, _)| i)
        .collect();
    targets.sort_by(|&a, &b| working.instances[a].name.cmp(&working.instances[b].name));

    for inst_idx in targets {
        let inst = working.instances[inst_idx].clone();
        let on_primary = nodes.contains(&inst.primary);
        let on_secondary = inst.secondary.map(|s| nodes.contains(&s)).unwrap_or(false);

        let result = relocate(&working, inst_idx, nodes);
        if !result.success {
            fail_stats.merge(&result.fail_stats);
            return Err(fail_stats);
        }

        let kind = if on_primary && inst.disk_template.is_replicated() {
            MoveKind::ReplaceAndMigrate {
                new_secondary: result.secondary.unwrap(),
            }
        } else if on_primary {
            MoveKind::PrimaryMove {
                new_primary: result.primary.unwrap(),
            }
        } else if on_secondary {
            MoveKind::SecondaryMove {
                new_secondary: result.secondary.unwrap(),
            }
        } else {
            continue;
        };

        working = apply_move(&working, inst_idx, kind).map_err(|mode| {
            let mut fs = fail_stats;
            fs.record(mode);
            fs
        })?;

        moves.push(Move {
            instance: inst_idx,
            kind,
            resulting_cv: compute_cv(&working, &weights),
        });
    }

    Ok(moves)
}

/// Move an instance to a different group, trying each candidate group in
/// the order given and returning the first feasible plan.
pub fn change_group(snap: &ClusterSnapshot, inst_idx: InstanceIdx, candidate_groups: &[GroupIdx]) -> Result<Vec<Move>, FailStats> {
    let mut fail_stats = FailStats::new();
    let weights = ScoreWeights::default();

    for &group in candidate_groups {
        if snap.groups[group].alloc_policy == AllocPolicy::Unallocable {
            fail_stats.record(FailMode::Policy);
            continue;
        }

        let inst = &snap.instances[inst_idx];
        let spec = inst.spec();
        let template = inst.disk_template;

        if check_policy(snap, group, &spec, template).is_err() {
            fail_stats.record(FailMode::Policy);
            continue;
        }

        let nodes = usable_nodes_in_group(snap, group);
        let mut best: Option<(NodeIdx, Option<NodeIdx>, f64)> = None;

        if template.is_replicated() {
            for &primary in &nodes {
                for &secondary in &nodes {
                    if primary == secondary {
                        continue;
                    }
                    if let Ok((_, cv)) = try_place(snap, group, &spec, template, primary, Some(secondary), &weights, &PlacementConstraints::default()) {
                        best = pick_better(best, (primary, Some(secondary), cv), snap);
                    }
                }
            }
        } else {
            for &primary in &nodes {
                if let Ok((_, cv)) = try_place(snap, group, &spec, template, primary, None, &weights, &PlacementConstraints::default()) {
                    best = pick_better(best, (primary, None, cv), snap);
                }
            }
        }

        if let Some((primary, secondary, cv)) = best {
            let kind = if template.is_replicated() {
                MoveKind::ReplaceAndMigrate {
                    new_secondary: secondary.unwrap(),
                }
            } else {
                MoveKind::PrimaryMove { new_primary: primary }
            };
            return Ok(vec![Move {
                instance: inst_idx,
                kind,
                resulting_cv: cv,
            }]);
        }
    }

    Err(fail_stats)
}

/// Apply a [`MoveKind`] to a snapshot via the matching primitive in
/// [`crate::model`].
pub fn apply_move(snap: &ClusterSnapshot, inst_idx: InstanceIdx, kind: MoveKind) -> Result<ClusterSnapshot, FailMode> {
    match kind {
        MoveKind::PrimaryMove { new_primary } => model::apply_primary_move(snap, inst_idx, new_primary),
        MoveKind::SecondaryMove { new_secondary } => model::apply_secondary_move(snap, inst_idx, new_secondary),
        MoveKind::Failover => model::apply_failover(snap, inst_idx),
        MoveKind::ReplaceAndMigrate { new_secondary } => {
            model::apply_replace_and_migrate(snap, inst_idx, new_secondary)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_fixtures::*;
    use std::collections::BTreeSet;

    fn three_node_cluster() -> ClusterSnapshot {
        let group = basic_group("default");
        let nodes = vec![
            basic_node("n1", 0, 8192, 102400),
            basic_node("n2", 0, 8192, 102400),
            basic_node("n3", 0, 8192, 102400),
        ];
        ClusterSnapshot::new(1, vec![group], nodes, vec![], BTreeSet::new())
    }

    #[test]
    fn allocate_plain_picks_least_loaded_node() {
        let mut snap = three_node_cluster();
        snap.instances.push(plain_instance("existing", 0, 0, 6000, 60000));
        snap.reindex();

        let spec = spec(1024, 10240, 1, 1);
        let result = allocate_new(&snap, &spec, DiskTemplate::Plain);
        assert!(result.success);
        assert_ne!(result.primary, Some(0));
    }

    #[test]
    fn allocate_drbd_picks_distinct_primary_and_secondary() {
        let snap = three_node_cluster();
        let spec = spec(1024, 10240, 1, 1);
        let result = allocate_new(&snap, &spec, DiskTemplate::Drbd);
        assert!(result.success);
        assert_ne!(result.primary, result.secondary);
        assert!(result.secondary.is_some());
    }

    #[test]
    fn allocate_fails_when_nothing_fits() {
        let snap = three_node_cluster();
        let huge = spec(1 << 30, 1 << 30, 64, 64);
        let result = allocate_new(&snap, &huge, DiskTemplate::Plain);
        assert!(!result.success);
        assert!(result.fail_stats.total() > 0);
    }

    #[test]
    fn allocate_fails_with_fail_cpu_when_vcpu_ratio_exceeded() {
        let snap = three_node_cluster();
        // every node's cap is total_cpu(8) * vcpu_ratio(4) = 32 vcpus.
        let over_cpu = spec(1024, 10240, 40, 1);
        let result = allocate_new(&snap, &over_cpu, DiskTemplate::Plain);
        assert!(!result.success);
        assert_eq!(result.fail_stats.0[FailMode::Cpu.idx()], 3);
    }

    #[test]
    fn relocate_excludes_given_nodes() {
        let mut snap = three_node_cluster();
        snap.instances.push(plain_instance("i1", 0, 0, 1024, 10240));
        snap.reindex();

        let result = relocate(&snap, 0, &[1]);
        assert!(result.success);
        assert_eq!(result.primary, Some(2));
    }

    #[test]
    fn multi_evacuate_clears_primary_role() {
        let mut snap = three_node_cluster();
        snap.instances.push(plain_instance("i1", 0, 0, 1024, 10240));
        snap.reindex();

        let moves = multi_evacuate(&snap, &[0], EvacMode::PrimaryOnly).unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].instance, 0);
        assert!(matches!(moves[0].kind, MoveKind::PrimaryMove { .. }));
    }

    #[test]
    fn allocate_rejects_nodes_missing_required_network() {
        let mut snap = three_node_cluster();
        snap.nodes[1].networks.insert("storage".to_string());
        snap.reindex();

        let constraints = PlacementConstraints {
            required_networks: vec!["storage".to_string()],
            ..Default::default()
        };
        let spec = spec(1024, 10240, 1, 1);
        let result = allocate_new_constrained(
            &snap,
            &spec,
            DiskTemplate::Plain,
            &ScoreWeights::default(),
            &constraints,
        );
        assert!(result.success);
        assert_eq!(result.primary, Some(1));
    }

    #[test]
    fn allocate_fails_with_fail_network_when_no_node_has_the_link() {
        let snap = three_node_cluster();
        let constraints = PlacementConstraints {
            required_networks: vec!["storage".to_string()],
            ..Default::default()
        };
        let spec = spec(1024, 10240, 1, 1);
        let result = allocate_new_constrained(
            &snap,
            &spec,
            DiskTemplate::Plain,
            &ScoreWeights::default(),
            &constraints,
        );
        assert!(!result.success);
        assert!(result.fail_stats.0[FailMode::Network.idx()] > 0);
    }

    #[test]
    fn change_group_moves_instance_into_candidate_group() {
        let mut snap = three_node_cluster();
        let mut other = basic_group("other");
        other.alloc_policy = AllocPolicy::Preferred;
        snap.groups.push(other);
        snap.nodes.push(basic_node("n4", 1, 8192, 102400));
        snap.instances.push(plain_instance("i1", 0, 0, 1024, 10240));
        snap.reindex();

        let moves = change_group(&snap, 0, &[1]).unwrap();
        assert_eq!(moves.len(), 1);
    }

    #[test]
    fn allocate_picks_lowest_scoring_group_in_tier_not_first_by_name() {
        // Two `Preferred` groups, "alpha" sorting before "beta". "alpha"'s
        // only node is already heavily loaded; "beta"'s is empty. The
        // feasible-but-worse-scoring "alpha" placement must lose to
        // "beta" even though "alpha" is enumerated first.
        let alpha = basic_group("alpha");
        let beta = basic_group("beta");
        let nodes = vec![basic_node("a1", 0, 8192, 102400), basic_node("b1", 1, 8192, 102400)];
        let mut snap = ClusterSnapshot::new(1, vec![alpha, beta], nodes, vec![], BTreeSet::new());
        snap.instances.push(plain_instance("existing", 0, 0, 6000, 60000));
        snap.reindex();

        let new_spec = spec(1024, 10240, 1, 1);
        let result = allocate_new(&snap, &new_spec, DiskTemplate::Plain);
        assert!(result.success);
        assert_eq!(result.group, Some(1));
        assert_eq!(result.primary, Some(1));
    }
}
