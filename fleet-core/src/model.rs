//! Resource model: nodes, instances, groups, policies, invariants,
//! and the pure move primitives the allocator and balancer simulate with.
//!
//! Every planner operates on an immutable [`ClusterSnapshot`]; a move
//! primitive takes a snapshot by value, clones it, mutates the clone, and
//! returns the clone (copy-on-write). The input snapshot is never touched,
//! so callers can diff the two to compute a delta.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type NodeIdx = usize;
pub type InstanceIdx = usize;
pub type GroupIdx = usize;

/// Allocation policy for a node group. Declaration order is significant:
/// `Preferred < LastResort < Unallocable`, and callers must compare by
/// this ordering, never by equality alone, when picking a group to
/// allocate into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocPolicy {
    Preferred,
    LastResort,
    Unallocable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskTemplate {
    Diskless,
    Plain,
    Drbd,
    File,
    SharedFile,
    Block,
    Rbd,
}

impl DiskTemplate {
    /// Whether this template binds the instance to two nodes (primary + secondary).
    pub fn is_replicated(&self) -> bool {
        matches!(self, DiskTemplate::Drbd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminState {
    Up,
    Down,
    Offline,
}

impl AdminState {
    pub fn is_up(&self) -> bool {
        matches!(self, AdminState::Up)
    }
}

/// Dense, `Copy` enum tagging why a candidate placement was rejected.
/// Backs a fixed-size histogram (`FailStats`) so the inner allocator loop
/// merges counts with array indexing, not a hash map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    Mem,
    Disk,
    Cpu,
    Spindles,
    DiskCount,
    Tags,
    N1,
    Policy,
    Network,
}

impl FailMode {
    pub const COUNT: usize = 9;
    pub const ALL: [FailMode; Self::COUNT] = [
        FailMode::Mem,
        FailMode::Disk,
        FailMode::Cpu,
        FailMode::Spindles,
        FailMode::DiskCount,
        FailMode::Tags,
        FailMode::N1,
        FailMode::Policy,
        FailMode::Network,
    ];

    pub fn idx(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            FailMode::Mem => "FailMem",
            FailMode::Disk => "FailDisk",
            FailMode::Cpu => "FailCpu",
            FailMode::Spindles => "FailSpindles",
            FailMode::DiskCount => "FailDiskCount",
            FailMode::Tags => "FailTags",
            FailMode::N1 => "FailN1",
            FailMode::Policy => "FailPolicy",
            FailMode::Network => "FailNetwork",
        }
    }
}

/// Dense fail-mode histogram, merged by addition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailStats(pub [u32; FailMode::COUNT]);

impl FailStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, mode: FailMode) {
        self.0[mode.idx()] += 1;
    }

    pub fn merge(&mut self, other: &FailStats) {
        for i in 0..FailMode::COUNT {
            self.0[i] += other.0[i];
        }
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }

    /// Render as an insertion-ordered (by `FailMode::ALL`) label->count map,
    /// skipping zero entries, for the IAllocator failure histogram.
    pub fn as_histogram(&self) -> Vec<(&'static str, u32)> {
        FailMode::ALL
            .iter()
            .filter_map(|&m| {
                let c = self.0[m.idx()];
                if c > 0 {
                    Some((m.label(), c))
                } else {
                    None
                }
            })
            .collect()
    }
}

/// A violated invariant found by [`verify_cluster`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    DanglingPrimary { instance: InstanceIdx },
    DanglingSecondary { instance: InstanceIdx },
    PrimaryEqualsSecondary { instance: InstanceIdx },
    MemOverCommit { node: NodeIdx },
    DiskOverCommit { node: NodeIdx },
    CpuOverCommit { node: NodeIdx },
    SpindleOverCommit { node: NodeIdx },
    N1Violation { node: NodeIdx },
    PolicyViolation { instance: InstanceIdx, reason: String },
}

/// A bundle of resource quantities, used both for demand (an instance's
/// footprint) and for capacity bookkeeping on a node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub mem_mib: u64,
    pub disk_mib: u64,
    pub vcpus: u32,
    pub spindles: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub mem_mib: u64,
    pub disk_mib: u64,
    pub vcpus: u32,
    pub spindles: u32,
}

impl InstanceSpec {
    pub fn fits_within(&self, min: &InstanceSpec, max: &InstanceSpec) -> bool {
        self.mem_mib >= min.mem_mib
            && self.mem_mib <= max.mem_mib
            && self.disk_mib >= min.disk_mib
            && self.disk_mib <= max.disk_mib
            && self.vcpus >= min.vcpus
            && self.vcpus <= max.vcpus
            && self.spindles >= min.spindles
            && self.spindles <= max.spindles
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancePolicy {
    pub min_spec: InstanceSpec,
    pub max_spec: InstanceSpec,
    pub std_spec: InstanceSpec,
    pub enabled_disk_templates: BTreeSet<DiskTemplate>,
    pub vcpu_ratio: f64,
    pub spindle_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub uuid: String,
    pub alloc_policy: AllocPolicy,
    pub ipolicy: InstancePolicy,
}

/// A physical hypervisor node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub uuid: String,
    pub group: GroupIdx,

    pub total_mem_mib: u64,
    pub free_mem_mib: u64,
    pub total_disk_mib: u64,
    pub free_disk_mib: u64,
    pub total_cpu: f64,
    pub used_cpu: f64,
    pub total_spindles: Option<u32>,
    pub free_spindles: Option<u32>,

    /// Reserved memory this node must keep available per DRBD instance for
    /// which it acts as secondary, keyed by instance index. N+1 requires
    /// `free_mem_mib >= max(peer_mem.values())`.
    pub peer_mem: BTreeMap<InstanceIdx, u64>,

    pub offline: bool,
    pub drained: bool,
    pub master_candidate: bool,
    /// Whether this is the cluster's single master node, for confd's
    /// `ClusterMaster`/`NodeRoleByName` queries. At most one node per
    /// snapshot should carry this; planners never need it and ignore it.
    pub master: bool,
    pub vm_capable: bool,
    pub exclusive_storage: bool,

    pub tags: BTreeSet<String>,
    /// Network names with a NIC link present on this node, for the
    /// allocator's network-compatibility filter.
    pub networks: BTreeSet<String>,

    /// The node's primary (cluster-communication) IP address, as a plain
    /// string — confd's `NodePipList`/`McPipList`/`ClusterMaster` queries
    /// serve these verbatim, never parsing or validating them as the
    /// planning core has no need to.
    pub primary_ip: String,
}

impl Node {
    /// N+1 invariant: this node retains enough spare memory to host, after
    /// a single peer primary failure, the largest secondary instance it
    /// protects.
    pub fn check_n1(&self) -> bool {
        let worst = self.peer_mem.values().copied().max().unwrap_or(0);
        self.free_mem_mib >= worst
    }

    pub fn is_usable(&self) -> bool {
        !self.offline && self.vm_capable
    }

    pub fn cpu_ratio_used(&self) -> f64 {
        if self.total_cpu <= 0.0 {
            0.0
        } else {
            self.used_cpu / self.total_cpu
        }
    }
}

/// Per-disk DRBD wire identity: the port and minor pair the two replica
/// nodes use for this instance's disk, plus the shared secret. Node
/// identities themselves are not repeated here — they're `primary` and
/// `secondary` on the owning [`Instance`] — so this is exactly the part of
/// a `drbd8` `logical_id` that isn't already implied by instance
/// placement. Confd's `NodeDrbd` query reports these alongside the node
/// names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrbdDiskMeta {
    pub port: u32,
    pub minor_a: u32,
    pub minor_b: u32,
    pub secret: String,
}

/// A virtual instance hosted (primary, and optionally secondary) on nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub primary: NodeIdx,
    pub secondary: Option<NodeIdx>,
    pub group: GroupIdx,

    pub mem_mib: u64,
    pub disk_mib: u64,
    pub disk_sizes: Vec<u64>,
    pub disk_spindles: Vec<Option<u32>>,
    pub vcpus: u32,

    pub admin_state: AdminState,
    pub disk_template: DiskTemplate,
    pub auto_balance: bool,
    pub tags: BTreeSet<String>,

    /// Per-disk DRBD wire identity, one entry per disk, populated only
    /// when `disk_template` is replicated. Empty for every other
    /// template.
    pub drbd_disks: Vec<DrbdDiskMeta>,

    /// Per-NIC static IP address (`None` for a NIC with no static
    /// assignment), used by confd's `InstIpsList`/`NodePipByInstPip`.
    pub nic_ips: Vec<Option<String>>,
    /// Per-NIC network link name, paired index-for-index with `nic_ips`.
    pub nic_links: Vec<Option<String>>,
}

impl Instance {
    pub fn spec(&self) -> InstanceSpec {
        InstanceSpec {
            mem_mib: self.mem_mib,
            disk_mib: self.disk_mib,
            vcpus: self.vcpus,
            spindles: self.disk_spindles.iter().filter_map(|s| *s).sum(),
        }
    }

    pub fn is_movable(&self) -> bool {
        self.auto_balance && self.admin_state.is_up()
    }

    /// Whether this instance contributes to the given node's committed
    /// primary-side resources (memory/disk/cpu accounted while running).
    pub fn counts_on_primary(&self) -> bool {
        self.admin_state.is_up()
    }
}

/// Immutable, indexed view of the whole cluster. Planners clone-and-mutate
/// to simulate moves; the original is retained by the caller to compute a
/// delta against the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub version: u64,
    pub groups: Vec<Group>,
    pub nodes: Vec<Node>,
    pub instances: Vec<Instance>,
    pub cluster_tags: BTreeSet<String>,
    /// Cluster-wide name and floating master IP, confd's
    /// `ClusterMaster`/`NodeRoleByName` fodder. Planners never read these.
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub master_ip: String,

    #[serde(skip)]
    name_to_node: HashMap<String, NodeIdx>,
    #[serde(skip)]
    name_to_group: HashMap<String, GroupIdx>,
    #[serde(skip)]
    name_to_instance: HashMap<String, InstanceIdx>,
}

impl ClusterSnapshot {
    pub fn new(
        version: u64,
        groups: Vec<Group>,
        nodes: Vec<Node>,
        instances: Vec<Instance>,
        cluster_tags: BTreeSet<String>,
    ) -> Self {
        let mut snap = ClusterSnapshot {
            version,
            groups,
            nodes,
            instances,
            cluster_tags,
            cluster_name: String::new(),
            master_ip: String::new(),
            name_to_node: HashMap::new(),
            name_to_group: HashMap::new(),
            name_to_instance: HashMap::new(),
        };
        snap.reindex();
        snap
    }

    /// The node flagged as cluster master, if any. At most one node per
    /// snapshot should carry `master: true`.
    pub fn master_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.master)
    }

    /// Rebuild the name->index maps. Must be called after direct field
    /// mutation (e.g. via deserialization) before name lookups are used.
    pub fn reindex(&mut self) {
        self.name_to_node = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), i))
            .collect();
        self.name_to_group = self
            .groups
            .iter()
            .enumerate()
            .map(|(i, g)| (g.name.clone(), i))
            .collect();
        self.name_to_instance = self
            .instances
            .iter()
            .enumerate()
            .map(|(i, inst)| (inst.name.clone(), i))
            .collect();
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeIdx> {
        self.name_to_node.get(name).copied()
    }

    pub fn group_by_name(&self, name: &str) -> Option<GroupIdx> {
        self.name_to_group.get(name).copied()
    }

    pub fn instance_by_name(&self, name: &str) -> Option<InstanceIdx> {
        self.name_to_instance.get(name).copied()
    }

    pub fn nodes_in_group(&self, group: GroupIdx) -> impl Iterator<Item = NodeIdx> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.group == group)
            .map(|(i, _)| i)
    }

    pub fn instances_on_node(&self, node: NodeIdx) -> impl Iterator<Item = InstanceIdx> + '_ {
        self.instances.iter().enumerate().filter_map(move |(i, inst)| {
            if inst.primary == node || inst.secondary == Some(node) {
                Some(i)
            } else {
                None
            }
        })
    }

    /// Every node sharing a replicated (DRBD) instance with `node`, used by
    /// the rolling-reboot conflict graph.
    pub fn drbd_peers_of(&self, node: NodeIdx) -> BTreeSet<NodeIdx> {
        let mut peers = BTreeSet::new();
        for inst in &self.instances {
            if inst.disk_template.is_replicated() {
                if inst.primary == node {
                    if let Some(s) = inst.secondary {
                        peers.insert(s);
                    }
                } else if inst.secondary == Some(node) {
                    peers.insert(inst.primary);
                }
            }
        }
        peers
    }
}

/// Check all cluster invariants and return every violation found (empty == valid).
pub fn verify_cluster(snap: &ClusterSnapshot) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, inst) in snap.instances.iter().enumerate() {
        if inst.primary >= snap.nodes.len() {
            violations.push(Violation::DanglingPrimary { instance: idx });
            continue;
        }
        if let Some(sec) = inst.secondary {
            if sec >= snap.nodes.len() {
                violations.push(Violation::DanglingSecondary { instance: idx });
                continue;
            }
            if sec == inst.primary {
                violations.push(Violation::PrimaryEqualsSecondary { instance: idx });
            }
        }

        if let Some(group) = snap.groups.get(inst.group) {
            let spec = inst.spec();
            if !spec.fits_within(&group.ipolicy.min_spec, &group.ipolicy.max_spec) {
                violations.push(Violation::PolicyViolation {
                    instance: idx,
                    reason: "instance spec outside group min/max".to_string(),
                });
            }
            if !group
                .ipolicy
                .enabled_disk_templates
                .contains(&inst.disk_template)
            {
                violations.push(Violation::PolicyViolation {
                    instance: idx,
                    reason: "disk template not enabled for group".to_string(),
                });
            }
        }
    }

    for (idx, node) in snap.nodes.iter().enumerate() {
        if node.offline {
            continue;
        }

        let mut mem_used = 0u64;
        let mut disk_used = 0u64;
        let mut cpu_used = 0.0f64;
        let mut spindles_used = 0u32;

        for inst in &snap.instances {
            if inst.primary == idx && inst.counts_on_primary() {
                mem_used += inst.mem_mib;
                disk_used += inst.disk_mib;
                cpu_used += inst.vcpus as f64;
                spindles_used += inst.spec().spindles;
            }
        }

        if mem_used > node.total_mem_mib {
            violations.push(Violation::MemOverCommit { node: idx });
        }
        if disk_used > node.total_disk_mib {
            violations.push(Violation::DiskOverCommit { node: idx });
        }
        if let Some(group) = snap.groups.get(node.group) {
            if cpu_used > node.total_cpu * group.ipolicy.vcpu_ratio {
                violations.push(Violation::CpuOverCommit { node: idx });
            }
            if node.exclusive_storage {
                if let Some(total_spindles) = node.total_spindles {
                    let cap = (total_spindles as f64 * group.ipolicy.spindle_ratio) as u32;
                    if spindles_used > cap {
                        violations.push(Violation::SpindleOverCommit { node: idx });
                    }
                }
            }
        }

        if !node.check_n1() {
            violations.push(Violation::N1Violation { node: idx });
        }
    }

    violations
}

pub fn is_valid(snap: &ClusterSnapshot) -> bool {
    verify_cluster(snap).is_empty()
}

// ---------------------------------------------------------------------
// Move primitives
// ---------------------------------------------------------------------

pub(crate) fn credit_primary(node: &mut Node, inst: &Instance) {
    node.free_mem_mib += inst.mem_mib;
    node.free_disk_mib += inst.disk_mib;
    node.used_cpu -= inst.vcpus as f64;
    if let Some(free) = node.free_spindles.as_mut() {
        *free += inst.spec().spindles;
    }
}

/// Release a node's peer-memory reservation for `inst`, used when removing
/// an instance's secondary role from a hypothetical snapshot.
pub(crate) fn credit_secondary(node: &mut Node, _inst: &Instance, inst_idx: InstanceIdx) {
    node.peer_mem.remove(&inst_idx);
}

pub(crate) fn debit_primary(node: &mut Node, inst: &Instance) {
    node.free_mem_mib = node.free_mem_mib.saturating_sub(inst.mem_mib);
    node.free_disk_mib = node.free_disk_mib.saturating_sub(inst.disk_mib);
    node.used_cpu += inst.vcpus as f64;
    if let Some(free) = node.free_spindles.as_mut() {
        *free = free.saturating_sub(inst.spec().spindles);
    }
}

fn fits_primary(node: &Node, inst: &Instance, vcpu_ratio: f64) -> Result<(), FailMode> {
    if node.free_mem_mib < inst.mem_mib {
        return Err(FailMode::Mem);
    }
    if node.free_disk_mib < inst.disk_mib {
        return Err(FailMode::Disk);
    }
    if node.used_cpu + inst.vcpus as f64 > node.total_cpu * vcpu_ratio {
        return Err(FailMode::Cpu);
    }
    if let Some(free) = node.free_spindles {
        if free < inst.spec().spindles {
            return Err(FailMode::Spindles);
        }
    }
    Ok(())
}

fn vcpu_ratio_for(snap: &ClusterSnapshot, group: GroupIdx) -> f64 {
    snap.groups
        .get(group)
        .map(|g| g.ipolicy.vcpu_ratio)
        .unwrap_or(f64::INFINITY)
}

/// Swap an instance's primary node, crediting the old primary and debiting
/// the new one. Updates peer-memory on the secondary of DRBD instances.
pub fn apply_primary_move(
    snap: &ClusterSnapshot,
    inst_idx: InstanceIdx,
    new_primary: NodeIdx,
) -> Result<ClusterSnapshot, FailMode> {
    let mut next = snap.clone();
    let inst = next.instances[inst_idx].clone();

    if new_primary == inst.primary {
        return Ok(next);
    }
    if Some(new_primary) == inst.secondary {
        return Err(FailMode::Policy);
    }

    let ratio = vcpu_ratio_for(&next, next.nodes[new_primary].group);
    fits_primary(&next.nodes[new_primary], &inst, ratio)?;

    credit_primary(&mut next.nodes[inst.primary], &inst);
    debit_primary(&mut next.nodes[new_primary], &inst);

    if let Some(sec) = inst.secondary {
        next.nodes[sec].peer_mem.insert(inst_idx, inst.mem_mib);
    }

    next.instances[inst_idx].primary = new_primary;

    if !next.nodes[new_primary].check_n1() {
        return Err(FailMode::N1);
    }

    Ok(next)
}

/// Move an instance's secondary, updating peer-memory reservations on the
/// old and new secondary. No primary-side resource change.
pub fn apply_secondary_move(
    snap: &ClusterSnapshot,
    inst_idx: InstanceIdx,
    new_secondary: NodeIdx,
) -> Result<ClusterSnapshot, FailMode> {
    let mut next = snap.clone();
    let inst = next.instances[inst_idx].clone();

    if !inst.disk_template.is_replicated() {
        return Err(FailMode::Policy);
    }
    if new_secondary == inst.primary {
        return Err(FailMode::Policy);
    }
    if Some(new_secondary) == inst.secondary {
        return Ok(next);
    }

    if next.nodes[new_secondary].free_disk_mib < inst.disk_mib {
        return Err(FailMode::Disk);
    }

    if let Some(old_sec) = inst.secondary {
        next.nodes[old_sec].peer_mem.remove(&inst_idx);
    }
    next.nodes[new_secondary]
        .peer_mem
        .insert(inst_idx, inst.mem_mib);

    next.instances[inst_idx].secondary = Some(new_secondary);

    if !next.nodes[new_secondary].check_n1() {
        return Err(FailMode::N1);
    }

    Ok(next)
}

/// Swap primary and secondary roles: equivalent to a primary move to the
/// secondary plus a role swap.
pub fn apply_failover(
    snap: &ClusterSnapshot,
    inst_idx: InstanceIdx,
) -> Result<ClusterSnapshot, FailMode> {
    let inst = &snap.instances[inst_idx];
    let secondary = inst.secondary.ok_or(FailMode::Policy)?;
    let old_primary = inst.primary;

    let mut next = snap.clone();
    let inst_c = next.instances[inst_idx].clone();

    let ratio = vcpu_ratio_for(&next, next.nodes[secondary].group);
    fits_primary(&next.nodes[secondary], &inst_c, ratio)?;

    credit_primary(&mut next.nodes[old_primary], &inst_c);
    debit_primary(&mut next.nodes[secondary], &inst_c);

    next.nodes[secondary].peer_mem.remove(&inst_idx);
    next.nodes[old_primary]
        .peer_mem
        .insert(inst_idx, inst_c.mem_mib);

    next.instances[inst_idx].primary = secondary;
    next.instances[inst_idx].secondary = Some(old_primary);

    if !next.nodes[secondary].check_n1() || !next.nodes[old_primary].check_n1() {
        return Err(FailMode::N1);
    }

    Ok(next)
}

/// Compose replace-secondary with failover: move to a new secondary, then
/// fail over onto it.
pub fn apply_replace_and_migrate(
    snap: &ClusterSnapshot,
    inst_idx: InstanceIdx,
    new_secondary: NodeIdx,
) -> Result<ClusterSnapshot, FailMode> {
    let replaced = apply_secondary_move(snap, inst_idx, new_secondary)?;
    apply_failover(&replaced, inst_idx)
}

#[cfg(test)]
pub mod test_fixtures {
    use super::*;

    pub fn spec(mem: u64, disk: u64, vcpus: u32, spindles: u32) -> InstanceSpec {
        InstanceSpec {
            mem_mib: mem,
            disk_mib: disk,
            vcpus,
            spindles,
        }
    }

    pub fn basic_policy() -> InstancePolicy {
        InstancePolicy {
            min_spec: spec(128, 1024, 1, 1),
            max_spec: spec(1 << 20, 1 << 24, 64, 64),
            std_spec: spec(2048, 20480, 2, 2),
            enabled_disk_templates: [DiskTemplate::Plain, DiskTemplate::Drbd]
                .into_iter()
                .collect(),
            vcpu_ratio: 4.0,
            spindle_ratio: 4.0,
        }
    }

    pub fn basic_group(name: &str) -> Group {
        Group {
            name: name.to_string(),
            uuid: format!("{name}-uuid"),
            alloc_policy: AllocPolicy::Preferred,
            ipolicy: basic_policy(),
        }
    }

    pub fn basic_node(name: &str, group: GroupIdx, mem_mib: u64, disk_mib: u64) -> Node {
        Node {
            name: name.to_string(),
            uuid: format!("{name}-uuid"),
            group,
            total_mem_mib: mem_mib,
            free_mem_mib: mem_mib,
            total_disk_mib: disk_mib,
            free_disk_mib: disk_mib,
            total_cpu: 8.0,
            used_cpu: 0.0,
            total_spindles: Some(12),
            free_spindles: Some(12),
            peer_mem: BTreeMap::new(),
            offline: false,
            drained: false,
            master_candidate: true,
            master: false,
            vm_capable: true,
            exclusive_storage: false,
            tags: BTreeSet::new(),
            networks: BTreeSet::new(),
            primary_ip: format!("10.0.0.{}", group + 1),
        }
    }

    pub fn plain_instance(name: &str, primary: NodeIdx, group: GroupIdx, mem: u64, disk: u64) -> Instance {
        Instance {
            name: name.to_string(),
            primary,
            secondary: None,
            group,
            mem_mib: mem,
            disk_mib: disk,
            disk_sizes: vec![disk],
            disk_spindles: vec![Some(1)],
            vcpus: 2,
            admin_state: AdminState::Up,
            disk_template: DiskTemplate::Plain,
            auto_balance: true,
            tags: BTreeSet::new(),
            drbd_disks: Vec::new(),
            nic_ips: vec![None],
            nic_links: vec![None],
        }
    }

    pub fn drbd_instance(
        name: &str,
        primary: NodeIdx,
        secondary: NodeIdx,
        group: GroupIdx,
        mem: u64,
        disk: u64,
    ) -> Instance {
        Instance {
            name: name.to_string(),
            primary,
            secondary: Some(secondary),
            group,
            mem_mib: mem,
            disk_mib: disk,
            disk_sizes: vec![disk],
            disk_spindles: vec![Some(1)],
            vcpus: 2,
            admin_state: AdminState::Up,
            disk_template: DiskTemplate::Drbd,
            auto_balance: true,
            tags: BTreeSet::new(),
            drbd_disks: vec![DrbdDiskMeta {
                port: 11000,
                minor_a: 0,
                minor_b: 0,
                secret: "test-secret".to_string(),
            }],
            nic_ips: vec![None],
            nic_links: vec![None],
        }
    }
}
