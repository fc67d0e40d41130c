//! Capacity analysis ("hspace"): how many more instances of a given
//! shape the cluster can still absorb, under a fixed spec (`standard_fill`)
//! or a spec that shrinks on failure (`tiered_fill`).

use crate::allocator::allocate_new;
use crate::model::{ClusterSnapshot, DiskTemplate, FailStats, InstanceSpec};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillReport {
    pub allocated: u64,
    pub fail_stats: FailStats,
    pub mem_eff: f64,
    pub dsk_eff: f64,
    pub cpu_eff: f64,
}

/// Repeatedly allocate `spec` against a running simulated snapshot until
/// the first failure, then report the count and post-fill efficiency.
pub fn standard_fill(snap: &ClusterSnapshot, spec: &InstanceSpec, template: DiskTemplate) -> FillReport {
    let mut working = snap.clone();
    let mut allocated = 0u64;
    let mut fail_stats = FailStats::new();

    loop {
        let result = allocate_new(&working, spec, template);
        if !result.success {
            fail_stats.merge(&result.fail_stats);
            break;
        }
        working = place_directly(&working, spec, template, &result);
        allocated += 1;
    }

    efficiency_report(&working, allocated, fail_stats)
}

fn place_directly(
    snap: &ClusterSnapshot,
    spec: &InstanceSpec,
    template: DiskTemplate,
    result: &crate::allocator::AllocResult,
) -> ClusterSnapshot {
    let name = format!("fill-{}", snap.instances.len());
    commit_allocation(snap, spec, template, result, &name)
}

/// Materialize an [`crate::allocator::AllocResult`] as a concrete instance
/// named `name`, for callers (fill loops, `multi-allocate`) that need to
/// commit a simulated placement before planning the next one.
pub fn commit_allocation(
    snap: &ClusterSnapshot,
    spec: &InstanceSpec,
    template: DiskTemplate,
    result: &crate::allocator::AllocResult,
    name: &str,
) -> ClusterSnapshot {
    let mut next = snap.clone();
    let inst = crate::model::Instance {
        name: name.to_string(),
        primary: result.primary.unwrap(),
        secondary: result.secondary,
        group: result.group.unwrap(),
        mem_mib: spec.mem_mib,
        disk_mib: spec.disk_mib,
        disk_sizes: vec![spec.disk_mib],
        disk_spindles: vec![Some(spec.spindles)],
        vcpus: spec.vcpus,
        admin_state: crate::model::AdminState::Up,
        disk_template: template,
        auto_balance: true,
        tags: Default::default(),
        drbd_disks: if template.is_replicated() {
            vec![crate::model::DrbdDiskMeta {
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
    };
    let inst_idx = next.instances.len();
    next.instances.push(inst.clone());
    crate::model::debit_primary(&mut next.nodes[inst.primary], &inst);
    if let Some(sec) = inst.secondary {
        next.nodes[sec].peer_mem.insert(inst_idx, inst.mem_mib);
    }
    next.reindex();
    next
}

fn efficiency_report(snap: &ClusterSnapshot, allocated: u64, fail_stats: FailStats) -> FillReport {
    let usable: Vec<&crate::model::Node> = snap.nodes.iter().filter(|n| n.is_usable()).collect();
    let (total_mem, free_mem) = usable
        .iter()
        .fold((0u64, 0u64), |(tm, fm), n| (tm + n.total_mem_mib, fm + n.free_mem_mib));
    let (total_disk, free_disk) = usable
        .iter()
        .fold((0u64, 0u64), |(td, fd), n| (td + n.total_disk_mib, fd + n.free_disk_mib));
    let (total_cpu, used_cpu) = usable
        .iter()
        .fold((0.0f64, 0.0f64), |(tc, uc), n| (tc + n.total_cpu, uc + n.used_cpu));

    let mem_eff = if total_mem == 0 {
        0.0
    } else {
        1.0 - (free_mem as f64 / total_mem as f64)
    };
    let dsk_eff = if total_disk == 0 {
        0.0
    } else {
        1.0 - (free_disk as f64 / total_disk as f64)
    };
    let cpu_eff = if total_cpu <= 0.0 { 0.0 } else { used_cpu / total_cpu };

    FillReport {
        allocated,
        fail_stats,
        mem_eff,
        dsk_eff,
        cpu_eff,
    }
}

/// One rung of a tiered descent: a concrete spec plus how many successful
/// allocations were made at that spec before shrinking further.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredRung {
    pub spec: InstanceSpec,
    pub allocated: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredReport {
    /// Insertion-ordered (largest-to-smallest spec) allocation counts —
    /// a `Vec`, not a map, so the ordering guarantee holds regardless of
    /// hashing.
    pub histogram: Vec<TieredRung>,
    pub total_allocated: u64,
    pub fail_stats: FailStats,
}

/// Step sizes applied, in order, when a spec dimension must shrink.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TieredSteps {
    pub mem_step_mib: u64,
    pub disk_step_mib: u64,
    pub cpu_step: u32,
}

impl Default for TieredSteps {
    fn default() -> Self {
        TieredSteps {
            mem_step_mib: 1024,
            disk_step_mib: 10240,
            cpu_step: 1,
        }
    }
}

/// Fill the cluster starting at `max_spec`, descending memory, then disk,
/// then cpu (in that order) by `steps` whenever the current spec no longer
/// fits, until the spec drops below `min_spec` (the smallest enabled disk
/// template's floor across all candidate groups) or nothing more fits at
/// the floor either.
pub fn tiered_fill(
    snap: &ClusterSnapshot,
    max_spec: &InstanceSpec,
    min_spec: &InstanceSpec,
    steps: &TieredSteps,
    template: DiskTemplate,
) -> TieredReport {
    let mut working = snap.clone();
    let mut histogram = Vec::new();
    let mut total_allocated = 0u64;
    let mut fail_stats = FailStats::new();
    let mut spec = *max_spec;

    loop {
        let mut rung_count = 0u64;
        loop {
            let result = allocate_new(&working, &spec, template);
            if !result.success {
                fail_stats.merge(&result.fail_stats);
                break;
            }
            working = place_directly(&working, &spec, template, &result);
            rung_count += 1;
            total_allocated += 1;
        }

        if rung_count > 0 {
            histogram.push(TieredRung { spec, allocated: rung_count });
        }

        if spec.mem_mib <= min_spec.mem_mib
            && spec.disk_mib <= min_spec.disk_mib
            && spec.vcpus <= min_spec.vcpus
        {
            break;
        }

        let shrunk = shrink(&spec, min_spec, steps);
        if shrunk == spec {
            break;
        }
        spec = shrunk;
    }

    TieredReport {
        histogram,
        total_allocated,
        fail_stats,
    }
}

fn shrink(spec: &InstanceSpec, min_spec: &InstanceSpec, steps: &TieredSteps) -> InstanceSpec {
    if spec.mem_mib > min_spec.mem_mib {
        return InstanceSpec {
            mem_mib: spec.mem_mib.saturating_sub(steps.mem_step_mib).max(min_spec.mem_mib),
            ..*spec
        };
    }
    if spec.disk_mib > min_spec.disk_mib {
        return InstanceSpec {
            disk_mib: spec.disk_mib.saturating_sub(steps.disk_step_mib).max(min_spec.disk_mib),
            ..*spec
        };
    }
    if spec.vcpus > min_spec.vcpus {
        return InstanceSpec {
            vcpus: spec.vcpus.saturating_sub(steps.cpu_step).max(min_spec.vcpus),
            ..*spec
        };
    }
    *spec
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
    fn standard_fill_allocates_until_exhausted() {
        let snap = three_node_cluster();
        let inst_spec = spec(1024, 10240, 1, 1);
        let report = standard_fill(&snap, &inst_spec, DiskTemplate::Plain);
        assert!(report.allocated > 0);
        assert!(report.mem_eff > 0.0);
    }

    #[test]
    fn tiered_fill_descends_and_reports_insertion_order() {
        let snap = three_node_cluster();
        let max_spec = spec(4096, 40960, 2, 2);
        let min_spec = spec(512, 5120, 1, 1);
        let report = tiered_fill(&snap, &max_spec, &min_spec, &TieredSteps::default(), DiskTemplate::Plain);
        assert!(report.total_allocated > 0);
        assert!(!report.histogram.is_empty());
        // first rung must be the largest spec tried
        assert_eq!(report.histogram[0].spec.mem_mib, max_spec.mem_mib);
    }
}
