//! IAllocator request/response protocol: the external JSON envelope
//! callers use to invoke a single planning operation.
//!
//! `{request: {type, name, ...}, nodes, instances, nodegroups,
//! cluster_tags, version, ipolicy}` in, `{success, info, result}` out. The
//! cluster data embedded in the request reuses the same per-node/
//! per-instance shape as the standalone snapshot format, so the
//! request is re-wrapped into a snapshot envelope and handed to
//! [`crate::snapshot::from_json_str`] rather than re-implementing the
//! node/instance parsing here.
//!
//! `result` is an array of node names for `allocate`/`relocate` (primary
//! only, or `[primary, secondary]` for a replicated template), a
//! `[[instanceName, [nodeNames...]], ...]` list for `change-group` and
//! `node-evacuate`, and a failure-reason histogram when `success` is
//! false.

use crate::allocator::{self, apply_move, EvacMode, Move, PlacementConstraints};
use crate::balancer;
use crate::error::Error;
use crate::model::{DiskTemplate, InstanceSpec, NodeIdx};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    Allocate {
        name: String,
        disk_template: String,
        memory: u64,
        disk_space_total: u64,
        vcpus: u32,
        #[serde(default)]
        spindle_use: u32,
        #[serde(default)]
        required_node_tags: BTreeSet<String>,
        #[serde(default)]
        required_networks: Vec<String>,
    },
    Relocate {
        name: String,
        #[serde(default)]
        excluded_nodes: Vec<String>,
    },
    ChangeGroup {
        name: String,
        candidate_groups: Vec<String>,
    },
    NodeEvacuate {
        /// Node names to evacuate.
        nodes: Vec<String>,
        /// `primary-only` | `secondary-only` | `all`.
        mode: String,
    },
    MultiAllocate {
        instances: Vec<AllocateSpec>,
    },
    Balance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateSpec {
    pub name: String,
    pub disk_template: String,
    pub memory: u64,
    pub disk_space_total: u64,
    pub vcpus: u32,
    #[serde(default)]
    pub spindle_use: u32,
    #[serde(default)]
    pub required_node_tags: BTreeSet<String>,
    #[serde(default)]
    pub required_networks: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub success: bool,
    pub info: String,
    pub result: Value,
}

fn snapshot_envelope(env: &Value) -> Value {
    json!({
        "version": env.get("version").cloned().unwrap_or(Value::from(1)),
        "cluster": {"tags": env.get("cluster_tags").cloned().unwrap_or(Value::Array(vec![]))},
        "nodegroups": env.get("nodegroups").cloned().unwrap_or(Value::Array(vec![])),
        "nodes": env.get("nodes").cloned().unwrap_or(Value::Array(vec![])),
        "instances": env.get("instances").cloned().unwrap_or(Value::Array(vec![])),
    })
}

fn parse_template(s: &str) -> Result<DiskTemplate, Error> {
    Ok(match s {
        "diskless" => DiskTemplate::Diskless,
        "plain" => DiskTemplate::Plain,
        "drbd" | "drbd8" => DiskTemplate::Drbd,
        "file" => DiskTemplate::File,
        "sharedfile" => DiskTemplate::SharedFile,
        "blockdev" => DiskTemplate::Block,
        "rbd" => DiskTemplate::Rbd,
        other => {
            return Err(Error::InvalidValue {
                field: "disk_template".to_string(),
                message: format!("unknown template {other:?}"),
            })
        }
    })
}

/// Parse and execute a single IAllocator request, returning the response
/// envelope as a JSON string. Never panics on malformed input; every
/// failure path degrades to `{success: false, info: "..."}`.
pub fn handle_request(raw: &str) -> Result<String, Error> {
    let env: Value = serde_json::from_str(raw)?;
    let cluster_json = snapshot_envelope(&env).to_string();
    let snap = crate::snapshot::from_json_str(&cluster_json)?;

    let request_value = env
        .get("request")
        .ok_or_else(|| Error::MissingKey {
            key: "request".to_string(),
            available: env
                .as_object()
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default(),
        })?
        .clone();
    let request: Request = serde_json::from_value(request_value)?;

    let response = match request {
        Request::Allocate {
            name,
            disk_template,
            memory,
            disk_space_total,
            vcpus,
            spindle_use,
            required_node_tags,
            required_networks,
        } => {
            let template = parse_template(&disk_template)?;
            let spec = InstanceSpec {
                mem_mib: memory,
                disk_mib: disk_space_total,
                vcpus,
                spindles: spindle_use,
            };
            let constraints = PlacementConstraints {
                required_node_tags,
                required_networks,
            };
            let result = allocator::allocate_new_constrained(
                &snap,
                &spec,
                template,
                &crate::scoring::ScoreWeights::default(),
                &constraints,
            );
            Response {
                success: result.success,
                info: if result.success {
                    format!("allocated {name}")
                } else {
                    "failed to find a feasible placement".to_string()
                },
                result: if result.success {
                    let mut nodes = vec![snap.nodes[result.primary.unwrap()].name.clone()];
                    if let Some(sec) = result.secondary {
                        nodes.push(snap.nodes[sec].name.clone());
                    }
                    json!(nodes)
                } else {
                    json!(result.fail_stats.as_histogram())
                },
            }
        }
        Request::Relocate { name, excluded_nodes } => {
            let inst_idx = snap.instance_by_name(&name).ok_or_else(|| Error::MissingKey {
                key: name.clone(),
                available: snap.instances.iter().map(|i| i.name.clone()).collect(),
            })?;
            let excluded: Vec<NodeIdx> = excluded_nodes
                .iter()
                .filter_map(|n| snap.node_by_name(n))
                .collect();
            let result = allocator::relocate(&snap, inst_idx, &excluded);
            Response {
                success: result.success,
                info: if result.success {
                    "relocated".to_string()
                } else {
                    "no feasible relocation target".to_string()
                },
                result: if result.success {
                    // The replicated case relocates the secondary, leaving primary
                    // untouched; the non-replicated case relocates the primary.
                    let moved = if snap.instances[inst_idx].disk_template.is_replicated() {
                        result.secondary.unwrap()
                    } else {
                        result.primary.unwrap()
                    };
                    json!([snap.nodes[moved].name.clone()])
                } else {
                    json!(result.fail_stats.as_histogram())
                },
            }
        }
        Request::ChangeGroup { name, candidate_groups } => {
            let inst_idx = snap.instance_by_name(&name).ok_or_else(|| Error::MissingKey {
                key: name.clone(),
                available: snap.instances.iter().map(|i| i.name.clone()).collect(),
            })?;
            let groups: Vec<usize> = candidate_groups
                .iter()
                .filter_map(|g| snap.group_by_name(g))
                .collect();
            match allocator::change_group(&snap, inst_idx, &groups) {
                Ok(moves) => Response {
                    success: true,
                    info: success_info(1, 0),
                    result: render_move_targets(&snap, &moves),
                },
                Err(fail_stats) => Response {
                    success: false,
                    info: "no candidate group accepted the instance".to_string(),
                    result: json!(fail_stats.as_histogram()),
                },
            }
        }
        Request::NodeEvacuate { nodes, mode } => {
            let node_idxs: Vec<NodeIdx> = nodes.iter().filter_map(|n| snap.node_by_name(n)).collect();
            let evac_mode = match mode.as_str() {
                "primary-only" => EvacMode::PrimaryOnly,
                "secondary-only" => EvacMode::SecondaryOnly,
                "all" => EvacMode::Both,
                other => {
                    return Err(Error::InvalidValue {
                        field: "mode".to_string(),
                        message: format!("unknown evacuation mode {other:?}"),
                    })
                }
            };
            match allocator::multi_evacuate(&snap, &node_idxs, evac_mode) {
                Ok(moves) => {
                    let moved = moves.len();
                    Response {
                        success: true,
                        info: success_info(moved, 0),
                        result: render_move_targets(&snap, &moves),
                    }
                }
                Err(fail_stats) => Response {
                    success: false,
                    info: "evacuation infeasible".to_string(),
                    result: json!(fail_stats.as_histogram()),
                },
            }
        }
        Request::MultiAllocate { instances } => {
            let mut working = snap.clone();
            let mut placements = Vec::new();
            let mut any_failed = false;
            for spec_req in instances {
                let template = parse_template(&spec_req.disk_template)?;
                let spec = InstanceSpec {
                    mem_mib: spec_req.memory,
                    disk_mib: spec_req.disk_space_total,
                    vcpus: spec_req.vcpus,
                    spindles: spec_req.spindle_use,
                };
                let constraints = PlacementConstraints {
                    required_node_tags: spec_req.required_node_tags.clone(),
                    required_networks: spec_req.required_networks.clone(),
                };
                let result = allocator::allocate_new_constrained(
                    &working,
                    &spec,
                    template,
                    &crate::scoring::ScoreWeights::default(),
                    &constraints,
                );
                if !result.success {
                    any_failed = true;
                    placements.push(json!({"name": spec_req.name, "success": false}));
                    continue;
                }
                placements.push(json!({
                    "name": spec_req.name,
                    "success": true,
                    "primary": result.primary.map(|i| working.nodes[i].name.clone()),
                    "secondary": result.secondary.map(|i| working.nodes[i].name.clone()),
                }));
                working = crate::hspace::commit_allocation(&working, &spec, template, &result, &spec_req.name);
            }
            Response {
                success: !any_failed,
                info: format!("placed {}/{} instances", placements.iter().filter(|p| p["success"] == true).count(), placements.len()),
                result: json!({ "allocations": placements }),
            }
        }
        Request::Balance => {
            let result = balancer::balance(&snap, &balancer::BalanceLimits::default());
            Response {
                success: !result.bad_input,
                info: if result.bad_input {
                    "input snapshot already violates invariants".to_string()
                } else {
                    format!("planned {} move(s)", result.moves.len())
                },
                result: json!({
                    "moves": render_moves(&snap, &result.moves),
                    "initial_cv": result.initial_cv,
                    "final_cv": result.final_cv,
                }),
            }
        }
    };

    Ok(serde_json::to_string(&response)?)
}

/// The literal phrasing used by change-group/evacuate on success, e.g.
/// `"Request successful: 0 instances failed to move and 1 were moved
/// successfully"`.
fn success_info(moved: usize, failed: usize) -> String {
    format!("Request successful: {failed} instances failed to move and {moved} were moved successfully")
}

/// Replay `moves` against `snap` and report each affected instance's final
/// `(primary, secondary)` node names as `[[instName, [nodeNames...]], ...]`,
/// in the order each instance was first moved.
fn render_move_targets(snap: &crate::model::ClusterSnapshot, moves: &[Move]) -> Value {
    let mut working = snap.clone();
    let mut order = Vec::new();
    for mv in moves {
        if !order.contains(&mv.instance) {
            order.push(mv.instance);
        }
        working = apply_move(&working, mv.instance, mv.kind)
            .expect("move was already validated by the planner that produced it");
    }
    json!(order
        .into_iter()
        .map(|idx| {
            let inst = &working.instances[idx];
            let mut nodes = vec![working.nodes[inst.primary].name.clone()];
            if let Some(sec) = inst.secondary {
                nodes.push(working.nodes[sec].name.clone());
            }
            json!([inst.name.clone(), nodes])
        })
        .collect::<Vec<_>>())
}

fn render_moves(snap: &crate::model::ClusterSnapshot, moves: &[allocator::Move]) -> Value {
    json!(moves
        .iter()
        .map(|m| {
            json!({
                "instance": snap.instances[m.instance].name.clone(),
                "kind": render_kind(snap, m.kind),
                "resulting_cv": m.resulting_cv,
            })
        })
        .collect::<Vec<_>>())
}

fn render_kind(snap: &crate::model::ClusterSnapshot, kind: allocator::MoveKind) -> Value {
    match kind {
        allocator::MoveKind::PrimaryMove { new_primary } => {
            json!({"type": "primary-move", "target": snap.nodes[new_primary].name})
        }
        allocator::MoveKind::SecondaryMove { new_secondary } => {
            json!({"type": "secondary-move", "target": snap.nodes[new_secondary].name})
        }
        allocator::MoveKind::Failover => json!({"type": "failover"}),
        allocator::MoveKind::ReplaceAndMigrate { new_secondary } => {
            json!({"type": "replace-and-migrate", "target": snap.nodes[new_secondary].name})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(request: &str) -> String {
        format!(
            r#"{{
            "version": 1,
            "cluster_tags": [],
            "nodegroups": [{{
                "name": "default", "uuid": "g-1", "alloc_policy": "preferred",
                "ipolicy": {{
                    "min_spec": {{"memory": 128, "disk": 1024, "cpu_count": 1, "spindle_use": 1}},
                    "max_spec": {{"memory": 1048576, "disk": 16777216, "cpu_count": 64, "spindle_use": 64}},
                    "std_spec": {{"memory": 2048, "disk": 20480, "cpu_count": 2, "spindle_use": 2}},
                    "enabled_disk_templates": ["plain", "drbd"],
                    "vcpu_ratio": 4.0, "spindle_ratio": 4.0
                }}
            }}],
            "nodes": [
                {{"name": "n1", "uuid": "u1", "group": "default",
                  "total_memory": 8192, "free_memory": 8192,
                  "total_disk": 102400, "free_disk": 102400,
                  "total_cpu": 8.0, "used_cpu": 0.0, "vm_capable": true}},
                {{"name": "n2", "uuid": "u2", "group": "default",
                  "total_memory": 8192, "free_memory": 8192,
                  "total_disk": 102400, "free_disk": 102400,
                  "total_cpu": 8.0, "used_cpu": 0.0, "vm_capable": true}}
            ],
            "instances": [],
            "request": {request}
        }}"#
        )
    }

    #[test]
    fn allocate_request_returns_success_placement() {
        let raw = sample_request(
            r#"{"type": "allocate", "name": "i1", "disk_template": "plain", "memory": 1024, "disk_space_total": 10240, "vcpus": 1}"#,
        );
        let resp = handle_request(&raw).unwrap();
        let parsed: Value = serde_json::from_str(&resp).unwrap();
        assert_eq!(parsed["success"], true);
        assert!(parsed["result"][0].is_string());
    }

    #[test]
    fn allocate_request_honors_required_network() {
        let raw = format!(
            r#"{{
            "version": 1,
            "cluster_tags": [],
            "nodegroups": [{{
                "name": "default", "uuid": "g-1", "alloc_policy": "preferred",
                "ipolicy": {{
                    "min_spec": {{"memory": 128, "disk": 1024, "cpu_count": 1, "spindle_use": 1}},
                    "max_spec": {{"memory": 1048576, "disk": 16777216, "cpu_count": 64, "spindle_use": 64}},
                    "std_spec": {{"memory": 2048, "disk": 20480, "cpu_count": 2, "spindle_use": 2}},
                    "enabled_disk_templates": ["plain", "drbd"],
                    "vcpu_ratio": 4.0, "spindle_ratio": 4.0
                }}
            }}],
            "nodes": [
                {{"name": "n1", "uuid": "u1", "group": "default",
                  "total_memory": 8192, "free_memory": 8192,
                  "total_disk": 102400, "free_disk": 102400,
                  "total_cpu": 8.0, "used_cpu": 0.0, "vm_capable": true,
                  "networks": ["storage"]}},
                {{"name": "n2", "uuid": "u2", "group": "default",
                  "total_memory": 8192, "free_memory": 8192,
                  "total_disk": 102400, "free_disk": 102400,
                  "total_cpu": 8.0, "used_cpu": 0.0, "vm_capable": true}}
            ],
            "instances": [],
            "request": {{"type": "allocate", "name": "i1", "disk_template": "plain",
                "memory": 1024, "disk_space_total": 10240, "vcpus": 1,
                "required_networks": ["storage"]}}
        }}"#
        );
        let resp = handle_request(&raw).unwrap();
        let parsed: Value = serde_json::from_str(&resp).unwrap();
        assert_eq!(parsed["success"], true);
        assert_eq!(parsed["result"][0], "n1");
    }

    #[test]
    fn allocate_request_fails_when_no_node_has_required_network() {
        let raw = sample_request(
            r#"{"type": "allocate", "name": "i1", "disk_template": "plain", "memory": 1024, "disk_space_total": 10240, "vcpus": 1, "required_networks": ["storage"]}"#,
        );
        let resp = handle_request(&raw).unwrap();
        let parsed: Value = serde_json::from_str(&resp).unwrap();
        assert_eq!(parsed["success"], false);
        let histogram = parsed["result"].as_array().unwrap();
        assert!(histogram.iter().any(|e| e[0] == "FailNetwork"));
    }

    #[test]
    fn unknown_instance_name_is_an_error() {
        let raw = sample_request(r#"{"type": "relocate", "name": "ghost"}"#);
        let err = handle_request(&raw).unwrap_err();
        assert_eq!(err.error_type(), "missing_key");
    }

    #[test]
    fn change_group_success_reports_instance_node_list_and_info_line() {
        let raw = r#"{
            "version": 1,
            "cluster_tags": [],
            "nodegroups": [
                {"name": "default", "uuid": "g-1", "alloc_policy": "preferred",
                 "ipolicy": {
                    "min_spec": {"memory": 128, "disk": 1024, "cpu_count": 1, "spindle_use": 1},
                    "max_spec": {"memory": 1048576, "disk": 16777216, "cpu_count": 64, "spindle_use": 64},
                    "std_spec": {"memory": 2048, "disk": 20480, "cpu_count": 2, "spindle_use": 2},
                    "enabled_disk_templates": ["plain", "drbd"],
                    "vcpu_ratio": 4.0, "spindle_ratio": 4.0
                 }},
                {"name": "other", "uuid": "g-2", "alloc_policy": "preferred",
                 "ipolicy": {
                    "min_spec": {"memory": 128, "disk": 1024, "cpu_count": 1, "spindle_use": 1},
                    "max_spec": {"memory": 1048576, "disk": 16777216, "cpu_count": 64, "spindle_use": 64},
                    "std_spec": {"memory": 2048, "disk": 20480, "cpu_count": 2, "spindle_use": 2},
                    "enabled_disk_templates": ["plain", "drbd"],
                    "vcpu_ratio": 4.0, "spindle_ratio": 4.0
                 }}
            ],
            "nodes": [
                {"name": "n1", "uuid": "u1", "group": "default",
                 "total_memory": 8192, "free_memory": 8192,
                 "total_disk": 102400, "free_disk": 102400,
                 "total_cpu": 8.0, "used_cpu": 0.0, "vm_capable": true},
                {"name": "n2", "uuid": "u2", "group": "other",
                 "total_memory": 8192, "free_memory": 8192,
                 "total_disk": 102400, "free_disk": 102400,
                 "total_cpu": 8.0, "used_cpu": 0.0, "vm_capable": true}
            ],
            "instances": [
                {"name": "inst1", "pnode": "n1", "group": "default",
                 "memory": 1024, "vcpus": 1,
                 "disks": [{"dev_type": "plain", "size": 10240, "spindles": 1, "logical_id": ["xenvg", "inst1.disk0"]}],
                 "admin_state": "up", "disk_template": "plain"}
            ],
            "request": {"type": "change-group", "name": "inst1", "candidate_groups": ["other"]}
        }"#;
        let resp = handle_request(raw).unwrap();
        let parsed: Value = serde_json::from_str(&resp).unwrap();
        assert_eq!(parsed["success"], true);
        assert_eq!(
            parsed["info"],
            "Request successful: 0 instances failed to move and 1 were moved successfully"
        );
        assert_eq!(parsed["result"], json!([["inst1", ["n2"]]]));
    }

    #[test]
    fn balance_request_on_valid_empty_cluster_succeeds() {
        let raw = sample_request(r#"{"type": "balance"}"#);
        let resp = handle_request(&raw).unwrap();
        let parsed: Value = serde_json::from_str(&resp).unwrap();
        assert_eq!(parsed["success"], true);
    }
}
