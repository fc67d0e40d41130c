//! Confd responder: parses a verified request, queries the
//! currently-published snapshot, and returns a `(ReplyStatus, Value)` pair
//! the caller wraps back into a signed envelope.
//!
//! Handlers never mutate state — they read `ReloadState::snapshot()`
//! (lock-free) and compute. A single receive loop in `main.rs` spawns one
//! of these per incoming datagram.

use crate::reload::LinkIpMap;
use fleet_core::model::ClusterSnapshot;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Error,
}

impl ReplyStatus {
    fn as_str(self) -> &'static str {
        match self {
            ReplyStatus::Ok => "ok",
            ReplyStatus::Error => "error",
        }
    }
}

/// The three error payload kinds a handler can report. Callers must
/// distinguish `UnknownEntry` (the query was well-formed but found
/// nothing) from `Argument` (the query itself was malformed or
/// incomplete) — `NodePipByInstPip` is the request type where this
/// distinction matters most, and it applies uniformly to the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPayload {
    UnknownEntry,
    Argument,
    Internal,
}

impl ErrorPayload {
    fn as_str(self) -> &'static str {
        match self {
            ErrorPayload::UnknownEntry => "UnknownEntry",
            ErrorPayload::Argument => "Argument",
            ErrorPayload::Internal => "Internal",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum Request {
    Ping,
    ClusterMaster {
        #[serde(default)]
        fields: Option<Vec<String>>,
    },
    NodeRoleByName {
        name: String,
    },
    NodePipList,
    McPipList,
    InstIpsList {
        #[serde(default)]
        link: Option<String>,
    },
    NodePipByInstPip {
        #[serde(default)]
        link: Option<String>,
        #[serde(default)]
        ip: Option<String>,
        #[serde(default)]
        ip_list: Option<Vec<String>>,
    },
    NodeDrbd {
        name: String,
    },
}

fn ok(answer: Value) -> (ReplyStatus, Value) {
    (ReplyStatus::Ok, answer)
}

fn err(payload: ErrorPayload) -> (ReplyStatus, Value) {
    (ReplyStatus::Error, Value::String(payload.as_str().to_string()))
}

/// Wrap a handler's `(ReplyStatus, Value)` into the outer reply body the
/// caller signs and sends back, echoing the request's own `salt`.
pub fn build_reply_msg(status: ReplyStatus, answer: Value) -> Value {
    json!({ "status": status.as_str(), "answer": answer })
}

fn request_label(request: &Request) -> &'static str {
    match request {
        Request::Ping => "Ping",
        Request::ClusterMaster { .. } => "ClusterMaster",
        Request::NodeRoleByName { .. } => "NodeRoleByName",
        Request::NodePipList => "NodePipList",
        Request::McPipList => "McPipList",
        Request::InstIpsList { .. } => "InstIpsList",
        Request::NodePipByInstPip { .. } => "NodePipByInstPip",
        Request::NodeDrbd { .. } => "NodeDrbd",
    }
}

/// Parse the already-HMAC-verified inner message and dispatch. Any
/// deserialization failure (unknown `type`, missing required field) is
/// reported as `Argument`, not propagated as a protocol error — the
/// datagram was authentic, just malformed at the application layer.
pub fn dispatch(
    msg: &Value,
    snapshot: Option<&(ClusterSnapshot, LinkIpMap)>,
    config_version: u64,
) -> (ReplyStatus, Value) {
    let request: Request = match serde_json::from_value(msg.clone()) {
        Ok(r) => r,
        Err(_) => {
            crate::metrics::record_request("Unknown", "error");
            return err(ErrorPayload::Argument);
        }
    };

    let timer = crate::metrics::RequestTimer::new(request_label(&request));

    let Some((snap, links)) = snapshot else {
        timer.error();
        return (ReplyStatus::Error, Value::String(ErrorPayload::Internal.as_str().to_string()));
    };

    let (status, answer) = handle(&request, snap, links, config_version);
    match status {
        ReplyStatus::Ok => timer.success(),
        ReplyStatus::Error => timer.error(),
    }
    (status, answer)
}

fn handle(
    request: &Request,
    snap: &ClusterSnapshot,
    links: &LinkIpMap,
    config_version: u64,
) -> (ReplyStatus, Value) {
    match request {
        Request::Ping => ok(json!(config_version)),

        Request::ClusterMaster { fields } => {
            let master = snap.master_node();
            match fields {
                None => match master {
                    Some(m) => ok(json!(m.name)),
                    None => err(ErrorPayload::UnknownEntry),
                },
                Some(requested) => {
                    let values: Vec<Value> = requested
                        .iter()
                        .map(|f| match f.as_str() {
                            "name" => Value::String(snap.cluster_name.clone()),
                            "ip" => Value::String(snap.master_ip.clone()),
                            "mnodePip" => master
                                .map(|m| Value::String(m.primary_ip.clone()))
                                .unwrap_or(Value::Null),
                            _ => Value::Null,
                        })
                        .collect();
                    ok(Value::Array(values))
                }
            }
        }

        Request::NodeRoleByName { name } => match snap.node_by_name(name) {
            None => err(ErrorPayload::UnknownEntry),
            Some(idx) => {
                let node = &snap.nodes[idx];
                let role = if node.master {
                    "master"
                } else if node.offline {
                    "offline"
                } else if node.drained {
                    "drained"
                } else if node.master_candidate {
                    "candidate"
                } else {
                    "regular"
                };
                ok(Value::String(role.to_string()))
            }
        },

        Request::NodePipList => {
            let ips: Vec<Value> = snap.nodes.iter().map(|n| Value::String(n.primary_ip.clone())).collect();
            ok(Value::Array(ips))
        }

        Request::McPipList => {
            let ips: Vec<Value> = snap
                .nodes
                .iter()
                .filter(|n| n.master_candidate)
                .map(|n| Value::String(n.primary_ip.clone()))
                .collect();
            ok(Value::Array(ips))
        }

        Request::InstIpsList { link } => {
            let ips: Vec<Value> = match link {
                Some(link_name) => links
                    .get(link_name)
                    .into_iter()
                    .flatten()
                    .map(|ip| Value::String(ip.clone()))
                    .collect(),
                None => {
                    let mut all: Vec<String> = links.values().flatten().cloned().collect();
                    all.sort();
                    all.dedup();
                    all.into_iter().map(Value::String).collect()
                }
            };
            ok(Value::Array(ips))
        }

        Request::NodePipByInstPip { link, ip, ip_list } => {
            let lookup_one = |target_ip: &str| -> Option<String> {
                snap.instances.iter().find_map(|inst| {
                    let matches_ip = inst
                        .nic_ips
                        .iter()
                        .zip(inst.nic_links.iter())
                        .any(|(nic_ip, nic_link)| {
                            nic_ip.as_deref() == Some(target_ip)
                                && link.as_deref().map_or(true, |want| nic_link.as_deref() == Some(want))
                        });
                    if matches_ip {
                        Some(snap.nodes[inst.primary].primary_ip.clone())
                    } else {
                        None
                    }
                })
            };

            match (ip, ip_list) {
                (None, None) => err(ErrorPayload::Argument),
                (Some(single), _) => match lookup_one(single) {
                    Some(pip) => ok(Value::String(pip)),
                    None => err(ErrorPayload::UnknownEntry),
                },
                (None, Some(many)) => {
                    let answers: Vec<Value> = many
                        .iter()
                        .map(|target| match lookup_one(target) {
                            Some(pip) => Value::String(pip),
                            None => Value::Null,
                        })
                        .collect();
                    ok(Value::Array(answers))
                }
            }
        }

        Request::NodeDrbd { name } => match snap.node_by_name(name) {
            None => err(ErrorPayload::UnknownEntry),
            Some(idx) => {
                let mut rows: Vec<Value> = Vec::new();
                for inst in &snap.instances {
                    if !inst.disk_template.is_replicated() {
                        continue;
                    }
                    let is_primary = inst.primary == idx;
                    let is_secondary = inst.secondary == Some(idx);
                    if !is_primary && !is_secondary {
                        continue;
                    }
                    let node_a = snap.nodes[inst.primary].name.clone();
                    let node_b = inst
                        .secondary
                        .map(|s| snap.nodes[s].name.clone())
                        .unwrap_or_default();
                    for disk in &inst.drbd_disks {
                        rows.push(json!([
                            node_a,
                            node_b,
                            disk.port,
                            disk.minor_a,
                            disk.minor_b,
                            disk.secret,
                        ]));
                    }
                }
                ok(Value::Array(rows))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::model::{
        AdminState, AllocPolicy, DiskTemplate, DrbdDiskMeta, Group, Instance, InstancePolicy,
        InstanceSpec, Node,
    };
    use std::collections::BTreeSet;

    fn group() -> Group {
        let spec = InstanceSpec { mem_mib: 1024, disk_mib: 10240, vcpus: 2, spindles: 1 };
        Group {
            name: "default".to_string(),
            uuid: "g-1".to_string(),
            alloc_policy: AllocPolicy::Preferred,
            ipolicy: InstancePolicy {
                min_spec: spec,
                max_spec: InstanceSpec { mem_mib: 1 << 20, disk_mib: 1 << 24, vcpus: 64, spindles: 64 },
                std_spec: spec,
                enabled_disk_templates: [DiskTemplate::Plain, DiskTemplate::Drbd].into_iter().collect(),
                vcpu_ratio: 4.0,
                spindle_ratio: 4.0,
            },
        }
    }

    fn node(name: &str, ip: &str) -> Node {
        Node {
            name: name.to_string(),
            uuid: format!("u-{name}"),
            group: 0,
            total_mem_mib: 8192,
            free_mem_mib: 8192,
            total_disk_mib: 102400,
            free_disk_mib: 102400,
            total_cpu: 8.0,
            used_cpu: 0.0,
            total_spindles: None,
            free_spindles: None,
            peer_mem: Default::default(),
            offline: false,
            drained: false,
            master_candidate: false,
            master: false,
            vm_capable: true,
            exclusive_storage: false,
            tags: BTreeSet::new(),
            networks: BTreeSet::new(),
            primary_ip: ip.to_string(),
        }
    }

    fn sample() -> (ClusterSnapshot, LinkIpMap) {
        let mut n1 = node("node1", "10.0.0.1");
        n1.master = true;
        let mut n2 = node("node2", "10.0.0.2");
        n2.master_candidate = true;

        let mut snap = ClusterSnapshot::new(7, vec![group()], vec![n1, n2], vec![], BTreeSet::new());
        snap.cluster_name = "testcluster".to_string();
        snap.master_ip = "10.0.0.100".to_string();
        snap.instances.push(Instance {
            name: "inst1".to_string(),
            primary: 0,
            secondary: Some(1),
            group: 0,
            mem_mib: 2048,
            disk_mib: 10240,
            disk_sizes: vec![10240],
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
                secret: "s3cr3t".to_string(),
            }],
            nic_ips: vec![None],
            nic_links: vec![None],
        });
        snap.reindex();
        (snap, LinkIpMap::new())
    }

    #[test]
    fn ping_returns_config_version() {
        let (snap, links) = sample();
        let (status, answer) = handle(&Request::Ping, &snap, &links, 42);
        assert_eq!(status, ReplyStatus::Ok);
        assert_eq!(answer, json!(42));
    }

    #[test]
    fn node_role_by_name_master_matches_master_node() {
        let (snap, links) = sample();
        let (status, answer) = handle(
            &Request::NodeRoleByName { name: "node1".to_string() },
            &snap,
            &links,
            1,
        );
        assert_eq!(status, ReplyStatus::Ok);
        assert_eq!(answer, json!("master"));
    }

    #[test]
    fn node_role_by_name_candidate() {
        let (snap, links) = sample();
        let (_, answer) = handle(
            &Request::NodeRoleByName { name: "node2".to_string() },
            &snap,
            &links,
            1,
        );
        assert_eq!(answer, json!("candidate"));
    }

    #[test]
    fn node_role_by_name_unknown_node() {
        let (snap, links) = sample();
        let (status, answer) = handle(
            &Request::NodeRoleByName { name: "ghost".to_string() },
            &snap,
            &links,
            1,
        );
        assert_eq!(status, ReplyStatus::Error);
        assert_eq!(answer, json!("UnknownEntry"));
    }

    #[test]
    fn node_pip_list_lists_all_primary_ips() {
        let (snap, links) = sample();
        let (_, answer) = handle(&Request::NodePipList, &snap, &links, 1);
        assert_eq!(answer, json!(["10.0.0.1", "10.0.0.2"]));
    }

    #[test]
    fn mc_pip_list_only_candidates() {
        let (snap, links) = sample();
        let (_, answer) = handle(&Request::McPipList, &snap, &links, 1);
        assert_eq!(answer, json!(["10.0.0.2"]));
    }

    #[test]
    fn node_drbd_lists_disks_for_primary_and_secondary() {
        let (snap, links) = sample();
        let (status, answer) = handle(&Request::NodeDrbd { name: "node1".to_string() }, &snap, &links, 1);
        assert_eq!(status, ReplyStatus::Ok);
        let rows = answer.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], json!("node1"));
        assert_eq!(rows[0][1], json!("node2"));

        let (_, answer2) = handle(&Request::NodeDrbd { name: "node2".to_string() }, &snap, &links, 1);
        assert_eq!(answer2.as_array().unwrap().len(), 1);
    }

    #[test]
    fn node_pip_by_inst_pip_missing_query_is_argument_error() {
        let (snap, links) = sample();
        let (status, answer) = handle(
            &Request::NodePipByInstPip { link: None, ip: None, ip_list: None },
            &snap,
            &links,
            1,
        );
        assert_eq!(status, ReplyStatus::Error);
        assert_eq!(answer, json!("Argument"));
    }

    #[test]
    fn node_pip_by_inst_pip_no_match_is_unknown_entry() {
        let (snap, links) = sample();
        let (status, answer) = handle(
            &Request::NodePipByInstPip {
                link: None,
                ip: Some("9.9.9.9".to_string()),
                ip_list: None,
            },
            &snap,
            &links,
            1,
        );
        assert_eq!(status, ReplyStatus::Error);
        assert_eq!(answer, json!("UnknownEntry"));
    }

    #[test]
    fn dispatch_rejects_unknown_request_type_as_argument_error() {
        let (snap, links) = sample();
        let (status, answer) = dispatch(&json!({"type": "NotARealType"}), Some(&(snap, links)), 1);
        assert_eq!(status, ReplyStatus::Error);
        assert_eq!(answer, json!("Argument"));
    }

    #[test]
    fn dispatch_with_no_snapshot_is_internal_error() {
        let (status, answer) = dispatch(&json!({"type": "Ping"}), None, 1);
        assert_eq!(status, ReplyStatus::Error);
        assert_eq!(answer, json!("Internal"));
    }
}
