//! Canonical cluster-snapshot JSON: `{version, cluster, nodes,
//! nodegroups, instances}`, with a custom `Serialize`/`Deserialize` pair for
//! per-disk `logical_id` because its shape depends on the sibling `dev_type`
//! field in a way `#[derive(Deserialize)]` cannot express.

use crate::error::Error;
use crate::model::{
    AdminState, AllocPolicy, ClusterSnapshot, DiskTemplate, Group, Instance, InstancePolicy,
    InstanceSpec, Node,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Per-disk device type, distinct from [`DiskTemplate`] (an instance's
/// overall template) because a `file`-template instance still encodes each
/// disk with `dev_type: "file"`, matching the on-disk shape one-for-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskDevType {
    Plain,
    Drbd8,
    File,
    SharedFile,
    Blockdev,
    Rbd,
}

impl DiskDevType {
    fn as_str(self) -> &'static str {
        match self {
            DiskDevType::Plain => "plain",
            DiskDevType::Drbd8 => "drbd8",
            DiskDevType::File => "file",
            DiskDevType::SharedFile => "sharedfile",
            DiskDevType::Blockdev => "blockdev",
            DiskDevType::Rbd => "rbd",
        }
    }
}

/// The polymorphic `logical_id` tuple, one shape per [`DiskDevType`].
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalId {
    Plain { vg: String, lv_name: String },
    /// `[nodeA, nodeB, port, minorA, minorB, secret]` — the two node
    /// names are the instance's own primary/secondary, repeated here
    /// because the wire format doesn't otherwise reference them inside a
    /// disk entry.
    Drbd8 {
        node_a: String,
        node_b: String,
        port: u32,
        minor_a: u32,
        minor_b: u32,
        secret: String,
    },
    File { driver: String, path: String },
    SharedFile { driver: String, path: String },
    Blockdev { driver: String, adopt: String },
    Rbd { pool: String, name: String },
}

impl LogicalId {
    fn dev_type(&self) -> DiskDevType {
        match self {
            LogicalId::Plain { .. } => DiskDevType::Plain,
            LogicalId::Drbd8 { .. } => DiskDevType::Drbd8,
            LogicalId::File { .. } => DiskDevType::File,
            LogicalId::SharedFile { .. } => DiskDevType::SharedFile,
            LogicalId::Blockdev { .. } => DiskDevType::Blockdev,
            LogicalId::Rbd { .. } => DiskDevType::Rbd,
        }
    }

    fn to_tuple(&self) -> Vec<Value> {
        match self {
            LogicalId::Plain { vg, lv_name } => vec![Value::from(vg.clone()), Value::from(lv_name.clone())],
            LogicalId::Drbd8 {
                node_a,
                node_b,
                port,
                minor_a,
                minor_b,
                secret,
            } => vec![
                Value::from(node_a.clone()),
                Value::from(node_b.clone()),
                Value::from(*port),
                Value::from(*minor_a),
                Value::from(*minor_b),
                Value::from(secret.clone()),
            ],
            LogicalId::File { driver, path } | LogicalId::SharedFile { driver, path } => {
                vec![Value::from(driver.clone()), Value::from(path.clone())]
            }
            LogicalId::Blockdev { driver, adopt } => vec![Value::from(driver.clone()), Value::from(adopt.clone())],
            LogicalId::Rbd { pool, name } => vec![Value::from(pool.clone()), Value::from(name.clone())],
        }
    }

    fn from_tuple(dev_type: DiskDevType, tuple: &[Value]) -> Result<LogicalId, Error> {
        let s = |i: usize| -> Result<String, Error> {
            tuple
                .get(i)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidValue {
                    field: "logical_id".to_string(),
                    message: format!("missing string element {i} for dev_type {:?}", dev_type),
                })
        };
        let n = |i: usize| -> Result<u32, Error> {
            tuple
                .get(i)
                .and_then(Value::as_u64)
                .map(|v| v as u32)
                .ok_or_else(|| Error::InvalidValue {
                    field: "logical_id".to_string(),
                    message: format!("missing numeric element {i} for dev_type {:?}", dev_type),
                })
        };

        Ok(match dev_type {
            DiskDevType::Plain => LogicalId::Plain {
                vg: s(0)?,
                lv_name: s(1)?,
            },
            DiskDevType::Drbd8 => LogicalId::Drbd8 {
                node_a: s(0)?,
                node_b: s(1)?,
                port: n(2)?,
                minor_a: n(3)?,
                minor_b: n(4)?,
                secret: s(5)?,
            },
            DiskDevType::File => LogicalId::File { driver: s(0)?, path: s(1)? },
            DiskDevType::SharedFile => LogicalId::SharedFile { driver: s(0)?, path: s(1)? },
            DiskDevType::Blockdev => LogicalId::Blockdev {
                driver: s(0)?,
                adopt: s(1)?,
            },
            DiskDevType::Rbd => LogicalId::Rbd { pool: s(0)?, name: s(1)? },
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiskConfig {
    pub size_mib: u64,
    pub spindles: Option<u32>,
    pub logical_id: LogicalId,
}

impl Serialize for DiskConfig {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("dev_type", self.logical_id.dev_type().as_str())?;
        map.serialize_entry("size", &self.size_mib)?;
        map.serialize_entry("spindles", &self.spindles)?;
        map.serialize_entry("logical_id", &self.logical_id.to_tuple())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for DiskConfig {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            dev_type: String,
            size: u64,
            #[serde(default)]
            spindles: Option<u32>,
            logical_id: Vec<Value>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let dev_type = match raw.dev_type.as_str() {
            "plain" => DiskDevType::Plain,
            "drbd8" => DiskDevType::Drbd8,
            "file" => DiskDevType::File,
            "sharedfile" => DiskDevType::SharedFile,
            "blockdev" => DiskDevType::Blockdev,
            "rbd" => DiskDevType::Rbd,
            other => {
                return Err(serde::de::Error::custom(format!("unknown dev_type {other:?}")))
            }
        };
        let logical_id =
            LogicalId::from_tuple(dev_type, &raw.logical_id).map_err(serde::de::Error::custom)?;

        Ok(DiskConfig {
            size_mib: raw.size,
            spindles: raw.spindles,
            logical_id,
        })
    }
}

// ---------------------------------------------------------------------
// Wire-level snapshot envelope
// ---------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct WireIPolicy {
    min_spec: WireSpec,
    max_spec: WireSpec,
    std_spec: WireSpec,
    enabled_disk_templates: Vec<String>,
    vcpu_ratio: f64,
    spindle_ratio: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireSpec {
    memory: u64,
    disk: u64,
    cpu_count: u32,
    spindle_use: u32,
}

impl From<&WireSpec> for InstanceSpec {
    fn from(w: &WireSpec) -> Self {
        InstanceSpec {
            mem_mib: w.memory,
            disk_mib: w.disk,
            vcpus: w.cpu_count,
            spindles: w.spindle_use,
        }
    }
}

impl From<&InstanceSpec> for WireSpec {
    fn from(s: &InstanceSpec) -> Self {
        WireSpec {
            memory: s.mem_mib,
            disk: s.disk_mib,
            cpu_count: s.vcpus,
            spindle_use: s.spindles,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireGroup {
    name: String,
    uuid: String,
    alloc_policy: String,
    ipolicy: WireIPolicy,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireNode {
    name: String,
    uuid: String,
    group: String,
    total_memory: u64,
    free_memory: u64,
    total_disk: u64,
    free_disk: u64,
    total_cpu: f64,
    used_cpu: f64,
    #[serde(default)]
    total_spindles: Option<u32>,
    #[serde(default)]
    free_spindles: Option<u32>,
    #[serde(default)]
    offline: bool,
    #[serde(default)]
    drained: bool,
    #[serde(default)]
    master_candidate: bool,
    #[serde(default)]
    master: bool,
    #[serde(default = "default_true")]
    vm_capable: bool,
    #[serde(default)]
    exclusive_storage: bool,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    networks: BTreeSet<String>,
    #[serde(default)]
    primary_ip: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct WireNic {
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireInstance {
    name: String,
    pnode: String,
    #[serde(default)]
    snode: Option<String>,
    group: String,
    memory: u64,
    vcpus: u32,
    disks: Vec<DiskConfig>,
    #[serde(default)]
    nics: Vec<WireNic>,
    admin_state: String,
    disk_template: String,
    #[serde(default = "default_true")]
    auto_balance: bool,
    #[serde(default)]
    tags: BTreeSet<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    version: u64,
    cluster: WireClusterMeta,
    nodegroups: Vec<WireGroup>,
    nodes: Vec<WireNode>,
    instances: Vec<WireInstance>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireClusterMeta {
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    master_ip: String,
}

fn alloc_policy_to_str(p: AllocPolicy) -> &'static str {
    match p {
        AllocPolicy::Preferred => "preferred",
        AllocPolicy::LastResort => "last_resort",
        AllocPolicy::Unallocable => "unallocable",
    }
}

fn alloc_policy_from_str(s: &str) -> Result<AllocPolicy, Error> {
    match s {
        "preferred" => Ok(AllocPolicy::Preferred),
        "last_resort" => Ok(AllocPolicy::LastResort),
        "unallocable" => Ok(AllocPolicy::Unallocable),
        other => Err(Error::InvalidValue {
            field: "alloc_policy".to_string(),
            message: format!("unknown policy {other:?}"),
        }),
    }
}

fn disk_template_to_str(t: DiskTemplate) -> &'static str {
    match t {
        DiskTemplate::Diskless => "diskless",
        DiskTemplate::Plain => "plain",
        DiskTemplate::Drbd => "drbd",
        DiskTemplate::File => "file",
        DiskTemplate::SharedFile => "sharedfile",
        DiskTemplate::Block => "blockdev",
        DiskTemplate::Rbd => "rbd",
    }
}

fn disk_template_from_str(s: &str) -> Result<DiskTemplate, Error> {
    Ok(match s {
        "diskless" => DiskTemplate::Diskless,
        "plain" => DiskTemplate::Plain,
        "drbd" => DiskTemplate::Drbd,
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

fn admin_state_to_str(s: AdminState) -> &'static str {
    match s {
        AdminState::Up => "up",
        AdminState::Down => "down",
        AdminState::Offline => "offline",
    }
}

fn admin_state_from_str(s: &str) -> Result<AdminState, Error> {
    Ok(match s {
        "up" => AdminState::Up,
        "down" => AdminState::Down,
        "offline" => AdminState::Offline,
        other => {
            return Err(Error::InvalidValue {
                field: "admin_state".to_string(),
                message: format!("unknown admin_state {other:?}"),
            })
        }
    })
}

/// Parse the cluster-snapshot wire format into an indexed [`ClusterSnapshot`].
pub fn from_json_str(input: &str) -> Result<ClusterSnapshot, Error> {
    let env: WireEnvelope = serde_json::from_str(input)?;

    let mut group_by_name = BTreeMap::new();
    let mut groups = Vec::with_capacity(env.nodegroups.len());
    for (i, g) in env.nodegroups.iter().enumerate() {
        group_by_name.insert(g.name.clone(), i);
        groups.push(Group {
            name: g.name.clone(),
            uuid: g.uuid.clone(),
            alloc_policy: alloc_policy_from_str(&g.alloc_policy)?,
            ipolicy: InstancePolicy {
                min_spec: (&g.ipolicy.min_spec).into(),
                max_spec: (&g.ipolicy.max_spec).into(),
                std_spec: (&g.ipolicy.std_spec).into(),
                enabled_disk_templates: g
                    .ipolicy
                    .enabled_disk_templates
                    .iter()
                    .map(|s| disk_template_from_str(s))
                    .collect::<Result<BTreeSet<_>, _>>()?,
                vcpu_ratio: g.ipolicy.vcpu_ratio,
                spindle_ratio: g.ipolicy.spindle_ratio,
            },
        });
    }

    let resolve_group = |name: &str| -> Result<usize, Error> {
        group_by_name.get(name).copied().ok_or_else(|| Error::MissingKey {
            key: name.to_string(),
            available: group_by_name.keys().cloned().collect(),
        })
    };

    let mut node_by_name = BTreeMap::new();
    let mut nodes = Vec::with_capacity(env.nodes.len());
    for (i, n) in env.nodes.iter().enumerate() {
        node_by_name.insert(n.name.clone(), i);
        nodes.push(Node {
            name: n.name.clone(),
            uuid: n.uuid.clone(),
            group: resolve_group(&n.group)?,
            total_mem_mib: n.total_memory,
            free_mem_mib: n.free_memory,
            total_disk_mib: n.total_disk,
            free_disk_mib: n.free_disk,
            total_cpu: n.total_cpu,
            used_cpu: n.used_cpu,
            total_spindles: n.total_spindles,
            free_spindles: n.free_spindles,
            peer_mem: BTreeMap::new(),
            offline: n.offline,
            drained: n.drained,
            master_candidate: n.master_candidate,
            master: n.master,
            vm_capable: n.vm_capable,
            exclusive_storage: n.exclusive_storage,
            tags: n.tags.clone(),
            networks: n.networks.clone(),
            primary_ip: n.primary_ip.clone(),
        });
    }

    let resolve_node = |name: &str| -> Result<usize, Error> {
        node_by_name.get(name).copied().ok_or_else(|| Error::MissingKey {
            key: name.to_string(),
            available: node_by_name.keys().cloned().collect(),
        })
    };

    let mut instances = Vec::with_capacity(env.instances.len());
    for inst in &env.instances {
        let primary = resolve_node(&inst.pnode)?;
        let secondary = inst.snode.as_deref().map(resolve_node).transpose()?;
        let disk_mib: u64 = inst.disks.iter().map(|d| d.size_mib).sum();
        let drbd_disks = inst
            .disks
            .iter()
            .filter_map(|d| match &d.logical_id {
                LogicalId::Drbd8 {
                    port,
                    minor_a,
                    minor_b,
                    secret,
                    ..
                } => Some(crate::model::DrbdDiskMeta {
                    port: *port,
                    minor_a: *minor_a,
                    minor_b: *minor_b,
                    secret: secret.clone(),
                }),
                _ => None,
            })
            .collect();
        instances.push(Instance {
            name: inst.name.clone(),
            primary,
            secondary,
            group: resolve_group(&inst.group)?,
            mem_mib: inst.memory,
            disk_mib,
            disk_sizes: inst.disks.iter().map(|d| d.size_mib).collect(),
            disk_spindles: inst.disks.iter().map(|d| d.spindles).collect(),
            vcpus: inst.vcpus,
            admin_state: admin_state_from_str(&inst.admin_state)?,
            disk_template: disk_template_from_str(&inst.disk_template)?,
            auto_balance: inst.auto_balance,
            tags: inst.tags.clone(),
            drbd_disks,
            nic_ips: inst.nics.iter().map(|n| n.ip.clone()).collect(),
            nic_links: inst.nics.iter().map(|n| n.link.clone()).collect(),
        });
    }

    // Rebuild peer_mem from secondary assignments, since the wire format
    // doesn't carry it directly (it's a derived N+1 bookkeeping field).
    for (idx, inst) in instances.iter().enumerate() {
        if let Some(sec) = inst.secondary {
            nodes[sec].peer_mem.insert(idx, inst.mem_mib);
        }
    }

    let mut snap = ClusterSnapshot::new(env.version, groups, nodes, instances, env.cluster.tags);
    snap.cluster_name = env.cluster.name;
    snap.master_ip = env.cluster.master_ip;
    Ok(snap)
}

/// Render a [`ClusterSnapshot`] back to the canonical wire format.
pub fn to_json_string(snap: &ClusterSnapshot) -> Result<String, Error> {
    let nodegroups: Vec<WireGroup> = snap
        .groups
        .iter()
        .map(|g| WireGroup {
            name: g.name.clone(),
            uuid: g.uuid.clone(),
            alloc_policy: alloc_policy_to_str(g.alloc_policy).to_string(),
            ipolicy: WireIPolicy {
                min_spec: (&g.ipolicy.min_spec).into(),
                max_spec: (&g.ipolicy.max_spec).into(),
                std_spec: (&g.ipolicy.std_spec).into(),
                enabled_disk_templates: g
                    .ipolicy
                    .enabled_disk_templates
                    .iter()
                    .map(|t| disk_template_to_str(*t).to_string())
                    .collect(),
                vcpu_ratio: g.ipolicy.vcpu_ratio,
                spindle_ratio: g.ipolicy.spindle_ratio,
            },
        })
        .collect();

    let nodes: Vec<WireNode> = snap
        .nodes
        .iter()
        .map(|n| WireNode {
            name: n.name.clone(),
            uuid: n.uuid.clone(),
            group: snap.groups[n.group].name.clone(),
            total_memory: n.total_mem_mib,
            free_memory: n.free_mem_mib,
            total_disk: n.total_disk_mib,
            free_disk: n.free_disk_mib,
            total_cpu: n.total_cpu,
            used_cpu: n.used_cpu,
            total_spindles: n.total_spindles,
            free_spindles: n.free_spindles,
            offline: n.offline,
            drained: n.drained,
            master_candidate: n.master_candidate,
            master: n.master,
            vm_capable: n.vm_capable,
            exclusive_storage: n.exclusive_storage,
            tags: n.tags.clone(),
            networks: n.networks.clone(),
            primary_ip: n.primary_ip.clone(),
        })
        .collect();

    let instances: Vec<WireInstance> = snap
        .instances
        .iter()
        .map(|inst| WireInstance {
            name: inst.name.clone(),
            pnode: snap.nodes[inst.primary].name.clone(),
            snode: inst.secondary.map(|s| snap.nodes[s].name.clone()),
            group: snap.groups[inst.group].name.clone(),
            memory: inst.mem_mib,
            vcpus: inst.vcpus,
            disks: disks_from_instance(snap, inst),
            nics: inst
                .nic_ips
                .iter()
                .zip(inst.nic_links.iter())
                .map(|(ip, link)| WireNic {
                    ip: ip.clone(),
                    link: link.clone(),
                })
                .collect(),
            admin_state: admin_state_to_str(inst.admin_state).to_string(),
            disk_template: disk_template_to_str(inst.disk_template).to_string(),
            auto_balance: inst.auto_balance,
            tags: inst.tags.clone(),
        })
        .collect();

    let env = WireEnvelope {
        version: snap.version,
        cluster: WireClusterMeta {
            tags: snap.cluster_tags.clone(),
            name: snap.cluster_name.clone(),
            master_ip: snap.master_ip.clone(),
        },
        nodegroups,
        nodes,
        instances,
    };

    Ok(serde_json::to_string(&env)?)
}

/// Reconstruct each disk's [`DiskConfig`] for serialization. Aggregate
/// size/spindle counts plus, for `drbd8`, the per-disk port/minor/secret
/// tuple are carried verbatim from [`Instance`] (`disk_sizes`,
/// `disk_spindles`, `drbd_disks`); node names come from the instance's
/// own primary/secondary. The one thing not preserved exactly is a
/// `plain` volume group/name that diverges from this function's own
/// naming convention, since `Instance` doesn't track per-disk LV names.
fn disks_from_instance(snap: &ClusterSnapshot, inst: &Instance) -> Vec<DiskConfig> {
    let node_a = snap.nodes[inst.primary].name.clone();
    let node_b = inst
        .secondary
        .map(|s| snap.nodes[s].name.clone())
        .unwrap_or_default();

    inst.disk_sizes
        .iter()
        .zip(inst.disk_spindles.iter())
        .enumerate()
        .map(|(i, (&size, &spindles))| DiskConfig {
            size_mib: size,
            spindles,
            logical_id: if inst.disk_template.is_replicated() {
                let meta = inst.drbd_disks.get(i);
                LogicalId::Drbd8 {
                    node_a: node_a.clone(),
                    node_b: node_b.clone(),
                    port: meta.map(|m| m.port).unwrap_or(11000 + i as u32),
                    minor_a: meta.map(|m| m.minor_a).unwrap_or(i as u32),
                    minor_b: meta.map(|m| m.minor_b).unwrap_or(i as u32),
                    secret: meta.map(|m| m.secret.clone()).unwrap_or_default(),
                }
            } else {
                LogicalId::Plain {
                    vg: "xenvg".to_string(),
                    lv_name: format!("{}.disk{i}", inst.name),
                }
            },
        })
        .collect()
}
