//! Config cache & reloader: a file-watched cache of the cluster
//! snapshot, kept current by three cooperating tokio tasks in the same
//! loop-and-sleep background-task idiom as `HealthChecker::start`,
//! generalized from one task to three that hand off between
//! notify-driven and poll-driven watching.

use crate::config::ConfdConfig;
use crate::error::{Error, Result};
use arc_swap::ArcSwap;
use fleet_core::model::ClusterSnapshot;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Network link name -> the IPs of instances with a NIC on that link,
/// derived from the loaded snapshot for confd's `InstIpsList` query.
pub type LinkIpMap = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mtime: i64,
    pub inode: u64,
    pub size: u64,
}

impl FileStat {
    pub const NONE: FileStat = FileStat { mtime: -1, inode: 0, size: 0 };

    fn from_metadata(meta: &std::fs::Metadata) -> FileStat {
        FileStat {
            mtime: meta.mtime(),
            inode: meta.ino(),
            size: meta.size(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Notify,
    Poll { round: u8 },
}

pub type LoadedSnapshot = std::result::Result<(ClusterSnapshot, LinkIpMap), String>;

/// Shared state behind the responder's read path and the three reload
/// tasks' write path. The snapshot itself is published through `ArcSwap`
/// so readers never block on a writer; everything else (mode, timestamps,
/// file identity) is small enough that a plain mutex is the right tool.
pub struct ReloadState {
    pub path: PathBuf,
    pub config: Arc<ConfdConfig>,
    snapshot: ArcSwap<LoadedSnapshot>,
    mode: Mutex<WatchMode>,
    last_load_time: Mutex<Instant>,
    last_file_stat: Mutex<FileStat>,
}

impl ReloadState {
    pub fn new(config: Arc<ConfdConfig>) -> Arc<Self> {
        let path = config.snapshot_path();
        Arc::new(ReloadState {
            path,
            config,
            snapshot: ArcSwap::from_pointee(Err("not yet loaded".to_string())),
            mode: Mutex::new(WatchMode::Notify),
            last_load_time: Mutex::new(Instant::now()),
            last_file_stat: Mutex::new(FileStat::NONE),
        })
    }

    pub fn snapshot(&self) -> Arc<LoadedSnapshot> {
        self.snapshot.load_full()
    }

    pub fn mode(&self) -> WatchMode {
        *self.mode.lock()
    }

    pub fn set_mode(&self, mode: WatchMode) {
        *self.mode.lock() = mode;
        crate::metrics::set_poll_mode(matches!(mode, WatchMode::Poll { .. }));
    }

    pub fn last_load_time(&self) -> Instant {
        *self.last_load_time.lock()
    }

    /// Unconditionally read, parse, and publish the config file at
    /// `self.path`. On any failure, the snapshot is set to `Err` and the
    /// file-stat sentinel is reset, so the next `safe_reload` doesn't
    /// wrongly believe the file is unchanged.
    pub async fn reload(&self) -> Result<()> {
        let path = self.path.clone();
        let max_size = self.config.max_file_size_bytes;
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || read_and_parse(&path, max_size))
            .await
            .map_err(|e| Error::Config(e.to_string()))?;

        *self.last_load_time.lock() = Instant::now();
        crate::metrics::record_reload_duration(started.elapsed());

        match result {
            Ok((snap, links, stat)) => {
                *self.last_file_stat.lock() = stat;
                self.snapshot.store(Arc::new(Ok((snap, links))));
                crate::metrics::record_reload("ok");
                Ok(())
            }
            Err(err) => {
                *self.last_file_stat.lock() = FileStat::NONE;
                self.snapshot.store(Arc::new(Err(err.to_string())));
                crate::metrics::record_reload("error");
                Err(err)
            }
        }
    }

    /// Reload only if `(mtime, inode, size)` changed since the last
    /// successful read. Returns `true` if a reload actually ran.
    pub async fn safe_reload(&self) -> Result<bool> {
        let current = match std::fs::metadata(&self.path) {
            Ok(meta) => FileStat::from_metadata(&meta),
            Err(_) => FileStat::NONE,
        };

        if current == *self.last_file_stat.lock() && current != FileStat::NONE {
            return Ok(false);
        }

        self.reload().await?;
        Ok(true)
    }
}

fn read_and_parse(path: &std::path::Path, max_size: u64) -> Result<(ClusterSnapshot, LinkIpMap, FileStat)> {
    let meta = std::fs::metadata(path)?;
    if meta.len() > max_size {
        return Err(Error::FileTooLarge {
            actual: meta.len(),
            limit: max_size,
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let snap = fleet_core::snapshot::from_json_str(&contents)?;
    let links = build_link_ip_map(&snap);
    let stat = FileStat::from_metadata(&meta);
    Ok((snap, links, stat))
}

fn build_link_ip_map(snap: &ClusterSnapshot) -> LinkIpMap {
    let mut map: LinkIpMap = HashMap::new();
    for inst in &snap.instances {
        for (ip, link) in inst.nic_ips.iter().zip(inst.nic_links.iter()) {
            if let (Some(ip), Some(link)) = (ip, link) {
                map.entry(link.clone()).or_default().push(ip.clone());
            }
        }
    }
    for ips in map.values_mut() {
        ips.sort();
    }
    map
}

/// Spawn the long-interval watcher, poll watcher (started only when in
/// `Poll` mode), and notify handler, returning their join handles. The
/// caller retains `state` to read the published snapshot; it need not
/// await these handles, which run until the process exits.
pub fn spawn_watchers(state: Arc<ReloadState>) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();
    handles.push(tokio::spawn(long_interval_watcher(state.clone())));
    handles.push(tokio::spawn(notify_handler(state.clone())));
    handles
}

async fn long_interval_watcher(state: Arc<ReloadState>) {
    let mut interval = tokio::time::interval(state.config.watch_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if let Err(err) = state.safe_reload().await {
            tracing::warn!(error = %err, "scheduled reload failed");
        }
        // Only probe for a restored notifier while in Poll mode: a
        // successful probe here must hand off to a real, persistent
        // `notify_handler` task, not just flip the mode flag, or no task
        // is left actually watching the file.
        if matches!(state.mode(), WatchMode::Poll { .. }) {
            if try_install_watch(&state).is_ok() {
                state.set_mode(WatchMode::Notify);
                tracing::info!("long-interval watcher re-armed the file notifier, returning to notify mode");
                tokio::spawn(notify_handler(state.clone()));
            } else {
                tracing::debug!("periodic watcher re-arm failed, staying in poll mode");
            }
        }
    }
}

/// Spawned only while `state.mode() == Poll`; exits voluntarily once it
/// either restores `Notify` mode itself or observes another task already
/// did.
async fn poll_watcher(state: Arc<ReloadState>) {
    let mut interval = tokio::time::interval(state.config.poll_interval());
    let mut idle_rounds = 0u32;

    loop {
        interval.tick().await;
        if !matches!(state.mode(), WatchMode::Poll { .. }) {
            return;
        }

        match state.safe_reload().await {
            Ok(changed) => {
                if changed {
                    idle_rounds = 0;
                } else {
                    idle_rounds += 1;
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "poll reload failed");
                idle_rounds += 1;
            }
        }

        if idle_rounds >= state.config.max_idle_poll_rounds {
            if try_install_watch(&state).is_ok() {
                state.set_mode(WatchMode::Notify);
                tracing::info!("poll watcher re-armed the file notifier, returning to notify mode");
                // Hand off to a real notify_handler: the probe watcher
                // above is dropped immediately, so nothing is actually
                // watching the file until this task starts running.
                tokio::spawn(notify_handler(state.clone()));
                return;
            }
            idle_rounds = 0;
        }
    }
}

fn try_install_watch(state: &Arc<ReloadState>) -> Result<RecommendedWatcher> {
    let (tx, _rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(&state.path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Bridges the `notify` crate's synchronous callback into the tokio
/// runtime. `notify`'s watcher delivers events from its own background
/// thread via a plain `std::sync::mpsc` channel; a dedicated forwarding
/// thread owns the receiving end and relays each event onto a
/// `tokio::sync::mpsc` channel this async task can `.await` on, which is
/// the idiomatic way to bridge a synchronous callback API into tokio
/// without re-blocking on a borrowed receiver every iteration.
async fn notify_handler(state: Arc<ReloadState>) {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = match notify::recommended_watcher(tx) {
        Ok(w) => w,
        Err(err) => {
            tracing::warn!(error = %err, "failed to create file watcher, falling back to poll mode");
            state.set_mode(WatchMode::Poll { round: 0 });
            tokio::spawn(poll_watcher(state));
            return;
        }
    };

    if let Err(err) = watcher.watch(&state.path, RecursiveMode::NonRecursive) {
        tracing::warn!(error = %err, "failed to watch config path, falling back to poll mode");
        state.set_mode(WatchMode::Poll { round: 0 });
        tokio::spawn(poll_watcher(state));
        return;
    }

    let (async_tx, mut async_rx) = tokio::sync::mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            if async_tx.send(event).is_err() {
                break;
            }
        }
    });

    loop {
        let event = match async_rx.recv().await {
            Some(event) => event,
            None => {
                // forwarding thread exited: the watcher itself must be gone.
                state.set_mode(WatchMode::Poll { round: 0 });
                tokio::spawn(poll_watcher(state));
                return;
            }
        };

        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(error = %err, "notify event error");
                continue;
            }
        };

        if matches!(event.kind, notify::EventKind::Remove(_)) {
            if watcher.watch(&state.path, RecursiveMode::NonRecursive).is_err() {
                state.set_mode(WatchMode::Poll { round: 0 });
                tokio::spawn(poll_watcher(state));
                return;
            }
            continue;
        }

        let since_last = state.last_load_time().elapsed();
        if since_last < state.config.reload_ratelimit() {
            state.set_mode(WatchMode::Poll { round: 0 });
            tokio::spawn(poll_watcher(state.clone()));
            continue;
        }

        if let Err(err) = state.safe_reload().await {
            tracing::warn!(error = %err, "notify-triggered reload failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_cluster_json() -> &'static str {
        r#"{
            "version": 1,
            "cluster": {"tags": []},
            "nodegroups": [{
                "name": "default", "uuid": "g-1", "alloc_policy": "preferred",
                "ipolicy": {
                    "min_spec": {"memory": 128, "disk": 1024, "cpu_count": 1, "spindle_use": 1},
                    "max_spec": {"memory": 1048576, "disk": 16777216, "cpu_count": 64, "spindle_use": 64},
                    "std_spec": {"memory": 2048, "disk": 20480, "cpu_count": 2, "spindle_use": 2},
                    "enabled_disk_templates": ["plain"],
                    "vcpu_ratio": 4.0, "spindle_ratio": 4.0
                }
            }],
            "nodes": [{"name": "n1", "uuid": "u1", "group": "default",
                "total_memory": 8192, "free_memory": 8192,
                "total_disk": 102400, "free_disk": 102400,
                "total_cpu": 8.0, "used_cpu": 0.0, "vm_capable": true,
                "primary_ip": "10.0.0.1"}],
            "instances": []
        }"#
    }

    #[tokio::test]
    async fn reload_loads_valid_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, sample_cluster_json()).unwrap();

        let mut cfg = ConfdConfig::default();
        cfg.data_dir = dir.path().to_path_buf();
        let state = ReloadState::new(Arc::new(cfg));

        state.reload().await.unwrap();
        let loaded = state.snapshot();
        assert!(loaded.is_ok());
    }

    #[tokio::test]
    async fn reload_rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![b'a'; 1024]).unwrap();

        let mut cfg = ConfdConfig::default();
        cfg.data_dir = dir.path().to_path_buf();
        cfg.max_file_size_bytes = 10;
        let state = ReloadState::new(Arc::new(cfg));

        let err = state.reload().await.unwrap_err();
        assert_eq!(err.error_type(), "file_too_large");
        assert!(state.snapshot().is_err());
    }

    #[tokio::test]
    async fn safe_reload_skips_unchanged_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, sample_cluster_json()).unwrap();

        let mut cfg = ConfdConfig::default();
        cfg.data_dir = dir.path().to_path_buf();
        let state = ReloadState::new(Arc::new(cfg));

        assert!(state.safe_reload().await.unwrap());
        assert!(!state.safe_reload().await.unwrap());
    }

    #[test]
    fn link_ip_map_groups_by_link() {
        let snap = fleet_core::snapshot::from_json_str(sample_cluster_json()).unwrap();
        let links = build_link_ip_map(&snap);
        assert!(links.is_empty());
    }
}
