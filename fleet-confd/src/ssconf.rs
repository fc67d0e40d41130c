//! Reader for ssconf files: `<data_dir>/ssconf_<key>`, one fact per file,
//! read up to a size cap and trailing-whitespace-stripped. Unlike the
//! cluster snapshot these are plain text, not JSON, and are read fresh on
//! every query rather than cached — they're small and rarely read.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// A known ssconf key, plus a fallback for anything this daemon doesn't
/// specifically interpret so callers can still round-trip it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsconfKey {
    ClusterName,
    MasterNode,
    MasterIp,
    NodeList,
    PrimaryIpFamily,
    Other(String),
}

impl SsconfKey {
    pub fn as_file_suffix(&self) -> &str {
        match self {
            SsconfKey::ClusterName => "cluster_name",
            SsconfKey::MasterNode => "master_node",
            SsconfKey::MasterIp => "master_ip",
            SsconfKey::NodeList => "node_list",
            SsconfKey::PrimaryIpFamily => "primary_ip_family",
            SsconfKey::Other(s) => s,
        }
    }

    pub fn parse(suffix: &str) -> Self {
        match suffix {
            "cluster_name" => SsconfKey::ClusterName,
            "master_node" => SsconfKey::MasterNode,
            "master_ip" => SsconfKey::MasterIp,
            "node_list" => SsconfKey::NodeList,
            "primary_ip_family" => SsconfKey::PrimaryIpFamily,
            other => SsconfKey::Other(other.to_string()),
        }
    }
}

/// IP family recorded in the `primary_ip_family` ssconf key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

/// Parse a `primary_ip_family` value (`"4"` or `"6"`, nothing else).
pub fn parse_primary_ip_family(value: &str) -> Result<IpFamily> {
    match value.trim() {
        "4" => Ok(IpFamily::V4),
        "6" => Ok(IpFamily::V6),
        other => Err(Error::InvalidSsconfKey(other.to_string())),
    }
}

fn ssconf_path(data_dir: &Path, key: &SsconfKey) -> PathBuf {
    data_dir.join(format!("ssconf_{}", key.as_file_suffix()))
}

/// Read one ssconf key's file under `data_dir`, capped at `max_size` bytes
/// (§4.9's 128 KiB default lives in `ConfdConfig::max_file_size_bytes`),
/// trailing whitespace stripped. Missing files and outsized files are both
/// reported as `Error::Io`/`Error::FileTooLarge` rather than silently
/// defaulting, so a caller can tell "no such fact" from "fact read fine
/// but empty".
pub fn read_ssconf(data_dir: &Path, key: &SsconfKey, max_size: u64) -> Result<String> {
    let path = ssconf_path(data_dir, key);
    let meta = std::fs::metadata(&path)?;
    if meta.len() > max_size {
        return Err(Error::FileTooLarge {
            actual: meta.len(),
            limit: max_size,
        });
    }
    let contents = std::fs::read_to_string(&path)?;
    Ok(contents.trim_end().to_string())
}
