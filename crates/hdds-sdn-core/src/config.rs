// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control-plane configuration: compile-time timing constants (spec §5,
//! §4.4, §7) and the `cid -> {dpid}` shard map every peer loads from the
//! same `--config` file (spec §3, §6).

use std::collections::BTreeMap;
use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::topology::{Cid, Dpid};

/// Timing and sizing constants named throughout spec §5/§7. Kept as plain
/// `const`s rather than a config struct: nothing here is meant to vary
/// between deployments, only between test and production builds.
pub mod defaults {
    /// Heartbeat publish period (spec §4.4: "once per second").
    pub const HEARTBEAT_PERIOD_MS: u64 = 1_000;
    /// Peer-liveness timeout (spec §4.4: "default 10 s").
    pub const PEER_TIMEOUT_MS: u64 = 10_000;
    /// Orchestrator debounce window (spec §4.6: "default 1 s").
    pub const DEBOUNCE_WINDOW_MS: u64 = 1_000;
    /// Pull-trees loop period (spec §5: "default 5 s").
    pub const PULL_INTERVAL_MS: u64 = 5_000;
    /// Pull-trees loop warm-up before the first pull (spec §5: "after a
    /// 20 s warm-up").
    pub const PULL_WARMUP_MS: u64 = 20_000;
    /// Grace period for in-flight southbound writes on shutdown (spec §5).
    pub const SOUTHBOUND_GRACE_MS: u64 = 2_000;
    /// Delay before a session rejected by `OFPErrorMsg` is rescheduled for
    /// reinstall (spec §7).
    pub const REINSTALL_DELAY_MS: u64 = 5_000;
    /// Bounded backoff range for transient I/O retries (spec §7).
    pub const BACKOFF_MIN_MS: u64 = 100;
    pub const BACKOFF_MAX_MS: u64 = 30_000;
    /// Multicast base for `group_ip = 224.0.1.<group_no>` (spec §3/§6).
    pub const MULTICAST_BASE: &str = "224.0.1";
    /// Fixed well-known host access port, parameterizable per spec §4.5.
    pub const DEFAULT_HOST_PORT: u16 = 1;
}

/// Errors loading or validating a [`ShardMap`].
#[derive(Debug)]
pub enum ShardMapError {
    Io(std::io::Error),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ShardMapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Parse(s) => write!(f, "TOML parse error: {s}"),
            Self::Invalid(s) => write!(f, "invalid shard map: {s}"),
        }
    }
}

impl std::error::Error for ShardMapError {}

impl From<std::io::Error> for ShardMapError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// On-disk shape of `--config <path>`: one entry per controller, matching
/// the Rust equivalent of the Python prototype's `cid_to_swes` mapping
/// (see SPEC_FULL.md §2).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShardMapFile {
    #[serde(rename = "controller", default)]
    controllers: Vec<ShardEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShardEntry {
    cid: Cid,
    dpids: Vec<Dpid>,
    /// `host:port` of that controller's overlay mesh listener, so every
    /// peer can dial every other peer without a separate discovery step
    /// (spec §3's static map extended the way `prepare1_graph_info.py`'s
    /// `cid_to_swes` is paired with a fixed controller address list).
    #[serde(default)]
    overlay_addr: Option<String>,
}

/// The static `cid -> {dpid}` map every peer loads identically (spec §3:
/// "a static configuration map `cid -> {dpid}` known to every peer").
///
/// Backed by a `DashMap` so a running controller can hand out read access
/// to several loops concurrently without taking the single topology-store
/// mutex (spec §5: this map never changes at runtime, only topology does).
#[derive(Debug, Default)]
pub struct ShardMap {
    forward: DashMap<Cid, Vec<Dpid>>,
    reverse: DashMap<Dpid, Cid>,
    overlay_addrs: DashMap<Cid, String>,
}

impl ShardMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from an explicit `cid -> dpids` table (used by tests
    /// and by callers constructing the map programmatically). Carries no
    /// overlay addresses; use [`ShardMap::from_file`] for a mesh-capable
    /// map.
    pub fn from_entries(entries: impl IntoIterator<Item = (Cid, Vec<Dpid>)>) -> Self {
        let map = Self::new();
        for (cid, dpids) in entries {
            for &dpid in &dpids {
                map.reverse.insert(dpid, cid);
            }
            map.forward.insert(cid, dpids);
        }
        map
    }

    /// Loads and validates a shard map from a TOML file, matching the
    /// serde+toml-file pattern used elsewhere in this codebase for
    /// runtime config (e.g. `RouterConfig::from_file`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ShardMapError> {
        let content = std::fs::read_to_string(path)?;
        let parsed: ShardMapFile =
            toml::from_str(&content).map_err(|e| ShardMapError::Parse(e.to_string()))?;
        let map = Self::new();
        for entry in parsed.controllers {
            for &dpid in &entry.dpids {
                map.reverse.insert(dpid, entry.cid);
            }
            if let Some(addr) = entry.overlay_addr {
                map.overlay_addrs.insert(entry.cid, addr);
            }
            map.forward.insert(entry.cid, entry.dpids);
        }
        map.validate()?;
        Ok(map)
    }

    /// The `host:port` another controller's overlay mesh listener is
    /// reachable on, if the config file named one for `cid`.
    pub fn overlay_addr(&self, cid: Cid) -> Option<String> {
        self.overlay_addrs.get(&cid).map(|a| a.clone())
    }

    /// Every `(cid, overlay_addr)` pair known to this map, for dialing the
    /// full mesh at startup.
    pub fn overlay_peers(&self) -> Vec<(Cid, String)> {
        self.overlay_addrs.iter().map(|e| (*e.key(), e.value().clone())).collect()
    }

    /// Every dpid must be owned by exactly one cid.
    pub fn validate(&self) -> Result<(), ShardMapError> {
        let mut seen: BTreeMap<Dpid, Cid> = BTreeMap::new();
        for entry in self.forward.iter() {
            let cid = *entry.key();
            for &dpid in entry.value() {
                if let Some(&other) = seen.get(&dpid) {
                    if other != cid {
                        return Err(ShardMapError::Invalid(format!(
                            "dpid {dpid:016X} claimed by both cid {other} and cid {cid}"
                        )));
                    }
                }
                seen.insert(dpid, cid);
            }
        }
        Ok(())
    }

    /// The cid that owns `dpid`, if any.
    pub fn owner(&self, dpid: Dpid) -> Option<Cid> {
        self.reverse.get(&dpid).map(|r| *r)
    }

    /// The dpids owned by `cid`.
    pub fn shard_of(&self, cid: Cid) -> Vec<Dpid> {
        self.forward.get(&cid).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn cids(&self) -> Vec<Cid> {
        self.forward.iter().map(|e| *e.key()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_lookup_round_trips() {
        let map = ShardMap::from_entries([(1, vec![10, 11]), (2, vec![20])]);
        assert_eq!(map.owner(10), Some(1));
        assert_eq!(map.owner(20), Some(2));
        assert_eq!(map.owner(99), None);
        assert_eq!(map.shard_of(1), vec![10, 11]);
    }

    #[test]
    fn validate_rejects_dpid_claimed_by_two_cids() {
        let map = ShardMap::from_entries([(1, vec![10]), (2, vec![10])]);
        assert!(map.validate().is_err());
    }

    #[test]
    fn from_file_parses_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shards.toml");
        std::fs::write(
            &path,
            r#"
            [[controller]]
            cid = 1
            dpids = [1, 2, 3]

            [[controller]]
            cid = 2
            dpids = [4, 5]
            "#,
        )
        .unwrap();
        let map = ShardMap::from_file(&path).unwrap();
        assert_eq!(map.owner(4), Some(2));
        assert_eq!(map.shard_of(1).len(), 3);
        assert!(map.overlay_addr(1).is_none());
    }

    #[test]
    fn from_file_parses_overlay_addrs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shards.toml");
        std::fs::write(
            &path,
            r#"
            [[controller]]
            cid = 1
            dpids = [1]
            overlay_addr = "127.0.0.1:7100"

            [[controller]]
            cid = 2
            dpids = [2]
            overlay_addr = "127.0.0.1:7101"
            "#,
        )
        .unwrap();
        let map = ShardMap::from_file(&path).unwrap();
        assert_eq!(map.overlay_addr(1).as_deref(), Some("127.0.0.1:7100"));
        let mut peers = map.overlay_peers();
        peers.sort();
        assert_eq!(
            peers,
            vec![(1, "127.0.0.1:7100".to_string()), (2, "127.0.0.1:7101".to_string())]
        );
    }
}
