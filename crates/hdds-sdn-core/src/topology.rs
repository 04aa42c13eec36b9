// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global topology store (C5): replicated switches/ports/links/hosts/
//! controllers, with idempotent `apply(topic, record, op)` semantics per
//! spec §4.3.

use std::collections::HashMap;

use crate::graph::NodeId;

pub type Dpid = NodeId;
pub type Cid = i16;
pub type WriterId = [u8; 16];

#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub dpid: Dpid,
    pub cid: Cid,
    pub port_count: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Port {
    pub dpid: Dpid,
    pub port_no: u16,
    pub hw_addr: String,
    pub name: String,
    pub ofp_version: String,
    pub config: u16,
    pub state: u16,
    pub is_live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub src_dpid: Dpid,
    pub src_port_no: u16,
    pub dst_dpid: Dpid,
    pub dst_port_no: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub dpid: Dpid,
    pub port_no: u16,
    pub mac: String,
    pub ipv4: String,
    pub ipv6: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerRecord {
    pub writer_id: WriterId,
    pub cid: Cid,
    pub is_live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOp {
    Enter,
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOp {
    Add,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOp {
    Add,
    Delete,
}

/// Everything the store changed as a side effect of one `apply` call, so
/// upper layers (the orchestrator, C9) can tell whether a "real change"
/// happened and something downstream needs recomputing.
#[derive(Debug, Default, Clone)]
pub struct ApplyEffect {
    pub switches_removed: Vec<Dpid>,
    pub ports_removed: Vec<(Dpid, u16)>,
    pub hosts_removed: Vec<String>,
    pub links_removed: Vec<LinkKey>,
    pub links_added: Vec<LinkKey>,
    pub changed: bool,
}

/// Replicated global view of the network, per spec §3/§4.3.
#[derive(Debug, Default)]
pub struct TopologyStore {
    pub controllers: HashMap<Cid, ControllerRecord>,
    pub switches: HashMap<Dpid, Switch>,
    pub ports: HashMap<(Dpid, u16), Port>,
    pub links: HashMap<LinkKey, ()>,
    pub hosts: HashMap<String, Host>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `switch enter`/`switch leave`. Returns the prior record (if any)
    /// plus the cascading removals triggered by a `leave`.
    pub fn apply_switch(
        &mut self,
        record: Switch,
        op: SwitchOp,
        writer_id: WriterId,
    ) -> (Option<Switch>, ApplyEffect) {
        let mut effect = ApplyEffect::default();
        match op {
            SwitchOp::Enter => {
                let prior = self.switches.insert(record.dpid, record.clone());
                effect.changed = prior.as_ref() != Some(&record);
                if prior.is_none() {
                    self.controllers.insert(
                        record.cid,
                        ControllerRecord { writer_id, cid: record.cid, is_live: true },
                    );
                }
                (prior, effect)
            }
            SwitchOp::Leave => {
                let Some(prior) = self.switches.remove(&record.dpid) else {
                    return (None, effect);
                };
                effect.changed = true;
                effect.switches_removed.push(record.dpid);

                let dead_ports: Vec<(Dpid, u16)> =
                    self.ports.keys().filter(|(d, _)| *d == record.dpid).copied().collect();
                for key in dead_ports {
                    self.ports.remove(&key);
                    effect.ports_removed.push(key);
                }

                let dead_hosts: Vec<String> = self
                    .hosts
                    .iter()
                    .filter(|(_, h)| h.dpid == record.dpid)
                    .map(|(mac, _)| mac.clone())
                    .collect();
                for mac in dead_hosts {
                    self.hosts.remove(&mac);
                    effect.hosts_removed.push(mac);
                }

                let dead_links: Vec<LinkKey> = self
                    .links
                    .keys()
                    .filter(|l| l.src_dpid == record.dpid || l.dst_dpid == record.dpid)
                    .copied()
                    .collect();
                for l in dead_links {
                    self.links.remove(&l);
                    effect.links_removed.push(l);
                }

                (Some(prior), effect)
            }
        }
    }

    /// `port add`/`port modify`/`port delete`. A port referencing an
    /// unknown switch is a `StaleReference` — dropped silently.
    pub fn apply_port(&mut self, record: Port, op: PortOp) -> (Option<Port>, ApplyEffect) {
        let mut effect = ApplyEffect::default();
        if !self.switches.contains_key(&record.dpid) {
            log::debug!(
                "[topology::apply_port] stale reference: dpid {:016X} unknown, dropping",
                record.dpid
            );
            return (None, effect);
        }
        let key = (record.dpid, record.port_no);
        match op {
            PortOp::Add => {
                if self.ports.contains_key(&key) {
                    return (self.ports.get(&key).cloned(), effect);
                }
                effect.changed = true;
                (self.ports.insert(key, record), effect)
            }
            PortOp::Modify => {
                effect.changed = true;
                (self.ports.insert(key, record), effect)
            }
            PortOp::Delete => {
                let prior = self.ports.remove(&key);
                if prior.is_some() {
                    effect.changed = true;
                    effect.ports_removed.push(key);
                    if let Some(sw) = self.switches.get_mut(&record.dpid) {
                        sw.port_count = sw.port_count.saturating_sub(1);
                    }
                    let dead_hosts: Vec<String> = self
                        .hosts
                        .iter()
                        .filter(|(_, h)| h.dpid == key.0 && h.port_no == key.1)
                        .map(|(mac, _)| mac.clone())
                        .collect();
                    for mac in dead_hosts {
                        self.hosts.remove(&mac);
                        effect.hosts_removed.push(mac);
                    }
                }
                (prior, effect)
            }
        }
    }

    /// `link add`/`link delete`. A link referencing an unknown switch is a
    /// `StaleReference` and is dropped (per spec §3 invariant).
    pub fn apply_link(&mut self, key: LinkKey, op: LinkOp) -> (bool, ApplyEffect) {
        let mut effect = ApplyEffect::default();
        if !self.switches.contains_key(&key.src_dpid) || !self.switches.contains_key(&key.dst_dpid)
        {
            log::debug!("[topology::apply_link] stale reference, dropping {key:?}");
            return (false, effect);
        }
        match op {
            LinkOp::Add => {
                let existed = self.links.insert(key, ()).is_some();
                effect.changed = !existed;
                if !existed {
                    effect.links_added.push(key);
                }
                (!existed, effect)
            }
            LinkOp::Delete => {
                let existed = self.links.remove(&key).is_some();
                effect.changed = existed;
                if existed {
                    effect.links_removed.push(key);
                }
                (existed, effect)
            }
        }
    }

    /// `host add`. If `record.mac` matches a known switch port's hardware
    /// address, this host entry is actually another switch's interface
    /// seen via access-port discovery; synthesize the bidirectional
    /// inter-switch link instead of storing it as a host (spec §4.3).
    pub fn apply_host_add(&mut self, record: Host) -> (Option<Host>, ApplyEffect) {
        let mut effect = ApplyEffect::default();
        if !self.switches.contains_key(&record.dpid) {
            log::debug!(
                "[topology::apply_host_add] stale reference: dpid {:016X} unknown, dropping",
                record.dpid
            );
            return (None, effect);
        }

        if let Some((peer_dpid, peer_port_no)) = self
            .ports
            .values()
            .find(|p| p.hw_addr == record.mac && p.dpid != record.dpid)
            .map(|p| (p.dpid, p.port_no))
        {
            let fwd = LinkKey {
                src_dpid: record.dpid,
                src_port_no: record.port_no,
                dst_dpid: peer_dpid,
                dst_port_no: peer_port_no,
            };
            let rev = LinkKey {
                src_dpid: peer_dpid,
                src_port_no: peer_port_no,
                dst_dpid: record.dpid,
                dst_port_no: record.port_no,
            };
            let added_fwd = self.links.insert(fwd, ()).is_none();
            let added_rev = self.links.insert(rev, ()).is_none();
            effect.changed = added_fwd || added_rev;
            if added_fwd {
                effect.links_added.push(fwd);
            }
            if added_rev {
                effect.links_added.push(rev);
            }
            return (None, effect);
        }

        effect.changed = true;
        (self.hosts.insert(record.mac.clone(), record), effect)
    }

    /// Peer-loss notification from the overlay's liveness protocol (C6):
    /// mark the controller record dead. Conservative — the owned switches
    /// stay in the store (spec §7).
    pub fn apply_peer_lost(&mut self, writer_id: WriterId) -> ApplyEffect {
        let mut effect = ApplyEffect::default();
        for c in self.controllers.values_mut() {
            if c.writer_id == writer_id && c.is_live {
                c.is_live = false;
                effect.changed = true;
            }
        }
        effect
    }

    pub fn port_count_matches_invariant(&self, dpid: Dpid) -> bool {
        let Some(sw) = self.switches.get(&dpid) else { return true };
        let actual = self.ports.keys().filter(|(d, _)| *d == dpid).count();
        actual as u16 == sw.port_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wid(b: u8) -> WriterId {
        [b; 16]
    }

    #[test]
    fn switch_leave_cascades_ports_hosts_links() {
        let mut store = TopologyStore::new();
        store.apply_switch(Switch { dpid: 1, cid: 0, port_count: 1 }, SwitchOp::Enter, wid(1));
        store.apply_switch(Switch { dpid: 2, cid: 0, port_count: 1 }, SwitchOp::Enter, wid(1));
        store.apply_port(
            Port {
                dpid: 1,
                port_no: 1,
                hw_addr: "aa".into(),
                name: "p1".into(),
                ofp_version: "OF13".into(),
                config: 0,
                state: 0,
                is_live: true,
            },
            PortOp::Add,
        );
        store.apply_link(
            LinkKey { src_dpid: 1, src_port_no: 1, dst_dpid: 2, dst_port_no: 1 },
            LinkOp::Add,
        );
        store.apply_host_add(Host {
            dpid: 1,
            port_no: 1,
            mac: "bb".into(),
            ipv4: "10.0.0.1".into(),
            ipv6: String::new(),
        });

        let (_, effect) = store.apply_switch(
            Switch { dpid: 1, cid: 0, port_count: 1 },
            SwitchOp::Leave,
            wid(1),
        );
        assert!(store.ports.is_empty());
        assert!(store.hosts.is_empty());
        assert!(store.links.is_empty());
        assert_eq!(effect.switches_removed, vec![1]);
    }

    #[test]
    fn link_referencing_unknown_switch_is_dropped() {
        let mut store = TopologyStore::new();
        store.apply_switch(Switch { dpid: 1, cid: 0, port_count: 1 }, SwitchOp::Enter, wid(1));
        let (applied, _) = store.apply_link(
            LinkKey { src_dpid: 1, src_port_no: 1, dst_dpid: 99, dst_port_no: 1 },
            LinkOp::Add,
        );
        assert!(!applied);
        assert!(store.links.is_empty());
    }

    #[test]
    fn port_delete_decrements_port_count_and_removes_host() {
        let mut store = TopologyStore::new();
        store.apply_switch(Switch { dpid: 1, cid: 0, port_count: 1 }, SwitchOp::Enter, wid(1));
        let port = Port {
            dpid: 1,
            port_no: 1,
            hw_addr: "aa".into(),
            name: "p1".into(),
            ofp_version: "OF13".into(),
            config: 0,
            state: 0,
            is_live: true,
        };
        store.apply_port(port.clone(), PortOp::Add);
        store.apply_host_add(Host {
            dpid: 1,
            port_no: 1,
            mac: "bb".into(),
            ipv4: String::new(),
            ipv6: String::new(),
        });
        store.apply_port(port, PortOp::Delete);
        assert_eq!(store.switches[&1].port_count, 0);
        assert!(store.hosts.is_empty());
    }

    #[test]
    fn host_matching_known_port_hw_addr_synthesizes_link() {
        let mut store = TopologyStore::new();
        store.apply_switch(Switch { dpid: 1, cid: 0, port_count: 1 }, SwitchOp::Enter, wid(1));
        store.apply_switch(Switch { dpid: 2, cid: 0, port_count: 1 }, SwitchOp::Enter, wid(1));
        store.apply_port(
            Port {
                dpid: 2,
                port_no: 5,
                hw_addr: "cc:cc".into(),
                name: "p5".into(),
                ofp_version: "OF13".into(),
                config: 0,
                state: 0,
                is_live: true,
            },
            PortOp::Add,
        );
        store.apply_host_add(Host {
            dpid: 1,
            port_no: 3,
            mac: "cc:cc".into(),
            ipv4: String::new(),
            ipv6: String::new(),
        });
        assert!(store.hosts.is_empty());
        assert!(store.links.contains_key(&LinkKey {
            src_dpid: 1,
            src_port_no: 3,
            dst_dpid: 2,
            dst_port_no: 5,
        }));
    }

    #[test]
    fn apply_is_idempotent() {
        let mut store = TopologyStore::new();
        let sw = Switch { dpid: 1, cid: 0, port_count: 0 };
        store.apply_switch(sw.clone(), SwitchOp::Enter, wid(1));
        let (prior, effect) = store.apply_switch(sw, SwitchOp::Enter, wid(1));
        assert!(prior.is_some());
        assert!(!effect.changed);
    }

    #[test]
    fn peer_lost_marks_controller_dead_but_keeps_switches() {
        let mut store = TopologyStore::new();
        store.apply_switch(Switch { dpid: 1, cid: 7, port_count: 0 }, SwitchOp::Enter, wid(9));
        store.apply_peer_lost(wid(9));
        assert!(!store.controllers[&7].is_live);
        assert!(store.switches.contains_key(&1));
    }
}
