// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wires the overlay mesh transport and all background loops spec §5
//! names into a single running controller process.

pub mod connection;
pub mod protocol;
pub mod registry;

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;
use hdds_sdn_core::config::defaults::{HEARTBEAT_PERIOD_MS, PEER_TIMEOUT_MS, PULL_INTERVAL_MS, PULL_WARMUP_MS};
use hdds_sdn_core::config::ShardMap;
use hdds_sdn_core::orchestrator::{ControlEvent, Orchestrator};
use hdds_sdn_core::overlay::wire::HostRecord;
use hdds_sdn_core::overlay::{Overlay, Topic, TopicRecord};
use hdds_sdn_core::southbound::{LocalTopologyAdapter, OutboundRecord, SouthboundEvent};
use hdds_sdn_core::topology::{Cid, LinkOp, PortOp, SwitchOp, TopologyStore, WriterId};
use parking_lot::Mutex;

use registry::DialRegistry;

/// Starts the overlay mesh: one accept thread for inbound connections and
/// one dial thread that connects out to every peer the shard map names an
/// `overlay_addr` for (spec §3's static map doubling as the mesh's peer
/// list).
pub fn start_mesh(mesh_bind: &str, overlay: Arc<Overlay>, shards: Arc<ShardMap>, self_cid: Cid) -> std::io::Result<()> {
    let listener = TcpListener::bind(mesh_bind)?;
    log::info!("[server::start_mesh] overlay mesh listening on {mesh_bind}");

    let accept_overlay = overlay.clone();
    std::thread::Builder::new()
        .name("mesh-accept".into())
        .spawn(move || {
            for incoming in listener.incoming() {
                match incoming {
                    Ok(stream) => {
                        let overlay = accept_overlay.clone();
                        std::thread::spawn(move || {
                            if let Err(e) = connection::run_connection(stream, overlay, self_cid) {
                                log::debug!("[server::start_mesh] inbound connection ended: {e}");
                            }
                        });
                    }
                    Err(e) => log::warn!("[server::start_mesh] accept failed: {e}"),
                }
            }
        })?;

    let dial_registry = Arc::new(DialRegistry::new());
    std::thread::Builder::new()
        .name("mesh-dial".into())
        .spawn(move || dial_loop(shards.as_ref(), overlay, dial_registry, self_cid))?;

    Ok(())
}

fn dial_loop(shards: &ShardMap, overlay: Arc<Overlay>, registry: Arc<DialRegistry>, self_cid: Cid) {
    loop {
        if !overlay.is_active() {
            break;
        }
        for (cid, addr) in shards.overlay_peers() {
            if cid == self_cid {
                continue;
            }
            if !registry.try_claim(&addr) {
                continue;
            }
            let overlay = overlay.clone();
            let registry = registry.clone();
            let addr_owned = addr.clone();
            std::thread::spawn(move || {
                match TcpStream::connect(&addr_owned) {
                    Ok(stream) => {
                        if let Err(e) = connection::run_connection(stream, overlay, self_cid) {
                            log::debug!("[server::dial_loop] outbound connection to {addr_owned} ended: {e}");
                        }
                    }
                    Err(e) => log::debug!("[server::dial_loop] dial {addr_owned} failed: {e}"),
                }
                registry.release(&addr_owned);
            });
        }
        std::thread::sleep(Duration::from_millis(PEER_TIMEOUT_MS / 2));
    }
}

/// Applies one decoded record to the replicated store and forwards a
/// `TopologyChanged` event to the orchestrator if anything actually
/// changed (spec §4.3's idempotent-apply contract).
fn apply_record(store: &Mutex<TopologyStore>, record: TopicRecord, writer_id: WriterId, orchestrator: &Orchestrator) {
    let changed = {
        let mut store = store.lock();
        match record {
            TopicRecord::Switch(r) => {
                let op = if r.op == hdds_sdn_core::overlay::wire::SwitchOpWire::Enter { SwitchOp::Enter } else { SwitchOp::Leave };
                let switch =
                    hdds_sdn_core::topology::Switch { dpid: r.dpid as u64, cid: r.cid, port_count: r.port_count as u16 };
                store.apply_switch(switch, op, writer_id).1.changed
            }
            TopicRecord::Port(r) => {
                let op = match r.op {
                    hdds_sdn_core::overlay::wire::PortOpWire::Add => PortOp::Add,
                    hdds_sdn_core::overlay::wire::PortOpWire::Modify => PortOp::Modify,
                    hdds_sdn_core::overlay::wire::PortOpWire::Delete => PortOp::Delete,
                };
                let port = hdds_sdn_core::topology::Port {
                    dpid: r.dpid as u64,
                    port_no: r.port_no as u16,
                    hw_addr: r.hw_addr,
                    name: r.name,
                    ofp_version: r.ofp,
                    config: r.config as u16,
                    state: r.state as u16,
                    is_live: r.is_live,
                };
                store.apply_port(port, op).1.changed
            }
            TopicRecord::Link(r) => {
                let op = if r.op == hdds_sdn_core::overlay::wire::LinkOpWire::Add { LinkOp::Add } else { LinkOp::Delete };
                let key = hdds_sdn_core::topology::LinkKey {
                    src_dpid: r.src_dpid as u64,
                    src_port_no: r.src_port_no as u16,
                    dst_dpid: r.dst_dpid as u64,
                    dst_port_no: r.dst_port_no as u16,
                };
                store.apply_link(key, op).1.changed
            }
            TopicRecord::Host(r) => {
                if r.is_heartbeat() {
                    false
                } else {
                    let host = hdds_sdn_core::topology::Host {
                        dpid: r.dpid as u64,
                        port_no: r.port_no as u16,
                        mac: r.mac,
                        ipv4: r.ipv4,
                        ipv6: r.ipv6,
                    };
                    store.apply_host_add(host).1.changed
                }
            }
        }
    };
    if changed {
        let _ = orchestrator.events().send(ControlEvent::TopologyChanged);
    }
}

/// One topic's subscriber loop: blocks on the overlay's delivery channel
/// and applies every record to the shared store (spec §5).
pub fn subscriber_loop(topic: Topic, rx: Receiver<(TopicRecord, WriterId)>, store: Arc<Mutex<TopologyStore>>, orchestrator: Arc<Orchestrator>) {
    log::info!("[server::subscriber_loop] {topic:?} subscriber loop starting");
    for (record, writer_id) in rx.iter() {
        apply_record(&store, record, writer_id, &orchestrator);
    }
    log::info!("[server::subscriber_loop] {topic:?} subscriber loop stopped");
}

/// Scans liveness every second, marking any lost peer's controller record
/// dead in the store (spec §4.4).
pub fn peer_liveness_loop(overlay: Arc<Overlay>, store: Arc<Mutex<TopologyStore>>, orchestrator: Arc<Orchestrator>) {
    while overlay.is_active() {
        std::thread::sleep(Duration::from_secs(1));
        for writer_id in overlay.check_liveness() {
            let changed = store.lock().apply_peer_lost(writer_id).changed;
            if changed {
                let _ = orchestrator.events().send(ControlEvent::TopologyChanged);
            }
        }
    }
}

/// Republishes this controller's own authoritative slice of the topology
/// (the switches it owns and everything attached to them) whenever a peer
/// starts a fresh subscription, so a late joiner converges to the current
/// state instead of waiting for the next natural mutation (spec §4.4).
pub fn new_subscription_loop(overlay: Arc<Overlay>, store: Arc<Mutex<TopologyStore>>, self_cid: Cid) {
    let rx = overlay.on_new_subscription();
    while overlay.is_active() {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(()) => republish_local_view(&overlay, &store, self_cid),
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn republish_local_view(overlay: &Overlay, store: &Mutex<TopologyStore>, self_cid: Cid) {
    use hdds_sdn_core::overlay::wire::{HostRecord as HR, LinkRecord, PortRecord, SwitchOpWire, SwitchRecord};

    let store = store.lock();
    let self_writer_id = overlay.self_writer_id();

    for sw in store.switches.values().filter(|s| s.cid == self_cid) {
        let rec = SwitchRecord { writer_id: self_writer_id, cid: sw.cid, dpid: sw.dpid as i64, port_count: sw.port_count as i16, op: SwitchOpWire::Enter };
        overlay.publish(Topic::Switches, &rec.encode());
    }
    for ((dpid, _port_no), port) in store.ports.iter() {
        if store.switches.get(dpid).map(|s| s.cid) != Some(self_cid) {
            continue;
        }
        let rec = PortRecord {
            dpid: port.dpid as i64,
            ofp: port.ofp_version.clone(),
            config: port.config as i16,
            state: port.state as i16,
            port_no: port.port_no as i16,
            hw_addr: port.hw_addr.clone(),
            name: port.name.clone(),
            is_live: port.is_live,
            op: hdds_sdn_core::overlay::wire::PortOpWire::Add,
        };
        overlay.publish(Topic::Ports, &rec.encode());
    }
    for link in store.links.keys() {
        if store.switches.get(&link.src_dpid).map(|s| s.cid) != Some(self_cid) {
            continue;
        }
        let rec = LinkRecord {
            src_dpid: link.src_dpid as i64,
            src_port_no: link.src_port_no as i16,
            dst_dpid: link.dst_dpid as i64,
            dst_port_no: link.dst_port_no as i16,
            op: hdds_sdn_core::overlay::wire::LinkOpWire::Add,
        };
        overlay.publish(Topic::Links, &rec.encode());
    }
    for host in store.hosts.values() {
        if store.switches.get(&host.dpid).map(|s| s.cid) != Some(self_cid) {
            continue;
        }
        let rec = HR {
            dpid: host.dpid as i64,
            port_no: host.port_no as i16,
            mac: host.mac.clone(),
            ipv4: host.ipv4.clone(),
            ipv6: host.ipv6.clone(),
            op: hdds_sdn_core::overlay::wire::HostOpWire::Add,
        };
        overlay.publish(Topic::Hosts, &rec.encode());
    }
}

/// Publishes a heartbeat host record once per period (spec §4.4: "once per
/// second"). Peers attribute it to the connection's handshake writer id,
/// not to anything in the payload.
pub fn heartbeat_loop(overlay: Arc<Overlay>) {
    while overlay.is_active() {
        overlay.publish(Topic::Hosts, &HostRecord::heartbeat().encode());
        std::thread::sleep(Duration::from_millis(HEARTBEAT_PERIOD_MS));
    }
}

/// Diagnostic pull-trees loop. Cross-shard install commands are, in this
/// deployment, issued directly by whichever controller's own orchestrator
/// computed them (see DESIGN.md's resolution of the `available_nodes`/
/// pull-protocol open question); this loop just logs how much work is
/// still marked pending for this cid; so an operator can tell the
/// difference between "converged" and "another shard hasn't caught up"
/// without guessing from the overlay contents.
pub fn pull_trees_loop(orchestrator: Arc<Orchestrator>, overlay: Arc<Overlay>, self_cid: Cid) {
    std::thread::sleep(Duration::from_millis(PULL_WARMUP_MS));
    while overlay.is_active() {
        let pending = orchestrator.pending_for(self_cid);
        if !pending.is_empty() {
            log::debug!("[server::pull_trees_loop] {} session(s) still pending for cid {self_cid}", pending.len());
        }
        std::thread::sleep(Duration::from_millis(PULL_INTERVAL_MS));
    }
}

/// Southbound event loop: applies switch/port/link/host events to the
/// local store, publishes the resulting records over the mesh, and lets
/// the orchestrator know topology changed (spec §5).
pub fn southbound_event_loop(
    events_rx: Receiver<SouthboundEvent>,
    store: Arc<Mutex<TopologyStore>>,
    overlay: Arc<Overlay>,
    orchestrator: Arc<Orchestrator>,
    self_cid: Cid,
) {
    let adapter = LocalTopologyAdapter::new(self_cid);
    for event in events_rx.iter() {
        let outbound = adapter.translate(&event);
        let mut any_change = false;
        {
            let mut store = store.lock();
            for record in &outbound {
                let changed = match record.clone() {
                    OutboundRecord::Switch(sw, op) => store.apply_switch(sw, op, overlay.self_writer_id()).1.changed,
                    OutboundRecord::Port(p, op) => store.apply_port(p, op).1.changed,
                    OutboundRecord::Link(l, op) => store.apply_link(l, op).1.changed,
                    OutboundRecord::Host(h) => store.apply_host_add(h).1.changed,
                };
                any_change |= changed;
            }
        }
        publish_outbound(&overlay, &outbound, self_cid);
        if any_change {
            let _ = orchestrator.events().send(ControlEvent::TopologyChanged);
        }
    }
}

fn publish_outbound(overlay: &Overlay, outbound: &[OutboundRecord], self_cid: Cid) {
    use hdds_sdn_core::overlay::wire::{HostRecord as HR, LinkRecord, PortRecord, SwitchRecord};

    for record in outbound {
        match record {
            OutboundRecord::Switch(sw, op) => {
                let wire_op = if *op == SwitchOp::Enter {
                    hdds_sdn_core::overlay::wire::SwitchOpWire::Enter
                } else {
                    hdds_sdn_core::overlay::wire::SwitchOpWire::Leave
                };
                let rec = SwitchRecord { writer_id: overlay.self_writer_id(), cid: self_cid, dpid: sw.dpid as i64, port_count: sw.port_count as i16, op: wire_op };
                overlay.publish(Topic::Switches, &rec.encode());
            }
            OutboundRecord::Port(p, op) => {
                let wire_op = match op {
                    PortOp::Add => hdds_sdn_core::overlay::wire::PortOpWire::Add,
                    PortOp::Modify => hdds_sdn_core::overlay::wire::PortOpWire::Modify,
                    PortOp::Delete => hdds_sdn_core::overlay::wire::PortOpWire::Delete,
                };
                let rec = PortRecord {
                    dpid: p.dpid as i64,
                    ofp: p.ofp_version.clone(),
                    config: p.config as i16,
                    state: p.state as i16,
                    port_no: p.port_no as i16,
                    hw_addr: p.hw_addr.clone(),
                    name: p.name.clone(),
                    is_live: p.is_live,
                    op: wire_op,
                };
                overlay.publish(Topic::Ports, &rec.encode());
            }
            OutboundRecord::Link(l, op) => {
                let wire_op =
                    if *op == LinkOp::Add { hdds_sdn_core::overlay::wire::LinkOpWire::Add } else { hdds_sdn_core::overlay::wire::LinkOpWire::Delete };
                let rec = LinkRecord { src_dpid: l.src_dpid as i64, src_port_no: l.src_port_no as i16, dst_dpid: l.dst_dpid as i64, dst_port_no: l.dst_port_no as i16, op: wire_op };
                overlay.publish(Topic::Links, &rec.encode());
            }
            OutboundRecord::Host(h) => {
                let rec = HR { dpid: h.dpid as i64, port_no: h.port_no as i16, mac: h.mac.clone(), ipv4: h.ipv4.clone(), ipv6: h.ipv6.clone(), op: hdds_sdn_core::overlay::wire::HostOpWire::Add };
                overlay.publish(Topic::Hosts, &rec.encode());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn dial_registry_prevents_duplicate_claims() {
        let registry = DialRegistry::new();
        assert!(registry.try_claim("127.0.0.1:1"));
        assert!(!registry.try_claim("127.0.0.1:1"));
    }

    #[test]
    fn apply_record_of_a_new_switch_fires_topology_changed() {
        let store = Arc::new(Mutex::new(TopologyStore::new()));
        let shards = Arc::new(ShardMap::from_entries([(1, vec![1])]));
        let overlay = Arc::new(Overlay::new([1u8; 16], StdDuration::from_secs(10)));
        let (cmd_tx, _cmd_rx) = crossbeam::channel::unbounded();
        let orchestrator = Arc::new(Orchestrator::new(1, 1, hdds_sdn_core::graph::Graph::new(), store.clone(), shards, overlay, cmd_tx));

        let record = TopicRecord::Switch(hdds_sdn_core::overlay::wire::SwitchRecord {
            writer_id: [2u8; 16],
            cid: 1,
            dpid: 5,
            port_count: 0,
            op: hdds_sdn_core::overlay::wire::SwitchOpWire::Enter,
        });
        apply_record(&store, record, [2u8; 16], &orchestrator);
        assert!(store.lock().switches.contains_key(&5));
    }
}
