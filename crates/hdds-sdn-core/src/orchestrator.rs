// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Debounced control loop (C9): accumulates topology-apply notifications
//! and session-admin requests for a short window, then invokes the
//! heat-degree engine (C3) with the batched effect and re-runs the
//! distributor (C8) for whatever trees came out of it. See spec §4.6.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::ShardMap;
use crate::config::defaults::DEBOUNCE_WINDOW_MS;
use crate::distributor::{self, PendingTable};
use crate::heat::HeatDegreeEngine;
use crate::overlay::Overlay;
use crate::session::SessionRegistry;
use crate::southbound::SouthboundCommand;
use crate::topology::{Cid, Dpid, TopologyStore};

/// One unit of work the loop debounces. Topology mutation itself already
/// happened by the time this is submitted (the caller, typically the
/// southbound adapter or the overlay subscriber loops, applies to the
/// shared [`TopologyStore`] directly); this event only says *that*
/// something changed, so the engine knows whether a full [`HeatDegreeEngine::rebuild`]
/// is warranted versus a targeted update.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    /// A switch/port/link/host apply changed the replicated topology.
    /// Any edge gain or loss resets the engine from scratch (spec §4.6).
    TopologyChanged,
    SessionAdded { src_dpid: Dpid, receivers: Vec<Dpid>, delay_bound: f64, bw_demand: f64 },
    SessionRemoved { src_dpid: Dpid },
    ReceiverAdded { src_dpid: Dpid, receiver: Dpid },
    ReceiverRemoved { src_dpid: Dpid, receiver: Dpid },
    EdgeDelayChanged { a: Dpid, b: Dpid, new_weight: f64 },
}

/// Ties C3 (heat-degree engine), C4 (session registry), C5 (topology
/// store), C6 (overlay), and C8 (distributor) together behind one
/// debounced loop per controller process.
pub struct Orchestrator {
    self_cid: Cid,
    host_port: u16,
    debounce_window: Duration,
    topology: Arc<Mutex<TopologyStore>>,
    sessions: Mutex<SessionRegistry>,
    engine: Mutex<HeatDegreeEngine>,
    pending: Mutex<PendingTable>,
    shards: Arc<ShardMap>,
    overlay: Arc<Overlay>,
    commands_tx: Sender<SouthboundCommand>,
    events_tx: Sender<ControlEvent>,
    events_rx: Receiver<ControlEvent>,
}

impl Orchestrator {
    /// Builds a fresh orchestrator. `graph` is the controller's own view
    /// of the network used to seed the engine (spec §4.2: the engine owns
    /// its own [`crate::graph::Graph`], rebuilt wholesale on reset).
    pub fn new(
        self_cid: Cid,
        host_port: u16,
        graph: crate::graph::Graph,
        topology: Arc<Mutex<TopologyStore>>,
        shards: Arc<ShardMap>,
        overlay: Arc<Overlay>,
        commands_tx: Sender<SouthboundCommand>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            self_cid,
            host_port,
            debounce_window: Duration::from_millis(DEBOUNCE_WINDOW_MS),
            topology,
            sessions: Mutex::new(SessionRegistry::new()),
            engine: Mutex::new(HeatDegreeEngine::new(graph)),
            pending: Mutex::new(PendingTable::new()),
            shards,
            overlay,
            commands_tx,
            events_tx,
            events_rx,
        }
    }

    /// The handle loops elsewhere in the process submit events through.
    pub fn events(&self) -> Sender<ControlEvent> {
        self.events_tx.clone()
    }

    pub fn pending_for(&self, cid: Cid) -> Vec<Dpid> {
        self.pending.lock().pending_for(cid)
    }

    pub fn acknowledge(&self, cid: Cid, session_src: Dpid) {
        self.pending.lock().acknowledge(cid, session_src);
    }

    /// Runs the debounced control loop until the overlay is shut down or
    /// every event sender is dropped. Blocks the calling thread; callers
    /// spawn this on its own `std::thread` (spec §5).
    pub fn run(&self) {
        log::info!("[orchestrator::run] control loop starting (cid={})", self.self_cid);
        loop {
            if !self.overlay.is_active() {
                break;
            }
            match self.events_rx.recv_timeout(self.debounce_window) {
                Ok(first) => {
                    let mut batch = vec![first];
                    let deadline = Instant::now() + self.debounce_window;
                    loop {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            break;
                        }
                        match self.events_rx.recv_timeout(remaining) {
                            Ok(ev) => batch.push(ev),
                            Err(RecvTimeoutError::Timeout) => break,
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    self.process_batch(batch);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.emit_final_leave();
        log::info!("[orchestrator::run] control loop stopped (cid={})", self.self_cid);
    }

    /// Applies one debounced batch: mutates C4/C3 state per event, then
    /// re-runs C8 once for whatever trees ended up touched.
    fn process_batch(&self, batch: Vec<ControlEvent>) {
        let mut sessions = self.sessions.lock();
        let mut engine = self.engine.lock();

        let reset_needed =
            batch.iter().any(|e| matches!(e, ControlEvent::TopologyChanged | ControlEvent::SessionAdded { .. }));

        for event in &batch {
            match event {
                ControlEvent::TopologyChanged => {
                    let graph = self.rebuild_graph_from_topology();
                    *engine = HeatDegreeEngine::new(graph);
                }
                ControlEvent::SessionAdded { src_dpid, receivers, delay_bound, bw_demand } => {
                    if sessions
                        .add_session(*src_dpid, receivers.iter().copied().collect(), *delay_bound, *bw_demand)
                        .is_none()
                    {
                        log::warn!(
                            "[orchestrator::process_batch] session {src_dpid:016X} already registered, ignoring"
                        );
                    }
                }
                ControlEvent::SessionRemoved { src_dpid } => {
                    sessions.remove_session(*src_dpid);
                }
                ControlEvent::ReceiverAdded { src_dpid, receiver } => {
                    if sessions.add_receiver(*src_dpid, *receiver) && !reset_needed {
                        engine.add_receiver(&sessions, *src_dpid, *receiver);
                    }
                }
                ControlEvent::ReceiverRemoved { src_dpid, receiver } => {
                    if sessions.remove_receiver(*src_dpid, *receiver) && !reset_needed {
                        engine.remove_receiver(&sessions, *src_dpid, *receiver);
                    }
                }
                ControlEvent::EdgeDelayChanged { a, b, new_weight } => {
                    if !reset_needed {
                        engine.change_edge_delay(&sessions, *a, *b, *new_weight);
                    }
                }
            }
        }

        if reset_needed {
            engine.rebuild(&sessions);
        }

        let trees = sessions
            .iter()
            .filter_map(|s| engine.tree(s.src_dpid).map(|t| (s.src_dpid, t.clone())))
            .collect();

        let topology = self.topology.lock();
        let mut pending = self.pending.lock();
        let commands = distributor::distribute(
            self.self_cid,
            &sessions,
            &trees,
            &topology,
            self.shards.as_ref(),
            &mut pending,
            self.host_port,
        );
        drop(topology);

        for cmd in commands {
            if self.commands_tx.send(cmd).is_err() {
                log::warn!("[orchestrator::process_batch] southbound command channel closed, dropping");
                break;
            }
        }
    }

    /// Rebuilds the working [`crate::graph::Graph`] from the replicated
    /// link table. Ports/hosts carry no delay/bandwidth of their own, so
    /// every link contributes weight 1.0 and an unbounded-looking default
    /// bandwidth until a southbound collaborator reports real link metrics
    /// (spec §9's open question on where link cost comes from is left to
    /// that collaborator; this is the graph the engine sees absent one).
    fn rebuild_graph_from_topology(&self) -> crate::graph::Graph {
        let topology = self.topology.lock();
        let mut graph = crate::graph::Graph::new();
        for link in topology.links.keys() {
            graph.add_edge(link.src_dpid, link.dst_dpid, 1.0, f64::MAX);
        }
        graph
    }

    /// Spec §4.6 shutdown contract: "emits a final `leave` publish for
    /// every local entity and disconnects." The actual switch-leave
    /// records were already produced by the southbound adapter as
    /// switches go down; this only tears down the overlay side.
    fn emit_final_leave(&self) {
        self.overlay.shutdown();
        for peer in self.overlay.connected_peers() {
            self.overlay.remove_peer(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{LinkKey, LinkOp, Switch, SwitchOp};
    use std::time::Duration as StdDuration;

    fn overlay() -> Arc<Overlay> {
        Arc::new(Overlay::new([9u8; 16], StdDuration::from_secs(10)))
    }

    fn wired_topology() -> Arc<Mutex<TopologyStore>> {
        let mut store = TopologyStore::new();
        let wid = [1u8; 16];
        store.apply_switch(Switch { dpid: 1, cid: 1, port_count: 1 }, SwitchOp::Enter, wid);
        store.apply_switch(Switch { dpid: 2, cid: 1, port_count: 1 }, SwitchOp::Enter, wid);
        store.apply_link(LinkKey { src_dpid: 1, src_port_no: 1, dst_dpid: 2, dst_port_no: 1 }, LinkOp::Add);
        store.apply_link(LinkKey { src_dpid: 2, src_port_no: 1, dst_dpid: 1, dst_port_no: 1 }, LinkOp::Add);
        Arc::new(Mutex::new(store))
    }

    #[test]
    fn session_add_then_topology_change_produces_local_commands() {
        let topology = wired_topology();
        let shards = Arc::new(ShardMap::from_entries([(1, vec![1, 2])]));
        let (cmd_tx, cmd_rx) = unbounded();
        let orch = Orchestrator::new(1, 1, crate::graph::Graph::new(), topology, shards, overlay(), cmd_tx);

        orch.process_batch(vec![
            ControlEvent::TopologyChanged,
            ControlEvent::SessionAdded { src_dpid: 1, receivers: vec![2], delay_bound: 10.0, bw_demand: 1.0 },
        ]);

        let mut saw_command = false;
        while cmd_rx.try_recv().is_ok() {
            saw_command = true;
        }
        assert!(saw_command, "expected the batch to produce at least one southbound command");
    }

    #[test]
    fn shutdown_disconnects_every_peer() {
        let a = overlay();
        let b = overlay();
        a.register_peer(b.self_writer_id(), Arc::new(crate::overlay::LoopbackSink { target: b.clone(), writer_id: a.self_writer_id() }));
        assert_eq!(a.connected_peers().len(), 1);

        let topology = wired_topology();
        let shards = Arc::new(ShardMap::from_entries([(1, vec![1, 2])]));
        let (cmd_tx, _cmd_rx) = unbounded();
        let orch = Orchestrator::new(1, 1, crate::graph::Graph::new(), topology, shards, a.clone(), cmd_tx);
        orch.emit_final_leave();

        assert!(a.connected_peers().is_empty());
        assert!(!a.is_active());
    }
}
