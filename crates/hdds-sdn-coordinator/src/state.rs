// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared in-memory state for the coordinator's HTTP surface (spec §6):
//! the replicated topology, the session registry, the heat-degree engine,
//! and the distributor's pending table all live here instead of in a
//! per-controller process, since this binary exists specifically to let
//! every shard pull its install work from one place instead of running
//! the full peer-to-peer overlay.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use hdds_sdn_core::config::ShardMap;
use hdds_sdn_core::distributor::{self, PendingTable};
use hdds_sdn_core::graph::Graph;
use hdds_sdn_core::heat::{HeatDegreeEngine, Tree};
use hdds_sdn_core::session::SessionRegistry;
use hdds_sdn_core::topology::{Cid, Dpid, TopologyStore};
use parking_lot::Mutex;

/// Everything the HTTP handlers read and mutate. One coordinator process
/// is a single shared instance of this across every shard.
pub struct CoordinatorState {
    pub topology: Mutex<TopologyStore>,
    pub sessions: Mutex<SessionRegistry>,
    pub engine: Mutex<HeatDegreeEngine>,
    pub pending: Mutex<PendingTable>,
    pub shards: Arc<ShardMap>,
    /// Whether each cid has called `/enter` more recently than `/leave`.
    pub live: DashMap<Cid, bool>,
}

impl CoordinatorState {
    pub fn new(shards: Arc<ShardMap>) -> Self {
        Self {
            topology: Mutex::new(TopologyStore::new()),
            sessions: Mutex::new(SessionRegistry::new()),
            engine: Mutex::new(HeatDegreeEngine::new(Graph::new())),
            pending: Mutex::new(PendingTable::new()),
            shards,
            live: DashMap::new(),
        }
    }

    pub fn mark_entered(&self, cid: Cid) {
        self.live.insert(cid, true);
    }

    pub fn mark_left(&self, cid: Cid) {
        self.live.insert(cid, false);
    }

    pub fn is_live(&self, cid: Cid) -> bool {
        self.live.get(&cid).map(|v| *v).unwrap_or(false)
    }

    /// Rebuilds the working graph from the link table (mirrors
    /// `Orchestrator::rebuild_graph_from_topology` in the peer-to-peer
    /// binary): every link weight 1.0, bandwidth unbounded until a
    /// southbound collaborator reports real metrics.
    pub fn rebuild_graph(&self) -> Graph {
        let topology = self.topology.lock();
        let mut graph = Graph::new();
        for link in topology.links.keys() {
            graph.add_edge(link.src_dpid, link.dst_dpid, 1.0, f64::MAX);
        }
        graph
    }

    /// Recomputes every session's tree from scratch and re-runs the
    /// distributor, refreshing the pending table every cid can pull
    /// against (spec §4.6's reset escape hatch, reused here since the
    /// coordinator's own session-admin calls are infrequent by nature).
    pub fn resync(&self) {
        let graph = self.rebuild_graph();
        let sessions = self.sessions.lock();
        let mut engine = self.engine.lock();
        *engine = HeatDegreeEngine::new(graph);
        engine.rebuild(&sessions);

        let trees: HashMap<Dpid, Tree> =
            sessions.iter().filter_map(|s| engine.tree(s.src_dpid).map(|t| (s.src_dpid, t.clone()))).collect();

        let topology = self.topology.lock();
        let mut pending = self.pending.lock();
        *pending = PendingTable::new();
        for cid in self.shards.cids() {
            // `distribute` only marks cids other than `self_cid` pending, so
            // calling it once per cid from that cid's own point of view
            // populates every cid's entry in one pass.
            let _ = distributor::distribute(cid, &sessions, &trees, &topology, self.shards.as_ref(), &mut pending, 0);
        }
    }

    pub fn trees(&self) -> HashMap<Dpid, Tree> {
        let sessions = self.sessions.lock();
        let engine = self.engine.lock();
        sessions.iter().filter_map(|s| engine.tree(s.src_dpid).map(|t| (s.src_dpid, t.clone()))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdds_sdn_core::topology::{LinkKey, LinkOp, Switch, SwitchOp};
    use std::collections::HashSet;

    fn wired_state() -> CoordinatorState {
        let shards = Arc::new(ShardMap::from_entries([(1, vec![1, 2]), (2, vec![3])]));
        let state = CoordinatorState::new(shards);
        let mut topology = state.topology.lock();
        let wid = [1u8; 16];
        topology.apply_switch(Switch { dpid: 1, cid: 1, port_count: 1 }, SwitchOp::Enter, wid);
        topology.apply_switch(Switch { dpid: 2, cid: 1, port_count: 2 }, SwitchOp::Enter, wid);
        topology.apply_switch(Switch { dpid: 3, cid: 2, port_count: 1 }, SwitchOp::Enter, wid);
        topology.apply_link(LinkKey { src_dpid: 1, src_port_no: 1, dst_dpid: 2, dst_port_no: 1 }, LinkOp::Add);
        topology.apply_link(LinkKey { src_dpid: 2, src_port_no: 1, dst_dpid: 1, dst_port_no: 1 }, LinkOp::Add);
        topology.apply_link(LinkKey { src_dpid: 2, src_port_no: 2, dst_dpid: 3, dst_port_no: 1 }, LinkOp::Add);
        topology.apply_link(LinkKey { src_dpid: 3, src_port_no: 1, dst_dpid: 2, dst_port_no: 2 }, LinkOp::Add);
        drop(topology);
        state
    }

    #[test]
    fn resync_after_session_add_marks_remote_shard_pending() {
        let state = wired_state();
        state.sessions.lock().add_session(1, HashSet::from([3]), 10.0, 1.0);
        state.resync();
        assert_eq!(state.pending.lock().pending_for(2), vec![1]);
    }

    #[test]
    fn enter_then_leave_flips_liveness() {
        let state = wired_state();
        assert!(!state.is_live(1));
        state.mark_entered(1);
        assert!(state.is_live(1));
        state.mark_left(1);
        assert!(!state.is_live(1));
    }
}
