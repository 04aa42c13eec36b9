// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tree distributor & installer (C8): for each session, works out which
//! controllers own a node of its tree, and turns the locally-owned subset
//! into `group-mod`/`flow-mod` southbound commands (spec §4.5).
//!
//! The two-implementations ambiguity spec §9 flags for `available_nodes`,
//! `latest_trees_for_c_install`, and `reset_route` is resolved here: one
//! shape only. `owning_cids` walks every tree node once; pending trees
//! for a remote cid are tracked in a `PendingTable` the pull protocol
//! drains (see `pull` below), not recomputed on every poll.

use std::collections::{HashMap, HashSet};

use crate::heat::Tree;
use crate::session::{Session, SessionRegistry};
use crate::southbound::{FlowAction, GroupBucket, GroupModCommand, SouthboundCommand};
use crate::topology::{Cid, Dpid, TopologyStore};

/// Resolves the shard owner of a dpid; a thin seam so the distributor
/// doesn't need to know about [`crate::config::ShardMap`] directly.
pub trait ShardLookup {
    fn owner(&self, dpid: Dpid) -> Option<Cid>;
}

impl ShardLookup for crate::config::ShardMap {
    fn owner(&self, dpid: Dpid) -> Option<Cid> {
        crate::config::ShardMap::owner(self, dpid)
    }
}

/// Per-(cid, session) pending installation work the pull protocol hands
/// out and the receiving controller acknowledges (spec §4.5 "pull
/// protocol").
#[derive(Debug, Default)]
pub struct PendingTable {
    /// `cid -> set of session src_dpids still pending for that cid`.
    pending: HashMap<Cid, HashSet<Dpid>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_pending(&mut self, cid: Cid, session_src: Dpid) {
        self.pending.entry(cid).or_default().insert(session_src);
    }

    /// The pull response: every session still pending for `cid`.
    pub fn pending_for(&self, cid: Cid) -> Vec<Dpid> {
        self.pending.get(&cid).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    /// Acknowledges installation: the receiving controller removes itself
    /// from the session's pending set.
    pub fn acknowledge(&mut self, cid: Cid, session_src: Dpid) {
        if let Some(set) = self.pending.get_mut(&cid) {
            set.remove(&session_src);
        }
    }
}

/// Computes `owning_cids(s)`: every cid owning at least one node of `s`'s
/// tree, per the shard map.
pub fn owning_cids(tree: &Tree, shards: &impl ShardLookup) -> HashSet<Cid> {
    tree.nodes().into_iter().filter_map(|n| shards.owner(n)).collect()
}

/// Resolves `port(n -> succ)`: the unique port on `n` whose link peer is
/// `succ`. Returns `None` (a `StaleReference`, per spec §7) if the link
/// table doesn't have that edge.
fn resolve_out_port(store: &TopologyStore, n: Dpid, succ: Dpid) -> Option<u16> {
    store
        .links
        .keys()
        .find(|l| l.src_dpid == n && l.dst_dpid == succ)
        .map(|l| l.src_port_no)
}

/// The southbound commands to realize one session's tree on this
/// controller's own shard (spec §4.5, steps 1-3). `host_port` is the
/// fixed well-known access port (parameterizable; spec default is port
/// 1).
pub fn install_commands(
    session: &Session,
    tree: &Tree,
    store: &TopologyStore,
    owned_dpids: &HashSet<Dpid>,
    host_port: u16,
) -> Vec<SouthboundCommand> {
    let mut out = Vec::new();
    let group_ip = Some(session.group_ip());

    for node in tree.nodes() {
        if !owned_dpids.contains(&node) {
            continue;
        }
        let is_receiver = session.receivers.contains(&node) || node == session.src_dpid;
        let successors = tree.children.get(&node).cloned().unwrap_or_default();

        if successors.is_empty() {
            // Terminal leaf with no out-edge: direct flow to the host port
            // (spec §4.5 step 3).
            if is_receiver {
                out.push(SouthboundCommand::FlowMod {
                    dpid: node,
                    priority: 1,
                    match_ipv4_dst: group_ip.clone(),
                    actions: vec![FlowAction::Output(host_port)],
                    buffer_id: None,
                });
            }
            continue;
        }

        let mut buckets: Vec<GroupBucket> = Vec::new();
        for succ in &successors {
            match resolve_out_port(store, node, *succ) {
                Some(port) => buckets.push(GroupBucket { actions: vec![FlowAction::Output(port)] }),
                None => log::warn!(
                    "[distributor::install_commands] no link {node:016X}->{succ:016X} in store, dropping bucket"
                ),
            }
        }
        if session.receivers.contains(&node) {
            buckets.push(GroupBucket { actions: vec![FlowAction::Output(host_port)] });
        }

        out.push(SouthboundCommand::GroupMod {
            dpid: node,
            command: GroupModCommand::Add,
            group_id: session.group_no,
            buckets,
        });
        out.push(SouthboundCommand::FlowMod {
            dpid: node,
            priority: 1,
            match_ipv4_dst: group_ip.clone(),
            actions: vec![FlowAction::Group(session.group_no)],
            buffer_id: None,
        });
    }
    out
}

/// Invalidates a stale tree before re-adding the new one (spec §4.5
/// idempotence: "first issuing `group-mod(delete, ANY)` + `flow-mod
/// (delete, ANY)` + re-adding the table-miss flow").
pub fn invalidate_commands(dpid: Dpid, group_no: u16) -> Vec<SouthboundCommand> {
    vec![
        SouthboundCommand::GroupMod {
            dpid,
            command: GroupModCommand::Delete,
            group_id: group_no,
            buckets: Vec::new(),
        },
        SouthboundCommand::FlowMod {
            dpid,
            priority: 1,
            match_ipv4_dst: None,
            actions: Vec::new(),
            buffer_id: None,
        },
        SouthboundCommand::table_miss(dpid),
    ]
}

/// Runs the whole distribution step for one controller: for each session
/// with a tree, works out who owns what and returns only the commands
/// this controller (`self_cid`) must issue itself, while marking every
/// other owning cid pending in `pending` for the pull protocol to hand
/// out later (spec §4.5).
pub fn distribute(
    self_cid: Cid,
    sessions: &SessionRegistry,
    trees: &HashMap<Dpid, Tree>,
    store: &TopologyStore,
    shards: &impl ShardLookup,
    pending: &mut PendingTable,
    host_port: u16,
) -> Vec<SouthboundCommand> {
    let mut commands = Vec::new();
    let owned_dpids: HashSet<Dpid> =
        store.switches.values().filter(|s| s.cid == self_cid).map(|s| s.dpid).collect();

    for session in sessions.iter() {
        let Some(tree) = trees.get(&session.src_dpid) else { continue };
        let owners = owning_cids(tree, shards);
        for &cid in &owners {
            if cid == self_cid {
                commands.extend(install_commands(session, tree, store, &owned_dpids, host_port));
            } else {
                pending.mark_pending(cid, session.src_dpid);
            }
        }
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::DEFAULT_HOST_PORT;
    use crate::heat::HeatDegreeEngine;
    use crate::topology::{LinkKey, LinkOp, Switch, SwitchOp};

    fn two_cid_shard() -> crate::config::ShardMap {
        crate::config::ShardMap::from_entries([(1, vec![1, 2]), (2, vec![3])])
    }

    fn wired_store() -> TopologyStore {
        let mut store = TopologyStore::new();
        let wid = [1u8; 16];
        store.apply_switch(Switch { dpid: 1, cid: 1, port_count: 1 }, SwitchOp::Enter, wid);
        store.apply_switch(Switch { dpid: 2, cid: 1, port_count: 2 }, SwitchOp::Enter, wid);
        store.apply_switch(Switch { dpid: 3, cid: 2, port_count: 1 }, SwitchOp::Enter, wid);
        store.apply_link(LinkKey { src_dpid: 1, src_port_no: 1, dst_dpid: 2, dst_port_no: 1 }, LinkOp::Add);
        store.apply_link(LinkKey { src_dpid: 2, src_port_no: 1, dst_dpid: 1, dst_port_no: 1 }, LinkOp::Add);
        store.apply_link(LinkKey { src_dpid: 2, src_port_no: 2, dst_dpid: 3, dst_port_no: 1 }, LinkOp::Add);
        store.apply_link(LinkKey { src_dpid: 3, src_port_no: 1, dst_dpid: 2, dst_port_no: 2 }, LinkOp::Add);
        store
    }

    fn path_graph() -> crate::graph::Graph {
        let mut g = crate::graph::Graph::new();
        g.add_edge(1, 2, 1.0, 10.0);
        g.add_edge(2, 3, 1.0, 10.0);
        g
    }

    #[test]
    fn owning_cids_spans_both_shards_on_a_cross_shard_tree() {
        let mut sessions = SessionRegistry::new();
        sessions.add_session(1, HashSet::from([3]), 10.0, 1.0);
        let mut engine = HeatDegreeEngine::new(path_graph());
        engine.rebuild(&sessions);
        let tree = engine.tree(1).unwrap();
        let shards = two_cid_shard();
        let owners = owning_cids(tree, &shards);
        assert_eq!(owners, HashSet::from([1, 2]));
    }

    #[test]
    fn distribute_emits_local_commands_and_marks_remote_pending() {
        let mut sessions = SessionRegistry::new();
        sessions.add_session(1, HashSet::from([3]), 10.0, 1.0);
        let mut engine = HeatDegreeEngine::new(path_graph());
        engine.rebuild(&sessions);
        let mut trees = HashMap::new();
        trees.insert(1, engine.tree(1).unwrap().clone());

        let store = wired_store();
        let shards = two_cid_shard();
        let mut pending = PendingTable::new();
        let commands = distribute(1, &sessions, &trees, &store, &shards, &mut pending, DEFAULT_HOST_PORT);

        assert!(!commands.is_empty());
        assert_eq!(pending.pending_for(2), vec![1]);
    }
}
