// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Heat-degree engine (C3): relevance matrix, heat matrix, and incremental
//! Steiner-tree (re)routing for every multicast session. See spec §4.2.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::{Graph, NodeId};
use crate::oracle::FullPll;
use crate::session::SessionRegistry;

type EdgeKey = (NodeId, NodeId);

fn edge_key(u: NodeId, v: NodeId) -> EdgeKey {
    (u.min(v), u.max(v))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeatCell {
    pub h_ok: f64,
    pub h_hot: f64,
    pub available: bool,
}

/// One rooted directed multicast tree, keyed by node id (spec §9: "trees
/// store node ids, never node objects").
#[derive(Debug, Clone, Default)]
pub struct Tree {
    pub root: NodeId,
    pub children: HashMap<NodeId, Vec<NodeId>>,
    pub parent: HashMap<NodeId, NodeId>,
}

impl Tree {
    pub fn nodes(&self) -> HashSet<NodeId> {
        let mut ns = HashSet::from([self.root]);
        ns.extend(self.parent.keys().copied());
        ns
    }

    pub fn contains_edge(&self, u: NodeId, v: NodeId) -> bool {
        self.children.get(&u).is_some_and(|cs| cs.contains(&v))
            || self.children.get(&v).is_some_and(|cs| cs.contains(&u))
    }

    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.children.iter().flat_map(|(&p, cs)| cs.iter().map(move |&c| (p, c)))
    }

    pub fn out_degree(&self, n: NodeId) -> usize {
        self.children.get(&n).map_or(0, Vec::len)
    }

    /// Builds a rooted directed tree from an undirected edge set via BFS
    /// from `root` (spec §4.2: "orientation into a rooted tree follows BFS
    /// order from the source").
    fn from_undirected(edges: &HashSet<EdgeKey>, root: NodeId) -> Self {
        let mut adj: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for &(u, v) in edges {
            adj.entry(u).or_default().push(v);
            adj.entry(v).or_default().push(u);
        }
        for neighbors in adj.values_mut() {
            neighbors.sort_unstable();
        }

        let mut tree = Tree { root, ..Default::default() };
        let mut visited = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(u) = queue.pop_front() {
            if let Some(neighbors) = adj.get(&u) {
                for &v in neighbors {
                    if visited.insert(v) {
                        tree.children.entry(u).or_default().push(v);
                        tree.parent.insert(v, u);
                        queue.push_back(v);
                    }
                }
            }
        }
        tree
    }
}

/// Maintains `R` (relevance), `H` (heat), and one routing tree per session.
pub struct HeatDegreeEngine {
    graph: Graph,
    oracle: FullPll,
    relevance: HashMap<EdgeKey, HashMap<NodeId, u32>>,
    heat: HashMap<EdgeKey, HeatCell>,
    trees: HashMap<NodeId, Tree>,
    infeasible: HashSet<NodeId>,
}

impl HeatDegreeEngine {
    pub fn new(graph: Graph) -> Self {
        let oracle = FullPll::build(graph.clone());
        Self {
            graph,
            oracle,
            relevance: HashMap::new(),
            heat: HashMap::new(),
            trees: HashMap::new(),
            infeasible: HashSet::new(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn tree(&self, session_src: NodeId) -> Option<&Tree> {
        self.trees.get(&session_src)
    }

    pub fn is_infeasible(&self, session_src: NodeId) -> bool {
        self.infeasible.contains(&session_src)
    }

    fn max_delay(&self) -> f64 {
        self.graph.edges().map(|(_, _, a)| a.weight).fold(f64::MIN_POSITIVE, f64::max)
    }

    /// `est(s,r,u,v)` from spec §4.2, both orientations, minimised.
    fn estimate(&mut self, src: NodeId, recv: NodeId, u: NodeId, v: NodeId, w: f64) -> f64 {
        let via_u = self.oracle.query(src, u) + w + self.oracle.query(v, recv);
        let via_v = self.oracle.query(src, v) + w + self.oracle.query(u, recv);
        via_u.min(via_v)
    }

    /// Full rebuild of `R`, `H`, and every session's tree (spec §4.2 init
    /// and the orchestrator's reset-on-churn escape hatch).
    pub fn rebuild(&mut self, sessions: &SessionRegistry) {
        self.relevance.clear();
        self.heat.clear();
        self.trees.clear();
        self.infeasible.clear();

        let edges: Vec<(NodeId, NodeId, f64)> =
            self.graph.edges().map(|(u, v, a)| (u, v, a.weight)).collect();

        for (u, v, w) in &edges {
            for session in sessions.iter() {
                for &r in &session.receivers {
                    let est = self.estimate(session.src_dpid, r, *u, *v, *w);
                    if est <= session.delay_bound {
                        *self
                            .relevance
                            .entry(edge_key(*u, *v))
                            .or_default()
                            .entry(session.src_dpid)
                            .or_insert(0) += 1;
                    }
                }
            }
        }

        for (u, v, _) in &edges {
            self.recompute_heat_cell(edge_key(*u, *v), sessions);
        }

        let srcs: Vec<NodeId> = sessions.iter().map(|s| s.src_dpid).collect();
        for src in srcs {
            self.route_session(sessions, src);
        }
    }

    fn recompute_heat_cell(&mut self, key: EdgeKey, sessions: &SessionRegistry) {
        let Some(attr) = self.graph.edge(key.0, key.1) else {
            self.heat.remove(&key);
            return;
        };
        let w_max = self.max_delay();
        let n = self.graph.node_count().max(1) as f64;
        let h_ok = attr.weight / (n * w_max);

        let sum_bw: f64 = self
            .relevance
            .get(&key)
            .map(|by_session| {
                by_session.keys().filter_map(|s| sessions.get(*s)).map(|s| s.bw_demand).sum()
            })
            .unwrap_or(0.0);
        let available = sum_bw <= attr.bandwidth;
        let h_hot = if attr.bandwidth > 0.0 { (sum_bw / attr.bandwidth).powi(2) } else { f64::INFINITY };

        self.heat.insert(key, HeatCell { h_ok, h_hot, available });
    }

    /// Heat lookup for session `src` on edge `(u,v)`: `h_ok` if the
    /// session already uses the edge or the edge is uncongested, `h_hot`
    /// otherwise; `+inf` if the session isn't relevant there.
    fn heat_lookup(&self, src: NodeId, u: NodeId, v: NodeId) -> f64 {
        let key = edge_key(u, v);
        let Some(rel) = self.relevance.get(&key) else { return f64::INFINITY };
        if !rel.contains_key(&src) {
            return f64::INFINITY;
        }
        let cell = self.heat.get(&key).copied().unwrap_or_default();
        let in_use = self.trees.get(&src).is_some_and(|t| t.contains_edge(u, v));
        if in_use || cell.available {
            cell.h_ok
        } else {
            cell.h_hot
        }
    }

    /// Recomputes (or repairs) the Steiner tree for one session, over the
    /// per-session heat graph; falls back to a best-effort tree on the raw
    /// delay graph if the heat graph leaves the session's terminals
    /// disconnected (spec §7: Infeasible routing).
    pub fn route_session(&mut self, sessions: &SessionRegistry, session_src: NodeId) {
        let Some(session) = sessions.get(session_src) else {
            self.trees.remove(&session_src);
            return;
        };
        if session.receivers.is_empty() {
            self.trees.insert(
                session_src,
                Tree { root: session_src, ..Default::default() },
            );
            self.infeasible.remove(&session_src);
            return;
        }

        let mut terminals: Vec<NodeId> = session.receivers.iter().copied().collect();
        terminals.push(session_src);
        terminals.sort_unstable();
        terminals.dedup();

        let heat_edges = self.graph.steiner_tree(&terminals, |u, v, _| self.heat_lookup(session_src, u, v));

        let spans_all = {
            let tree = Tree::from_undirected(&heat_edges, session_src);
            let nodes = tree.nodes();
            terminals.iter().all(|t| nodes.contains(t))
        };

        let (final_edges, infeasible) = if spans_all {
            (heat_edges, false)
        } else {
            log::warn!(
                "[heat::route_session] session {session_src} infeasible under heat metric, falling back to raw graph"
            );
            (self.graph.steiner_tree(&terminals, |_, _, a| a.weight), true)
        };

        if infeasible {
            self.infeasible.insert(session_src);
        } else {
            self.infeasible.remove(&session_src);
        }
        self.trees.insert(session_src, Tree::from_undirected(&final_edges, session_src));
    }

    /// `add_receiver(s, r)` per spec §4.2.
    pub fn add_receiver(&mut self, sessions: &SessionRegistry, session_src: NodeId, r: NodeId) {
        let Some(session) = sessions.get(session_src) else { return };
        let delay_bound = session.delay_bound;

        let edges: Vec<(NodeId, NodeId, f64)> =
            self.graph.edges().map(|(u, v, a)| (u, v, a.weight)).collect();
        let mut touched: HashSet<EdgeKey> = HashSet::new();

        for (u, v, w) in edges {
            let est = self.estimate(session_src, r, u, v, w);
            if est <= delay_bound {
                let key = edge_key(u, v);
                *self.relevance.entry(key).or_default().entry(session_src).or_insert(0) += 1;
                touched.insert(key);
            }
        }

        for &key in &touched {
            self.recompute_heat_cell(key, sessions);
        }

        let mut to_reroute: HashSet<NodeId> = HashSet::from([session_src]);
        for &key in &touched {
            let available = self.heat.get(&key).map(|c| c.available).unwrap_or(true);
            if !available {
                if let Some(rel) = self.relevance.get(&key) {
                    for &s in rel.keys() {
                        if self.trees.get(&s).is_some_and(|t| t.contains_edge(key.0, key.1)) {
                            to_reroute.insert(s);
                        }
                    }
                }
            }
        }

        for s in to_reroute {
            self.route_session(sessions, s);
        }
    }

    /// `remove_receiver(s, r)` per spec §4.2: decrement relevance, prune
    /// `r` from the tree by walking toward the root and removing any node
    /// whose in-tree degree becomes 1 and which is neither the source nor
    /// another receiver.
    pub fn remove_receiver(&mut self, sessions: &SessionRegistry, session_src: NodeId, r: NodeId) {
        let Some(session) = sessions.get(session_src) else { return };
        let delay_bound = session.delay_bound;

        let edges: Vec<(NodeId, NodeId, f64)> =
            self.graph.edges().map(|(u, v, a)| (u, v, a.weight)).collect();
        let mut touched: HashSet<EdgeKey> = HashSet::new();

        for (u, v, w) in edges {
            let est = self.estimate(session_src, r, u, v, w);
            if est <= delay_bound {
                let key = edge_key(u, v);
                if let Some(by_session) = self.relevance.get_mut(&key) {
                    if let Some(count) = by_session.get_mut(&session_src) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            by_session.remove(&session_src);
                        }
                        if by_session.is_empty() {
                            self.relevance.remove(&key);
                        }
                        touched.insert(key);
                    }
                }
            }
        }

        for &key in &touched {
            self.recompute_heat_cell(key, sessions);
        }

        self.prune_receiver(sessions, session_src, r);
    }

    /// Walks from `r` toward the root, removing every node whose in-tree
    /// degree has become 1 (a dead-end leaf) and which is neither the
    /// source nor still a receiver of this session (spec §4.2 / S5).
    fn prune_receiver(&mut self, sessions: &SessionRegistry, session_src: NodeId, r: NodeId) {
        let still_receivers = sessions.get(session_src).map(|s| s.receivers.clone()).unwrap_or_default();
        let Some(tree) = self.trees.get_mut(&session_src) else { return };
        if tree.root == r {
            return;
        }

        let mut cur = r;
        loop {
            if cur == session_src {
                break;
            }
            if tree.out_degree(cur) > 0 {
                break; // still serves other descendants
            }
            if still_receivers.contains(&cur) {
                break; // still a receiver, keep as leaf
            }
            let Some(parent) = tree.parent.remove(&cur) else { break };
            if let Some(children) = tree.children.get_mut(&parent) {
                children.retain(|&c| c != cur);
            }
            cur = parent;
        }
    }

    /// `change_edge_delay(a, b, new)` per spec §4.2. Returns the set of
    /// sessions queued for (and immediately given) a full reroute.
    pub fn change_edge_delay(
        &mut self,
        sessions: &SessionRegistry,
        a: NodeId,
        b: NodeId,
        new_weight: f64,
    ) -> Vec<NodeId> {
        let Some(attr) = self.graph.edge(a, b) else { return Vec::new() };
        let old_weight = attr.weight;
        if (new_weight - old_weight).abs() < 1e-9 {
            return Vec::new();
        }

        self.graph.set_weight(a, b, new_weight);
        self.oracle.change_edge_weight(a, b, new_weight, attr.bandwidth);

        if new_weight < old_weight {
            // Decrease only ever adds candidacy; no session loses its
            // current tree edge, so nothing else to do (spec §4.2).
            return Vec::new();
        }

        let mut to_reroute: HashSet<NodeId> = HashSet::new();
        let edges: Vec<(NodeId, NodeId, f64)> =
            self.graph.edges().map(|(u, v, a)| (u, v, a.weight)).collect();
        let keys_with_relevance: Vec<EdgeKey> = self.relevance.keys().copied().collect();

        for key in keys_with_relevance {
            let Some(sess_for_edge) = self.relevance.get(&key).cloned() else { continue };
            let Some(&(_, _, w)) = edges.iter().find(|(u, v, _)| edge_key(*u, *v) == key) else {
                continue;
            };
            for (sess_src, _old_count) in sess_for_edge {
                let Some(session) = sessions.get(sess_src) else { continue };
                let new_count = session
                    .receivers
                    .iter()
                    .filter(|&&r| self.estimate(sess_src, r, key.0, key.1, w) <= session.delay_bound)
                    .count() as u32;

                let had_edge_in_tree =
                    self.trees.get(&sess_src).is_some_and(|t| t.contains_edge(key.0, key.1));

                if new_count == 0 {
                    if let Some(by_session) = self.relevance.get_mut(&key) {
                        by_session.remove(&sess_src);
                    }
                    if had_edge_in_tree {
                        to_reroute.insert(sess_src);
                    }
                } else if let Some(by_session) = self.relevance.get_mut(&key) {
                    by_session.insert(sess_src, new_count);
                }
            }
            if self.relevance.get(&key).is_some_and(HashMap::is_empty) {
                self.relevance.remove(&key);
            }
            self.recompute_heat_cell(key, sessions);
            if let Some(cell) = self.heat.get(&key) {
                if !cell.available {
                    if let Some(rel) = self.relevance.get(&key) {
                        for &s in rel.keys() {
                            if self.trees.get(&s).is_some_and(|t| t.contains_edge(key.0, key.1)) {
                                to_reroute.insert(s);
                            }
                        }
                    }
                }
            }
        }

        for &s in &to_reroute {
            self.route_session(sessions, s);
        }
        to_reroute.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as HS;

    fn triangle() -> Graph {
        let mut g = Graph::new();
        g.add_edge(1, 2, 1.0, 10.0);
        g.add_edge(2, 3, 1.0, 10.0);
        g.add_edge(1, 3, 1.0, 10.0);
        g
    }

    #[test]
    fn s1_triangle_one_session_picks_direct_edge() {
        let mut sessions = SessionRegistry::new();
        sessions.add_session(1, HS::from([3]), 10.0, 1.0);
        let mut engine = HeatDegreeEngine::new(triangle());
        engine.rebuild(&sessions);
        let tree = engine.tree(1).unwrap();
        assert_eq!(tree.edges().count(), 1);
        assert!(tree.contains_edge(1, 3));
    }

    #[test]
    fn s2_bandwidth_contention_marks_edges_unavailable() {
        let mut g = Graph::new();
        g.add_edge(1, 2, 1.0, 1.0);
        g.add_edge(2, 3, 1.0, 1.0);
        let mut sessions = SessionRegistry::new();
        sessions.add_session(1, HS::from([3]), 10.0, 0.6);
        sessions.add_session(3, HS::from([1]), 10.0, 0.6);
        let mut engine = HeatDegreeEngine::new(g);
        engine.rebuild(&sessions);
        assert!(engine.tree(1).is_some());
        assert!(engine.tree(3).is_some());
        let key = edge_key(1, 2);
        assert!(!engine.heat[&key].available);
    }

    #[test]
    fn s5_remove_receiver_prunes_dead_branch() {
        let mut g = Graph::new();
        g.add_edge(1, 2, 1.0, 10.0);
        g.add_edge(2, 3, 1.0, 10.0);
        g.add_edge(3, 4, 1.0, 10.0);
        let mut sessions = SessionRegistry::new();
        sessions.add_session(1, HS::from([3, 4]), 10.0, 1.0);
        let mut engine = HeatDegreeEngine::new(g);
        engine.rebuild(&sessions);
        assert!(engine.tree(1).unwrap().contains_edge(3, 4));

        sessions.remove_receiver(1, 4);
        engine.remove_receiver(&sessions, 1, 4);

        let tree = engine.tree(1).unwrap();
        assert!(!tree.contains_edge(3, 4));
        assert!(tree.contains_edge(1, 2));
        assert!(tree.contains_edge(2, 3));
    }

    #[test]
    fn s6_delay_increase_forces_reroute() {
        let mut g = Graph::new();
        g.add_edge(1, 2, 1.0, 10.0);
        g.add_edge(2, 3, 1.0, 10.0);
        g.add_edge(3, 4, 1.0, 10.0);
        g.add_edge(4, 1, 1.0, 10.0);
        g.add_edge(1, 3, 1.0, 10.0);
        let mut sessions = SessionRegistry::new();
        sessions.add_session(1, HS::from([3]), 2.0, 1.0);
        let mut engine = HeatDegreeEngine::new(g);
        engine.rebuild(&sessions);
        assert!(engine.tree(1).unwrap().contains_edge(1, 3));

        let rerouted = engine.change_edge_delay(&sessions, 1, 3, 5.0);
        assert!(rerouted.contains(&1));
        let tree = engine.tree(1).unwrap();
        assert!(!tree.contains_edge(1, 3));
        assert!(tree.nodes().contains(&3));
    }

    #[test]
    fn add_receiver_extends_tree() {
        let mut g = Graph::new();
        g.add_edge(1, 2, 1.0, 10.0);
        g.add_edge(2, 3, 1.0, 10.0);
        let mut sessions = SessionRegistry::new();
        sessions.add_session(1, HS::from([2]), 10.0, 1.0);
        let mut engine = HeatDegreeEngine::new(g);
        engine.rebuild(&sessions);

        sessions.add_receiver(1, 3);
        engine.add_receiver(&sessions, 1, 3);
        let tree = engine.tree(1).unwrap();
        assert!(tree.nodes().contains(&3));
    }
}
