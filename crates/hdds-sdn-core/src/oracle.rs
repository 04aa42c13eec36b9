// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dynamic all-pairs shortest-path oracle (C2): 2-hop Pruned Landmark
//! Labeling (PLL) with incremental (edge insert / weight decrease) and
//! decremental (edge remove / weight increase) maintenance.
//!
//! Every node's label map always carries its own self-entry `{n: 0.0}`; this
//! lets `query` treat "is `v` itself one of `u`'s hubs" uniformly as just
//! another common-hub lookup instead of a special case.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::graph::{Graph, NodeId};

const WEIGHT_EPS: f64 = 1e-9;

type Label = BTreeMap<NodeId, f64>;

/// Incremental/decremental 2-hop distance oracle over a weighted graph.
pub struct FullPll {
    graph: Graph,
    labels: HashMap<NodeId, Label>,
    cache: HashMap<(NodeId, NodeId), f64>,
}

impl Default for FullPll {
    fn default() -> Self {
        Self::new()
    }
}

impl FullPll {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            labels: HashMap::new(),
            cache: HashMap::new(),
        }
    }

    /// Build from scratch over an existing graph (standard PLL
    /// construction: pruned Dijkstra from every node, in ascending node-id
    /// order for determinism).
    pub fn build(graph: Graph) -> Self {
        let mut oracle = Self {
            labels: graph.nodes().map(|n| (n, BTreeMap::from([(n, 0.0)]))).collect(),
            graph,
            cache: HashMap::new(),
        };
        let mut order: Vec<NodeId> = oracle.graph.nodes().collect();
        order.sort_unstable();
        for vk in order {
            oracle.pruned_dijkstra_from(vk);
        }
        oracle
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    fn pruned_dijkstra_from(&mut self, vk: NodeId) {
        let mut dist: HashMap<NodeId, f64> = HashMap::from([(vk, 0.0)]);
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut pq = crate::graph::PriorityQueue::new();
        pq.push(vk, 0.0);

        while let Some((u, d)) = pq.pop() {
            if visited.contains(&u) {
                continue;
            }
            visited.insert(u);

            if u != vk {
                let qd = self.query(vk, u);
                if qd <= d + WEIGHT_EPS {
                    // pruned: this branch is already covered by a closer hub
                    continue;
                }
                self.labels.entry(u).or_default().insert(vk, d);
                self.cache.clear();
            }

            for (v, attr) in self.graph.neighbors(u) {
                let nd = d + attr.weight;
                if nd < *dist.get(&v).unwrap_or(&f64::INFINITY) {
                    dist.insert(v, nd);
                    pq.push(v, nd);
                }
            }
        }
    }

    /// `query(u,v)`, `O(|L(u)|+|L(v)|)`, cached per `(u,v)` until the next
    /// update. Returns `+inf` if disconnected or either node is unknown.
    pub fn query(&mut self, u: NodeId, v: NodeId) -> f64 {
        if u == v {
            return 0.0;
        }
        let key = (u.min(v), u.max(v));
        if let Some(&d) = self.cache.get(&key) {
            return d;
        }
        let d = self.prefixal_query(u, v, NodeId::MAX);
        self.cache.insert(key, d);
        d
    }

    /// Same as `query` but restricted to hubs with id `<= k`, and without
    /// touching the cache — used internally by the incremental algorithm
    /// while labels are still mid-update.
    fn prefixal_query(&self, u: NodeId, v: NodeId, k: NodeId) -> f64 {
        if u == v {
            return 0.0;
        }
        let (Some(lu), Some(lv)) = (self.labels.get(&u), self.labels.get(&v)) else {
            return f64::INFINITY;
        };
        let (small, large) = if lu.len() <= lv.len() { (lu, lv) } else { (lv, lu) };
        let mut best = f64::INFINITY;
        for (&hub, &d1) in small.iter() {
            if hub > k {
                continue;
            }
            if let Some(&d2) = large.get(&hub) {
                let sum = d1 + d2;
                if sum < best {
                    best = sum;
                }
            }
        }
        best
    }

    fn set_label(&mut self, hub: NodeId, node: NodeId, dist: f64) {
        self.labels.entry(node).or_default().insert(hub, dist);
    }

    /// `query(u,v)` without mutating the cache (read-only helper used by
    /// the heat engine while deciding whether to re-run `query`).
    pub fn query_cached(&self, u: NodeId, v: NodeId) -> Option<f64> {
        if u == v {
            return Some(0.0);
        }
        self.cache.get(&(u.min(v), u.max(v))).copied()
    }

    /// Edge insertion, or weight decrease of an existing edge. No-op if the
    /// edge already exists with this exact weight.
    pub fn add_edge(&mut self, u: NodeId, v: NodeId, weight: f64, bandwidth: f64) {
        if self.graph.has_edge(u, v) {
            self.change_edge_weight(u, v, weight, bandwidth);
            return;
        }
        self.graph.add_edge(u, v, weight, bandwidth);
        self.labels.entry(u).or_insert_with(|| BTreeMap::from([(u, 0.0)]));
        self.labels.entry(v).or_insert_with(|| BTreeMap::from([(v, 0.0)]));
        self.inc_update(u, v, weight);
    }

    /// Edge removal. No-op if the edge does not exist (per spec §4.1
    /// failure semantics: "updates to non-existent edges are no-ops").
    pub fn remove_edge(&mut self, u: NodeId, v: NodeId) {
        let Some(attr) = self.graph.edge(u, v) else { return };
        self.graph.remove_edge(u, v);
        self.dec_update(u, v, attr.weight);
    }

    /// Edge weight change (bandwidth left untouched). No-op if the edge
    /// doesn't exist, or if `new == old` (also per §4.1).
    pub fn change_edge_weight(&mut self, u: NodeId, v: NodeId, new_weight: f64, bandwidth: f64) {
        let Some(attr) = self.graph.edge(u, v) else { return };
        if (new_weight - attr.weight).abs() < WEIGHT_EPS {
            return;
        }
        let old_weight = attr.weight;
        self.graph.add_edge(u, v, new_weight, bandwidth);
        if new_weight < old_weight {
            self.inc_update(u, v, new_weight);
        } else {
            self.dec_update(u, v, old_weight);
        }
    }

    /// Incremental maintenance for an edge `(a,b)` whose weight just
    /// decreased to `new_weight` (or was newly inserted): resume a bounded
    /// Dijkstra from every hub common to `a` or `b`, in ascending hub
    /// order, starting at whichever endpoint the new edge makes closer.
    fn inc_update(&mut self, a: NodeId, b: NodeId, new_weight: f64) {
        let mut hubs: Vec<NodeId> = self
            .labels
            .get(&a)
            .into_iter()
            .chain(self.labels.get(&b))
            .flat_map(|l| l.keys().copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        hubs.sort_unstable();

        for h in hubs {
            if let Some(&d_bh) = self.labels.get(&b).and_then(|l| l.get(&h)) {
                let cand = d_bh + new_weight;
                if cand < self.prefixal_query(h, a, h) {
                    self.resume_pbfs(h, a, cand);
                }
            }
            if let Some(&d_ah) = self.labels.get(&a).and_then(|l| l.get(&h)) {
                let cand = d_ah + new_weight;
                if cand < self.prefixal_query(h, b, h) {
                    self.resume_pbfs(h, b, cand);
                }
            }
        }
        self.cache.clear();
    }

    /// Resumable bounded Dijkstra from hub `h`, seeded at `start` with
    /// distance `start_dist`: relaxes outward, installing `L[u][h] ← d`
    /// whenever `d` beats the current `prefixal_query(h, u, h)`, and keeps
    /// propagating only from nodes where the label actually improved.
    fn resume_pbfs(&mut self, h: NodeId, start: NodeId, start_dist: f64) {
        let mut best_seen: HashMap<NodeId, f64> = HashMap::new();
        let mut pq = crate::graph::PriorityQueue::new();
        pq.push(start, start_dist);

        while let Some((u, d)) = pq.pop() {
            if *best_seen.get(&u).unwrap_or(&f64::INFINITY) <= d {
                continue;
            }
            best_seen.insert(u, d);

            if d < self.prefixal_query(h, u, h) {
                self.set_label(h, u, d);
                for (v, attr) in self.graph.neighbors(u) {
                    pq.push(v, d + attr.weight);
                }
            }
        }
    }

    /// Decremental maintenance for an edge `(x,y)` that was just removed
    /// or whose weight increased from `old_weight`.
    fn dec_update(&mut self, x: NodeId, y: NodeId, old_weight: f64) {
        let a_x = self.affected(x, y, old_weight);
        let a_y = self.affected(y, x, old_weight);
        self.remove_affected_labels(&a_x, &a_y);

        if a_x.len() <= a_y.len() {
            self.greedy_restore(&a_x, &a_y);
        } else {
            self.greedy_restore(&a_y, &a_x);
        }
        self.cache.clear();
    }

    /// BFS from `x` over the *updated* graph, admitting a neighbour `v`
    /// into the affected set when the old shortest distance from `v` to
    /// `y` was witnessed through the edge that just disappeared:
    /// `d_old(v,y) == d_old(v,x) + old_weight`. Uses the (still-consistent,
    /// pre-removal-labels-untouched) oracle query as the old-distance
    /// oracle, since labels are removed only after both affected sets are
    /// computed.
    fn affected(&mut self, x: NodeId, y: NodeId, old_weight: f64) -> HashSet<NodeId> {
        let mut affected = HashSet::from([x]);
        let mut queue = VecDeque::from([x]);
        while let Some(u) = queue.pop_front() {
            let neighbors: Vec<NodeId> = self.graph.neighbors(u).map(|(v, _)| v).collect();
            for v in neighbors {
                if affected.contains(&v) {
                    continue;
                }
                let d_vy = self.query(v, y);
                let d_vx = self.query(v, x);
                if d_vx.is_finite() && (d_vy - (d_vx + old_weight)).abs() < WEIGHT_EPS {
                    affected.insert(v);
                    queue.push_back(v);
                }
            }
        }
        affected
    }

    fn remove_affected_labels(&mut self, a_x: &HashSet<NodeId>, a_y: &HashSet<NodeId>) {
        for &v in a_x {
            for &h in a_y {
                if let Some(l) = self.labels.get_mut(&v) {
                    l.remove(&h);
                }
                if let Some(l) = self.labels.get_mut(&h) {
                    l.remove(&v);
                }
            }
        }
    }

    /// Greedy restore sweep: from every node in the smaller affected set,
    /// run a fresh Dijkstra over the (already-updated) graph; whenever it
    /// reaches a node in the larger set with a distance that beats the
    /// current query, install that as a new label.
    fn greedy_restore(&mut self, smaller: &HashSet<NodeId>, larger: &HashSet<NodeId>) {
        for &a in smaller {
            let dist = self.graph.dijkstra(a);
            for &v in larger {
                if let Some(&d) = dist.get(&v) {
                    if d < self.query(a, v) {
                        let (hi, lo) = if a > v { (a, v) } else { (v, a) };
                        self.labels.entry(hi).or_default().insert(lo, d);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_graph() -> Graph {
        let mut g = Graph::new();
        // 4-cycle 1-2-3-4-1 plus chord 1-3, per spec S6.
        g.add_edge(1, 2, 1.0, 10.0);
        g.add_edge(2, 3, 1.0, 10.0);
        g.add_edge(3, 4, 1.0, 10.0);
        g.add_edge(4, 1, 1.0, 10.0);
        g.add_edge(1, 3, 1.0, 10.0);
        g
    }

    #[test]
    fn query_matches_dijkstra_after_build() {
        let g = build_graph();
        let expected = g.dijkstra(1);
        let mut oracle = FullPll::build(g);
        for &v in &[2u64, 3, 4] {
            assert_eq!(oracle.query(1, v), expected[&v]);
        }
    }

    #[test]
    fn incremental_matches_dijkstra_after_add_edge() {
        let g = build_graph();
        let mut oracle = FullPll::build(g);
        oracle.add_edge(2, 4, 1.0, 5.0);
        let expected = oracle.graph().clone().dijkstra(1);
        for v in oracle.graph().nodes().collect::<Vec<_>>() {
            assert_eq!(oracle.query(1, v), expected[&v], "node {v}");
        }
    }

    #[test]
    fn decremental_matches_dijkstra_after_weight_increase() {
        // S6: chord weight 1 -> 5 should make the cycle path shorter.
        let g = build_graph();
        let mut oracle = FullPll::build(g);
        oracle.change_edge_weight(1, 3, 5.0, 10.0);
        let expected = oracle.graph().clone().dijkstra(1);
        for v in oracle.graph().nodes().collect::<Vec<_>>() {
            assert_eq!(oracle.query(1, v), expected[&v], "node {v}");
        }
        assert_eq!(oracle.query(1, 3), 2.0); // via 1-2-3 or 1-4-3
    }

    #[test]
    fn decremental_matches_dijkstra_after_edge_removal() {
        let g = build_graph();
        let mut oracle = FullPll::build(g);
        oracle.remove_edge(1, 3);
        let expected = oracle.graph().clone().dijkstra(1);
        for v in oracle.graph().nodes().collect::<Vec<_>>() {
            assert_eq!(oracle.query(1, v), expected[&v], "node {v}");
        }
    }

    #[test]
    fn weight_change_to_same_value_is_a_no_op() {
        let g = build_graph();
        let mut oracle = FullPll::build(g);
        let before = oracle.query(1, 3);
        oracle.change_edge_weight(1, 3, 1.0, 10.0);
        assert_eq!(oracle.query(1, 3), before);
    }

    #[test]
    fn remove_nonexistent_edge_is_a_no_op() {
        let g = build_graph();
        let mut oracle = FullPll::build(g);
        let before = oracle.query(1, 3);
        oracle.remove_edge(1, 100);
        assert_eq!(oracle.query(1, 3), before);
    }

    /// A random connected graph, seeded once from a fixed `fastrand` seed
    /// so failures reproduce deterministically.
    fn random_connected_graph(rng: &mut fastrand::Rng, n: u64, extra_edges: usize) -> Graph {
        let mut g = Graph::new();
        // Spanning path guarantees connectivity before extra edges are added.
        for i in 1..n {
            g.add_edge(i, i + 1, (rng.u32(1..20)) as f64, (rng.u32(5..50)) as f64);
        }
        for _ in 0..extra_edges {
            let u = rng.u64(1..=n);
            let v = rng.u64(1..=n);
            if u != v {
                g.add_edge(u, v, (rng.u32(1..20)) as f64, (rng.u32(5..50)) as f64);
            }
        }
        g
    }

    fn assert_oracle_matches_dijkstra(oracle: &mut FullPll, n: u64) {
        for src in 1..=n {
            let expected = oracle.graph().clone().dijkstra(src);
            for dst in 1..=n {
                let got = oracle.query(src, dst);
                let want = *expected.get(&dst).unwrap_or(&f64::INFINITY);
                assert!(
                    (got - want).abs() < 1e-6 || (got.is_infinite() && want.is_infinite()),
                    "query({src},{dst}) = {got}, dijkstra says {want}"
                );
            }
        }
    }

    /// Spec §8 testable property #2: "After any number of add_receiver /
    /// remove_receiver / change_edge_delay operations, query_distance(u,v)
    /// via the oracle equals dijkstra(u,v) on the current graph for all
    /// (u,v)." The heat engine only ever calls `change_edge_weight`,
    /// `add_edge` and `remove_edge` on the oracle, so this drives those
    /// three directly through a long random sequence instead of going
    /// through the engine.
    #[test]
    fn randomized_updates_stay_consistent_with_dijkstra() {
        let mut rng = fastrand::Rng::with_seed(0xC0FFEE);
        const N: u64 = 12;
        let g = random_connected_graph(&mut rng, N, 10);
        let mut oracle = FullPll::build(g);
        assert_oracle_matches_dijkstra(&mut oracle, N);

        for _ in 0..200 {
            let u = rng.u64(1..=N);
            let v = rng.u64(1..=N);
            if u == v {
                continue;
            }
            match rng.u8(0..3) {
                0 => {
                    let w = rng.u32(1..20) as f64;
                    oracle.add_edge(u, v, w, 10.0);
                }
                1 => {
                    if oracle.graph().has_edge(u, v) {
                        let new_w = rng.u32(1..20) as f64;
                        oracle.change_edge_weight(u, v, new_w, 10.0);
                    }
                }
                _ => {
                    if oracle.graph().has_edge(u, v) {
                        oracle.remove_edge(u, v);
                    }
                }
            }
            assert_oracle_matches_dijkstra(&mut oracle, N);
        }
    }
}
