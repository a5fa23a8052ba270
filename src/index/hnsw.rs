use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::models::EntityId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HnswConfig {
    pub m: usize,
    pub m0: usize,
    pub ef_construction: usize,
    pub ef: usize,
    /// Level multiplier for the geometric layer draw; `1 / ln(m)` by default.
    pub ml: f64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        HnswConfig {
            m: 16,
            m0: 32,
            ef_construction: 200,
            ef: 50,
            ml: 1.0 / (16f64).ln(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    InnerProduct,
}

impl DistanceMetric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::Cosine => {
                let mut dot = 0.0f64;
                let mut na = 0.0f64;
                let mut nb = 0.0f64;
                for (x, y) in a.iter().zip(b.iter()) {
                    dot += (*x as f64) * (*y as f64);
                    na += (*x as f64) * (*x as f64);
                    nb += (*y as f64) * (*y as f64);
                }
                if na == 0.0 || nb == 0.0 {
                    return 2.0;
                }
                (1.0 - dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 2.0)
            }
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| {
                    let d = (*x as f64) - (*y as f64);
                    d * d
                })
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::InnerProduct => {
                let dot: f64 = a
                    .iter()
                    .zip(b.iter())
                    .map(|(x, y)| (*x as f64) * (*y as f64))
                    .sum();
                1.0 - dot
            }
        }
    }
}

/// (distance, node) ordered by distance then index, so heaps are total.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist: f64,
    idx: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.idx.cmp(&other.idx))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct Node {
    id: EntityId,
    vector: Vec<f32>,
    /// Neighbor lists for layers 0..=max_layer of this node.
    neighbors: Vec<Vec<u32>>,
    deleted: bool,
}

/// Hierarchical navigable small-world graph over embeddings. Nodes live in
/// an arena and reference each other by index; neighbor lists are kept
/// symmetric after truncation.
pub struct HnswIndex {
    config: HnswConfig,
    metric: DistanceMetric,
    nodes: Vec<Node>,
    by_id: HashMap<EntityId, u32>,
    entry_point: Option<u32>,
    max_level: usize,
    dims: Option<usize>,
}

impl HnswIndex {
    pub fn new(config: HnswConfig, metric: DistanceMetric) -> Self {
        HnswIndex {
            config,
            metric,
            nodes: Vec::new(),
            by_id: HashMap::new(),
            entry_point: None,
            max_level: 0,
            dims: None,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.by_id.contains_key(id)
    }

    fn draw_level(&self) -> usize {
        let mut rng = rand::rng();
        // (0, 1] so ln() is finite.
        let u: f64 = 1.0 - rng.random::<f64>();
        (-u.ln() * self.config.ml).floor() as usize
    }

    fn dist_to(&self, query: &[f32], idx: u32) -> f64 {
        self.metric.distance(query, &self.nodes[idx as usize].vector)
    }

    /// Single-best greedy walk within one layer.
    fn greedy_closest(&self, query: &[f32], start: u32, layer: usize) -> u32 {
        let mut best = start;
        let mut best_dist = self.dist_to(query, best);
        loop {
            let mut improved = false;
            for &n in &self.nodes[best as usize].neighbors[layer] {
                let d = self.dist_to(query, n);
                if d < best_dist {
                    best = n;
                    best_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return best;
            }
        }
    }

    /// Beam search within one layer; returns up to `ef` candidates sorted by
    /// distance ascending. No node is visited twice.
    fn search_layer(&self, query: &[f32], entry: u32, ef: usize, layer: usize) -> Vec<Candidate> {
        let ef = ef.max(1);
        let seed = Candidate {
            dist: self.dist_to(query, entry),
            idx: entry,
        };
        let mut visited: HashSet<u32> = HashSet::from([entry]);
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::from([Reverse(seed)]);
        let mut results: BinaryHeap<Candidate> = BinaryHeap::from([seed]);

        while let Some(Reverse(current)) = frontier.pop() {
            let worst = results.peek().map(|c| c.dist).unwrap_or(f64::INFINITY);
            if results.len() >= ef && current.dist > worst {
                break;
            }
            for &n in &self.nodes[current.idx as usize].neighbors[layer] {
                if !visited.insert(n) {
                    continue;
                }
                let d = self.dist_to(query, n);
                let worst = results.peek().map(|c| c.dist).unwrap_or(f64::INFINITY);
                if results.len() < ef || d < worst {
                    let candidate = Candidate { dist: d, idx: n };
                    frontier.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out = results.into_vec();
        out.sort();
        out
    }

    /// Keep the `bound` nearest neighbors of `node` at `layer`; dropped edges
    /// are removed from both sides so the adjacency stays symmetric.
    fn truncate_neighbors(&mut self, node: u32, layer: usize, bound: usize) {
        if self.nodes[node as usize].neighbors[layer].len() <= bound {
            return;
        }
        let base = self.nodes[node as usize].vector.clone();
        let list = self.nodes[node as usize].neighbors[layer].clone();
        let mut scored: Vec<Candidate> = list
            .iter()
            .map(|&n| Candidate {
                dist: self.metric.distance(&base, &self.nodes[n as usize].vector),
                idx: n,
            })
            .collect();
        scored.sort();
        let dropped: Vec<u32> = scored[bound..].iter().map(|c| c.idx).collect();
        self.nodes[node as usize].neighbors[layer] =
            scored[..bound].iter().map(|c| c.idx).collect();
        for d in dropped {
            self.nodes[d as usize].neighbors[layer].retain(|&x| x != node);
        }
    }

    pub fn insert(&mut self, id: EntityId, vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            return Err(GraphError::Validation("embedding vector is empty".into()));
        }
        match self.dims {
            Some(d) if d != vector.len() => {
                return Err(GraphError::Validation(format!(
                    "embedding has {} dimensions, index expects {d}",
                    vector.len()
                )));
            }
            None => self.dims = Some(vector.len()),
            _ => {}
        }

        // Re-inserting an id replaces the vector in place; the existing
        // edges remain valid navigation structure.
        if let Some(&idx) = self.by_id.get(&id) {
            self.nodes[idx as usize].vector = vector;
            return Ok(());
        }

        let level = self.draw_level();
        let idx = self.nodes.len() as u32;
        self.nodes.push(Node {
            id: id.clone(),
            vector,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });
        self.by_id.insert(id, idx);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(idx);
            self.max_level = level;
            return Ok(());
        };

        let query = self.nodes[idx as usize].vector.clone();
        let mut ep = entry;
        if self.max_level > level {
            for layer in ((level + 1)..=self.max_level).rev() {
                ep = self.greedy_closest(&query, ep, layer);
            }
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(&query, ep, self.config.ef_construction, layer);
            let bound = if layer == 0 { self.config.m0 } else { self.config.m };
            let selected: Vec<u32> = found
                .iter()
                .filter(|c| c.idx != idx)
                .take(bound)
                .map(|c| c.idx)
                .collect();
            for &n in &selected {
                self.nodes[idx as usize].neighbors[layer].push(n);
                self.nodes[n as usize].neighbors[layer].push(idx);
                self.truncate_neighbors(n, layer, bound);
            }
            self.truncate_neighbors(idx, layer, bound);
            if let Some(best) = found.first() {
                ep = best.idx;
            }
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(idx);
        }
        Ok(())
    }

    /// Soft removal: the node stops matching searches but its edges remain
    /// navigable. The entry point is reassigned if it was removed.
    pub fn remove(&mut self, id: &EntityId) -> bool {
        let Some(idx) = self.by_id.remove(id) else {
            return false;
        };
        self.nodes[idx as usize].deleted = true;
        if self.entry_point == Some(idx) {
            let replacement = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| !n.deleted)
                .max_by_key(|(_, n)| n.neighbors.len());
            match replacement {
                Some((new_idx, node)) => {
                    self.entry_point = Some(new_idx as u32);
                    self.max_level = node.neighbors.len() - 1;
                }
                None => {
                    self.entry_point = None;
                    self.max_level = 0;
                }
            }
        }
        true
    }

    /// k nearest neighbors of `query`, sorted by distance ascending. `ef` is
    /// raised to at least `k`; `k` larger than the graph returns everything.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<(EntityId, f64)> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        let mut ep = entry;
        for layer in (1..=self.max_level).rev() {
            ep = self.greedy_closest(query, ep, layer);
        }
        let ef = if k >= self.len() {
            // Full coverage: a k beyond the graph size returns every node.
            self.nodes.len().max(1)
        } else {
            ef.max(k)
        };
        let found = self.search_layer(query, ep, ef, 0);
        found
            .into_iter()
            .filter(|c| !self.nodes[c.idx as usize].deleted)
            .take(k)
            .map(|c| (self.nodes[c.idx as usize].id.clone(), c.dist))
            .collect()
    }
}
