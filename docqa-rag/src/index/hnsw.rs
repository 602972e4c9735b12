//! HNSW (Hierarchical Navigable Small World) graph for cosine similarity.
//!
//! Higher layers hold exponentially fewer nodes; a search descends greedily
//! from the top layer and finishes with a beam search on layer 0. Node ids
//! are assigned by the caller in insertion order, and equal scores are
//! broken by ascending id so results are reproducible.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::{RagError, Result};

#[derive(Debug, Clone)]
struct ScoredId {
    score: f32,
    id: u32,
}

impl PartialEq for ScoredId {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredId {}

impl PartialOrd for ScoredId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredId {
    // Higher score first, then lower id. NaN compares equal.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Debug, Clone)]
struct Node {
    vector: Vec<f32>,
    magnitude: f32,
    neighbors: Vec<Vec<u32>>,
    deleted: bool,
}

pub(crate) fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with precomputed magnitudes. Zero vectors score 0.
pub(crate) fn cosine(a: &[f32], mag_a: f32, b: &[f32], mag_b: f32) -> f32 {
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (mag_a * mag_b)
}

/// Approximate nearest-neighbor index over cosine similarity.
#[derive(Debug, Clone)]
pub struct Hnsw {
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    level_mult: f32,
    nodes: HashMap<u32, Node>,
    entry_point: Option<u32>,
    level_max: usize,
    dimensions: usize,
    deleted: usize,
    rng_state: u64,
}

impl Hnsw {
    /// Create an empty graph.
    ///
    /// * `m`: max neighbors per node per layer (layer 0 allows `2 * m`)
    /// * `ef_construction`: beam width during insertion; also the minimum
    ///   beam width during search
    pub fn new(dimensions: usize, m: usize, ef_construction: usize) -> Self {
        let m = m.max(2);
        Self {
            m,
            m_max0: m * 2,
            ef_construction: ef_construction.max(1),
            level_mult: 1.0 / (m as f32).ln(),
            nodes: HashMap::new(),
            entry_point: None,
            level_max: 0,
            dimensions,
            deleted: 0,
            rng_state: 42,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of live (not deleted) points.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of soft-deleted points still occupying the graph.
    pub fn deleted_count(&self) -> usize {
        self.deleted
    }

    /// Insert a point.
    ///
    /// # Errors
    ///
    /// [`RagError::SchemaError`] on a dimension mismatch; [`RagError::IndexError`]
    /// if `id` is already present.
    pub fn insert(&mut self, id: u32, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(RagError::SchemaError(format!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }
        if self.nodes.contains_key(&id) {
            return Err(RagError::index("hnsw", format!("duplicate node id {id}")));
        }

        let level = self.select_level();
        let node = Node {
            magnitude: magnitude(&vector),
            vector,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        };

        let Some(mut entry) = self.entry_point else {
            self.nodes.insert(id, node);
            self.entry_point = Some(id);
            self.level_max = level;
            return Ok(());
        };

        let query = node.vector.clone();
        let query_mag = node.magnitude;
        self.nodes.insert(id, node);

        // Greedy descent through the layers above the new node's level.
        let mut layer = self.level_max;
        while layer > level {
            entry = self.greedy_closest(entry, &query, query_mag, layer);
            layer -= 1;
        }

        for layer in (0..=level.min(self.level_max)).rev() {
            let candidates =
                self.search_layer(entry, &query, query_mag, self.ef_construction, layer);
            let limit = if layer == 0 { self.m_max0 } else { self.m };
            let selected: Vec<u32> = candidates
                .iter()
                .filter(|scored| scored.id != id)
                .take(limit)
                .map(|scored| scored.id)
                .collect();

            for &neighbor in &selected {
                self.connect(neighbor, id, layer);
                self.connect(id, neighbor, layer);
            }
            for &neighbor in &selected {
                self.prune(neighbor, layer, limit);
            }

            if let Some(best) = candidates.first() {
                entry = best.id;
            }
        }

        if level > self.level_max {
            self.entry_point = Some(id);
            self.level_max = level;
        }

        Ok(())
    }

    /// Soft-delete a point. Deleted points keep routing searches but are
    /// never returned.
    pub fn remove(&mut self, id: u32) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if !node.deleted {
                node.deleted = true;
                self.deleted += 1;
            }
        }
    }

    /// The `k` most similar live points, best first, as `(id, cosine)`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u32, f32)> {
        let Some(mut entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 || query.len() != self.dimensions {
            return Vec::new();
        }

        let query_mag = magnitude(query);
        let mut layer = self.level_max;
        while layer > 0 {
            entry = self.greedy_closest(entry, query, query_mag, layer);
            layer -= 1;
        }

        // Widen the beam by the number of tombstones so deletions cannot
        // starve the result set.
        let ef = k.max(self.ef_construction) + self.deleted;
        self.search_layer(entry, query, query_mag, ef, 0)
            .into_iter()
            .filter(|scored| self.nodes.get(&scored.id).is_some_and(|n| !n.deleted))
            .take(k)
            .map(|scored| (scored.id, scored.score))
            .collect()
    }

    /// Draw a level from an exponential distribution (deterministic LCG).
    fn select_level(&mut self) -> usize {
        self.rng_state = self.rng_state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let r = ((self.rng_state >> 33) as f32 / (1u64 << 31) as f32).clamp(1e-7, 1.0);
        let level = (-r.ln() * self.level_mult).floor() as usize;
        level.min(16)
    }

    fn similarity(&self, id: u32, query: &[f32], query_mag: f32) -> f32 {
        match self.nodes.get(&id) {
            Some(node) => cosine(&node.vector, node.magnitude, query, query_mag),
            None => f32::NEG_INFINITY,
        }
    }

    fn greedy_closest(&self, entry: u32, query: &[f32], query_mag: f32, layer: usize) -> u32 {
        let mut current = entry;
        let mut current_sim = self.similarity(current, query, query_mag);

        loop {
            let mut changed = false;
            if let Some(neighbors) = self.nodes.get(&current).and_then(|n| n.neighbors.get(layer)) {
                for &neighbor in neighbors {
                    let sim = self.similarity(neighbor, query, query_mag);
                    if sim > current_sim {
                        current = neighbor;
                        current_sim = sim;
                        changed = true;
                    }
                }
            }
            if !changed {
                return current;
            }
        }
    }

    /// Beam search on one layer. Returns up to `ef` points, best first.
    fn search_layer(
        &self,
        entry: u32,
        query: &[f32],
        query_mag: f32,
        ef: usize,
        layer: usize,
    ) -> Vec<ScoredId> {
        let mut visited: HashSet<u32> = HashSet::from([entry]);
        let first = ScoredId { score: self.similarity(entry, query, query_mag), id: entry };

        // Max-heap of points to expand; min-heap (via Reverse) of the best `ef` so far.
        let mut candidates = BinaryHeap::from([first.clone()]);
        let mut results = BinaryHeap::from([Reverse(first)]);

        while let Some(candidate) = candidates.pop() {
            let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
            if candidate.score < worst && results.len() >= ef {
                break;
            }

            let Some(neighbors) = self.nodes.get(&candidate.id).and_then(|n| n.neighbors.get(layer))
            else {
                continue;
            };

            for &neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let scored =
                    ScoredId { score: self.similarity(neighbor, query, query_mag), id: neighbor };
                let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
                if scored.score > worst || results.len() < ef {
                    candidates.push(scored.clone());
                    results.push(Reverse(scored));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut ranked: Vec<ScoredId> = results.into_iter().map(|r| r.0).collect();
        ranked.sort_by(|a, b| b.cmp(a));
        ranked
    }

    fn connect(&mut self, from: u32, to: u32, layer: usize) {
        if let Some(node) = self.nodes.get_mut(&from) {
            while node.neighbors.len() <= layer {
                node.neighbors.push(Vec::new());
            }
            if !node.neighbors[layer].contains(&to) {
                node.neighbors[layer].push(to);
            }
        }
    }

    /// Keep only the `limit` most similar neighbors of `id` on `layer`.
    fn prune(&mut self, id: u32, layer: usize, limit: usize) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let Some(neighbors) = node.neighbors.get(layer) else {
            return;
        };
        if neighbors.len() <= limit {
            return;
        }

        let mut scored: Vec<ScoredId> = neighbors
            .iter()
            .map(|&n| ScoredId { score: self.similarity(n, &node.vector, node.magnitude), id: n })
            .collect();
        scored.sort_by(|a, b| b.cmp(a));
        let kept: Vec<u32> = scored.into_iter().take(limit).map(|s| s.id).collect();

        if let Some(node) = self.nodes.get_mut(&id) {
            node.neighbors[layer] = kept;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dims: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn level_distribution_decays() {
        let mut hnsw = Hnsw::new(4, 16, 100);
        let mut levels = [0u32; 17];
        for _ in 0..10_000 {
            levels[hnsw.select_level()] += 1;
        }
        assert!(levels[0] > 5000, "level 0 should be most common");
        assert!(levels[0] > levels[1]);
    }

    #[test]
    fn finds_exact_match_first() {
        let mut hnsw = Hnsw::new(8, 4, 20);
        for i in 0..8u32 {
            hnsw.insert(i, unit(8, i as usize)).unwrap();
        }
        let results = hnsw.search(&unit(8, 5), 3);
        assert_eq!(results[0].0, 5);
        assert!((results[0].1 - 1.0).abs() < 1e-6);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn equal_scores_keep_insertion_order() {
        let mut hnsw = Hnsw::new(2, 4, 20);
        for id in [3u32, 1, 2] {
            hnsw.insert(id, vec![1.0, 0.0]).unwrap();
        }
        let ids: Vec<u32> = hnsw.search(&[1.0, 0.0], 3).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn removed_points_are_not_returned() {
        let mut hnsw = Hnsw::new(4, 4, 20);
        for i in 0..4u32 {
            hnsw.insert(i, unit(4, i as usize)).unwrap();
        }
        hnsw.remove(2);
        hnsw.remove(2);
        assert_eq!(hnsw.len(), 3);
        assert_eq!(hnsw.deleted_count(), 1);
        assert!(hnsw.search(&unit(4, 2), 4).iter().all(|(id, _)| *id != 2));
    }

    #[test]
    fn rejects_wrong_dimensions_and_duplicates() {
        let mut hnsw = Hnsw::new(3, 4, 20);
        assert!(matches!(hnsw.insert(0, vec![1.0]), Err(RagError::SchemaError(_))));
        hnsw.insert(0, vec![1.0, 0.0, 0.0]).unwrap();
        assert!(matches!(hnsw.insert(0, vec![0.0, 1.0, 0.0]), Err(RagError::IndexError { .. })));
    }
}
