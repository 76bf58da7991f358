//! Hierarchical Navigable Small World index.
//!
//! The in-memory structure is a cache over the persisted noun blobs: every
//! node's layer connections are written back into its blob, and the whole
//! index is rebuildable from a `nouns/` listing plus the entrypoint key.
//! Deleted nodes become tombstones whose outgoing links remain traversable so
//! the proximity graph does not fragment before the next rebuild.

use crate::distance::{cosine_distance, normalize};
use dashmap::DashMap;
use neurograph_core::{Deadline, HnswConfig, NeuroGraphError, NounBlob, NounId, Result, Vector};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use tracing::debug;

const LEVEL_CAP: u8 = 16;

#[derive(Debug, Clone)]
struct NodeState {
    /// L2-normalized; the original vector lives in the persisted blob.
    vector: Vector,
    level: u8,
    /// One neighbor set per layer, `connections[l]` for layer `l <= level`.
    connections: Vec<HashSet<NounId>>,
    deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    id: NounId,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: NounId,
    pub distance: f32,
}

/// Persisted entrypoint record (`_system/hnsw-entrypoint`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntrypointBlob {
    pub id: Option<NounId>,
    pub max_level: u8,
}

#[derive(Debug, Clone, Copy)]
struct EntryPoint {
    id: NounId,
    max_level: u8,
}

pub struct HnswIndex {
    config: HnswConfig,
    dimension: usize,
    nodes: DashMap<NounId, NodeState>,
    entry: RwLock<Option<EntryPoint>>,
}

impl HnswIndex {
    pub fn new(config: HnswConfig, dimension: usize) -> Self {
        Self {
            config,
            dimension,
            nodes: DashMap::new(),
            entry: RwLock::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NounId) -> bool {
        self.nodes.get(id).is_some_and(|n| !n.deleted)
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Ids of live (non-tombstoned) nodes.
    pub fn ids(&self) -> Vec<NounId> {
        self.nodes
            .iter()
            .filter(|n| !n.value().deleted)
            .map(|n| *n.key())
            .collect()
    }

    /// Inserts `id`, linking it into every layer up to its sampled level.
    /// Returns the set of nodes whose connection lists changed (the new node
    /// plus re-linked neighbors) so the caller can rewrite their blobs.
    pub fn insert(&self, id: NounId, vector: &[f32]) -> Result<Vec<NounId>> {
        crate::distance::check_dimension(vector, self.dimension)?;
        if self.contains(&id) {
            // Re-insert is an update: unlink the stale node first.
            self.remove(&id);
        }
        let query = normalize(vector);
        let level = self.sample_level();
        let mut touched: HashSet<NounId> = HashSet::from([id]);

        let entry = *self.entry.read();
        let Some(entry) = entry else {
            self.nodes.insert(
                id,
                NodeState {
                    vector: query,
                    level,
                    connections: vec![HashSet::new(); level as usize + 1],
                    deleted: false,
                },
            );
            *self.entry.write() = Some(EntryPoint {
                id,
                max_level: level,
            });
            return Ok(vec![id]);
        };

        // Greedy descent from the top layer down to just above the new
        // node's level: one closest point per layer.
        let mut ep = Candidate {
            distance: self
                .vector_of(&entry.id)
                .map(|v| cosine_distance(&query, &v))
                .unwrap_or(f32::MAX),
            id: entry.id,
        };
        let mut layer = entry.max_level;
        while layer > level {
            ep = self.greedy_closest(&query, ep, layer);
            layer -= 1;
        }

        // Insert the node before linking so neighbor fixups can see it.
        self.nodes.insert(
            id,
            NodeState {
                vector: query.clone(),
                level,
                connections: vec![HashSet::new(); level as usize + 1],
                deleted: false,
            },
        );

        // Link layer by layer with ef_construction-wide beams.
        let mut entries = vec![ep];
        for l in (0..=level.min(entry.max_level)).rev() {
            let found = self.search_layer(&query, &entries, self.config.ef_construction, l, true);
            let neighbors = self.select_neighbors(&found, self.config.m);
            // Record both directions before cap enforcement so a pruned edge
            // is dropped from both ends, never one.
            if let Some(mut me) = self.nodes.get_mut(&id) {
                let slot = &mut me.connections[l as usize];
                for n in &neighbors {
                    slot.insert(*n);
                }
            }
            for n in &neighbors {
                self.link(id, *n, l);
                touched.insert(*n);
                touched.extend(self.enforce_cap(*n, l));
            }
            entries = found;
            if entries.is_empty() {
                entries = vec![ep];
            }
        }

        if level > entry.max_level {
            *self.entry.write() = Some(EntryPoint {
                id,
                max_level: level,
            });
            debug!(%id, level, "new hnsw entry point");
        }
        Ok(touched.into_iter().collect())
    }

    /// Tombstones `id`. Links stay in place so searches keep routing through
    /// the hole until the next rebuild.
    pub fn remove(&self, id: &NounId) -> bool {
        let Some(mut node) = self.nodes.get_mut(id) else {
            return false;
        };
        if node.deleted {
            return false;
        }
        node.deleted = true;
        drop(node);

        let needs_new_entry = self.entry.read().is_some_and(|e| e.id == *id);
        if needs_new_entry {
            let replacement = self
                .nodes
                .iter()
                .filter(|n| !n.value().deleted)
                .max_by_key(|n| n.value().level)
                .map(|n| EntryPoint {
                    id: *n.key(),
                    max_level: n.value().level,
                });
            *self.entry.write() = replacement;
        }
        true
    }

    /// Top-k approximate nearest neighbors. Greedy descent to layer 1, then a
    /// `max(k, ef)`-wide beam at layer 0.
    pub fn search(&self, query: &[f32], k: usize, ef: Option<usize>) -> Result<Vec<SearchHit>> {
        self.search_with_deadline(query, k, ef, &Deadline::none())
    }

    pub fn search_with_deadline(
        &self,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
        deadline: &Deadline,
    ) -> Result<Vec<SearchHit>> {
        crate::distance::check_dimension(query, self.dimension)?;
        let Some(entry) = *self.entry.read() else {
            return Ok(Vec::new());
        };
        let query = normalize(query);
        let ef = ef.unwrap_or(self.config.ef_search).max(k);

        let mut ep = Candidate {
            distance: self
                .vector_of(&entry.id)
                .map(|v| cosine_distance(&query, &v))
                .unwrap_or(f32::MAX),
            id: entry.id,
        };
        let mut layer = entry.max_level;
        while layer > 0 {
            deadline.checkpoint()?;
            ep = self.greedy_closest(&query, ep, layer);
            layer -= 1;
        }

        let mut found = self.search_layer(&query, &[ep], ef, 0, false);
        found.sort_by(|a, b| a.cmp(b));
        found.truncate(k);
        Ok(found
            .into_iter()
            .map(|c| SearchHit {
                id: c.id,
                distance: c.distance,
            })
            .collect())
    }

    /// Serializable view of one node for blob writes: level plus per-layer
    /// neighbor arrays, sorted for deterministic output.
    pub fn connection_map(&self, id: &NounId) -> Option<(u8, BTreeMap<String, Vec<NounId>>)> {
        let node = self.nodes.get(id)?;
        let mut map = BTreeMap::new();
        for (l, set) in node.connections.iter().enumerate() {
            let mut list: Vec<NounId> = set.iter().copied().collect();
            list.sort_unstable();
            map.insert(l.to_string(), list);
        }
        Some((node.level, map))
    }

    /// Loads one persisted blob verbatim (trusting its stored links) during
    /// a rebuild. Call `finish_load` after the last blob.
    pub fn load_blob(&self, blob: &NounBlob) -> Result<()> {
        crate::distance::check_dimension(&blob.vector, self.dimension)?;
        let mut connections = vec![HashSet::new(); blob.level as usize + 1];
        for (layer_key, neighbors) in &blob.connections {
            let layer: usize = layer_key.parse().map_err(|_| {
                NeuroGraphError::Index(format!("bad connection layer key '{layer_key}'"))
            })?;
            if layer >= connections.len() {
                connections.resize(layer + 1, HashSet::new());
            }
            connections[layer] = neighbors.iter().copied().collect();
        }
        self.nodes.insert(
            blob.id,
            NodeState {
                vector: normalize(&blob.vector),
                level: blob.level,
                connections,
                deleted: false,
            },
        );
        Ok(())
    }

    /// Restores (or recomputes) the entry point once a rebuild has loaded
    /// every blob.
    pub fn finish_load(&self, persisted: Option<EntrypointBlob>) {
        let valid = persisted.and_then(|blob| {
            let id = blob.id?;
            self.nodes.get(&id).map(|node| EntryPoint {
                id,
                max_level: node.level,
            })
        });
        let entry = valid.or_else(|| {
            self.nodes
                .iter()
                .filter(|n| !n.value().deleted)
                .max_by_key(|n| n.value().level)
                .map(|n| EntryPoint {
                    id: *n.key(),
                    max_level: n.value().level,
                })
        });
        *self.entry.write() = entry;
    }

    pub fn entrypoint_blob(&self) -> EntrypointBlob {
        match *self.entry.read() {
            Some(e) => EntrypointBlob {
                id: Some(e.id),
                max_level: e.max_level,
            },
            None => EntrypointBlob::default(),
        }
    }

    /// Exponential level distribution with base `1/ln(m)`.
    fn sample_level(&self) -> u8 {
        let lambda = self.config.level_lambda();
        let uniform: f64 = rand::rng().random::<f64>().max(f64::MIN_POSITIVE);
        ((-uniform.ln() * lambda).floor() as u64).min(LEVEL_CAP as u64) as u8
    }

    fn vector_of(&self, id: &NounId) -> Option<Vector> {
        self.nodes.get(id).map(|n| n.vector.clone())
    }

    fn neighbors_at(&self, id: &NounId, layer: u8) -> Vec<NounId> {
        self.nodes
            .get(id)
            .and_then(|n| n.connections.get(layer as usize).cloned())
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    /// One step of greedy descent: repeatedly hop to the closest neighbor at
    /// `layer` until no neighbor improves.
    fn greedy_closest(&self, query: &[f32], mut best: Candidate, layer: u8) -> Candidate {
        loop {
            let mut improved = false;
            for neighbor in self.neighbors_at(&best.id, layer) {
                if let Some(v) = self.vector_of(&neighbor) {
                    let distance = cosine_distance(query, &v);
                    if distance < best.distance {
                        best = Candidate {
                            distance,
                            id: neighbor,
                        };
                        improved = true;
                    }
                }
            }
            if !improved {
                return best;
            }
        }
    }

    /// Beam search within one layer. Tombstoned nodes are traversed but only
    /// live nodes enter the result set; during construction
    /// (`include_deleted`) they stay eligible as link targets so the graph
    /// keeps its connectivity.
    fn search_layer(
        &self,
        query: &[f32],
        entries: &[Candidate],
        ef: usize,
        layer: u8,
        include_deleted: bool,
    ) -> Vec<Candidate> {
        let mut visited: HashSet<NounId> = entries.iter().map(|c| c.id).collect();
        let mut candidates: BinaryHeap<std::cmp::Reverse<Candidate>> = entries
            .iter()
            .map(|c| std::cmp::Reverse(*c))
            .collect();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();
        for c in entries {
            if include_deleted || self.contains(&c.id) {
                results.push(*c);
            }
        }

        while let Some(std::cmp::Reverse(current)) = candidates.pop() {
            let worst = results.peek().map(|c| c.distance).unwrap_or(f32::MAX);
            if current.distance > worst && results.len() >= ef {
                break;
            }
            for neighbor in self.neighbors_at(&current.id, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(v) = self.vector_of(&neighbor) else {
                    continue;
                };
                let distance = cosine_distance(query, &v);
                let worst = results.peek().map(|c| c.distance).unwrap_or(f32::MAX);
                if distance < worst || results.len() < ef {
                    candidates.push(std::cmp::Reverse(Candidate {
                        distance,
                        id: neighbor,
                    }));
                    let live = include_deleted || self.contains(&neighbor);
                    if live {
                        results.push(Candidate {
                            distance,
                            id: neighbor,
                        });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_vec();
        out.sort();
        out
    }

    /// Neighbor selection heuristic: walk candidates by ascending distance,
    /// keeping one only when it is closer to the query than to anything
    /// already kept (coverage over pure proximity), then backfill the nearest
    /// pruned candidates up to `m`.
    fn select_neighbors(&self, candidates: &[Candidate], m: usize) -> Vec<NounId> {
        let mut sorted: Vec<Candidate> = candidates.to_vec();
        sorted.sort();
        if sorted.len() <= m {
            return sorted.into_iter().map(|c| c.id).collect();
        }
        let mut selected: Vec<Candidate> = Vec::with_capacity(m);
        let mut pruned: Vec<Candidate> = Vec::new();
        for candidate in sorted {
            if selected.len() >= m {
                break;
            }
            let Some(cv) = self.vector_of(&candidate.id) else {
                continue;
            };
            let dominated = selected.iter().any(|s| {
                self.vector_of(&s.id)
                    .is_some_and(|sv| cosine_distance(&cv, &sv) < candidate.distance)
            });
            if dominated {
                pruned.push(candidate);
            } else {
                selected.push(candidate);
            }
        }
        for candidate in pruned {
            if selected.len() >= m {
                break;
            }
            selected.push(candidate);
        }
        selected.into_iter().map(|c| c.id).collect()
    }

    fn link(&self, a: NounId, b: NounId, layer: u8) {
        if a == b {
            return;
        }
        if let Some(mut node) = self.nodes.get_mut(&b) {
            if let Some(slot) = node.connections.get_mut(layer as usize) {
                slot.insert(a);
            }
        }
    }

    /// Re-prunes `id` at `layer` if its neighbor list overflows the layer
    /// cap, keeping links symmetric: a dropped edge is removed on both ends.
    /// Returns the nodes whose lists changed.
    fn enforce_cap(&self, id: NounId, layer: u8) -> Vec<NounId> {
        let cap = self.config.max_connections(layer);
        let current = self.neighbors_at(&id, layer);
        if current.len() <= cap {
            return Vec::new();
        }
        let Some(base) = self.vector_of(&id) else {
            return Vec::new();
        };
        let candidates: Vec<Candidate> = current
            .iter()
            .filter_map(|n| {
                self.vector_of(n).map(|v| Candidate {
                    distance: cosine_distance(&base, &v),
                    id: *n,
                })
            })
            .collect();
        let keep: HashSet<NounId> =
            self.select_neighbors(&candidates, cap).into_iter().collect();

        let mut touched = vec![id];
        if let Some(mut node) = self.nodes.get_mut(&id) {
            if let Some(slot) = node.connections.get_mut(layer as usize) {
                slot.retain(|n| keep.contains(n));
            }
        }
        for dropped in current.into_iter().filter(|n| !keep.contains(n)) {
            if let Some(mut node) = self.nodes.get_mut(&dropped) {
                if let Some(slot) = node.connections.get_mut(layer as usize) {
                    if slot.remove(&id) {
                        touched.push(dropped);
                    }
                }
            }
        }
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn index() -> HnswIndex {
        HnswIndex::new(HnswConfig::default(), 4)
    }

    fn vec4(seed: u64) -> Vector {
        // Deterministic spread of directions.
        let a = (seed as f32 * 0.37).sin();
        let b = (seed as f32 * 0.73).cos();
        let c = (seed as f32 * 1.13).sin();
        let d = (seed as f32 * 1.71).cos();
        vec![a, b, c, d]
    }

    #[test]
    fn first_insert_becomes_entry_point() {
        let idx = index();
        let id = Uuid::new_v4();
        let touched = idx.insert(id, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        assert_eq!(touched, vec![id]);
        assert_eq!(idx.entrypoint_blob().id, Some(id));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let idx = index();
        assert!(matches!(
            idx.insert(Uuid::new_v4(), &[1.0, 0.0]),
            Err(NeuroGraphError::InvalidArgument(_))
        ));
    }

    #[test]
    fn search_finds_exact_match_first() {
        let idx = index();
        let mut ids = Vec::new();
        for seed in 0..200u64 {
            let id = Uuid::new_v4();
            idx.insert(id, &vec4(seed)).unwrap();
            ids.push(id);
        }
        let hits = idx.search(&vec4(42), 5, None).unwrap();
        assert_eq!(hits[0].id, ids[42]);
        assert!(hits[0].distance < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn links_are_symmetric_after_insert() {
        let idx = index();
        let mut ids = Vec::new();
        for seed in 0..100u64 {
            let id = Uuid::new_v4();
            idx.insert(id, &vec4(seed)).unwrap();
            ids.push(id);
        }
        for id in &ids {
            let (level, map) = idx.connection_map(id).unwrap();
            for l in 0..=level {
                for neighbor in map.get(&l.to_string()).map(|v| v.as_slice()).unwrap_or(&[]) {
                    let (_, nmap) = idx.connection_map(neighbor).unwrap();
                    let back = nmap.get(&l.to_string()).map(|v| v.as_slice()).unwrap_or(&[]);
                    assert!(
                        back.contains(id),
                        "asymmetric link {id} -> {neighbor} at layer {l}"
                    );
                }
            }
        }
    }

    #[test]
    fn layer_caps_are_enforced() {
        let idx = index();
        for seed in 0..300u64 {
            idx.insert(Uuid::new_v4(), &vec4(seed)).unwrap();
        }
        let cap0 = idx.config.max_connections(0);
        for entry in idx.nodes.iter() {
            assert!(
                entry.value().connections[0].len() <= cap0,
                "layer-0 cap exceeded"
            );
        }
    }

    #[test]
    fn removed_nodes_disappear_from_results_but_stay_traversable() {
        let idx = index();
        let mut ids = Vec::new();
        for seed in 0..80u64 {
            let id = Uuid::new_v4();
            idx.insert(id, &vec4(seed)).unwrap();
            ids.push(id);
        }
        let victim = ids[7];
        assert!(idx.remove(&victim));
        let hits = idx.search(&vec4(7), 10, None).unwrap();
        assert!(hits.iter().all(|h| h.id != victim));
        // Everything else is still reachable.
        let hits = idx.search(&vec4(8), 10, None).unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn rebuild_from_blobs_round_trips() {
        let idx = index();
        let mut ids = Vec::new();
        for seed in 0..60u64 {
            let id = Uuid::new_v4();
            idx.insert(id, &vec4(seed)).unwrap();
            ids.push(id);
        }
        let entry = idx.entrypoint_blob();

        let rebuilt = index();
        for (seed, id) in ids.iter().enumerate() {
            let (level, connections) = idx.connection_map(id).unwrap();
            rebuilt
                .load_blob(&NounBlob {
                    id: *id,
                    vector: vec4(seed as u64),
                    level,
                    connections,
                })
                .unwrap();
        }
        rebuilt.finish_load(Some(entry));

        let before = idx.search(&vec4(30), 5, None).unwrap();
        let after = rebuilt.search(&vec4(30), 5, None).unwrap();
        assert_eq!(before[0].id, after[0].id);
    }

    #[test]
    fn entry_point_survives_removal() {
        let idx = index();
        let first = Uuid::new_v4();
        idx.insert(first, &vec4(1)).unwrap();
        let second = Uuid::new_v4();
        idx.insert(second, &vec4(2)).unwrap();
        let entry = idx.entrypoint_blob().id.unwrap();
        idx.remove(&entry);
        let remaining = if entry == first { second } else { first };
        assert_eq!(idx.entrypoint_blob().id, Some(remaining));
    }
}
