//! Dense adjacency lists over the verb namespace.
//!
//! Each noun owns a compact list of `(neighbor, verb, direction, type)`
//! entries, giving `neighbors()` an O(1) lookup plus O(degree) scan. The
//! structure is a cache: it is rebuilt from the persisted `verbMetadata/`
//! records on cold start or on demand.

use dashmap::DashMap;
use neurograph_core::{Direction, NounId, VerbId, VerbRecord, VerbType};
use rayon::prelude::*;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjacencyEntry {
    pub neighbor: NounId,
    pub verb_id: VerbId,
    pub direction: Direction,
    pub verb_type: VerbType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRef {
    pub source: NounId,
    pub target: NounId,
    pub verb_type: VerbType,
}

#[derive(Default)]
pub struct AdjacencyIndex {
    lists: DashMap<NounId, Vec<AdjacencyEntry>>,
    edges: DashMap<VerbId, EdgeRef>,
}

impl AdjacencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn get_edge(&self, verb_id: &VerbId) -> Option<EdgeRef> {
        self.edges.get(verb_id).map(|e| *e)
    }

    /// O(1) amortized: two list appends and one edge-map insert.
    pub fn add_edge(&self, verb_id: VerbId, source: NounId, target: NounId, verb_type: VerbType) {
        if self.edges.contains_key(&verb_id) {
            self.remove_edge(&verb_id);
        }
        self.lists.entry(source).or_default().push(AdjacencyEntry {
            neighbor: target,
            verb_id,
            direction: Direction::Out,
            verb_type,
        });
        self.lists.entry(target).or_default().push(AdjacencyEntry {
            neighbor: source,
            verb_id,
            direction: Direction::In,
            verb_type,
        });
        self.edges.insert(
            verb_id,
            EdgeRef {
                source,
                target,
                verb_type,
            },
        );
    }

    pub fn remove_edge(&self, verb_id: &VerbId) -> Option<EdgeRef> {
        let (_, edge) = self.edges.remove(verb_id)?;
        for node in [edge.source, edge.target] {
            if let Some(mut list) = self.lists.get_mut(&node) {
                list.retain(|e| e.verb_id != *verb_id);
            }
        }
        Some(edge)
    }

    /// Drops a noun's list and every edge incident to it.
    pub fn remove_node(&self, id: &NounId) -> Vec<VerbId> {
        let entries = match self.lists.remove(id) {
            Some((_, entries)) => entries,
            None => return Vec::new(),
        };
        let mut removed = Vec::with_capacity(entries.len());
        for entry in entries {
            self.edges.remove(&entry.verb_id);
            if let Some(mut list) = self.lists.get_mut(&entry.neighbor) {
                list.retain(|e| e.verb_id != entry.verb_id);
            }
            removed.push(entry.verb_id);
        }
        removed
    }

    /// Neighbor entries of `id`, optionally narrowed by direction and type.
    /// `Direction::Both` (or `None`) matches either orientation.
    pub fn neighbors(
        &self,
        id: &NounId,
        direction: Option<Direction>,
        verb_type: Option<VerbType>,
    ) -> Vec<AdjacencyEntry> {
        let Some(list) = self.lists.get(id) else {
            return Vec::new();
        };
        list.iter()
            .filter(|e| match direction {
                None | Some(Direction::Both) => true,
                Some(d) => e.direction == d,
            })
            .filter(|e| verb_type.is_none_or(|t| e.verb_type == t))
            .copied()
            .collect()
    }

    pub fn degree(&self, id: &NounId) -> usize {
        self.lists.get(id).map(|l| l.len()).unwrap_or(0)
    }

    pub fn count_by_type(&self, verb_type: VerbType) -> usize {
        self.edges.iter().filter(|e| e.verb_type == verb_type).count()
    }

    pub fn edge_ids(&self) -> Vec<VerbId> {
        self.edges.iter().map(|e| *e.key()).collect()
    }

    /// Rebuilds from persisted verb records, replacing the current contents.
    pub fn rebuild<'a, I>(&self, records: I)
    where
        I: IntoIterator<Item = (VerbId, &'a VerbRecord)>,
    {
        self.lists.clear();
        self.edges.clear();
        let records: Vec<(VerbId, &VerbRecord)> = records.into_iter().collect();
        let total = records.len();
        records.into_par_iter().for_each(|(verb_id, record)| {
            self.add_edge(verb_id, record.source_id, record.target_id, record.verb);
        });
        info!(edges = total, "adjacency index rebuilt");
    }
}
