//! The Triple Intelligence planner.
//!
//! One query can carry up to four signals: semantic (HNSW), text tokens,
//! metadata filters, and graph proximity. The planner picks the cheapest
//! plan that answers the query (direct get, bitmap-only, graph-only,
//! vector-only) and falls back to running every present signal to an
//! over-fetched depth and fusing them with Reciprocal Rank Fusion. `where`
//! and `connected` are hard constraints as well as ranking signals; every
//! condition is re-validated against the hydrated entity so bucketed or
//! unindexed fields can never leak false positives.

use crate::api::{
    ConnectedSpec, Entity, Explain, FieldCondition, FindQuery, FindResult, MatchSource,
    QueryInput, SearchMode,
};
use crate::store::{BranchState, NeuroGraph};
use neurograph_core::{Deadline, MetadataValue, NounId, NounType, Result};
use neurograph_graph::TraversalSpec;
use neurograph_index::{tokenize, FieldFilter};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

struct Signal {
    weight: f32,
    /// 1-based rank per candidate.
    ranks: HashMap<NounId, usize>,
    /// Raw per-signal score (similarity, matched words, hop proximity).
    raw: HashMap<NounId, f32>,
}

impl Signal {
    fn from_ranked(weight: f32, ids: impl IntoIterator<Item = (NounId, f32)>) -> Self {
        let mut ranks = HashMap::new();
        let mut raw = HashMap::new();
        for (rank, (id, score)) in ids.into_iter().enumerate() {
            ranks.entry(id).or_insert(rank + 1);
            raw.entry(id).or_insert(score);
        }
        Self { weight, ranks, raw }
    }

    fn rrf(&self, id: &NounId, k: f32) -> f32 {
        match self.ranks.get(id) {
            Some(rank) => self.weight / (k + *rank as f32),
            None => 0.0,
        }
    }
}

#[derive(Default)]
struct SignalSet {
    vector: Option<Signal>,
    text: Option<Signal>,
    field: Option<Signal>,
    graph: Option<Signal>,
}

impl NeuroGraph {
    pub async fn find(&self, query: FindQuery) -> Result<Vec<FindResult>> {
        let branch = self.get_current_branch();
        let state = self.state_for(&branch).await?;
        let deadline = Deadline::after(self.inner.config.planner.query_budget);

        // Plan 1: direct id fast path.
        if query.id.is_some() || query.ids.is_some() {
            let mut ids: Vec<NounId> = query.ids.clone().unwrap_or_default();
            if let Some(id) = query.id {
                ids.push(id);
            }
            ids.sort_unstable();
            ids.dedup();
            let mut out = Vec::new();
            for id in ids {
                if let Some(entity) = self.load_entity(&branch, id).await? {
                    out.push(FindResult {
                        id,
                        score: 1.0,
                        entity: Some(entity),
                        explain: None,
                    });
                }
            }
            return Ok(out);
        }

        let limit = query.effective_limit();
        let overfetch = (limit * self.inner.config.planner.overfetch_factor)
            .max(self.inner.config.hnsw.ef_search);

        let signals = self
            .collect_signals(&branch, &state, &query, overfetch, &deadline)
            .await?;

        // Hard constraints narrow the candidate set; ranking signals only
        // contribute candidates when nothing constrains.
        let mut candidates: Option<HashSet<NounId>> = None;
        if let Some(field) = &signals.field {
            candidates = Some(field.ranks.keys().copied().collect());
        }
        if let Some(graph) = &signals.graph {
            let graph_set: HashSet<NounId> = graph.ranks.keys().copied().collect();
            candidates = Some(match candidates {
                Some(existing) => existing.intersection(&graph_set).copied().collect(),
                None => graph_set,
            });
        }
        let candidates: HashSet<NounId> = match candidates {
            Some(constrained) => constrained,
            None => {
                let mut all = HashSet::new();
                for signal in [&signals.vector, &signals.text] {
                    if let Some(signal) = signal {
                        all.extend(signal.ranks.keys().copied());
                    }
                }
                if signals.vector.is_none() && signals.text.is_none() {
                    // No signal at all: enumerate the branch.
                    all.extend(state.hnsw.ids());
                }
                all
            }
        };

        // Fuse, hydrate and post-validate.
        let k_rrf = self.inner.config.planner.k_rrf;
        let mut scored: Vec<(NounId, f32)> = candidates
            .into_iter()
            .map(|id| {
                let score = [&signals.vector, &signals.text, &signals.field, &signals.graph]
                    .into_iter()
                    .flatten()
                    .map(|s| s.rrf(&id, k_rrf))
                    .sum();
                (id, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut out = Vec::new();
        for (id, score) in scored {
            if out.len() >= query.offset + limit {
                break;
            }
            let Some(entity) = self.load_entity(&branch, id).await? else {
                continue;
            };
            if let Some(where_clause) = &query.where_clause {
                if !where_matches(where_clause, &entity) {
                    continue;
                }
            }
            let explain = query
                .explain
                .then(|| build_explain(&signals, &id, k_rrf));
            out.push(FindResult {
                id,
                score,
                entity: Some(entity),
                explain,
            });
        }
        let mut out: Vec<FindResult> = out.into_iter().skip(query.offset).collect();
        if !self.inner.hooks.is_empty() {
            for result in &mut out {
                if let Some(entity) = result.entity.take() {
                    result.entity =
                        Some(self.rewrite_entity(neurograph_core::ReadOp::Find, entity).await);
                }
            }
        }
        debug!(results = out.len(), "find completed");
        Ok(out)
    }

    /// Nearest neighbors of an existing noun.
    pub async fn similar(
        &self,
        to: NounId,
        limit: usize,
        noun_type: Option<NounType>,
    ) -> Result<Vec<FindResult>> {
        let branch = self.get_current_branch();
        let state = self.state_for(&branch).await?;
        let entity = self
            .load_entity(&branch, to)
            .await?
            .ok_or_else(|| neurograph_core::NeuroGraphError::NotFound(format!("noun {to}")))?;

        let hits = state.hnsw.search(&entity.vector, limit + 1, None)?;
        let mut out = Vec::new();
        for hit in hits {
            if hit.id == to || out.len() >= limit {
                continue;
            }
            let Some(entity) = self.load_entity(&branch, hit.id).await? else {
                continue;
            };
            if noun_type.is_some_and(|t| entity.noun_type != t) {
                continue;
            }
            out.push(FindResult {
                id: hit.id,
                score: 1.0 - hit.distance,
                entity: Some(entity),
                explain: None,
            });
        }
        Ok(out)
    }

    async fn collect_signals(
        &self,
        branch: &str,
        state: &Arc<BranchState>,
        query: &FindQuery,
        overfetch: usize,
        deadline: &Deadline,
    ) -> Result<SignalSet> {
        let mut signals = SignalSet::default();
        let planner = &self.inner.config.planner;

        // Field signal from the indexed parts of the where tree.
        if let Some(where_clause) = &query.where_clause {
            signals.field = Some(self.field_signal(state, where_clause, planner.field_weight));
        }
        if deadline.is_cancelled() {
            return Err(neurograph_core::NeuroGraphError::Cancelled);
        }

        // Graph signal.
        if let Some(connected) = &query.connected {
            if deadline.is_expired() {
                debug!("query budget spent before graph signal, fusing partial");
                return Ok(signals);
            }
            signals.graph = Some(graph_signal(state, connected, planner.graph_weight, deadline)?);
        }

        // Vector and text signals from the query input.
        let Some(input) = &query.query else {
            return Ok(signals);
        };
        let (vector_weight, text_weight) = self.split_vector_weights(query);

        if !matches!(query.search_mode, SearchMode::Semantic) {
            if let QueryInput::Text(text) = input {
                let ranked = state.meta.get_ids_for_text_query(text);
                if !ranked.is_empty() {
                    signals.text = Some(Signal::from_ranked(
                        text_weight,
                        ranked.into_iter().map(|(id, n)| (id, n as f32)),
                    ));
                }
            }
        }

        if !matches!(query.search_mode, SearchMode::Text) {
            if deadline.is_expired() {
                debug!("query budget spent before vector signal, fusing partial");
                return Ok(signals);
            }
            let vector = match input {
                QueryInput::Vector(vector) => Some(vector.clone()),
                QueryInput::Id(id) => self.load_entity(branch, *id).await?.map(|e| e.vector),
                QueryInput::Text(text) => match self.inner.embedder.embed(text).await {
                    Ok(vector) => Some(vector),
                    Err(e) => {
                        debug!(error = %e, "embedding unavailable, skipping vector signal");
                        None
                    }
                },
            };
            if let Some(vector) = vector {
                let hits = state.hnsw.search_with_deadline(
                    &vector,
                    overfetch,
                    Some(overfetch),
                    deadline,
                )?;
                signals.vector = Some(Signal::from_ranked(
                    vector_weight,
                    hits.into_iter().map(|h| (h.id, 1.0 - h.distance)),
                ));
            }
        }
        Ok(signals)
    }

    /// Splits the configured vector weight between the semantic and text
    /// branches. `hybridAlpha` is the semantic share; without it a query
    /// length heuristic biases short queries toward exact tokens and long
    /// ones toward meaning.
    fn split_vector_weights(&self, query: &FindQuery) -> (f32, f32) {
        let base = self.inner.config.planner.vector_weight;
        let is_text = matches!(query.query, Some(QueryInput::Text(_)));
        if !is_text || matches!(query.search_mode, SearchMode::Semantic) {
            return (base, base);
        }
        let alpha = query.hybrid_alpha.unwrap_or_else(|| {
            let tokens = match &query.query {
                Some(QueryInput::Text(text)) => tokenize(text).len(),
                _ => 0,
            };
            match tokens {
                0..=2 => 0.4,
                3..=5 => 0.55,
                _ => 0.7,
            }
        });
        let alpha = alpha.clamp(0.0, 1.0);
        (base * 2.0 * alpha, base * 2.0 * (1.0 - alpha))
    }

    fn field_signal(
        &self,
        state: &Arc<BranchState>,
        where_clause: &crate::api::WhereClause,
        weight: f32,
    ) -> Signal {
        let mut equals: Vec<FieldFilter> = Vec::new();
        let mut one_of: Vec<(String, Vec<MetadataValue>)> = Vec::new();
        let mut ranges: Vec<(String, Option<f64>, Option<f64>)> = Vec::new();
        let mut unindexed = false;
        for (field, condition) in where_clause {
            match condition {
                FieldCondition::Equals(value) => equals.push(FieldFilter {
                    field: field.clone(),
                    value: value.clone(),
                }),
                FieldCondition::Ops(ops) => {
                    if let Some(values) = &ops.one_of {
                        one_of.push((field.clone(), values.clone()));
                    }
                    let min = ops.greater_than.or(ops.greater_or_equal);
                    let max = ops.less_than.or(ops.less_or_equal);
                    if min.is_some() || max.is_some() {
                        ranges.push((field.clone(), min, max));
                    }
                    if ops.contains.is_some() {
                        unindexed = true;
                    }
                }
            }
        }

        fn intersect(combined: &mut Option<roaring::RoaringBitmap>, bitmap: roaring::RoaringBitmap) {
            *combined = Some(match combined.take() {
                Some(acc) => acc & bitmap,
                None => bitmap,
            });
        }

        let mut combined: Option<roaring::RoaringBitmap> = None;

        if !equals.is_empty() {
            intersect(&mut combined, state.meta.intersect(&equals));
        }
        for (field, values) in one_of {
            let mut union = roaring::RoaringBitmap::new();
            for value in values {
                union |= state.meta.bitmap_for(&field, &value);
            }
            intersect(&mut combined, union);
        }
        for (field, min, max) in ranges {
            let hits = state.meta.range(&field, min, max);
            // Boundary buckets stay candidates; the post-filter re-checks
            // their raw values after hydration.
            intersect(&mut combined, hits.certain | hits.boundary);
        }
        if unindexed && combined.is_none() {
            // Pure post-filter queries scan the branch.
            let mut all = roaring::RoaringBitmap::new();
            for id in state.hnsw.ids() {
                if let Some(int_id) = state.idmap.get_int(&id) {
                    all.insert(int_id);
                }
            }
            intersect(&mut combined, all);
        }

        let ids = combined
            .map(|bitmap| state.meta.resolve(&bitmap))
            .unwrap_or_default();
        Signal::from_ranked(weight, ids.into_iter().map(|id| (id, 1.0)))
    }
}

fn graph_signal(
    state: &Arc<BranchState>,
    connected: &ConnectedSpec,
    weight: f32,
    deadline: &Deadline,
) -> Result<Signal> {
    let spec = TraversalSpec {
        max_depth: connected.depth.max(1),
        max_nodes: None,
        direction: connected.direction,
        verb_type: connected.verb_type,
        include_start: false,
    };
    let ranked = neurograph_graph::connected_ranked(&state.graph, connected.to, &spec, deadline)?;
    let max_depth = spec.max_depth as f32;
    Ok(Signal::from_ranked(
        weight,
        ranked
            .into_iter()
            .map(|(id, depth)| (id, 1.0 - (depth as f32 - 1.0) / max_depth)),
    ))
}

fn where_matches(where_clause: &crate::api::WhereClause, entity: &Entity) -> bool {
    where_clause.iter().all(|(field, condition)| {
        let value = match field.as_str() {
            "noun" => Some(json!(entity.noun_type.as_str())),
            "service" => entity.service.clone().map(MetadataValue::String),
            _ => entity.metadata.get(field).cloned(),
        };
        condition.matches(value.as_ref())
    })
}

fn build_explain(signals: &SignalSet, id: &NounId, k_rrf: f32) -> Explain {
    let text_matches = signals
        .text
        .as_ref()
        .and_then(|s| s.raw.get(id))
        .copied()
        .unwrap_or(0.0) as usize;
    let text_score = signals.text.as_ref().map(|s| s.rrf(id, k_rrf)).unwrap_or(0.0);
    let semantic_score = signals
        .vector
        .as_ref()
        .and_then(|s| s.raw.get(id))
        .copied()
        .unwrap_or(0.0);
    let graph_score = signals
        .graph
        .as_ref()
        .map(|s| s.rrf(id, k_rrf))
        .unwrap_or(0.0);
    let field_score = signals
        .field
        .as_ref()
        .map(|s| s.rrf(id, k_rrf))
        .unwrap_or(0.0);

    let in_text = text_score > 0.0;
    let in_semantic = signals
        .vector
        .as_ref()
        .is_some_and(|s| s.ranks.contains_key(id));
    let match_source = match (in_text, in_semantic) {
        (true, true) => MatchSource::Both,
        (true, false) => MatchSource::Text,
        (false, true) => MatchSource::Semantic,
        (false, false) => {
            if graph_score > 0.0 {
                MatchSource::Graph
            } else {
                MatchSource::Field
            }
        }
    };
    Explain {
        text_matches,
        text_score,
        semantic_score,
        graph_score,
        field_score,
        match_source,
    }
}
