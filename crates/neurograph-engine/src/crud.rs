//! CRUD, relations, counts, versions and embedding operations.

use crate::api::{
    AddRequest, BatchOutcome, Entity, Highlight, HighlightRequest, Relation, RelateRequest,
    RelationFilter, UpdateRequest,
};
use crate::store::{BranchState, NeuroGraph};
use crate::versions::{PruneOptions, SaveOptions, VersionDiff};
use bytes::Bytes;
use neurograph_core::{
    now_millis, ChangeOp, Direction, EntityKind, MetadataValue, MutationOp, NeuroGraphError,
    NounBlob, NounId, NounMetadataRecord, NounType, ReadOp, Result, VerbBlob, VerbId, VerbRecord,
    VerbType, VersionRecord, Vector,
};
use neurograph_kv::keys;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

impl NeuroGraph {
    // ------------------------------------------------------------------
    // Core mutations
    // ------------------------------------------------------------------

    pub async fn add(&self, request: AddRequest) -> Result<NounId> {
        let _permit = self.inner.admission.admit().await?;
        let request = self.intercept_add(request).await?;

        let vector = self.resolve_vector(&request.data, &request.vector).await?;
        let branch = self.get_current_branch();
        let id = request.id.unwrap_or_else(Uuid::new_v4);
        let _guard = self.write_lock(&branch, id).await;
        let state = self.state_for(&branch).await?;

        if state.hnsw.contains(&id) {
            return Err(NeuroGraphError::AlreadyExists(format!("noun {id}")));
        }

        let outcome = async {
            let touched = state.hnsw.insert(id, &vector)?;
            self.write_noun_blob(&branch, &state, id, &vector)?;
            self.rewrite_touched(&branch, &state, &touched, id).await?;

            let now = now_millis();
            let record = NounMetadataRecord {
                noun: request.noun_type,
                service: request.service.clone(),
                fields: metadata_fields(request.metadata.as_ref(), request.data.as_deref()),
                created_at: now,
                updated_at: now,
            };
            self.write_metadata_record(&branch, &state, id, &record)?;
            state.noun_count.fetch_add(1, Ordering::AcqRel);

            self.inner
                .changelog
                .append(ChangeOp::Add, EntityKind::Noun, id, Some(json!({"branch": &branch})))
                .await?;
            self.inner.stats.record_noun_added(request.noun_type);
            self.invalidate_descendants(&branch);
            Ok(id)
        }
        .await;
        self.note_outcome(&outcome);
        outcome
    }

    pub async fn get(&self, id: NounId) -> Result<Option<Entity>> {
        let branch = self.get_current_branch();
        let entity = self.load_entity(&branch, id).await?;
        match entity {
            Some(entity) => Ok(Some(self.rewrite_entity(ReadOp::Get, entity).await)),
            None => Ok(None),
        }
    }

    /// Post-read rewriter hook: hooks may reshape an entity's metadata; a
    /// failing hook leaves the entity untouched.
    pub(crate) async fn rewrite_entity(&self, op: ReadOp, mut entity: Entity) -> Entity {
        if self.inner.hooks.is_empty() {
            return entity;
        }
        let Ok(serialized) = serde_json::to_value(&entity.metadata) else {
            return entity;
        };
        let rewritten = self.inner.hooks.run_rewriters(op, serialized).await;
        if let MetadataValue::Object(map) = rewritten {
            entity.metadata = map.into_iter().collect();
        }
        entity
    }

    // ------------------------------------------------------------------
    // Change log
    // ------------------------------------------------------------------

    pub async fn get_changes_since(
        &self,
        since: neurograph_core::TimestampMillis,
        max: usize,
    ) -> Result<Vec<neurograph_core::ChangeLogEntry>> {
        self.inner.changelog.get_changes_since(since, max).await
    }

    pub async fn cleanup_old_change_logs(
        &self,
        older_than: neurograph_core::TimestampMillis,
    ) -> Result<usize> {
        self.inner.changelog.cleanup_old_change_logs(older_than).await
    }

    /// Distinct indexed values for a metadata field on the current branch.
    pub async fn get_filter_values(&self, field: &str) -> Result<Vec<MetadataValue>> {
        Ok(self.current_state().await?.meta.get_filter_values(field))
    }

    pub async fn update(&self, request: UpdateRequest) -> Result<()> {
        let _permit = self.inner.admission.admit().await?;
        let branch = self.get_current_branch();
        let _guard = self.write_lock(&branch, request.id).await;
        let state = self.state_for(&branch).await?;

        let existing = self
            .load_entity(&branch, request.id)
            .await?
            .ok_or_else(|| NeuroGraphError::NotFound(format!("noun {}", request.id)))?;

        let outcome = async {
            let new_vector = if request.data.is_some() || request.vector.is_some() {
                Some(self.resolve_vector(&request.data, &request.vector).await?)
            } else {
                None
            };

            if let Some(vector) = &new_vector {
                let touched = state.hnsw.insert(request.id, vector)?;
                self.write_noun_blob(&branch, &state, request.id, vector)?;
                self.rewrite_touched(&branch, &state, &touched, request.id).await?;
            }

            let old_record = NounMetadataRecord {
                noun: existing.noun_type,
                service: existing.service.clone(),
                fields: existing.metadata.clone(),
                created_at: existing.created_at,
                updated_at: existing.updated_at,
            };
            let mut fields = if request.replace_metadata {
                BTreeMap::new()
            } else {
                existing.metadata.clone()
            };
            if let Some(patch) = &request.metadata {
                merge_fields(&mut fields, patch);
            }
            if let Some(data) = &request.data {
                fields.insert("data".to_string(), MetadataValue::String(data.clone()));
            }
            let record = NounMetadataRecord {
                noun: existing.noun_type,
                service: existing.service.clone(),
                fields,
                created_at: existing.created_at,
                updated_at: now_millis(),
            };
            state
                .meta
                .remove(&request.id, &serde_json::to_value(&old_record)?);
            self.write_metadata_record(&branch, &state, request.id, &record)?;
            self.invalidate_entity_cache(&branch, request.id);

            self.inner
                .changelog
                .append(
                    ChangeOp::Update,
                    EntityKind::Noun,
                    request.id,
                    Some(json!({"branch": &branch})),
                )
                .await?;
            self.invalidate_descendants(&branch);
            Ok(())
        }
        .await;
        self.note_outcome(&outcome);
        outcome
    }

    pub async fn delete(&self, id: NounId) -> Result<()> {
        let _permit = self.inner.admission.admit().await?;
        let branch = self.get_current_branch();
        let _guard = self.write_lock(&branch, id).await;
        let state = self.state_for(&branch).await?;

        let existing = self
            .load_entity(&branch, id)
            .await?
            .ok_or_else(|| NeuroGraphError::NotFound(format!("noun {id}")))?;

        let outcome = async {
            state.hnsw.remove(&id);
            let removed_verbs = state.graph.remove_node(&id);
            for verb_id in &removed_verbs {
                self.drop_verb_keys(&branch, *verb_id).await?;
                self.inner
                    .changelog
                    .append(
                        ChangeOp::Delete,
                        EntityKind::Verb,
                        *verb_id,
                        Some(json!({"branch": &branch, "cascade": true})),
                    )
                    .await?;
            }
            let removed = removed_verbs.len() as u64;
            let _ = state
                .verb_count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                    Some(v.saturating_sub(removed))
                });

            let old_record = NounMetadataRecord {
                noun: existing.noun_type,
                service: existing.service.clone(),
                fields: existing.metadata.clone(),
                created_at: existing.created_at,
                updated_at: existing.updated_at,
            };
            state.meta.remove(&id, &serde_json::to_value(&old_record)?);
            state.idmap.remove(&id);
            self.invalidate_entity_cache(&branch, id);

            let noun_key = self.scoped_key(&branch, &keys::noun(id));
            let meta_key = self.scoped_key(&branch, &keys::noun_metadata(id));
            self.inner.noun_buffer.discard(&noun_key);
            self.inner.noun_buffer.discard(&meta_key);
            self.inner.branches.delete_key(&branch, &keys::noun(id)).await?;
            self.inner
                .branches
                .delete_key(&branch, &keys::noun_metadata(id))
                .await?;
            let _ = state
                .noun_count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                    Some(v.saturating_sub(1))
                });

            self.inner
                .changelog
                .append(
                    ChangeOp::Delete,
                    EntityKind::Noun,
                    id,
                    Some(json!({"branch": &branch})),
                )
                .await?;
            self.invalidate_descendants(&branch);
            Ok(())
        }
        .await;
        self.note_outcome(&outcome);
        outcome
    }

    pub async fn relate(&self, request: RelateRequest) -> Result<VerbId> {
        let _permit = self.inner.admission.admit().await?;
        if request.from == request.to {
            return Err(NeuroGraphError::InvalidArgument(
                "self-edges are not allowed".into(),
            ));
        }
        let branch = self.get_current_branch();
        let _guard = self.write_lock(&branch, request.from).await;
        let state = self.state_for(&branch).await?;
        for end in [request.from, request.to] {
            if !state.hnsw.contains(&end) {
                return Err(NeuroGraphError::NotFound(format!("noun {end}")));
            }
        }

        let outcome = async {
            let verb_id = Uuid::new_v4();
            let vector = match self.inner.embedder.embed(request.verb_type.as_str()).await {
                Ok(vector) => vector,
                Err(e) => {
                    debug!(error = %e, "verb embedding unavailable, storing zero vector");
                    vec![0.0; self.inner.config.dimension.0]
                }
            };
            let now = now_millis();
            let blob = VerbBlob {
                id: verb_id,
                vector,
                connections: BTreeMap::new(),
            };
            let record = VerbRecord {
                source_id: request.from,
                target_id: request.to,
                verb: request.verb_type,
                type_name: request.verb_type.as_str().to_string(),
                weight: request.weight.unwrap_or(1.0).clamp(0.0, 1.0),
                metadata: request.metadata.clone(),
                created_at: now,
                updated_at: now,
            };
            self.inner.verb_buffer.enqueue(
                self.scoped_key(&branch, &keys::verb(verb_id)),
                Bytes::from(serde_json::to_vec(&blob)?),
            );
            self.inner.verb_buffer.enqueue(
                self.scoped_key(&branch, &keys::verb_metadata(verb_id)),
                Bytes::from(serde_json::to_vec(&record)?),
            );
            self.inner.admission.record_buffered(2);

            state
                .graph
                .add_edge(verb_id, request.from, request.to, request.verb_type);
            state.verb_count.fetch_add(1, Ordering::AcqRel);

            self.inner
                .changelog
                .append(
                    ChangeOp::Add,
                    EntityKind::Verb,
                    verb_id,
                    Some(json!({"branch": &branch})),
                )
                .await?;
            self.inner.stats.record_verb_added(request.verb_type);
            self.invalidate_descendants(&branch);
            Ok(verb_id)
        }
        .await;
        self.note_outcome(&outcome);
        outcome
    }

    pub async fn unrelate(&self, rel_id: VerbId) -> Result<()> {
        let _permit = self.inner.admission.admit().await?;
        let branch = self.get_current_branch();
        let state = self.state_for(&branch).await?;

        if state.graph.remove_edge(&rel_id).is_none() {
            return Err(NeuroGraphError::NotFound(format!("relation {rel_id}")));
        }
        let outcome = async {
            self.drop_verb_keys(&branch, rel_id).await?;
            let _ = state
                .verb_count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                    Some(v.saturating_sub(1))
                });
            self.inner
                .changelog
                .append(
                    ChangeOp::Delete,
                    EntityKind::Verb,
                    rel_id,
                    Some(json!({"branch": &branch})),
                )
                .await?;
            self.invalidate_descendants(&branch);
            Ok(())
        }
        .await;
        self.note_outcome(&outcome);
        outcome
    }

    pub async fn get_relations(&self, filter: RelationFilter) -> Result<Vec<Relation>> {
        let branch = self.get_current_branch();
        let state = self.state_for(&branch).await?;

        let verb_ids: Vec<VerbId> = match (filter.from, filter.to) {
            (Some(from), to) => state
                .graph
                .neighbors(&from, Some(Direction::Out), filter.verb_type)
                .into_iter()
                .filter(|e| to.is_none_or(|t| e.neighbor == t))
                .map(|e| e.verb_id)
                .collect(),
            (None, Some(to)) => state
                .graph
                .neighbors(&to, Some(Direction::In), filter.verb_type)
                .into_iter()
                .map(|e| e.verb_id)
                .collect(),
            (None, None) => state
                .graph
                .edge_ids()
                .into_iter()
                .filter(|id| {
                    filter.verb_type.is_none_or(|t| {
                        state.graph.get_edge(id).is_some_and(|e| e.verb_type == t)
                    })
                })
                .collect(),
        };

        let mut relations = Vec::with_capacity(verb_ids.len());
        for verb_id in verb_ids {
            if let Some(relation) = self.load_relation(&branch, verb_id).await? {
                relations.push(relation);
            }
        }
        relations.sort_by_key(|r| r.id);
        Ok(relations)
    }

    // ------------------------------------------------------------------
    // Batch forms
    // ------------------------------------------------------------------

    pub async fn add_many(&self, requests: Vec<AddRequest>) -> Vec<BatchOutcome<NounId>> {
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            out.push(match self.add(request).await {
                Ok(id) => BatchOutcome::Ok(id),
                Err(e) => BatchOutcome::Err(e),
            });
        }
        self.inner.admission.record_buffered(out.len());
        out
    }

    pub async fn update_many(&self, requests: Vec<UpdateRequest>) -> Vec<BatchOutcome<()>> {
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            out.push(match self.update(request).await {
                Ok(()) => BatchOutcome::Ok(()),
                Err(e) => BatchOutcome::Err(e),
            });
        }
        out
    }

    pub async fn delete_many(&self, ids: Vec<NounId>) -> Vec<BatchOutcome<()>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(match self.delete(id).await {
                Ok(()) => BatchOutcome::Ok(()),
                Err(e) => BatchOutcome::Err(e),
            });
        }
        out
    }

    pub async fn relate_many(&self, requests: Vec<RelateRequest>) -> Vec<BatchOutcome<VerbId>> {
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            out.push(match self.relate(request).await {
                Ok(id) => BatchOutcome::Ok(id),
                Err(e) => BatchOutcome::Err(e),
            });
        }
        out
    }

    // ------------------------------------------------------------------
    // Embedding and highlighting
    // ------------------------------------------------------------------

    pub async fn embed(&self, text: &str) -> Result<Vector> {
        self.inner.embedder.embed(text).await
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.inner.embedder.embed_batch(texts).await
    }

    pub async fn highlight(&self, request: &HighlightRequest) -> Result<Vec<Highlight>> {
        self.inner.highlighter.highlight(request).await
    }

    // ------------------------------------------------------------------
    // Counts
    // ------------------------------------------------------------------

    pub fn counts(&self) -> CountsApi<'_> {
        CountsApi { store: self }
    }

    // ------------------------------------------------------------------
    // Versions
    // ------------------------------------------------------------------

    pub fn versions(&self) -> VersionsApi<'_> {
        VersionsApi { store: self }
    }

    // ------------------------------------------------------------------
    // Internals shared with the planner
    // ------------------------------------------------------------------

    pub(crate) async fn load_entity(&self, branch: &str, id: NounId) -> Result<Option<Entity>> {
        let cache_key = format!("{branch}/{id}");
        if let Some(cached) = self
            .inner
            .cache
            .get_as::<Entity>(neurograph_cache::CacheClass::Entity, &cache_key)
        {
            return Ok(Some((*cached).clone()));
        }
        let noun_key = keys::noun(id);
        let scoped = self.scoped_key(branch, &noun_key);
        let blob_bytes = match self.inner.noun_buffer.peek(&scoped) {
            Some(bytes) => Some(bytes),
            None => self.read_blob(branch, &noun_key).await?,
        };
        let Some(blob_bytes) = blob_bytes else {
            return Ok(None);
        };
        let blob: NounBlob = serde_json::from_slice(&blob_bytes)?;

        let meta_key = keys::noun_metadata(id);
        let scoped_meta = self.scoped_key(branch, &meta_key);
        let record: Option<NounMetadataRecord> = match self.inner.noun_buffer.peek(&scoped_meta) {
            Some(bytes) => serde_json::from_slice(&bytes).ok(),
            None => self.read_record(branch, &meta_key).await?,
        };

        let (noun_type, service, fields, created_at, updated_at) = match record {
            Some(record) => (
                record.noun,
                record.service,
                record.fields,
                record.created_at,
                record.updated_at,
            ),
            None => (NounType::Other, None, BTreeMap::new(), 0, 0),
        };
        let entity = Entity {
            id,
            noun_type,
            vector: blob.vector,
            service,
            metadata: fields,
            created_at,
            updated_at,
        };
        let size = entity.vector.len() * std::mem::size_of::<f32>()
            + serde_json::to_vec(&entity.metadata).map(|v| v.len()).unwrap_or(0);
        self.inner.cache.insert(
            neurograph_cache::CacheClass::Entity,
            cache_key,
            Arc::new(entity.clone()),
            size,
        );
        Ok(Some(entity))
    }

    /// Drops the cached entity on every branch: descendants inherit the
    /// mutated key through the overlay, so their cached copies go stale too.
    pub(crate) fn invalidate_entity_cache(&self, _branch: &str, id: NounId) {
        for record in self.inner.branches.list() {
            self.inner.cache.remove(
                neurograph_cache::CacheClass::Entity,
                &format!("{}/{id}", record.name),
            );
        }
    }

    pub(crate) async fn load_relation(
        &self,
        branch: &str,
        verb_id: VerbId,
    ) -> Result<Option<Relation>> {
        let key = keys::verb_metadata(verb_id);
        let scoped = self.scoped_key(branch, &key);
        let record: Option<VerbRecord> = match self.inner.verb_buffer.peek(&scoped) {
            Some(bytes) => serde_json::from_slice(&bytes).ok(),
            None => self.read_record(branch, &key).await?,
        };
        Ok(record.map(|record| Relation {
            id: verb_id,
            from: record.source_id,
            to: record.target_id,
            verb_type: record.verb,
            weight: record.weight,
            metadata: record.metadata,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }))
    }

    async fn resolve_vector(
        &self,
        data: &Option<String>,
        vector: &Option<Vector>,
    ) -> Result<Vector> {
        let vector = match (data, vector) {
            (Some(_), Some(_)) => {
                return Err(NeuroGraphError::InvalidArgument(
                    "provide either data or vector, not both".into(),
                ))
            }
            (Some(text), None) => self.inner.embedder.embed(text).await?,
            (None, Some(vector)) => vector.clone(),
            (None, None) => {
                return Err(NeuroGraphError::InvalidArgument(
                    "one of data or vector is required".into(),
                ))
            }
        };
        neurograph_vector::check_dimension(&vector, self.inner.config.dimension.0)?;
        Ok(vector)
    }

    fn write_noun_blob(
        &self,
        branch: &str,
        state: &Arc<BranchState>,
        id: NounId,
        vector: &[f32],
    ) -> Result<()> {
        let (level, connections) = state
            .hnsw
            .connection_map(&id)
            .ok_or_else(|| NeuroGraphError::Index(format!("missing hnsw node {id}")))?;
        let blob = NounBlob {
            id,
            vector: vector.to_vec(),
            level,
            connections,
        };
        self.inner.noun_buffer.enqueue(
            self.scoped_key(branch, &keys::noun(id)),
            Bytes::from(serde_json::to_vec(&blob)?),
        );
        self.inner.admission.record_buffered(1);
        Ok(())
    }

    /// Rewrites the blobs of neighbors whose connection lists changed during
    /// an insertion. The vector comes from the stored blob; connections come
    /// from the authoritative in-memory index.
    async fn rewrite_touched(
        &self,
        branch: &str,
        state: &Arc<BranchState>,
        touched: &[NounId],
        inserted: NounId,
    ) -> Result<()> {
        for id in touched {
            if *id == inserted {
                continue;
            }
            let key = keys::noun(*id);
            let scoped = self.scoped_key(branch, &key);
            let bytes = match self.inner.noun_buffer.peek(&scoped) {
                Some(bytes) => Some(bytes),
                None => self.read_blob(branch, &key).await?,
            };
            let Some(bytes) = bytes else {
                // Partial state from an interrupted insert; the node heals on
                // its next write.
                debug!(%id, "touched neighbor has no blob yet, skipping rewrite");
                continue;
            };
            let mut blob: NounBlob = serde_json::from_slice(&bytes)?;
            if let Some((level, connections)) = state.hnsw.connection_map(id) {
                blob.level = level;
                blob.connections = connections;
            }
            self.inner
                .noun_buffer
                .enqueue(scoped, Bytes::from(serde_json::to_vec(&blob)?));
        }
        Ok(())
    }

    fn write_metadata_record(
        &self,
        branch: &str,
        state: &Arc<BranchState>,
        id: NounId,
        record: &NounMetadataRecord,
    ) -> Result<()> {
        self.inner.noun_buffer.enqueue(
            self.scoped_key(branch, &keys::noun_metadata(id)),
            Bytes::from(serde_json::to_vec(record)?),
        );
        state.meta.add(id, &serde_json::to_value(record)?);
        self.inner.stats.record_metadata_added();
        Ok(())
    }

    async fn drop_verb_keys(&self, branch: &str, verb_id: VerbId) -> Result<()> {
        for key in [keys::verb(verb_id), keys::verb_metadata(verb_id)] {
            self.inner.verb_buffer.discard(&self.scoped_key(branch, &key));
            self.inner.branches.delete_key(branch, &key).await?;
        }
        Ok(())
    }

    async fn intercept_add(&self, request: AddRequest) -> Result<AddRequest> {
        if self.inner.hooks.is_empty() {
            return Ok(request);
        }
        let params = json!({
            "type": request.noun_type,
            "metadata": request.metadata.clone().unwrap_or(MetadataValue::Null),
        });
        match self
            .inner
            .hooks
            .run_interceptors(MutationOp::Add, params)
            .await
        {
            Ok(rewritten) => {
                let mut request = request;
                if let Some(metadata) = rewritten.get("metadata") {
                    if !metadata.is_null() {
                        request.metadata = Some(metadata.clone());
                    }
                }
                Ok(request)
            }
            Err(reason) => Err(NeuroGraphError::InvalidArgument(format!(
                "rejected by interceptor: {reason}"
            ))),
        }
    }

    fn note_outcome<T>(&self, outcome: &Result<T>) {
        match outcome {
            Ok(_) => self.inner.admission.record_success(),
            Err(_) => self.inner.admission.record_error(),
        }
    }

    pub(crate) fn entity_snapshot(entity: &Entity) -> Result<MetadataValue> {
        Ok(serde_json::to_value(entity)?)
    }
}

fn metadata_fields(
    metadata: Option<&MetadataValue>,
    data: Option<&str>,
) -> BTreeMap<String, MetadataValue> {
    let mut fields: BTreeMap<String, MetadataValue> = match metadata {
        Some(MetadataValue::Object(map)) => map.clone().into_iter().collect(),
        _ => BTreeMap::new(),
    };
    if let Some(data) = data {
        fields.insert("data".to_string(), MetadataValue::String(data.to_string()));
    }
    fields
}

fn merge_fields(fields: &mut BTreeMap<String, MetadataValue>, patch: &MetadataValue) {
    if let Some(patch) = patch.as_object() {
        for (key, value) in patch {
            if value.is_null() {
                fields.remove(key);
            } else {
                fields.insert(key.clone(), value.clone());
            }
        }
    }
}

pub struct CountsApi<'a> {
    store: &'a NeuroGraph,
}

impl CountsApi<'_> {
    pub async fn entities(&self) -> Result<u64> {
        Ok(self.store.current_state().await?.noun_count.load(Ordering::Acquire))
    }

    pub async fn relationships(&self) -> Result<u64> {
        Ok(self.store.current_state().await?.verb_count.load(Ordering::Acquire))
    }

    pub async fn by_type(&self, noun_type: NounType, exclude_vfs: bool) -> Result<u64> {
        let state = self.store.current_state().await?;
        let typed = state.meta.bitmap_for("noun", &json!(noun_type.as_str()));
        if exclude_vfs {
            let vfs = state.meta.bitmap_for("service", &json!("vfs"));
            Ok((typed - vfs).len())
        } else {
            Ok(typed.len())
        }
    }

    pub async fn by_verb_type(&self, verb_type: VerbType) -> Result<u64> {
        Ok(self.store.current_state().await?.graph.count_by_type(verb_type) as u64)
    }
}

#[derive(Debug, Clone)]
pub enum VersionSelector {
    Number(u32),
    Tag(String),
}

pub struct VersionsApi<'a> {
    store: &'a NeuroGraph,
}

impl VersionsApi<'_> {
    pub async fn save(&self, id: NounId, opts: SaveOptions) -> Result<VersionRecord> {
        let branch = self.store.get_current_branch();
        let entity = self
            .store
            .load_entity(&branch, id)
            .await?
            .ok_or_else(|| NeuroGraphError::NotFound(format!("noun {id}")))?;
        let snapshot = NeuroGraph::entity_snapshot(&entity)?;
        self.store.inner.versions.save(&branch, id, &snapshot, opts).await
    }

    pub async fn list(&self, id: NounId) -> Result<Vec<VersionRecord>> {
        self.store
            .inner
            .versions
            .list(&self.store.get_current_branch(), id)
            .await
    }

    pub async fn get_latest(&self, id: NounId) -> Result<Option<VersionRecord>> {
        self.store
            .inner
            .versions
            .get_latest(&self.store.get_current_branch(), id)
            .await
    }

    pub async fn get_version_by_tag(&self, id: NounId, tag: &str) -> Result<VersionRecord> {
        self.store
            .inner
            .versions
            .get_version_by_tag(&self.store.get_current_branch(), id, tag)
            .await
    }

    pub async fn count(&self, id: NounId) -> Result<usize> {
        self.store
            .inner
            .versions
            .count(&self.store.get_current_branch(), id)
            .await
    }

    pub async fn has_versions(&self, id: NounId) -> Result<bool> {
        self.store
            .inner
            .versions
            .has_versions(&self.store.get_current_branch(), id)
            .await
    }

    pub async fn get_content(&self, id: NounId, version: u32) -> Result<MetadataValue> {
        self.store
            .inner
            .versions
            .get_content(&self.store.get_current_branch(), id, version)
            .await
    }

    pub async fn compare(&self, id: NounId, from: u32, to: u32) -> Result<VersionDiff> {
        self.store
            .inner
            .versions
            .compare(&self.store.get_current_branch(), id, from, to)
            .await
    }

    /// Restores a version by performing a normal update with the snapshot's
    /// vector and metadata.
    pub async fn restore(&self, id: NounId, selector: VersionSelector) -> Result<()> {
        let branch = self.store.get_current_branch();
        let record = match selector {
            VersionSelector::Number(version) => {
                self.store.inner.versions.get_record(&branch, id, version).await?
            }
            VersionSelector::Tag(tag) => {
                self.store
                    .inner
                    .versions
                    .get_version_by_tag(&branch, id, &tag)
                    .await?
            }
        };
        let snapshot = self
            .store
            .inner
            .versions
            .content_by_hash(&record.content_hash)
            .await?;
        let vector: Option<Vector> = snapshot
            .get("vector")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let metadata = snapshot.get("metadata").cloned();
        self.store
            .update(UpdateRequest {
                id,
                data: None,
                vector,
                metadata,
                replace_metadata: true,
            })
            .await
    }

    /// Reverts to the most recently saved version.
    pub async fn undo(&self, id: NounId) -> Result<()> {
        let latest = self
            .get_latest(id)
            .await?
            .ok_or_else(|| NeuroGraphError::NotFound(format!("no versions for {id}")))?;
        self.restore(id, VersionSelector::Number(latest.version)).await
    }

    pub async fn prune(&self, id: NounId, opts: PruneOptions) -> Result<usize> {
        self.store
            .inner
            .versions
            .prune(&self.store.get_current_branch(), id, opts)
            .await
    }
}
