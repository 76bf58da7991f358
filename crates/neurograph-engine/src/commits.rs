//! Commits and point-in-time reads.
//!
//! A commit snapshots every entity visible on a branch by version number:
//! entities without a current version get one saved (cheap when unchanged,
//! by CAS), and the manifest maps entity id to version. `as_of` opens a
//! read-only view that resolves entities through that manifest, hydrating
//! version blobs lazily behind a bounded LRU.

use crate::api::Entity;
use crate::store::NeuroGraph;
use crate::versions::SaveOptions;
use lru::LruCache;
use neurograph_core::{
    now_millis, MetadataValue, NeuroGraphError, NounId, NounType, Result, TimestampMillis,
};
use neurograph_kv::{keys, list_all};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use tracing::info;
use uuid::Uuid;

const COMMITS: &str = "_system/commits/";
const DEFAULT_AS_OF_CACHE: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub id: Uuid,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataValue>,
    pub created_at: TimestampMillis,
    /// entityId → version number at commit time.
    pub entities: BTreeMap<NounId, u32>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub message: Option<String>,
    pub author: Option<String>,
    pub metadata: Option<MetadataValue>,
}

impl NeuroGraph {
    /// Snapshots the current branch. Returns the commit id.
    pub async fn commit(&self, opts: CommitOptions) -> Result<Uuid> {
        let branch = self.get_current_branch();
        let noun_keys = self.inner.branches.list_effective(&branch, keys::NOUNS).await?;

        let mut entities = BTreeMap::new();
        for key in noun_keys {
            let Some(id) = key
                .strip_prefix(keys::NOUNS)
                .and_then(|s| s.parse::<NounId>().ok())
            else {
                continue;
            };
            let Some(entity) = self.load_entity(&branch, id).await? else {
                continue;
            };
            let snapshot = NeuroGraph::entity_snapshot(&entity)?;
            let record = self
                .inner
                .versions
                .save(
                    &branch,
                    id,
                    &snapshot,
                    SaveOptions {
                        description: opts.message.clone(),
                        ..Default::default()
                    },
                )
                .await?;
            entities.insert(id, record.version);
        }

        let commit = CommitRecord {
            id: Uuid::new_v4(),
            branch: branch.clone(),
            message: opts.message,
            author: opts.author,
            metadata: opts.metadata,
            created_at: now_millis(),
            entities,
        };
        let key = format!("{COMMITS}{:013}_{}", commit.created_at, commit.id);
        self.inner.kv.put_json(&key, &commit).await?;
        info!(commit = %commit.id, branch, entities = commit.entities.len(), "commit created");
        Ok(commit.id)
    }

    /// Commit history, newest first, optionally per branch.
    pub async fn get_history(
        &self,
        branch: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CommitRecord>> {
        let target = branch
            .map(str::to_string)
            .unwrap_or_else(|| self.get_current_branch());
        let mut commits = Vec::new();
        for key in list_all(self.inner.kv.backend().as_ref(), COMMITS).await? {
            if let Some(commit) = self.inner.kv.get_json::<CommitRecord>(&key).await? {
                if commit.branch == target {
                    commits.push(commit);
                }
            }
        }
        commits.reverse();
        if let Some(limit) = limit {
            commits.truncate(limit);
        }
        Ok(commits)
    }

    /// Opens a read-only view pinned to a commit.
    pub async fn as_of(&self, commit_id: Uuid, cache_size: Option<usize>) -> Result<AsOfView> {
        let commit = self.find_commit(commit_id).await?;
        Ok(AsOfView {
            store: self.clone(),
            commit,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cache_size.unwrap_or(DEFAULT_AS_OF_CACHE))
                    .unwrap_or(NonZeroUsize::MIN),
            )),
        })
    }

    async fn find_commit(&self, commit_id: Uuid) -> Result<CommitRecord> {
        for key in list_all(self.inner.kv.backend().as_ref(), COMMITS).await? {
            if let Some(commit) = self.inner.kv.get_json::<CommitRecord>(&key).await? {
                if commit.id == commit_id {
                    return Ok(commit);
                }
            }
        }
        Err(NeuroGraphError::NotFound(format!("commit {commit_id}")))
    }
}

/// Read-only store view at a commit.
pub struct AsOfView {
    store: NeuroGraph,
    commit: CommitRecord,
    cache: Mutex<LruCache<NounId, Entity>>,
}

impl AsOfView {
    pub fn commit(&self) -> &CommitRecord {
        &self.commit
    }

    pub fn contains(&self, id: &NounId) -> bool {
        self.commit.entities.contains_key(id)
    }

    pub fn ids(&self) -> Vec<NounId> {
        self.commit.entities.keys().copied().collect()
    }

    /// Lazily hydrates `id` from its pinned version blob.
    pub async fn get(&self, id: NounId) -> Result<Option<Entity>> {
        if let Some(entity) = self.cache.lock().get(&id) {
            return Ok(Some(entity.clone()));
        }
        let Some(version) = self.commit.entities.get(&id) else {
            return Ok(None);
        };
        let snapshot = self
            .store
            .inner
            .versions
            .get_content(&self.commit.branch, id, *version)
            .await?;
        let entity = entity_from_snapshot(id, &snapshot)?;
        self.cache.lock().put(id, entity.clone());
        Ok(Some(entity))
    }
}

fn entity_from_snapshot(id: NounId, snapshot: &MetadataValue) -> Result<Entity> {
    let noun_type = snapshot
        .get("nounType")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(NounType::Other);
    let vector = snapshot
        .get("vector")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let metadata = snapshot
        .get("metadata")
        .and_then(|v| v.as_object())
        .map(|map| map.clone().into_iter().collect())
        .unwrap_or_default();
    Ok(Entity {
        id,
        noun_type,
        vector,
        service: snapshot
            .get("service")
            .and_then(|v| v.as_str())
            .map(String::from),
        metadata,
        created_at: snapshot.get("createdAt").and_then(|v| v.as_i64()).unwrap_or(0),
        updated_at: snapshot.get("updatedAt").and_then(|v| v.as_i64()).unwrap_or(0),
    })
}
