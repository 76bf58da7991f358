//! Entity versioning with content-addressed snapshots.
//!
//! `save` hashes the canonical-JSON snapshot of an entity; the blob is
//! written once per distinct content (`_version_blob/<sha256>`) and each
//! version record (`_version/<id>/<n>/<branch>`) points at its hash. Saving
//! an unchanged entity is a no-op by CAS. Version namespaces are global:
//! the branch lives in the key, not in an overlay, so identical snapshots
//! dedupe across branches.

use neurograph_core::{
    canonical_json, now_millis, MetadataValue, NeuroGraphError, NounId, Result, TimestampMillis,
    VersionRecord,
};
use neurograph_kv::{keys, list_all, KvStore};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub tag: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PruneOptions {
    /// Keep this many most-recent versions regardless of other filters.
    pub keep_recent: Option<usize>,
    /// Never prune tagged versions.
    pub keep_tagged: bool,
    /// Only prune versions created strictly before this timestamp.
    pub older_than: Option<TimestampMillis>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub path: String,
    pub old_value: MetadataValue,
    pub new_value: MetadataValue,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionDiff {
    pub added: Vec<(String, MetadataValue)>,
    pub removed: Vec<(String, MetadataValue)>,
    pub modified: Vec<FieldChange>,
}

pub struct VersionManager {
    kv: Arc<KvStore>,
}

impl VersionManager {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    pub fn content_hash(snapshot: &MetadataValue) -> Result<String> {
        let bytes = canonical_json(snapshot)?;
        let digest = Sha256::digest(&bytes);
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Saves a snapshot. Identical content to the latest version returns the
    /// existing record instead of minting a new one.
    pub async fn save(
        &self,
        branch: &str,
        entity_id: NounId,
        snapshot: &MetadataValue,
        opts: SaveOptions,
    ) -> Result<VersionRecord> {
        let hash = Self::content_hash(snapshot)?;
        let latest = self.get_latest(branch, entity_id).await?;
        if let Some(latest) = latest.as_ref() {
            if latest.content_hash == hash {
                debug!(%entity_id, version = latest.version, "unchanged content, reusing version");
                return Ok(latest.clone());
            }
        }

        let blob_key = keys::version_blob(&hash);
        if self.kv.get(&blob_key).await?.is_none() {
            self.kv.put_json(&blob_key, snapshot).await?;
        }

        let record = VersionRecord {
            version: latest.map(|l| l.version).unwrap_or(0) + 1,
            tag: opts.tag,
            description: opts.description,
            content_hash: hash,
            created_at: now_millis(),
        };
        self.kv
            .put_json(&keys::version(entity_id, record.version, branch), &record)
            .await?;
        Ok(record)
    }

    /// All versions of an entity on `branch`, newest first.
    pub async fn list(&self, branch: &str, entity_id: NounId) -> Result<Vec<VersionRecord>> {
        let prefix = keys::version_prefix(entity_id);
        let mut records = Vec::new();
        for key in list_all(self.kv.backend().as_ref(), &prefix).await? {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let Some((_, key_branch)) = rest.split_once('/') else {
                continue;
            };
            if key_branch != branch {
                continue;
            }
            if let Some(record) = self.kv.get_json::<VersionRecord>(&key).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(records)
    }

    pub async fn get_record(
        &self,
        branch: &str,
        entity_id: NounId,
        version: u32,
    ) -> Result<VersionRecord> {
        self.kv
            .get_json::<VersionRecord>(&keys::version(entity_id, version, branch))
            .await?
            .ok_or_else(|| {
                NeuroGraphError::NotFound(format!("version {version} of {entity_id} on {branch}"))
            })
    }

    pub async fn get_version_by_tag(
        &self,
        branch: &str,
        entity_id: NounId,
        tag: &str,
    ) -> Result<VersionRecord> {
        self.list(branch, entity_id)
            .await?
            .into_iter()
            .find(|r| r.tag.as_deref() == Some(tag))
            .ok_or_else(|| {
                NeuroGraphError::NotFound(format!("tag '{tag}' on {entity_id} ({branch})"))
            })
    }

    pub async fn get_latest(
        &self,
        branch: &str,
        entity_id: NounId,
    ) -> Result<Option<VersionRecord>> {
        Ok(self.list(branch, entity_id).await?.into_iter().next())
    }

    pub async fn count(&self, branch: &str, entity_id: NounId) -> Result<usize> {
        Ok(self.list(branch, entity_id).await?.len())
    }

    pub async fn has_versions(&self, branch: &str, entity_id: NounId) -> Result<bool> {
        Ok(self.count(branch, entity_id).await? > 0)
    }

    pub async fn get_content(
        &self,
        branch: &str,
        entity_id: NounId,
        version: u32,
    ) -> Result<MetadataValue> {
        let record = self.get_record(branch, entity_id, version).await?;
        self.content_by_hash(&record.content_hash).await
    }

    pub async fn content_by_hash(&self, hash: &str) -> Result<MetadataValue> {
        self.kv
            .get_json::<MetadataValue>(&keys::version_blob(hash))
            .await?
            .ok_or_else(|| NeuroGraphError::NotFound(format!("version blob {hash}")))
    }

    /// Field-wise diff between two versions of an entity.
    pub async fn compare(
        &self,
        branch: &str,
        entity_id: NounId,
        from: u32,
        to: u32,
    ) -> Result<VersionDiff> {
        let old = self.get_content(branch, entity_id, from).await?;
        let new = self.get_content(branch, entity_id, to).await?;
        let mut diff = VersionDiff::default();
        diff_values("", &old, &new, &mut diff);
        Ok(diff)
    }

    /// Deletes version records matching the filter. Content blobs are
    /// reference-counted against every outstanding record store-wide and
    /// removed when the last reference goes.
    pub async fn prune(
        &self,
        branch: &str,
        entity_id: NounId,
        opts: PruneOptions,
    ) -> Result<usize> {
        let records = self.list(branch, entity_id).await?;
        let keep_newest: HashSet<u32> = records
            .iter()
            .take(opts.keep_recent.unwrap_or(0))
            .map(|r| r.version)
            .collect();

        let mut pruned = Vec::new();
        for record in &records {
            if keep_newest.contains(&record.version) {
                continue;
            }
            if opts.keep_tagged && record.tag.is_some() {
                continue;
            }
            if let Some(watermark) = opts.older_than {
                if record.created_at >= watermark {
                    continue;
                }
            }
            pruned.push(record.clone());
        }
        if pruned.is_empty() {
            return Ok(0);
        }

        for record in &pruned {
            self.kv
                .delete(&keys::version(entity_id, record.version, branch))
                .await?;
        }

        // Refcount surviving references to the pruned hashes across every
        // entity and branch before touching blobs.
        let candidates: HashSet<String> = pruned.iter().map(|r| r.content_hash.clone()).collect();
        let mut refs: HashMap<String, usize> =
            candidates.iter().map(|h| (h.clone(), 0)).collect();
        for key in list_all(self.kv.backend().as_ref(), keys::VERSIONS).await? {
            if let Some(record) = self.kv.get_json::<VersionRecord>(&key).await? {
                if let Some(count) = refs.get_mut(&record.content_hash) {
                    *count += 1;
                }
            }
        }
        for (hash, count) in refs {
            if count == 0 {
                self.kv.delete(&keys::version_blob(&hash)).await?;
            }
        }
        Ok(pruned.len())
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn diff_values(path: &str, old: &MetadataValue, new: &MetadataValue, out: &mut VersionDiff) {
    match (old, new) {
        (MetadataValue::Object(old_map), MetadataValue::Object(new_map)) => {
            for (key, old_value) in old_map {
                let child = join_path(path, key);
                match new_map.get(key) {
                    Some(new_value) => diff_values(&child, old_value, new_value, out),
                    None => out.removed.push((child, old_value.clone())),
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    out.added.push((join_path(path, key), new_value.clone()));
                }
            }
        }
        (old, new) if old != new => out.modified.push(FieldChange {
            path: path.to_string(),
            old_value: old.clone(),
            new_value: new.clone(),
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurograph_core::BatchReadConfig;
    use neurograph_kv::MemoryBackend;
    use serde_json::json;
    use uuid::Uuid;

    fn versions() -> VersionManager {
        VersionManager::new(Arc::new(KvStore::new(
            Arc::new(MemoryBackend::new()),
            BatchReadConfig::default(),
        )))
    }

    #[tokio::test]
    async fn save_is_idempotent_by_content() {
        let manager = versions();
        let id = Uuid::new_v4();
        let snapshot = json!({"metadata": {"name": "Alice"}});
        let first = manager
            .save("main", id, &snapshot, SaveOptions::default())
            .await
            .unwrap();
        assert_eq!(first.version, 1);
        let second = manager
            .save("main", id, &snapshot, SaveOptions::default())
            .await
            .unwrap();
        assert_eq!(second.version, 1);
        assert_eq!(manager.count("main", id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn distinct_content_increments_version_and_dedupes_blobs() {
        let manager = versions();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let shared = json!({"metadata": {"x": 1}});
        manager.save("main", a, &shared, SaveOptions::default()).await.unwrap();
        // Same content on another entity reuses the blob.
        manager.save("main", b, &shared, SaveOptions::default()).await.unwrap();
        let blobs = list_all(manager.kv.backend().as_ref(), keys::VERSION_BLOBS)
            .await
            .unwrap();
        assert_eq!(blobs.len(), 1);

        let v2 = manager
            .save("main", a, &json!({"metadata": {"x": 2}}), SaveOptions::default())
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
    }

    #[tokio::test]
    async fn compare_reports_dotted_paths() {
        let manager = versions();
        let id = Uuid::new_v4();
        manager
            .save(
                "main",
                id,
                &json!({"metadata": {"name": "Alice"}}),
                SaveOptions {
                    tag: Some("v1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        manager
            .save(
                "main",
                id,
                &json!({"metadata": {"name": "Alice Smith", "role": "engineer"}}),
                SaveOptions {
                    tag: Some("v2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let diff = manager.compare("main", id, 1, 2).await.unwrap();
        assert_eq!(
            diff.modified,
            vec![FieldChange {
                path: "metadata.name".into(),
                old_value: json!("Alice"),
                new_value: json!("Alice Smith"),
            }]
        );
        assert_eq!(diff.added, vec![("metadata.role".to_string(), json!("engineer"))]);
        assert!(diff.removed.is_empty());

        let by_tag = manager.get_version_by_tag("main", id, "v2").await.unwrap();
        assert_eq!(by_tag.version, 2);
    }

    #[tokio::test]
    async fn branches_have_independent_version_lines() {
        let manager = versions();
        let id = Uuid::new_v4();
        manager
            .save("main", id, &json!({"v": 1}), SaveOptions::default())
            .await
            .unwrap();
        manager
            .save("feature", id, &json!({"v": 2}), SaveOptions::default())
            .await
            .unwrap();
        assert_eq!(manager.count("main", id).await.unwrap(), 1);
        assert_eq!(manager.count("feature", id).await.unwrap(), 1);
        assert_eq!(
            manager.get_latest("feature", id).await.unwrap().unwrap().version,
            1
        );
    }

    #[tokio::test]
    async fn prune_respects_filters_and_refcounts_blobs() {
        let manager = versions();
        let id = Uuid::new_v4();
        for i in 0..4 {
            let opts = if i == 1 {
                SaveOptions {
                    tag: Some("keeper".into()),
                    ..Default::default()
                }
            } else {
                SaveOptions::default()
            };
            manager.save("main", id, &json!({"v": i}), opts).await.unwrap();
        }

        let pruned = manager
            .prune(
                "main",
                id,
                PruneOptions {
                    keep_recent: Some(1),
                    keep_tagged: true,
                    older_than: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(pruned, 2);

        let remaining = manager.list("main", id).await.unwrap();
        let versions: Vec<u32> = remaining.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![4, 2]);

        // Pruned blobs are gone, surviving blobs remain.
        let blobs = list_all(manager.kv.backend().as_ref(), keys::VERSION_BLOBS)
            .await
            .unwrap();
        assert_eq!(blobs.len(), 2);
    }
}
