//! Copy-on-write branches.
//!
//! A branch is a namespace overlay: reads try `branches/<name>/<key>` first
//! and fall through the parent chain down to `main`, which owns the root
//! namespace. Writes always land under the current branch. Deleting an
//! inherited key on a non-main branch writes a tombstone that shadows the
//! parent's value.

use bytes::Bytes;
use dashmap::DashMap;
use neurograph_core::{now_millis, BranchRecord, NeuroGraphError, Result};
use neurograph_kv::{keys, KvStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

const TOMBSTONE: &[u8] = b"{\"__tombstone\":true}";

pub fn is_tombstone(bytes: &[u8]) -> bool {
    bytes == TOMBSTONE
}

pub struct BranchManager {
    kv: Arc<KvStore>,
    records: DashMap<String, BranchRecord>,
}

impl BranchManager {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self {
            kv,
            records: DashMap::new(),
        }
    }

    /// Loads branch records; creates `main` on first boot.
    pub async fn init(&self) -> Result<()> {
        let listed = neurograph_kv::list_all(self.kv.backend().as_ref(), keys::BRANCHES).await?;
        for key in listed {
            // Overlay keys (`branches/<name>/...`) share the prefix with the
            // records; records have no further path segments.
            let name = &key[keys::BRANCHES.len()..];
            if name.contains('/') {
                continue;
            }
            if let Some(record) = self.kv.get_json::<BranchRecord>(&key).await? {
                self.records.insert(record.name.clone(), record);
            }
        }
        if !self.records.contains_key(keys::MAIN_BRANCH) {
            let record = BranchRecord {
                name: keys::MAIN_BRANCH.to_string(),
                parent: None,
                description: None,
                created_at: now_millis(),
            };
            self.kv
                .put_json(&keys::branch_record(keys::MAIN_BRANCH), &record)
                .await?;
            self.records.insert(record.name.clone(), record);
        }
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn list(&self) -> Vec<BranchRecord> {
        let mut records: Vec<BranchRecord> = self.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn record(&self, name: &str) -> Option<BranchRecord> {
        self.records.get(name).map(|r| r.clone())
    }

    /// Creates `name` as a copy-on-write child of `parent`.
    pub async fn create(
        &self,
        name: &str,
        parent: &str,
        description: Option<String>,
    ) -> Result<BranchRecord> {
        if name.is_empty() || name.contains('/') {
            return Err(NeuroGraphError::InvalidArgument(format!(
                "invalid branch name '{name}'"
            )));
        }
        if self.records.contains_key(name) {
            return Err(NeuroGraphError::AlreadyExists(format!("branch '{name}'")));
        }
        if !self.records.contains_key(parent) {
            return Err(NeuroGraphError::NotFound(format!("branch '{parent}'")));
        }
        let record = BranchRecord {
            name: name.to_string(),
            parent: Some(parent.to_string()),
            description,
            created_at: now_millis(),
        };
        self.kv.put_json(&keys::branch_record(name), &record).await?;
        self.records.insert(name.to_string(), record.clone());
        info!(branch = name, parent, "branch created");
        Ok(record)
    }

    /// Deletes the branch record and its entire overlay.
    pub async fn delete(&self, name: &str) -> Result<()> {
        if name == keys::MAIN_BRANCH {
            return Err(NeuroGraphError::InvalidArgument(
                "the main branch cannot be deleted".into(),
            ));
        }
        if self.records.remove(name).is_none() {
            return Err(NeuroGraphError::NotFound(format!("branch '{name}'")));
        }
        let overlay_prefix = format!("{}{}/", keys::BRANCHES, name);
        for key in neurograph_kv::list_all(self.kv.backend().as_ref(), &overlay_prefix).await? {
            self.kv.delete(&key).await?;
        }
        self.kv.delete(&keys::branch_record(name)).await?;
        info!(branch = name, "branch deleted");
        Ok(())
    }

    /// Branch resolution order: the branch itself, then each parent, ending
    /// at `main`.
    pub fn chain(&self, branch: &str) -> Vec<String> {
        let mut chain = vec![branch.to_string()];
        let mut current = branch.to_string();
        while let Some(record) = self.records.get(&current) {
            match &record.parent {
                Some(parent) if !chain.contains(parent) => {
                    chain.push(parent.clone());
                    current = parent.clone();
                }
                _ => break,
            }
        }
        if chain.last().map(String::as_str) != Some(keys::MAIN_BRANCH) {
            chain.push(keys::MAIN_BRANCH.to_string());
        }
        chain
    }

    /// Overlay read with parent fallthrough; a tombstone anywhere in the
    /// chain hides the key from that branch down.
    pub async fn read(&self, branch: &str, key: &str) -> Result<Option<Bytes>> {
        for layer in self.chain(branch) {
            match self.kv.get(&keys::scoped(&layer, key)).await? {
                Some(bytes) if is_tombstone(&bytes) => return Ok(None),
                Some(bytes) => return Ok(Some(bytes)),
                None => continue,
            }
        }
        Ok(None)
    }

    pub async fn read_json<T: DeserializeOwned>(&self, branch: &str, key: &str) -> Result<Option<T>> {
        match self.read(branch, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Writes always go to the branch's own overlay.
    pub async fn write(&self, branch: &str, key: &str, value: Bytes) -> Result<()> {
        self.kv.put(&keys::scoped(branch, key), value).await
    }

    pub async fn write_json<T: Serialize>(&self, branch: &str, key: &str, value: &T) -> Result<()> {
        self.write(branch, key, Bytes::from(serde_json::to_vec(value)?))
            .await
    }

    /// On `main` a delete is real; on any other branch it writes a tombstone
    /// so the parent's value stays shadowed.
    pub async fn delete_key(&self, branch: &str, key: &str) -> Result<()> {
        if branch == keys::MAIN_BRANCH {
            self.kv.delete(key).await
        } else {
            self.kv
                .put(&keys::scoped(branch, key), Bytes::from_static(TOMBSTONE))
                .await
        }
    }

    /// The scoped key a buffered writer should use for `branch`.
    pub fn write_key(&self, branch: &str, key: &str) -> String {
        keys::scoped(branch, key)
    }

    /// Effective (unscoped) keys under `prefix` as seen from `branch`:
    /// the union across the chain, minus tombstoned keys.
    pub async fn list_effective(&self, branch: &str, prefix: &str) -> Result<Vec<String>> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut hidden: BTreeSet<String> = BTreeSet::new();
        for layer in self.chain(branch) {
            let scoped_prefix = keys::scoped(&layer, prefix);
            for scoped_key in
                neurograph_kv::list_all(self.kv.backend().as_ref(), &scoped_prefix).await?
            {
                let key = keys::unscoped(&layer, &scoped_key).to_string();
                if seen.contains(&key) || hidden.contains(&key) {
                    continue;
                }
                match self.kv.get(&scoped_key).await? {
                    Some(bytes) if is_tombstone(&bytes) => {
                        hidden.insert(key);
                    }
                    Some(_) => {
                        seen.insert(key);
                    }
                    None => {}
                }
            }
        }
        Ok(seen.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurograph_core::BatchReadConfig;
    use neurograph_kv::MemoryBackend;

    async fn manager() -> BranchManager {
        let kv = Arc::new(KvStore::new(
            Arc::new(MemoryBackend::new()),
            BatchReadConfig::default(),
        ));
        let manager = BranchManager::new(kv);
        manager.init().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn main_exists_after_init() {
        let branches = manager().await;
        assert!(branches.exists("main"));
        assert_eq!(branches.chain("main"), vec!["main"]);
    }

    #[tokio::test]
    async fn child_reads_fall_through_to_parent() {
        let branches = manager().await;
        branches
            .write("main", "nouns/x", Bytes::from_static(b"parent"))
            .await
            .unwrap();
        branches.create("feature", "main", None).await.unwrap();

        assert_eq!(
            branches.read("feature", "nouns/x").await.unwrap().unwrap(),
            Bytes::from_static(b"parent")
        );

        branches
            .write("feature", "nouns/x", Bytes::from_static(b"own"))
            .await
            .unwrap();
        assert_eq!(
            branches.read("feature", "nouns/x").await.unwrap().unwrap(),
            Bytes::from_static(b"own")
        );
        // The parent never sees the child's write.
        assert_eq!(
            branches.read("main", "nouns/x").await.unwrap().unwrap(),
            Bytes::from_static(b"parent")
        );
    }

    #[tokio::test]
    async fn tombstone_shadows_inherited_key() {
        let branches = manager().await;
        branches
            .write("main", "nouns/x", Bytes::from_static(b"parent"))
            .await
            .unwrap();
        branches.create("feature", "main", None).await.unwrap();
        branches.delete_key("feature", "nouns/x").await.unwrap();

        assert!(branches.read("feature", "nouns/x").await.unwrap().is_none());
        assert!(branches.read("main", "nouns/x").await.unwrap().is_some());
        let effective = branches.list_effective("feature", "nouns/").await.unwrap();
        assert!(effective.is_empty());
    }

    #[tokio::test]
    async fn effective_listing_merges_the_chain() {
        let branches = manager().await;
        branches
            .write("main", "nouns/a", Bytes::from_static(b"1"))
            .await
            .unwrap();
        branches.create("feature", "main", None).await.unwrap();
        branches
            .write("feature", "nouns/b", Bytes::from_static(b"2"))
            .await
            .unwrap();

        assert_eq!(
            branches.list_effective("feature", "nouns/").await.unwrap(),
            vec!["nouns/a".to_string(), "nouns/b".to_string()]
        );
        assert_eq!(
            branches.list_effective("main", "nouns/").await.unwrap(),
            vec!["nouns/a".to_string()]
        );
    }

    #[tokio::test]
    async fn grandchild_chains_to_main() {
        let branches = manager().await;
        branches.create("dev", "main", None).await.unwrap();
        branches.create("topic", "dev", None).await.unwrap();
        assert_eq!(branches.chain("topic"), vec!["topic", "dev", "main"]);
    }

    #[tokio::test]
    async fn delete_branch_removes_overlay() {
        let branches = manager().await;
        branches.create("feature", "main", None).await.unwrap();
        branches
            .write("feature", "nouns/x", Bytes::from_static(b"v"))
            .await
            .unwrap();
        branches.delete("feature").await.unwrap();
        assert!(!branches.exists("feature"));
        assert!(matches!(
            branches.delete("feature").await,
            Err(NeuroGraphError::NotFound(_))
        ));
        assert!(matches!(
            branches.delete("main").await,
            Err(NeuroGraphError::InvalidArgument(_))
        ));
    }
}
