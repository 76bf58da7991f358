//! Append-only change log for reconciliation and replication.

use crate::{keys, KvBackend};
use bytes::Bytes;
use neurograph_core::{
    now_millis, ChangeLogEntry, ChangeOp, EntityKind, MetadataValue, Result, TimestampMillis,
};
use rand::Rng;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct ChangeLog {
    backend: Arc<dyn KvBackend>,
    instance_id: String,
}

impl ChangeLog {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            instance_id: format!("{:08x}", rand::rng().random::<u32>()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Appends one entry keyed `<ts>_<rand>` so concurrent writers at the
    /// same millisecond never collide.
    pub async fn append(
        &self,
        op: ChangeOp,
        entity_type: EntityKind,
        entity_id: Uuid,
        data: Option<MetadataValue>,
    ) -> Result<ChangeLogEntry> {
        let entry = ChangeLogEntry {
            timestamp: now_millis(),
            op,
            entity_type,
            entity_id,
            data,
            instance_id: Some(self.instance_id.clone()),
        };
        let key = keys::changelog(entry.timestamp, rand::rng().random::<u32>());
        self.backend
            .put(&key, Bytes::from(serde_json::to_vec(&entry)?))
            .await?;
        Ok(entry)
    }

    /// Entries at or after `since`, oldest first, up to `max`.
    pub async fn get_changes_since(
        &self,
        since: TimestampMillis,
        max: usize,
    ) -> Result<Vec<ChangeLogEntry>> {
        let cursor = keys::changelog_cursor(since.saturating_sub(1));
        let mut entries = Vec::new();
        let mut page_cursor = Some(cursor);
        while entries.len() < max {
            let page = self
                .backend
                .list(
                    keys::CHANGELOG,
                    (max - entries.len()).min(1000),
                    page_cursor.as_deref(),
                )
                .await?;
            if page.keys.is_empty() {
                break;
            }
            for key in &page.keys {
                if let Some(bytes) = self.backend.get(key).await? {
                    if let Ok(entry) = serde_json::from_slice::<ChangeLogEntry>(&bytes) {
                        if entry.timestamp >= since {
                            entries.push(entry);
                        }
                    }
                }
            }
            match page.next_cursor {
                Some(next) => page_cursor = Some(next),
                None => break,
            }
        }
        entries.truncate(max);
        Ok(entries)
    }

    /// Deletes entries older than the watermark. Retention policy is the
    /// caller's responsibility.
    pub async fn cleanup_old_change_logs(&self, older_than: TimestampMillis) -> Result<usize> {
        let watermark = keys::changelog_cursor(older_than);
        let mut removed = 0;
        loop {
            let page = self.backend.list(keys::CHANGELOG, 1000, None).await?;
            let old: Vec<&String> = page.keys.iter().filter(|k| **k < watermark).collect();
            if old.is_empty() {
                break;
            }
            for key in old {
                self.backend.delete(key).await?;
                removed += 1;
            }
            if page.next_cursor.is_none() {
                break;
            }
        }
        debug!(removed, older_than, "change log cleanup");
        Ok(removed)
    }
}
