use crate::{KvBackend, ListPage};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use neurograph_core::Result;

/// In-memory backend. The reference implementation for tests and for
/// sandboxed environments without filesystem access.
#[derive(Default)]
pub struct MemoryBackend {
    blobs: DashMap<String, Bytes>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.blobs.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.blobs.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.remove(key);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        max_keys: usize,
        cursor: Option<&str>,
    ) -> Result<ListPage> {
        let mut keys: Vec<String> = self
            .blobs
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .filter(|e| cursor.is_none_or(|c| e.key().as_str() > c))
            .map(|e| e.key().clone())
            .collect();
        keys.sort_unstable();
        let truncated = keys.len() > max_keys;
        keys.truncate(max_keys);
        let next_cursor = if truncated { keys.last().cloned() } else { None };
        Ok(ListPage { keys, next_cursor })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
