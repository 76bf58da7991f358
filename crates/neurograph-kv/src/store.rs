use crate::{batch, KvBackend, ListPage};
use bytes::Bytes;
use neurograph_core::{BatchReadConfig, NeuroGraphError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

/// The facade every component reads and writes through. Wraps a backend with
/// the adaptive batch-read policy, typed JSON helpers, and the degraded
/// read-only latch: a permanent backend failure (auth revoked and the like)
/// flips the store so reads keep serving while every write fails with the
/// underlying error.
pub struct KvStore {
    backend: Arc<dyn KvBackend>,
    batch_read: BatchReadConfig,
    degraded: AtomicBool,
}

impl KvStore {
    pub fn new(backend: Arc<dyn KvBackend>, batch_read: BatchReadConfig) -> Self {
        Self {
            backend,
            batch_read,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> Arc<dyn KvBackend> {
        Arc::clone(&self.backend)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_degraded() {
            return Err(NeuroGraphError::Storage(
                "store is in degraded read-only mode".into(),
            ));
        }
        Ok(())
    }

    fn latch_on_permanent(&self, e: &NeuroGraphError) {
        if e.is_permanent_storage_failure() && !self.degraded.swap(true, Ordering::AcqRel) {
            error!(error = %e, "permanent backend failure, entering degraded read-only mode");
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.backend.get(key).await
    }

    pub async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.check_writable()?;
        self.backend.put(key, value).await.inspect_err(|e| {
            self.latch_on_permanent(e);
        })
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.backend.delete(key).await.inspect_err(|e| {
            self.latch_on_permanent(e);
        })
    }

    pub async fn list(
        &self,
        prefix: &str,
        max_keys: usize,
        cursor: Option<&str>,
    ) -> Result<ListPage> {
        self.backend.list(prefix, max_keys, cursor).await
    }

    pub async fn batch_get(&self, keys: &[String]) -> Result<HashMap<String, Bytes>> {
        batch::batch_get(Arc::clone(&self.backend), &self.batch_read, keys).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.put(key, Bytes::from(serde_json::to_vec(value)?)).await
    }
}
