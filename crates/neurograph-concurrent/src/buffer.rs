//! Write buffering.
//!
//! Noun and verb writes go through separate buffers. Enqueue returns once the
//! item is buffered; the buffer drains when it crosses its item count, byte
//! size or age threshold, or when a caller forces a synchronous `flush()`.
//! Re-writes of a buffered key coalesce to the last value. Drains issue
//! point puts with bounded concurrency.

use crate::retry::with_retry;
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use neurograph_core::{BufferConfig, Result, RetryConfig};
use neurograph_kv::KvStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct WriteBuffer {
    label: &'static str,
    kv: Arc<KvStore>,
    config: BufferConfig,
    retry: RetryConfig,
    pending: Mutex<PendingState>,
    bytes: AtomicUsize,
    wakeup: Notify,
    /// Serializes drains so flush order matches buffer order.
    drain_gate: tokio::sync::Mutex<()>,
    flushed_items: AtomicUsize,
}

struct PendingState {
    items: HashMap<String, Bytes>,
    oldest: Option<Instant>,
}

impl WriteBuffer {
    pub fn new(label: &'static str, kv: Arc<KvStore>, config: BufferConfig) -> Self {
        Self::with_retry_config(label, kv, config, RetryConfig::default())
    }

    pub fn with_retry_config(
        label: &'static str,
        kv: Arc<KvStore>,
        config: BufferConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            label,
            kv,
            config,
            retry,
            pending: Mutex::new(PendingState {
                items: HashMap::new(),
                oldest: None,
            }),
            bytes: AtomicUsize::new(0),
            wakeup: Notify::new(),
            drain_gate: tokio::sync::Mutex::new(()),
            flushed_items: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flushed_items(&self) -> usize {
        self.flushed_items.load(Ordering::Acquire)
    }

    /// Buffers one write. Returns immediately; a threshold crossing only
    /// nudges the background drain.
    pub fn enqueue(&self, key: String, value: Bytes) {
        let size = key.len() + value.len();
        let mut pending = self.pending.lock();
        if let Some(old) = pending.items.insert(key, value) {
            self.bytes.fetch_sub(old.len(), Ordering::AcqRel);
        }
        self.bytes.fetch_add(size, Ordering::AcqRel);
        pending.oldest.get_or_insert_with(Instant::now);
        let should_flush = pending.items.len() >= self.config.max_items
            || self.bytes.load(Ordering::Acquire) >= self.config.max_bytes;
        drop(pending);
        if should_flush {
            self.wakeup.notify_one();
        }
    }

    /// Value buffered for `key`, if any. Readers consult this before the
    /// backend so a not-yet-flushed write is still visible.
    pub fn peek(&self, key: &str) -> Option<Bytes> {
        self.pending.lock().items.get(key).cloned()
    }

    /// Drops a pending write, so a following delete cannot be undone by a
    /// later drain.
    pub fn discard(&self, key: &str) {
        let mut pending = self.pending.lock();
        if let Some(old) = pending.items.remove(key) {
            let released = old.len() + key.len();
            let _ = self.bytes.fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| {
                Some(b.saturating_sub(released))
            });
        }
    }

    /// Drains everything currently buffered and waits for the puts to land.
    pub async fn flush(&self) -> Result<usize> {
        let _gate = self.drain_gate.lock().await;
        let batch: Vec<(String, Bytes)> = {
            let mut pending = self.pending.lock();
            pending.oldest = None;
            self.bytes.store(0, Ordering::Release);
            pending.items.drain().collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }
        let count = batch.len();
        let semaphore = Arc::new(Semaphore::new(self.config.flush_concurrency.max(1)));
        let mut puts = FuturesUnordered::new();
        for (key, value) in batch {
            let semaphore = Arc::clone(&semaphore);
            let kv = Arc::clone(&self.kv);
            let retry = self.retry.clone();
            puts.push(async move {
                let _permit = semaphore.acquire_owned().await;
                with_retry(&retry, "buffer_put", || kv.put(&key, value.clone())).await
            });
        }
        while let Some(outcome) = puts.next().await {
            outcome?;
        }
        self.flushed_items.fetch_add(count, Ordering::AcqRel);
        debug!(buffer = self.label, count, "buffer drained");
        Ok(count)
    }

    fn age_expired(&self) -> bool {
        self.pending
            .lock()
            .oldest
            .is_some_and(|t| t.elapsed() >= self.config.max_age)
    }

    /// Background drain loop: wakes on threshold nudges and on the age tick.
    pub fn spawn_flusher(self: Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let tick = self.config.max_age / 2;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        if let Err(e) = self.flush().await {
                            warn!(buffer = self.label, error = %e, "final drain failed");
                        }
                        break;
                    }
                    _ = self.wakeup.notified() => {
                        if let Err(e) = self.flush().await {
                            warn!(buffer = self.label, error = %e, "drain failed");
                        }
                    }
                    _ = tokio::time::sleep(tick) => {
                        if self.age_expired() {
                            if let Err(e) = self.flush().await {
                                warn!(buffer = self.label, error = %e, "drain failed");
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurograph_core::BatchReadConfig;
    use neurograph_kv::MemoryBackend;
    use std::time::Duration;

    fn kv() -> Arc<KvStore> {
        Arc::new(KvStore::new(
            Arc::new(MemoryBackend::new()),
            BatchReadConfig::default(),
        ))
    }

    #[tokio::test]
    async fn flush_writes_everything_once() {
        let kv = kv();
        let buffer = WriteBuffer::new("nouns", Arc::clone(&kv), BufferConfig::default());
        for i in 0..20 {
            buffer.enqueue(format!("nouns/{i}"), Bytes::from(format!("v{i}")));
        }
        assert_eq!(buffer.len(), 20);
        let drained = buffer.flush().await.unwrap();
        assert_eq!(drained, 20);
        assert!(buffer.is_empty());
        assert_eq!(
            kv.get("nouns/7").await.unwrap().unwrap(),
            Bytes::from_static(b"v7")
        );
    }

    #[tokio::test]
    async fn rewrites_coalesce_to_last_value() {
        let kv = kv();
        let buffer = WriteBuffer::new("nouns", Arc::clone(&kv), BufferConfig::default());
        buffer.enqueue("nouns/a".into(), Bytes::from_static(b"first"));
        buffer.enqueue("nouns/a".into(), Bytes::from_static(b"second"));
        assert_eq!(buffer.len(), 1);
        buffer.flush().await.unwrap();
        assert_eq!(
            kv.get("nouns/a").await.unwrap().unwrap(),
            Bytes::from_static(b"second")
        );
    }

    #[tokio::test]
    async fn age_trigger_drains_in_background() {
        let kv = kv();
        let buffer = Arc::new(WriteBuffer::new(
            "verbs",
            Arc::clone(&kv),
            BufferConfig {
                max_age: Duration::from_millis(20),
                ..BufferConfig::default()
            },
        ));
        let token = CancellationToken::new();
        let handle = Arc::clone(&buffer).spawn_flusher(token.clone());

        buffer.enqueue("verbs/x".into(), Bytes::from_static(b"v"));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(buffer.is_empty());
        assert!(kv.get("verbs/x").await.unwrap().is_some());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn size_trigger_nudges_the_flusher() {
        let kv = kv();
        let buffer = Arc::new(WriteBuffer::new(
            "nouns",
            Arc::clone(&kv),
            BufferConfig {
                max_items: 5,
                max_age: Duration::from_secs(60),
                ..BufferConfig::default()
            },
        ));
        let token = CancellationToken::new();
        let handle = Arc::clone(&buffer).spawn_flusher(token.clone());

        for i in 0..5 {
            buffer.enqueue(format!("nouns/{i}"), Bytes::from_static(b"v"));
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(buffer.is_empty());
        assert_eq!(buffer.flushed_items(), 5);

        token.cancel();
        handle.await.unwrap();
    }
}
