//! Store statistics: in-memory running counters, periodically merged into the
//! per-date persisted blob under the `statistics` distributed lock.
//!
//! Counters are increment-only and merges take the max of each counter, so
//! concurrent flushes from cooperating writers keep every counter monotone.

use crate::{keys, DistributedLock, KvBackend};
use bytes::Bytes;
use chrono::Utc;
use neurograph_core::{
    now_millis, NounType, Result, StatisticsBlob, StatisticsConfig, VerbType,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const STATISTICS_LOCK: &str = "statistics";

pub struct StatisticsTracker {
    backend: Arc<dyn KvBackend>,
    lock: Arc<DistributedLock>,
    config: StatisticsConfig,
    counters: Mutex<StatisticsBlob>,
    dirty: AtomicBool,
    last_flush: Mutex<Instant>,
}

impl StatisticsTracker {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        lock: Arc<DistributedLock>,
        config: StatisticsConfig,
    ) -> Self {
        Self {
            backend,
            lock,
            config,
            counters: Mutex::new(StatisticsBlob::default()),
            dirty: AtomicBool::new(false),
            last_flush: Mutex::new(Instant::now()),
        }
    }

    pub fn record_noun_added(&self, noun_type: NounType) {
        let mut counters = self.counters.lock();
        counters.total_nodes += 1;
        *counters
            .by_type
            .entry(format!("noun:{noun_type}"))
            .or_insert(0) += 1;
        counters.last_updated = now_millis();
        self.dirty.store(true, Ordering::Release);
    }

    pub fn record_verb_added(&self, verb_type: VerbType) {
        let mut counters = self.counters.lock();
        counters.total_edges += 1;
        *counters
            .by_type
            .entry(format!("verb:{verb_type}"))
            .or_insert(0) += 1;
        counters.last_updated = now_millis();
        self.dirty.store(true, Ordering::Release);
    }

    pub fn record_metadata_added(&self) {
        let mut counters = self.counters.lock();
        counters.total_metadata += 1;
        counters.last_updated = now_millis();
        self.dirty.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> StatisticsBlob {
        self.counters.lock().clone()
    }

    /// Seeds the in-memory counters from the persisted copy, migrating the
    /// legacy pre-`_system` key once if present.
    pub async fn cold_start(&self) -> Result<()> {
        if let Some(bytes) = self.backend.get(keys::LEGACY_STATS).await? {
            if let Ok(legacy) = serde_json::from_slice::<StatisticsBlob>(&bytes) {
                info!("migrating legacy statistics blob into canonical key");
                let mut counters = self.counters.lock();
                counters.merge_max(&legacy);
                drop(counters);
                self.dirty.store(true, Ordering::Release);
            }
            self.flush().await?;
            self.backend.delete(keys::LEGACY_STATS).await?;
        }
        if let Some(bytes) = self.backend.get(&self.today_key()).await? {
            if let Ok(persisted) = serde_json::from_slice::<StatisticsBlob>(&bytes) {
                self.counters.lock().merge_max(&persisted);
            }
        }
        Ok(())
    }

    /// Merges the running counters into today's persisted blob. The
    /// statistics section is idempotent, so a contended lock falls open with
    /// a warning instead of failing the flush.
    pub async fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let guard = self
            .lock
            .acquire(STATISTICS_LOCK, self.config.max_flush_delay)
            .await?;
        if guard.is_none() {
            warn!("statistics lock contended, flushing without it");
        }

        let key = self.today_key();
        let mut merged = match self.backend.get(&key).await? {
            Some(bytes) => serde_json::from_slice::<StatisticsBlob>(&bytes).unwrap_or_default(),
            None => StatisticsBlob::default(),
        };
        {
            let mut counters = self.counters.lock();
            merged.merge_max(&counters);
            *counters = merged.clone();
        }
        self.backend
            .put(&key, Bytes::from(serde_json::to_vec(&merged)?))
            .await?;
        *self.last_flush.lock() = Instant::now();
        debug!(
            nodes = merged.total_nodes,
            edges = merged.total_edges,
            "statistics flushed"
        );

        if let Some(guard) = guard {
            self.lock.release(&guard).await?;
        }
        Ok(())
    }

    /// Flush scheduling: at most once per `min_flush_interval`, at least once
    /// per `max_flush_delay` while dirty.
    pub fn spawn_flusher(
        self: Arc<Self>,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        if let Err(e) = self.flush().await {
                            warn!(error = %e, "final statistics flush failed");
                        }
                        break;
                    }
                    _ = tokio::time::sleep(self.config.min_flush_interval) => {
                        let overdue = self.last_flush.lock().elapsed() >= self.config.max_flush_delay;
                        if self.dirty.load(Ordering::Acquire) || overdue {
                            if let Err(e) = self.flush().await {
                                warn!(error = %e, "statistics flush failed");
                            }
                        }
                    }
                }
            }
        })
    }

    fn today_key(&self) -> String {
        keys::stats(&Utc::now().format("%Y-%m-%d").to_string())
    }
}
