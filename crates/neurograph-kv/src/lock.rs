//! Cooperative distributed locks over the blob backend.
//!
//! The lock is advisory: acquisition is read-then-write with no compare-and-
//! swap, so a last-writer-wins race can admit two holders in rare windows.
//! Critical sections guarded this way must be idempotent (statistics merges
//! are commutative, metadata writes are last-writer-wins). Release only
//! deletes the record when the stored value still matches the guard, so a
//! slow holder never deletes a successor's lock.

use crate::{keys, list_all, KvBackend};
use bytes::Bytes;
use neurograph_core::{now_millis, LockConfig, LockRecord, NeuroGraphError, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct DistributedLock {
    backend: Arc<dyn KvBackend>,
    config: LockConfig,
}

#[derive(Debug, Clone)]
pub struct LockGuard {
    pub name: String,
    pub lock_value: String,
    pub expires_at: i64,
}

impl DistributedLock {
    pub fn new(backend: Arc<dyn KvBackend>, config: LockConfig) -> Self {
        Self { backend, config }
    }

    /// Tries to take `name` for `ttl`. Returns `None` when the lock is held
    /// and unexpired after the configured attempts; callers decide whether
    /// that falls open (idempotent sections) or surfaces as `Conflict`.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockGuard>> {
        let key = keys::lock(name);
        for attempt in 0..self.config.acquire_attempts {
            let now = now_millis();
            let existing = self.read_record(&key).await?;
            let free = match existing {
                None => true,
                Some(record) => record.is_expired(now),
            };
            if free {
                let lock_value = format!("{:016x}", rand::rng().random::<u64>());
                let record = LockRecord {
                    lock_value: lock_value.clone(),
                    expires_at: now + ttl.as_millis() as i64,
                    pid: std::process::id(),
                    timestamp: now,
                };
                self.backend
                    .put(&key, Bytes::from(serde_json::to_vec(&record)?))
                    .await?;
                debug!(lock = name, attempt, "acquired distributed lock");
                return Ok(Some(LockGuard {
                    name: name.to_string(),
                    lock_value,
                    expires_at: record.expires_at,
                }));
            }
            if attempt + 1 < self.config.acquire_attempts {
                let backoff = Duration::from_millis(50 << attempt);
                tokio::time::sleep(backoff).await;
            }
        }
        debug!(lock = name, "lock contended, giving up");
        Ok(None)
    }

    /// Acquire or fail with `Conflict`, for sections that are not idempotent.
    pub async fn acquire_required(&self, name: &str, ttl: Duration) -> Result<LockGuard> {
        self.acquire(name, ttl).await?.ok_or_else(|| {
            NeuroGraphError::Conflict(format!("lock '{name}' contended after retries"))
        })
    }

    /// Deletes the lock record only if it still carries the guard's value.
    pub async fn release(&self, guard: &LockGuard) -> Result<()> {
        let key = keys::lock(&guard.name);
        match self.read_record(&key).await? {
            Some(record) if record.lock_value == guard.lock_value => {
                self.backend.delete(&key).await?;
            }
            Some(_) => {
                warn!(lock = %guard.name, "lock was taken over before release, leaving it");
            }
            None => {}
        }
        Ok(())
    }

    /// Deletes every lock record whose expiry is in the past.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = now_millis();
        let mut removed = 0;
        for key in list_all(self.backend.as_ref(), keys::LOCKS).await? {
            if let Some(record) = self.read_record(&key).await? {
                if record.is_expired(now) {
                    self.backend.delete(&key).await?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "swept expired locks");
        }
        Ok(removed)
    }

    /// Background sweep until the token is cancelled.
    pub fn spawn_sweeper(self: Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = self.sweep_expired().await {
                            warn!(error = %e, "lock sweep failed");
                        }
                    }
                }
            }
        })
    }

    async fn read_record(&self, key: &str) -> Result<Option<LockRecord>> {
        match self.backend.get(key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    fn lock_manager() -> DistributedLock {
        DistributedLock::new(
            Arc::new(MemoryBackend::new()),
            LockConfig {
                acquire_attempts: 2,
                ..LockConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn acquire_release_cycle() {
        let locks = lock_manager();
        let guard = locks
            .acquire("statistics", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        // Second acquisition is refused while held.
        assert!(locks
            .acquire("statistics", Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
        locks.release(&guard).await.unwrap();
        assert!(locks
            .acquire("statistics", Duration::from_secs(30))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn expired_lock_is_reacquirable() {
        let locks = lock_manager();
        let _stale = locks
            .acquire("rebuild", Duration::from_millis(0))
            .await
            .unwrap()
            .unwrap();
        let fresh = locks
            .acquire("rebuild", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(fresh.is_some());
    }

    #[tokio::test]
    async fn release_only_matching_value() {
        let locks = lock_manager();
        let stale = locks
            .acquire("idmap", Duration::from_millis(0))
            .await
            .unwrap()
            .unwrap();
        let current = locks
            .acquire("idmap", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        // The stale holder must not delete the new record.
        locks.release(&stale).await.unwrap();
        assert!(locks
            .acquire("idmap", Duration::from_secs(10))
            .await
            .unwrap()
            .is_none());
        locks.release(&current).await.unwrap();
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let locks = lock_manager();
        locks
            .acquire("dead", Duration::from_millis(0))
            .await
            .unwrap()
            .unwrap();
        locks
            .acquire("alive", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let removed = locks.sweep_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(locks
            .acquire("alive", Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn required_acquisition_conflicts() {
        let locks = lock_manager();
        let _held = locks
            .acquire("migrate", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let err = locks
            .acquire_required("migrate", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, NeuroGraphError::Conflict(_)));
    }
}
