//! Request coalescing: concurrent reads of the same key within the in-flight
//! window share one underlying fetch.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use neurograph_core::{NeuroGraphError, Result};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

/// Cloneable error surrogate so a single failed fetch can be delivered to
/// every coalesced waiter without losing the retryable classification.
#[derive(Debug, Clone)]
struct SharedError {
    throttled: bool,
    message: String,
}

impl SharedError {
    fn capture(e: &NeuroGraphError) -> Self {
        Self {
            throttled: e.is_throttled(),
            message: e.to_string(),
        }
    }

    fn rebuild(&self) -> NeuroGraphError {
        if self.throttled {
            NeuroGraphError::Throttled(self.message.clone())
        } else {
            NeuroGraphError::Transient(self.message.clone())
        }
    }
}

type SharedFetch<V> = Shared<BoxFuture<'static, std::result::Result<V, SharedError>>>;

pub struct ReadCoalescer<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inflight: Arc<DashMap<K, SharedFetch<V>>>,
}

impl<K, V> Default for ReadCoalescer<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }
}

impl<K, V> ReadCoalescer<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Joins an in-flight fetch for `key`, or starts one with `fetch`. The
    /// entry is dropped when the fetch resolves so later reads see fresh
    /// data.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let shared = match self.inflight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let fut = fetch();
                let shared: SharedFetch<V> = async move {
                    fut.await.map_err(|e| SharedError::capture(&e))
                }
                .boxed()
                .shared();
                entry.insert(shared.clone());
                shared
            }
        };

        let outcome = shared.await;
        self.inflight.remove(&key);
        outcome.map_err(|e| e.rebuild())
    }
}
