//! The embeddable store: wiring, lifecycle and branch state management.

use crate::branch::BranchManager;
use crate::highlight::Highlighter;
use crate::versions::VersionManager;
use bytes::Bytes;
use dashmap::DashMap;
use neurograph_cache::UnifiedCache;
use neurograph_concurrent::{AdmissionController, ReadCoalescer, WriteBuffer};
use neurograph_core::{
    now_millis, BranchRecord, HookRegistry, NeuroGraphError, NounBlob, NounId,
    NounMetadataRecord, Result, StoreConfig, VerbId, VerbRecord,
};
use neurograph_graph::AdjacencyIndex;
use neurograph_index::{IdMap, MetadataIndex};
use neurograph_kv::{
    keys, ChangeLog, DistributedLock, KvBackend, KvStore, StatisticsTracker,
};
use neurograph_vector::{Embedder, EntrypointBlob, HnswIndex, TimeoutEmbedder};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RECONCILE_WATERMARK: &str = "_system/reconcile-watermark";
const EMBED_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-branch in-memory view: every index here is rebuildable from the blobs
/// visible on that branch.
pub(crate) struct BranchState {
    pub hnsw: HnswIndex,
    pub graph: AdjacencyIndex,
    pub meta: MetadataIndex,
    pub idmap: Arc<IdMap>,
    pub noun_count: AtomicU64,
    pub verb_count: AtomicU64,
}

pub(crate) struct StoreInner {
    pub config: StoreConfig,
    pub kv: Arc<KvStore>,
    pub branches: BranchManager,
    pub states: DashMap<String, Arc<BranchState>>,
    pub embedder: Arc<dyn Embedder>,
    pub locks: Arc<DistributedLock>,
    pub changelog: ChangeLog,
    pub stats: Arc<StatisticsTracker>,
    pub versions: VersionManager,
    pub highlighter: Highlighter,
    pub cache: UnifiedCache,
    pub admission: Arc<AdmissionController>,
    pub noun_buffer: Arc<WriteBuffer>,
    pub verb_buffer: Arc<WriteBuffer>,
    pub hooks: HookRegistry,
    pub read_coalescer: ReadCoalescer<String, Option<Bytes>>,
    pub write_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    pub shutdown: CancellationToken,
    pub tasks: Mutex<Vec<JoinHandle<()>>>,
    pub initialized: AtomicBool,
    pub fully_initialized: AtomicBool,
    pub ready_tx: tokio::sync::watch::Sender<bool>,
    pub ready_rx: tokio::sync::watch::Receiver<bool>,
}

/// Handle to the store on one branch. Cloning shares the engine; `fork` and
/// `checkout` give handles onto other branches over the same data.
pub struct NeuroGraph {
    pub(crate) inner: Arc<StoreInner>,
    pub(crate) branch: Arc<RwLock<String>>,
}

impl Clone for NeuroGraph {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            branch: Arc::clone(&self.branch),
        }
    }
}

impl NeuroGraph {
    pub fn new(
        config: StoreConfig,
        backend: Arc<dyn KvBackend>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let kv = Arc::new(KvStore::new(backend, config.batch_read.clone()));
        let locks = Arc::new(DistributedLock::new(kv.backend(), config.lock.clone()));
        let stats = Arc::new(StatisticsTracker::new(
            kv.backend(),
            Arc::clone(&locks),
            config.statistics.clone(),
        ));
        let embedder: Arc<dyn Embedder> =
            Arc::new(TimeoutEmbedder::new(Arc::clone(&embedder), EMBED_TIMEOUT));
        let (ready_tx, ready_rx) = tokio::sync::watch::channel(false);
        let inner = StoreInner {
            branches: BranchManager::new(Arc::clone(&kv)),
            states: DashMap::new(),
            locks,
            changelog: ChangeLog::new(kv.backend()),
            stats,
            versions: VersionManager::new(Arc::clone(&kv)),
            highlighter: Highlighter::new(Arc::clone(&embedder), config.highlight.clone()),
            cache: UnifiedCache::new(config.cache.clone()),
            admission: AdmissionController::new(config.backpressure.clone()),
            noun_buffer: Arc::new(WriteBuffer::with_retry_config(
                "nouns",
                Arc::clone(&kv),
                config.buffers.clone(),
                config.retry.clone(),
            )),
            verb_buffer: Arc::new(WriteBuffer::with_retry_config(
                "verbs",
                Arc::clone(&kv),
                config.buffers.clone(),
                config.retry.clone(),
            )),
            hooks: HookRegistry::new(),
            read_coalescer: ReadCoalescer::new(),
            write_locks: DashMap::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
            fully_initialized: AtomicBool::new(false),
            ready_tx,
            ready_rx,
            embedder,
            config,
            kv,
        };
        Self {
            inner: Arc::new(inner),
            branch: Arc::new(RwLock::new(keys::MAIN_BRANCH.to_string())),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    pub fn get_current_branch(&self) -> String {
        self.branch.read().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub fn is_fully_initialized(&self) -> bool {
        self.inner.fully_initialized.load(Ordering::Acquire)
    }

    /// Fast setup (branch records, statistics migration, background tasks),
    /// then a background build of the current branch's indexes. `ready()`
    /// resolves when the background phase completes.
    pub async fn init(&self) -> Result<()> {
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.branches.init().await?;
        self.inner.stats.cold_start().await?;

        let token = self.inner.shutdown.clone();
        let mut tasks = vec![
            Arc::clone(&self.inner.noun_buffer).spawn_flusher(token.clone()),
            Arc::clone(&self.inner.verb_buffer).spawn_flusher(token.clone()),
            Arc::clone(&self.inner.stats).spawn_flusher(token.clone()),
            Arc::clone(&self.inner.locks).spawn_sweeper(token.clone()),
        ];
        // Admission tick: heap sampling plus pressure re-evaluation.
        let admission = Arc::clone(&self.inner.admission);
        let tick_token = token.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tick_token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {
                        admission.sample_heap();
                        admission.evaluate();
                    }
                }
            }
        }));

        // Background index build for the starting branch.
        let store = self.clone();
        tasks.push(tokio::spawn(async move {
            let branch = store.get_current_branch();
            if let Err(e) = store.state_for(&branch).await {
                warn!(error = %e, branch = %branch, "background index build failed");
            }
            store.inner.fully_initialized.store(true, Ordering::Release);
            let _ = store.inner.ready_tx.send(true);
        }));
        self.inner.tasks.lock().extend(tasks);
        Ok(())
    }

    /// Resolves when background initialization has finished.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.inner.ready_rx.clone();
        while !*rx.borrow() {
            rx.changed()
                .await
                .map_err(|_| NeuroGraphError::Internal("init task dropped".into()))?;
        }
        Ok(())
    }

    pub async fn await_background_init(&self) -> Result<()> {
        self.ready().await
    }

    /// Drains buffers and persists every dirty in-memory structure.
    pub async fn flush(&self) -> Result<()> {
        self.inner.noun_buffer.flush().await?;
        self.inner.verb_buffer.flush().await?;
        let branch = self.get_current_branch();
        if let Some(state) = self.cached_state(&branch) {
            self.inner
                .branches
                .write_json(&branch, keys::HNSW_ENTRYPOINT, &state.hnsw.entrypoint_blob())
                .await?;
            if branch == keys::MAIN_BRANCH {
                state.meta.flush_chunks(&self.inner.kv).await?;
                neurograph_index::flush_idmap(&self.inner.kv, &state.idmap).await?;
                self.inner
                    .kv
                    .put_json(RECONCILE_WATERMARK, &now_millis())
                    .await?;
            }
        }
        self.inner.stats.flush().await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.flush().await?;
        self.inner.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("store closed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Branching
    // ------------------------------------------------------------------

    /// Creates a copy-on-write branch off the current one and returns a
    /// handle checked out on it.
    pub async fn fork(&self, name: Option<String>, description: Option<String>) -> Result<NeuroGraph> {
        let parent = self.get_current_branch();
        let name = name.unwrap_or_else(|| format!("fork-{}", uuid::Uuid::new_v4()));
        self.inner.branches.create(&name, &parent, description).await?;
        Ok(NeuroGraph {
            inner: Arc::clone(&self.inner),
            branch: Arc::new(RwLock::new(name)),
        })
    }

    pub async fn checkout(&self, name: &str) -> Result<()> {
        if !self.inner.branches.exists(name) {
            return Err(NeuroGraphError::NotFound(format!("branch '{name}'")));
        }
        *self.branch.write() = name.to_string();
        Ok(())
    }

    pub fn list_branches(&self) -> Vec<BranchRecord> {
        self.inner.branches.list()
    }

    pub async fn delete_branch(&self, name: &str) -> Result<()> {
        if self.get_current_branch() == name {
            return Err(NeuroGraphError::InvalidArgument(
                "cannot delete the checked-out branch".into(),
            ));
        }
        self.inner.states.remove(name);
        self.inner.branches.delete(name).await
    }

    // ------------------------------------------------------------------
    // Branch state
    // ------------------------------------------------------------------

    pub(crate) fn cached_state(&self, branch: &str) -> Option<Arc<BranchState>> {
        self.inner.states.get(branch).map(|s| Arc::clone(s.value()))
    }

    /// The in-memory view of `branch`, built on first touch. Concurrent
    /// builders converge on whichever state landed first.
    pub(crate) async fn state_for(&self, branch: &str) -> Result<Arc<BranchState>> {
        if let Some(state) = self.cached_state(branch) {
            return Ok(state);
        }
        let built = Arc::new(self.build_state(branch).await?);
        let state = self
            .inner
            .states
            .entry(branch.to_string())
            .or_insert(built)
            .clone();
        Ok(state)
    }

    pub(crate) async fn current_state(&self) -> Result<Arc<BranchState>> {
        let branch = self.get_current_branch();
        self.state_for(&branch).await
    }

    /// A write on `branch` invalidates cached descendant states, whose
    /// overlay reads would otherwise go stale.
    pub(crate) fn invalidate_descendants(&self, branch: &str) {
        let stale: Vec<String> = self
            .inner
            .states
            .iter()
            .map(|e| e.key().clone())
            .filter(|name| name != branch && self.inner.branches.chain(name).contains(&branch.to_string()))
            .collect();
        for name in stale {
            self.inner.states.remove(&name);
        }
    }

    async fn build_state(&self, branch: &str) -> Result<BranchState> {
        let start = std::time::Instant::now();
        let idmap = Arc::new(IdMap::new());
        let state = BranchState {
            hnsw: HnswIndex::new(
                self.inner.config.hnsw.clone(),
                self.inner.config.dimension.0,
            ),
            graph: AdjacencyIndex::new(),
            meta: MetadataIndex::new(
                self.inner.config.metadata_index.clone(),
                Arc::clone(&idmap),
            ),
            idmap,
            noun_count: AtomicU64::new(0),
            verb_count: AtomicU64::new(0),
        };

        // Vector index: load every visible noun blob, then the entrypoint.
        let noun_keys = self.inner.branches.list_effective(branch, keys::NOUNS).await?;
        let blobs = self.read_effective_batch::<NounBlob>(branch, &noun_keys).await?;
        for blob in blobs.values() {
            state.hnsw.load_blob(blob)?;
        }
        let entrypoint: Option<EntrypointBlob> = self
            .inner
            .branches
            .read_json(branch, keys::HNSW_ENTRYPOINT)
            .await?;
        state.hnsw.finish_load(entrypoint);
        state
            .noun_count
            .store(state.hnsw.len() as u64, Ordering::Release);

        // Metadata index: chunk fast path on main when no writes landed
        // since the last chunk flush, full rebuild otherwise.
        let mut loaded_from_chunks = false;
        if branch == keys::MAIN_BRANCH {
            let watermark: i64 = self
                .inner
                .kv
                .get_json(RECONCILE_WATERMARK)
                .await?
                .unwrap_or(0);
            let pending = if watermark > 0 {
                self.inner.changelog.get_changes_since(watermark, 1).await?
            } else {
                Vec::new()
            };
            if watermark > 0 && pending.is_empty() {
                neurograph_index::load_idmap(&self.inner.kv, &state.idmap).await?;
                loaded_from_chunks = state.meta.load_chunks(&self.inner.kv).await? > 0;
            }
        }
        if !loaded_from_chunks {
            let meta_keys = self
                .inner
                .branches
                .list_effective(branch, keys::NOUN_METADATA)
                .await?;
            for (key, record) in self
                .read_effective_batch::<NounMetadataRecord>(branch, &meta_keys)
                .await?
            {
                if let Some(id) = key
                    .strip_prefix(keys::NOUN_METADATA)
                    .and_then(|s| s.parse().ok())
                {
                    state.meta.add(id, &serde_json::to_value(&record)?);
                }
            }
        }

        // Graph adjacency from the verb namespace.
        let verb_keys = self
            .inner
            .branches
            .list_effective(branch, keys::VERB_METADATA)
            .await?;
        let records = self
            .read_effective_batch::<VerbRecord>(branch, &verb_keys)
            .await?;
        let parsed: Vec<(VerbId, VerbRecord)> = records
            .into_iter()
            .filter_map(|(key, record)| {
                key.strip_prefix(keys::VERB_METADATA)
                    .and_then(|s| s.parse().ok())
                    .map(|id| (id, record))
            })
            .collect();
        state.graph.rebuild(parsed.iter().map(|(id, r)| (*id, r)));
        state
            .verb_count
            .store(state.graph.edge_count() as u64, Ordering::Release);

        info!(
            branch,
            nouns = state.hnsw.len(),
            edges = state.graph.edge_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "branch state built"
        );
        Ok(state)
    }

    /// Batch-reads unscoped keys as seen from `branch`, deserializing each.
    async fn read_effective_batch<T: DeserializeOwned>(
        &self,
        branch: &str,
        unscoped_keys: &[String],
    ) -> Result<HashMap<String, T>> {
        let mut out = HashMap::with_capacity(unscoped_keys.len());
        // Main resolves through the batch-get fast path; overlays go through
        // chain reads key by key.
        if branch == keys::MAIN_BRANCH {
            let bytes = self.inner.kv.batch_get(unscoped_keys).await?;
            for (key, value) in bytes {
                if crate::branch::is_tombstone(&value) {
                    continue;
                }
                match serde_json::from_slice(&value) {
                    Ok(parsed) => {
                        out.insert(key, parsed);
                    }
                    Err(e) => debug!(key = %key, error = %e, "skipping undecodable blob"),
                }
            }
        } else {
            for key in unscoped_keys {
                if let Some(bytes) = self.inner.branches.read(branch, key).await? {
                    match serde_json::from_slice(&bytes) {
                        Ok(parsed) => {
                            out.insert(key.clone(), parsed);
                        }
                        Err(e) => debug!(key = %key, error = %e, "skipping undecodable blob"),
                    }
                }
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Shared read/write plumbing used by the operation modules
    // ------------------------------------------------------------------

    /// Coalesced branch-aware read with the throttle/transient retry
    /// schedule.
    pub(crate) async fn read_blob(&self, branch: &str, key: &str) -> Result<Option<Bytes>> {
        let scoped = format!("{branch}\u{1}{key}");
        let inner = Arc::clone(&self.inner);
        let branch = branch.to_string();
        let key_owned = key.to_string();
        self.inner
            .read_coalescer
            .get_or_fetch(scoped, move || async move {
                neurograph_concurrent::with_retry(&inner.config.retry, "read_blob", || {
                    inner.branches.read(&branch, &key_owned)
                })
                .await
            })
            .await
    }

    pub(crate) async fn read_record<T: DeserializeOwned>(
        &self,
        branch: &str,
        key: &str,
    ) -> Result<Option<T>> {
        match self.read_blob(branch, key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serializes writers per (branch, entity).
    pub(crate) async fn write_lock(&self, branch: &str, id: NounId) -> tokio::sync::OwnedMutexGuard<()> {
        let key = format!("{branch}\u{1}{id}");
        let mutex = self
            .inner
            .write_locks
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    pub(crate) fn scoped_key(&self, branch: &str, key: &str) -> String {
        self.inner.branches.write_key(branch, key)
    }
}
