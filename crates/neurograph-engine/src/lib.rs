//! NeuroGraph: an embedded vector + graph knowledge store.
//!
//! One engine answers three kinds of question in a single pass: semantic
//! similarity (HNSW), typed graph traversal, and metadata filtering, fused
//! with reciprocal rank fusion. Everything persists through a pluggable
//! byte-blob backend (in-memory, local disk, or any S3-family object store),
//! with copy-on-write branches and content-addressed entity versioning on
//! top.

pub mod api;
pub mod branch;
pub mod commits;
pub mod crud;
pub mod highlight;
pub mod planner;
pub mod store;
pub mod versions;

pub use api::{
    AddRequest, BatchOutcome, ConnectedSpec, ContentCategory, Entity, Explain, FieldCondition,
    FindQuery, FindResult, Highlight, HighlightGranularity, HighlightMatchType, HighlightRequest,
    MatchSource, OpCondition, QueryInput, Relation, RelateRequest, RelationFilter, SearchMode,
    UpdateRequest, WhereClause,
};
pub use commits::{AsOfView, CommitOptions, CommitRecord};
pub use crud::{CountsApi, VersionSelector, VersionsApi};
pub use store::NeuroGraph;
pub use versions::{FieldChange, PruneOptions, SaveOptions, VersionDiff, VersionManager};

pub use neurograph_core::{
    Deadline, NeuroGraphError, NounId, NounType, Result, StoreConfig, VerbId, VerbType,
};
pub use neurograph_kv::{DiskBackend, KvBackend, MemoryBackend, ObjectBackend};
pub use neurograph_vector::{Embedder, HashEmbedder};
