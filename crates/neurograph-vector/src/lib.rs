pub mod distance;
pub mod embedder;
pub mod hnsw;

pub use distance::{
    check_dimension, cosine_distance, cosine_similarity, dot, l2_norm, normalize, normalize_batch,
};
pub use embedder::{Embedder, HashEmbedder, TimeoutEmbedder};
pub use hnsw::{EntrypointBlob, HnswIndex, SearchHit};
