//! Embedding pipeline interface.
//!
//! The store consumes an `Embedder` rather than shipping a model: callers
//! plug in whatever produces their vectors. Embedding calls carry a timeout
//! and the enclosing operation degrades gracefully when one expires (the
//! planner simply skips the vector signal).

use crate::distance::normalize;
use async_trait::async_trait;
use neurograph_core::{NeuroGraphError, Result, Vector};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vector>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Wraps any embedder with a wall-clock timeout.
pub struct TimeoutEmbedder {
    inner: Arc<dyn Embedder>,
    timeout: Duration,
}

impl TimeoutEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Embedder for TimeoutEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vector> {
        match tokio::time::timeout(self.timeout, self.inner.embed(text)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "embedding call timed out");
                Err(NeuroGraphError::Timeout(self.timeout))
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        match tokio::time::timeout(self.timeout, self.inner.embed_batch(texts)).await {
            Ok(result) => result,
            Err(_) => Err(NeuroGraphError::Timeout(self.timeout)),
        }
    }
}

/// Deterministic offline embedder: hashes word tokens into a fixed number of
/// buckets and normalizes. Texts sharing vocabulary land near each other,
/// which is enough for tests and air-gapped deployments.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, word: &str) -> (usize, f32) {
        let digest = Sha256::digest(word.as_bytes());
        let ix = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
            % self.dimension;
        // Second hash byte range picks a stable sign so buckets cancel less.
        let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
        (ix, sign)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vector> {
        let mut out = vec![0.0f32; self.dimension];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() >= 2)
        {
            let (ix, sign) = self.bucket(word);
            out[ix] += sign;
        }
        Ok(normalize(&out))
    }
}
