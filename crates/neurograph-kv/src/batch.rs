//! Adaptive batch reads.
//!
//! The fetch strategy is sized by item count: small batches issue parallel
//! point gets behind a semaphore, medium batches chunk the key set and bound
//! chunk concurrency, and very large batches switch to a prefix scan filtered
//! against the requested set so the backend sees one listing instead of
//! thousands of point reads.

use crate::{list_all, KvBackend};
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use neurograph_core::{BatchReadConfig, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

pub async fn batch_get(
    backend: Arc<dyn KvBackend>,
    config: &BatchReadConfig,
    keys: &[String],
) -> Result<HashMap<String, Bytes>> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }
    if keys.len() <= config.point_get_cutoff {
        point_gets(backend, keys.to_vec(), config.point_get_concurrency).await
    } else if keys.len() <= config.scan_cutoff {
        chunked_gets(backend, keys, config).await
    } else {
        scan_filtered(backend, keys, config).await
    }
}

async fn point_gets(
    backend: Arc<dyn KvBackend>,
    keys: Vec<String>,
    concurrency: usize,
) -> Result<HashMap<String, Bytes>> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut futures = FuturesUnordered::new();
    for key in keys {
        let backend = Arc::clone(&backend);
        let semaphore = Arc::clone(&semaphore);
        futures.push(async move {
            let _permit = semaphore.acquire_owned().await;
            let value = backend.get(&key).await?;
            Ok::<_, neurograph_core::NeuroGraphError>((key, value))
        });
    }
    let mut out = HashMap::new();
    while let Some(result) = futures.next().await {
        let (key, value) = result?;
        if let Some(value) = value {
            out.insert(key, value);
        }
    }
    Ok(out)
}

async fn chunked_gets(
    backend: Arc<dyn KvBackend>,
    keys: &[String],
    config: &BatchReadConfig,
) -> Result<HashMap<String, Bytes>> {
    let chunk_size = 50usize.min(keys.len().div_ceil(10)).max(1);
    let chunks: Vec<Vec<String>> = keys.chunks(chunk_size).map(|c| c.to_vec()).collect();
    let concurrency = config.chunk_concurrency.min(chunks.len()).max(1);
    debug!(
        keys = keys.len(),
        chunk_size,
        chunks = chunks.len(),
        concurrency,
        "chunked batch get"
    );
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut futures = FuturesUnordered::new();
    for chunk in chunks {
        let backend = Arc::clone(&backend);
        let semaphore = Arc::clone(&semaphore);
        futures.push(async move {
            let _permit = semaphore.acquire_owned().await;
            let mut found = Vec::with_capacity(chunk.len());
            for key in chunk {
                if let Some(value) = backend.get(&key).await? {
                    found.push((key, value));
                }
            }
            Ok::<_, neurograph_core::NeuroGraphError>(found)
        });
    }
    let mut out = HashMap::new();
    while let Some(result) = futures.next().await {
        out.extend(result?);
    }
    Ok(out)
}

async fn scan_filtered(
    backend: Arc<dyn KvBackend>,
    keys: &[String],
    config: &BatchReadConfig,
) -> Result<HashMap<String, Bytes>> {
    let prefix = common_prefix(keys);
    let requested: HashSet<&str> = keys.iter().map(|k| k.as_str()).collect();
    let listed = list_all(backend.as_ref(), &prefix).await?;
    let matches: Vec<String> = listed
        .into_iter()
        .filter(|k| requested.contains(k.as_str()))
        .collect();
    debug!(
        requested = keys.len(),
        present = matches.len(),
        prefix = %prefix,
        "scan-filtered batch get"
    );
    point_gets(backend, matches, config.point_get_concurrency).await
}

/// Longest shared `/`-terminated prefix of the requested keys; the scan path
/// only pays off when the batch shares a namespace, which every caller in the
/// store guarantees.
fn common_prefix(keys: &[String]) -> String {
    let first = match keys.first() {
        Some(first) => first.as_str(),
        None => return String::new(),
    };
    let shared = keys.iter().fold(first.len(), |len, key| {
        key.bytes()
            .zip(first.bytes())
            .take(len)
            .take_while(|(a, b)| a == b)
            .count()
    });
    match first[..shared].rfind('/') {
        Some(ix) => first[..=ix].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    async fn seeded(n: usize) -> Arc<dyn KvBackend> {
        let backend = MemoryBackend::new();
        for i in 0..n {
            backend
                .put(&format!("nouns/{i:05}"), Bytes::from(format!("v{i}")))
                .await
                .unwrap();
        }
        Arc::new(backend)
    }

    #[tokio::test]
    async fn small_batch_uses_point_gets() {
        let backend = seeded(20).await;
        let keys: Vec<String> = (0..5).map(|i| format!("nouns/{i:05}")).collect();
        let out = batch_get(backend, &BatchReadConfig::default(), &keys)
            .await
            .unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out["nouns/00003"], Bytes::from_static(b"v3"));
    }

    #[tokio::test]
    async fn medium_batch_chunks() {
        let backend = seeded(200).await;
        let mut keys: Vec<String> = (0..150).map(|i| format!("nouns/{i:05}")).collect();
        keys.push("nouns/99999".to_string()); // missing key is simply absent
        let out = batch_get(backend, &BatchReadConfig::default(), &keys)
            .await
            .unwrap();
        assert_eq!(out.len(), 150);
    }

    #[tokio::test]
    async fn large_batch_scans() {
        let backend = seeded(1200).await;
        let keys: Vec<String> = (0..1100).map(|i| format!("nouns/{i:05}")).collect();
        let out = batch_get(backend, &BatchReadConfig::default(), &keys)
            .await
            .unwrap();
        assert_eq!(out.len(), 1100);
    }

    #[test]
    fn common_prefix_stops_at_separator() {
        let keys = vec!["nouns/ab".to_string(), "nouns/ac".to_string()];
        assert_eq!(common_prefix(&keys), "nouns/");
    }
}
