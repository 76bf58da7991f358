//! Bitmap chunk persistence.
//!
//! Each `(field, value)` posting list is persisted under
//! `_system/mindex/<term>/<chunkIx>`, the term being the escaped field/value
//! pair and the chunk index being the id range `[ix*chunk, (ix+1)*chunk)`.
//! Ids are assigned monotonically, so chunks below the id high-water mark go
//! cold and stop being rewritten; only terms touched since the last flush are
//! reconciled. Every chunk carries its posting summary alongside the
//! portable-serialized bitmap.

use crate::idmap::IdMap;
use crate::inverted::{IndexKey, MetadataIndex};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use neurograph_core::{IdMapBlob, NeuroGraphError, Result};
use neurograph_kv::{keys, list_all, KvStore};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitmapChunk {
    pub cardinality: u64,
    pub min_id: u32,
    pub max_id: u32,
    pub bitmap: String,
}

impl BitmapChunk {
    fn from_bitmap(bitmap: &RoaringBitmap) -> Result<Self> {
        let mut bytes = Vec::with_capacity(bitmap.serialized_size());
        bitmap
            .serialize_into(&mut bytes)
            .map_err(|e| NeuroGraphError::Index(format!("bitmap serialize: {e}")))?;
        Ok(Self {
            cardinality: bitmap.len(),
            min_id: bitmap.min().unwrap_or(0),
            max_id: bitmap.max().unwrap_or(0),
            bitmap: BASE64.encode(bytes),
        })
    }

    fn to_bitmap(&self) -> Result<RoaringBitmap> {
        let bytes = BASE64
            .decode(&self.bitmap)
            .map_err(|e| NeuroGraphError::Index(format!("bitmap decode: {e}")))?;
        RoaringBitmap::deserialize_from(&bytes[..])
            .map_err(|e| NeuroGraphError::Index(format!("bitmap deserialize: {e}")))
    }
}

fn escape(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for b in part.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b':' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn unescape(part: &str) -> String {
    let bytes = part.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut ix = 0;
    while ix < bytes.len() {
        if bytes[ix] == b'%' {
            if let Some(hex) = part.get(ix + 1..ix + 3) {
                if let Ok(b) = u8::from_str_radix(hex, 16) {
                    out.push(b);
                    ix += 3;
                    continue;
                }
            }
        }
        out.push(bytes[ix]);
        ix += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| part.to_string())
}

fn encode_term(field: &str, key: &IndexKey) -> String {
    format!("{}~{}", escape(field), escape(&key.encode()))
}

fn decode_term(term: &str) -> Option<(String, IndexKey)> {
    let (field, value) = term.split_once('~')?;
    let decoded = unescape(value);
    let key = match decoded.split_once(':')? {
        ("b", rest) => IndexKey::Bool(rest == "true"),
        ("n", rest) => IndexKey::Num(rest.parse().ok()?),
        ("s", rest) => IndexKey::Str(rest.to_string()),
        _ => return None,
    };
    Some((unescape(field), key))
}

impl MetadataIndex {
    /// Writes dirty terms out as chunked bitmaps and reconciles stale chunk
    /// keys. Returns the number of chunks written.
    pub async fn flush_chunks(&self, kv: &KvStore) -> Result<usize> {
        let chunk_span = self.config().chunk_size.max(1);
        let mut written = 0usize;
        for field in self.take_dirty_fields() {
            let Some(slot) = self.field_map(&field) else {
                continue;
            };
            let snapshot: Vec<(IndexKey, RoaringBitmap)> = {
                let map = slot.read();
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            };

            let field_prefix = format!("{}{}~", keys::MINDEX, escape(&field));
            let existing: HashSet<String> =
                list_all(kv.backend().as_ref(), &field_prefix).await?.into_iter().collect();
            let mut expected: HashSet<String> = HashSet::new();

            for (key, bitmap) in snapshot {
                if bitmap.is_empty() {
                    continue;
                }
                let term = encode_term(&field, &key);
                let lo = bitmap.min().unwrap_or(0) / chunk_span;
                let hi = bitmap.max().unwrap_or(0) / chunk_span;
                for chunk_ix in lo..=hi {
                    let start = chunk_ix * chunk_span;
                    let end = start.saturating_add(chunk_span);
                    let mut slice = bitmap.clone();
                    slice.remove_range(0..start);
                    slice.remove_range(end..=u32::MAX);
                    if slice.is_empty() {
                        continue;
                    }
                    let chunk_key = keys::mindex_chunk(&term, chunk_ix);
                    expected.insert(chunk_key.clone());
                    kv.put_json(&chunk_key, &BitmapChunk::from_bitmap(&slice)?).await?;
                    written += 1;
                }
            }

            // Chunks for values that no longer exist are dropped.
            for stale in existing.difference(&expected) {
                kv.delete(stale).await?;
            }
        }
        if written > 0 {
            debug!(written, "metadata index chunks flushed");
        }
        Ok(written)
    }

    /// Rebuilds the in-memory index from the persisted chunks.
    pub async fn load_chunks(&self, kv: &KvStore) -> Result<usize> {
        let mut loaded = 0usize;
        for key in list_all(kv.backend().as_ref(), keys::MINDEX).await? {
            let rest = match key.strip_prefix(keys::MINDEX) {
                Some(rest) => rest,
                None => continue,
            };
            let Some((term, _chunk_ix)) = rest.rsplit_once('/') else {
                continue;
            };
            let Some((field, index_key)) = decode_term(term) else {
                continue;
            };
            let Some(chunk) = kv.get_json::<BitmapChunk>(&key).await? else {
                continue;
            };
            self.insert_loaded(&field, index_key, chunk.to_bitmap()?);
            loaded += 1;
        }
        // Loading re-marks every field dirty; a fresh load is clean.
        self.take_dirty_fields();
        Ok(loaded)
    }
}

/// Persists the id map as one blob when it has changed since the last flush.
pub async fn flush_idmap(kv: &KvStore, idmap: &IdMap) -> Result<bool> {
    if !idmap.take_dirty() {
        return Ok(false);
    }
    kv.put_json(keys::ID_MAP, &idmap.to_blob()).await?;
    Ok(true)
}

pub async fn load_idmap(kv: &KvStore, idmap: &IdMap) -> Result<bool> {
    match kv.get_json::<IdMapBlob>(keys::ID_MAP).await? {
        Some(blob) => {
            idmap.load_blob(&blob);
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurograph_core::{BatchReadConfig, MetadataIndexConfig};
    use neurograph_kv::MemoryBackend;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    fn kv() -> KvStore {
        KvStore::new(Arc::new(MemoryBackend::new()), BatchReadConfig::default())
    }

    fn small_chunk_index() -> MetadataIndex {
        MetadataIndex::new(
            MetadataIndexConfig {
                chunk_size: 4,
                ..MetadataIndexConfig::default()
            },
            Arc::new(IdMap::new()),
        )
    }

    #[tokio::test]
    async fn chunks_round_trip() {
        let kv = kv();
        let idx = small_chunk_index();
        let mut ids = Vec::new();
        for i in 0..10 {
            let id = Uuid::new_v4();
            idx.add(id, &json!({"category": "tech", "rank": i}));
            ids.push(id);
        }
        let written = idx.flush_chunks(&kv).await.unwrap();
        assert!(written > 0);

        // 10 sequential ids with chunk span 4 produce three chunks for the
        // shared category term.
        let term_chunks = list_all(kv.backend().as_ref(), "_system/mindex/category~")
            .await
            .unwrap();
        assert_eq!(term_chunks.len(), 3);

        let restored = small_chunk_index();
        // Ids resolve through the persisted id map.
        flush_idmap(&kv, &idx.idmap()).await.unwrap();
        load_idmap(&kv, &restored.idmap()).await.unwrap();
        let loaded = restored.load_chunks(&kv).await.unwrap();
        assert!(loaded >= 3);
        let hits = restored.get_ids("category", &json!("tech"));
        assert_eq!(hits.len(), 10);
        for id in ids {
            assert!(hits.contains(&id));
        }
    }

    #[tokio::test]
    async fn chunk_summaries_describe_postings() {
        let kv = kv();
        let idx = small_chunk_index();
        for _ in 0..3 {
            idx.add(Uuid::new_v4(), &json!({"kind": "x"}));
        }
        idx.flush_chunks(&kv).await.unwrap();
        let chunk_keys = list_all(kv.backend().as_ref(), keys::MINDEX).await.unwrap();
        let chunk: BitmapChunk = kv.get_json(&chunk_keys[0]).await.unwrap().unwrap();
        assert_eq!(chunk.cardinality, 3);
        assert_eq!(chunk.min_id, 1);
        assert_eq!(chunk.max_id, 3);
    }

    #[tokio::test]
    async fn stale_chunks_are_reconciled() {
        let kv = kv();
        let idx = small_chunk_index();
        let id = Uuid::new_v4();
        let metadata = json!({"status": "open"});
        idx.add(id, &metadata);
        idx.flush_chunks(&kv).await.unwrap();
        assert_eq!(list_all(kv.backend().as_ref(), keys::MINDEX).await.unwrap().len(), 1);

        idx.remove(&id, &metadata);
        idx.flush_chunks(&kv).await.unwrap();
        assert!(list_all(kv.backend().as_ref(), keys::MINDEX).await.unwrap().is_empty());
    }

    #[test]
    fn term_encoding_round_trips() {
        for (field, key) in [
            ("category", IndexKey::Str("tech stuff".into())),
            ("year", IndexKey::Num(2024.0)),
            ("done", IndexKey::Bool(true)),
            ("weird/field~name", IndexKey::Str("a~b/c".into())),
        ] {
            let term = encode_term(field, &key);
            assert!(!term.contains('/'));
            let (f, k) = decode_term(&term).unwrap();
            assert_eq!(f, field);
            assert_eq!(k, key);
        }
    }
}
