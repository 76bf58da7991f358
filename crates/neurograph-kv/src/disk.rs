use crate::{KvBackend, ListPage};
use async_trait::async_trait;
use bytes::Bytes;
use neurograph_core::Result;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const BLOB_SUFFIX: &str = ".blob";

/// Local on-disk backend. Each key maps to a file under the root directory,
/// one path segment per key segment, with the final segment suffixed so a key
/// and a longer key it prefixes (`branches/b` vs `branches/b/nouns/x`) never
/// collide as file-vs-directory. Writes go through a temp file and rename so
/// a crashed write never leaves a torn blob.
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        let segments: Vec<&str> = key.split('/').collect();
        for (ix, segment) in segments.iter().enumerate() {
            if ix + 1 == segments.len() {
                path.push(format!("{}{}", encode_segment(segment), BLOB_SUFFIX));
            } else {
                path.push(encode_segment(segment));
            }
        }
        path
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        for part in rel.iter() {
            segments.push(part.to_str()?.to_string());
        }
        let last = segments.pop()?;
        let last = last.strip_suffix(BLOB_SUFFIX)?;
        segments.push(last.to_string());
        Some(
            segments
                .iter()
                .map(|s| decode_segment(s))
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    /// Depth-first walk collecting every blob key under the root.
    async fn walk_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl KvBackend for DiskBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        tokio::fs::write(&tmp, &value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        max_keys: usize,
        cursor: Option<&str>,
    ) -> Result<ListPage> {
        let mut keys = self.walk_keys().await?;
        keys.retain(|k| k.starts_with(prefix) && cursor.is_none_or(|c| k.as_str() > c));
        keys.sort_unstable();
        let truncated = keys.len() > max_keys;
        keys.truncate(max_keys);
        let next_cursor = if truncated { keys.last().cloned() } else { None };
        Ok(ListPage { keys, next_cursor })
    }

    fn name(&self) -> &'static str {
        "disk"
    }
}

/// Percent-encodes the characters a filesystem path segment cannot carry.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn decode_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut ix = 0;
    while ix < bytes.len() {
        if bytes[ix] == b'%' {
            if let Some(hex) = segment.get(ix + 1..ix + 3) {
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
    String::from_utf8(out).unwrap_or_else(|_| segment.to_string())
}

impl std::fmt::Debug for DiskBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBackend").field("root", &self.root).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let backend = DiskBackend::open(dir.path()).await.unwrap();
        backend
            .put("nouns/abc-123", Bytes::from_static(b"{\"id\":1}"))
            .await
            .unwrap();
        assert_eq!(
            backend.get("nouns/abc-123").await.unwrap().unwrap(),
            Bytes::from_static(b"{\"id\":1}")
        );
        backend.delete("nouns/abc-123").await.unwrap();
        assert!(backend.get("nouns/abc-123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn branch_record_and_overlay_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let backend = DiskBackend::open(dir.path()).await.unwrap();
        backend
            .put("branches/feature", Bytes::from_static(b"record"))
            .await
            .unwrap();
        backend
            .put("branches/feature/nouns/x", Bytes::from_static(b"blob"))
            .await
            .unwrap();
        assert_eq!(
            backend.get("branches/feature").await.unwrap().unwrap(),
            Bytes::from_static(b"record")
        );
        assert_eq!(
            backend
                .get("branches/feature/nouns/x")
                .await
                .unwrap()
                .unwrap(),
            Bytes::from_static(b"blob")
        );
    }

    #[tokio::test]
    async fn list_with_cursor() {
        let dir = TempDir::new().unwrap();
        let backend = DiskBackend::open(dir.path()).await.unwrap();
        for i in 0..4 {
            backend
                .put(&format!("verbs/{i}"), Bytes::from_static(b"v"))
                .await
                .unwrap();
        }
        let page = backend.list("verbs/", 2, None).await.unwrap();
        assert_eq!(page.keys, vec!["verbs/0", "verbs/1"]);
        let rest = backend
            .list("verbs/", 10, page.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(rest.keys, vec!["verbs/2", "verbs/3"]);
    }

    #[test]
    fn segment_encoding_round_trips() {
        for s in ["plain", "with space", "a%b", "ünïcode", "2024-01-01"] {
            assert_eq!(decode_segment(&encode_segment(s)), s);
        }
    }
}
