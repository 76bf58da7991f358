use crate::{KvBackend, ListPage};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use neurograph_core::{NeuroGraphError, Result};
use object_store::path::Path as ObjectPath;
use object_store::{parse_url, ObjectStore};
use std::sync::Arc;
use url::Url;

/// Object-store backend covering the S3 family (AWS S3, R2, GCS, Azure,
/// MinIO via path-style) plus local and in-memory stores, all through one
/// URL-configured `object_store` instance.
pub struct ObjectBackend {
    store: Arc<dyn ObjectStore>,
    label: &'static str,
}

impl ObjectBackend {
    /// Builds a backend from a storage URL such as `s3://bucket/prefix`,
    /// `gs://bucket`, `az://container` or `file:///var/data/store`.
    /// Credentials come from the environment the way the underlying store
    /// resolves them; session-token refresh is the store's concern.
    pub fn from_url(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| NeuroGraphError::InvalidArgument(format!("storage url: {e}")))?;
        let (store, _) = parse_url(&url)
            .map_err(|e| NeuroGraphError::InvalidArgument(format!("storage url: {e}")))?;
        Ok(Self {
            store: Arc::from(store),
            label: "object",
        })
    }

    pub fn from_store(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            label: "object",
        }
    }

    fn map_error(e: object_store::Error) -> NeuroGraphError {
        let text = e.to_string();
        let lowered = text.to_ascii_lowercase();
        if lowered.contains("slowdown")
            || lowered.contains("slow down")
            || lowered.contains("429")
            || lowered.contains("too many requests")
            || lowered.contains("503")
            || lowered.contains("rate")
        {
            NeuroGraphError::Throttled(text)
        } else if matches!(
            e,
            object_store::Error::Unauthenticated { .. } | object_store::Error::PermissionDenied { .. }
        ) {
            // Revoked credentials are permanent; the store degrades to
            // read-only rather than retrying forever.
            NeuroGraphError::Storage(text)
        } else {
            NeuroGraphError::Transient(text)
        }
    }
}

#[async_trait]
impl KvBackend for ObjectBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self.store.get(&ObjectPath::from(key)).await {
            Ok(result) => Ok(Some(result.bytes().await.map_err(Self::map_error)?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(Self::map_error(e)),
        }
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.store
            .put(&ObjectPath::from(key), value.into())
            .await
            .map_err(Self::map_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.store.delete(&ObjectPath::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Self::map_error(e)),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        max_keys: usize,
        cursor: Option<&str>,
    ) -> Result<ListPage> {
        let prefix_path = ObjectPath::from(prefix.trim_end_matches('/'));
        let mut stream = match cursor {
            Some(cursor) => self
                .store
                .list_with_offset(Some(&prefix_path), &ObjectPath::from(cursor)),
            None => self.store.list(Some(&prefix_path)),
        };
        let mut keys = Vec::new();
        let mut truncated = false;
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(Self::map_error)?;
            let key = meta.location.to_string();
            // `list` treats the prefix as a path component; re-check the raw
            // string prefix the facade contract promises.
            if !key.starts_with(prefix) {
                continue;
            }
            keys.push(key);
            if keys.len() > max_keys {
                truncated = true;
                break;
            }
        }
        keys.sort_unstable();
        if truncated {
            keys.truncate(max_keys);
        }
        let next_cursor = if truncated { keys.last().cloned() } else { None };
        Ok(ListPage { keys, next_cursor })
    }

    fn name(&self) -> &'static str {
        self.label
    }
}
