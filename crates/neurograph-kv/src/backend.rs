use async_trait::async_trait;
use bytes::Bytes;
use neurograph_core::Result;

/// One page of a prefix listing. Keys are lexicographically sorted; `cursor`
/// is the last key of the page and resumes the scan strictly after itself.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_cursor: Option<String>,
}

/// The blob backend the whole store is keyed on. Implementations provide
/// nothing beyond byte blobs under printable keys: no transactions, no
/// directory semantics. A missing key is `Ok(None)`, never an error.
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn list(
        &self,
        prefix: &str,
        max_keys: usize,
        cursor: Option<&str>,
    ) -> Result<ListPage>;

    fn name(&self) -> &'static str;
}

/// Drains an entire prefix, page by page. Convenience for rebuild paths;
/// hot paths should page explicitly and honor their deadline between pages.
pub async fn list_all(backend: &dyn KvBackend, prefix: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = backend.list(prefix, 1000, cursor.as_deref()).await?;
        if page.keys.is_empty() {
            break;
        }
        keys.extend(page.keys);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(keys)
}
