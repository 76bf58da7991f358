//! Query highlighting over plain and rich text.
//!
//! Rich text is the nested `{type, content: [...]}` document shape produced
//! by block editors; heading blocks categorize as titles, everything else as
//! content. Exact token overlap yields text matches; the embedder supplies
//! semantic matches for the remaining candidates, and an expired semantic
//! budget degrades the result to text-only rather than failing.

use crate::api::{ContentCategory, Highlight, HighlightGranularity, HighlightMatchType, HighlightRequest};
use neurograph_core::{HighlightConfig, MetadataValue, Result};
use neurograph_index::tokenize;
use neurograph_vector::{cosine_similarity, Embedder};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

struct Block {
    text: String,
    category: ContentCategory,
}

pub struct Highlighter {
    embedder: Arc<dyn Embedder>,
    config: HighlightConfig,
}

impl Highlighter {
    pub fn new(embedder: Arc<dyn Embedder>, config: HighlightConfig) -> Self {
        Self { embedder, config }
    }

    pub async fn highlight(&self, request: &HighlightRequest) -> Result<Vec<Highlight>> {
        let blocks = extract_blocks(&request.text, request.content_type.as_deref());
        let query_tokens: HashSet<String> = tokenize(&request.query).into_iter().collect();
        let threshold = request.threshold.unwrap_or(self.config.semantic_threshold);

        let mut highlights = Vec::new();
        for block in &blocks {
            collect_text_matches(block, &query_tokens, &mut highlights);
        }

        let semantic = tokio::time::timeout(
            self.config.timeout,
            self.collect_semantic_matches(&blocks, request, &query_tokens, threshold),
        )
        .await;
        match semantic {
            Ok(Ok(matches)) => highlights.extend(matches),
            Ok(Err(e)) => {
                debug!(error = %e, "semantic highlighting unavailable, text-only");
            }
            Err(_) => {
                debug!("semantic highlighting timed out, text-only");
            }
        }

        highlights.sort_by(|a, b| a.offset.cmp(&b.offset).then_with(|| a.text.cmp(&b.text)));
        Ok(highlights)
    }

    async fn collect_semantic_matches(
        &self,
        blocks: &[Block],
        request: &HighlightRequest,
        query_tokens: &HashSet<String>,
        threshold: f32,
    ) -> Result<Vec<Highlight>> {
        let query_vector = self.embedder.embed(&request.query).await?;
        let mut out = Vec::new();
        for block in blocks {
            let candidates: Vec<(String, usize)> = match request.granularity {
                HighlightGranularity::Word => spans(&block.text)
                    .into_iter()
                    .filter(|(word, _)| {
                        let lowered = word.to_lowercase();
                        lowered.len() >= 2 && !query_tokens.contains(&lowered)
                    })
                    .collect(),
                HighlightGranularity::Sentence => sentences(&block.text),
            };
            if candidates.is_empty() {
                continue;
            }
            let texts: Vec<String> = candidates.iter().map(|(t, _)| t.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            for ((text, offset), vector) in candidates.into_iter().zip(vectors) {
                let score = cosine_similarity(&query_vector, &vector);
                if score >= threshold {
                    out.push(Highlight {
                        text,
                        match_type: HighlightMatchType::Semantic,
                        content_category: block.category,
                        score,
                        offset,
                    });
                }
            }
        }
        Ok(out)
    }
}

fn collect_text_matches(block: &Block, query_tokens: &HashSet<String>, out: &mut Vec<Highlight>) {
    for (word, offset) in spans(&block.text) {
        if query_tokens.contains(&word.to_lowercase()) {
            out.push(Highlight {
                text: word,
                match_type: HighlightMatchType::Text,
                content_category: block.category,
                score: 1.0,
                offset,
            });
        }
    }
}

/// Words with their byte offsets in the block.
fn spans(text: &str) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (ix, c) in text.char_indices() {
        if c.is_alphanumeric() {
            start.get_or_insert(ix);
        } else if let Some(s) = start.take() {
            out.push((text[s..ix].to_string(), s));
        }
    }
    if let Some(s) = start {
        out.push((text[s..].to_string(), s));
    }
    out
}

fn sentences(text: &str) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for (ix, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let sentence = text[start..ix].trim();
            if !sentence.is_empty() {
                out.push((sentence.to_string(), start));
            }
            start = ix + c.len_utf8();
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push((tail.to_string(), start));
    }
    out
}

/// Splits the input into category-tagged blocks. Rich documents are detected
/// by shape (or forced via `content_type`); anything else is one content
/// block.
fn extract_blocks(text: &str, content_type: Option<&str>) -> Vec<Block> {
    let force_rich = content_type.is_some_and(|t| t.contains("json"));
    let trimmed = text.trim_start();
    if force_rich || trimmed.starts_with('{') {
        if let Ok(doc) = serde_json::from_str::<MetadataValue>(text) {
            let mut blocks = Vec::new();
            walk_rich(&doc, ContentCategory::Content, &mut blocks);
            if !blocks.is_empty() {
                return blocks;
            }
        }
    }
    vec![Block {
        text: text.to_string(),
        category: ContentCategory::Content,
    }]
}

fn walk_rich(node: &MetadataValue, category: ContentCategory, blocks: &mut Vec<Block>) {
    let Some(obj) = node.as_object() else { return };
    let node_type = obj.get("type").and_then(|t| t.as_str()).unwrap_or_default();
    let category = match node_type {
        "heading" | "title" => ContentCategory::Title,
        _ => category,
    };
    // A node owning text leaves becomes one block.
    if let Some(children) = obj.get("content").and_then(|c| c.as_array()) {
        let mut leaf_text = String::new();
        for child in children {
            if let Some(text) = child.get("text").and_then(|t| t.as_str()) {
                if !leaf_text.is_empty() {
                    leaf_text.push(' ');
                }
                leaf_text.push_str(text);
            }
        }
        if !leaf_text.is_empty() {
            blocks.push(Block {
                text: leaf_text,
                category,
            });
        }
        for child in children {
            if child.get("text").is_none() {
                walk_rich(child, category, blocks);
            }
        }
    }
}
