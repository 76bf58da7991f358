//! Caller-facing request and result types.

use neurograph_core::{
    Direction, MetadataValue, NounId, NounType, TimestampMillis, Vector, VerbId, VerbType,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A hydrated noun.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: NounId,
    pub noun_type: NounType,
    pub vector: Vector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub created_at: TimestampMillis,
    pub updated_at: TimestampMillis,
}

/// A hydrated verb.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub id: VerbId,
    pub from: NounId,
    pub to: NounId,
    pub verb_type: VerbType,
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataValue>,
    pub created_at: TimestampMillis,
    pub updated_at: TimestampMillis,
}

#[derive(Debug, Clone, Default)]
pub struct AddRequest {
    /// Explicit id; generated when absent. Adding an id that already exists
    /// fails with `AlreadyExists`.
    pub id: Option<NounId>,
    /// Text to embed. Exactly one of `data` / `vector` must be set.
    pub data: Option<String>,
    pub vector: Option<Vector>,
    pub noun_type: NounType,
    pub service: Option<String>,
    pub metadata: Option<MetadataValue>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub id: NounId,
    pub data: Option<String>,
    pub vector: Option<Vector>,
    /// Fields to merge into the existing metadata; `null` values remove.
    pub metadata: Option<MetadataValue>,
    /// Replace the metadata wholesale instead of merging (restore path).
    pub replace_metadata: bool,
}

#[derive(Debug, Clone)]
pub struct RelateRequest {
    pub from: NounId,
    pub to: NounId,
    pub verb_type: VerbType,
    pub weight: Option<f32>,
    pub metadata: Option<MetadataValue>,
}

#[derive(Debug, Clone, Default)]
pub struct RelationFilter {
    pub from: Option<NounId>,
    pub to: Option<NounId>,
    pub verb_type: Option<VerbType>,
}

/// Per-item outcome for the batch operations.
#[derive(Debug)]
pub enum BatchOutcome<T> {
    Ok(T),
    Err(neurograph_core::NeuroGraphError),
}

impl<T> BatchOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, BatchOutcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            BatchOutcome::Ok(v) => Some(v),
            BatchOutcome::Err(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Auto,
    Semantic,
    Text,
}

/// The query input: free text, a raw vector, or an existing noun's id.
#[derive(Debug, Clone)]
pub enum QueryInput {
    Text(String),
    Vector(Vector),
    Id(NounId),
}

/// One field's condition inside a `where` tree. A bare scalar is equality.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldCondition {
    Ops(OpCondition),
    Equals(MetadataValue),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OpCondition {
    pub greater_than: Option<f64>,
    pub greater_or_equal: Option<f64>,
    pub less_than: Option<f64>,
    pub less_or_equal: Option<f64>,
    pub one_of: Option<Vec<MetadataValue>>,
    pub contains: Option<String>,
}

impl FieldCondition {
    pub fn equals(value: impl Into<MetadataValue>) -> Self {
        FieldCondition::Equals(value.into())
    }

    pub fn greater_than(n: f64) -> Self {
        FieldCondition::Ops(OpCondition {
            greater_than: Some(n),
            ..OpCondition::default()
        })
    }

    pub fn one_of(values: Vec<MetadataValue>) -> Self {
        FieldCondition::Ops(OpCondition {
            one_of: Some(values),
            ..OpCondition::default()
        })
    }

    /// Post-filter evaluation against a raw metadata value.
    pub fn matches(&self, value: Option<&MetadataValue>) -> bool {
        match self {
            FieldCondition::Equals(expected) => value == Some(expected),
            FieldCondition::Ops(ops) => {
                let Some(value) = value else { return false };
                if let Some(values) = &ops.one_of {
                    if !values.contains(value) {
                        return false;
                    }
                }
                if let Some(needle) = &ops.contains {
                    let hay = value.as_str().unwrap_or_default().to_lowercase();
                    if !hay.contains(&needle.to_lowercase()) {
                        return false;
                    }
                }
                let number = value.as_f64();
                for (bound, check) in [
                    (ops.greater_than, NumCheck::Gt),
                    (ops.greater_or_equal, NumCheck::Ge),
                    (ops.less_than, NumCheck::Lt),
                    (ops.less_or_equal, NumCheck::Le),
                ] {
                    if let Some(bound) = bound {
                        let Some(n) = number else { return false };
                        let ok = match check {
                            NumCheck::Gt => n > bound,
                            NumCheck::Ge => n >= bound,
                            NumCheck::Lt => n < bound,
                            NumCheck::Le => n <= bound,
                        };
                        if !ok {
                            return false;
                        }
                    }
                }
                true
            }
        }
    }
}

enum NumCheck {
    Gt,
    Ge,
    Lt,
    Le,
}

/// Conjunction of per-field conditions.
pub type WhereClause = BTreeMap<String, FieldCondition>;

/// Graph-signal spec: nouns within `depth` hops of `to`.
#[derive(Debug, Clone)]
pub struct ConnectedSpec {
    pub to: NounId,
    pub depth: usize,
    pub verb_type: Option<VerbType>,
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub id: Option<NounId>,
    pub ids: Option<Vec<NounId>>,
    pub query: Option<QueryInput>,
    pub where_clause: Option<WhereClause>,
    pub connected: Option<ConnectedSpec>,
    pub limit: usize,
    pub offset: usize,
    pub search_mode: SearchMode,
    pub hybrid_alpha: Option<f32>,
    pub explain: bool,
}

impl FindQuery {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: Some(QueryInput::Text(query.into())),
            limit: 10,
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            10
        } else {
            self.limit
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Text,
    Semantic,
    Both,
    Graph,
    Field,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Explain {
    pub text_matches: usize,
    pub text_score: f32,
    pub semantic_score: f32,
    pub graph_score: f32,
    pub field_score: f32,
    pub match_source: MatchSource,
}

#[derive(Debug, Clone)]
pub struct FindResult {
    pub id: NounId,
    pub score: f32,
    pub entity: Option<Entity>,
    pub explain: Option<Explain>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightGranularity {
    #[default]
    Word,
    Sentence,
}

#[derive(Debug, Clone)]
pub struct HighlightRequest {
    pub query: String,
    pub text: String,
    pub granularity: HighlightGranularity,
    pub threshold: Option<f32>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightMatchType {
    Text,
    Semantic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Title,
    Content,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub text: String,
    pub match_type: HighlightMatchType,
    pub content_category: ContentCategory,
    pub score: f32,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn where_clause_deserializes_mixed_forms() {
        let raw = json!({
            "category": {"oneOf": ["framework", "library"]},
            "year": {"greaterThan": 2020},
            "name": "react"
        });
        let clause: WhereClause = serde_json::from_value(raw).unwrap();
        assert!(clause["year"].matches(Some(&json!(2021))));
        assert!(!clause["year"].matches(Some(&json!(2020))));
        assert!(clause["category"].matches(Some(&json!("library"))));
        assert!(clause["name"].matches(Some(&json!("react"))));
        assert!(!clause["name"].matches(None));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let condition = FieldCondition::Ops(OpCondition {
            contains: Some("Frame".into()),
            ..OpCondition::default()
        });
        assert!(condition.matches(Some(&json!("modern frameworks"))));
        assert!(!condition.matches(Some(&json!("libraries"))));
    }

    #[test]
    fn combined_ops_are_conjunctive() {
        let raw = json!({"greaterOrEqual": 10, "lessThan": 20});
        let condition: FieldCondition = serde_json::from_value(raw).unwrap();
        assert!(condition.matches(Some(&json!(10))));
        assert!(condition.matches(Some(&json!(19.5))));
        assert!(!condition.matches(Some(&json!(20))));
        assert!(!condition.matches(Some(&json!("ten"))));
    }
}
