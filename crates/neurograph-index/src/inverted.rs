//! Inverted metadata index.
//!
//! For each indexed `(field, value)` pair the index keeps a compressed bitmap
//! of integer ids. Values from temporally-named numeric fields are bucketed
//! into one-minute windows unconditionally; everything else is indexed as-is.
//! The `id` field, configured exclusions, and large free-text blobs are never
//! indexed; they stay post-filter territory for the planner.

use crate::idmap::IdMap;
use crate::text::{hash_word, tokenize};
use dashmap::DashMap;
use neurograph_core::{MetadataIndexConfig, MetadataValue};
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub const BUCKET_MILLIS: f64 = 60_000.0;

const TEMPORAL_MARKERS: &[&str] = &[
    "time",
    "date",
    "timestamp",
    "modified",
    "created",
    "accessed",
    "updated",
];

/// Field names matching the temporal pattern get bucketed values.
pub fn is_temporal_field(name: &str) -> bool {
    let lowered = name.to_lowercase();
    TEMPORAL_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Floors a raw timestamp onto its one-minute bucket boundary.
pub fn bucket_value(value: f64) -> f64 {
    (value / BUCKET_MILLIS).floor() * BUCKET_MILLIS
}

/// Normalized index key. `Num` orders by total ordering so numeric range
/// scans work over the per-field BTreeMap.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Eq for IndexKey {}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use IndexKey::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Num(a), Num(b)) => a.total_cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Bool(_), _) => std::cmp::Ordering::Less,
            (_, Bool(_)) => std::cmp::Ordering::Greater,
            (Num(_), Str(_)) => std::cmp::Ordering::Less,
            (Str(_), Num(_)) => std::cmp::Ordering::Greater,
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl IndexKey {
    pub fn from_value(value: &MetadataValue) -> Option<IndexKey> {
        match value {
            MetadataValue::Bool(b) => Some(IndexKey::Bool(*b)),
            MetadataValue::Number(n) => n.as_f64().map(IndexKey::Num),
            MetadataValue::String(s) => Some(IndexKey::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> MetadataValue {
        match self {
            IndexKey::Bool(b) => MetadataValue::Bool(*b),
            IndexKey::Num(n) => serde_json::Number::from_f64(*n)
                .map(MetadataValue::Number)
                .unwrap_or(MetadataValue::Null),
            IndexKey::Str(s) => MetadataValue::String(s.clone()),
        }
    }

    /// Printable encoding used in chunk keys.
    pub fn encode(&self) -> String {
        match self {
            IndexKey::Bool(b) => format!("b:{b}"),
            IndexKey::Num(n) => format!("n:{n}"),
            IndexKey::Str(s) => format!("s:{s}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub field: String,
    pub value: MetadataValue,
}

/// Result of a range query: ids certainly inside the range, plus ids from the
/// boundary buckets whose raw value must be re-checked after hydration.
#[derive(Debug, Clone, Default)]
pub struct RangeHits {
    pub certain: RoaringBitmap,
    pub boundary: RoaringBitmap,
}

type FieldMap = BTreeMap<IndexKey, RoaringBitmap>;

pub struct MetadataIndex {
    config: MetadataIndexConfig,
    idmap: Arc<IdMap>,
    fields: DashMap<String, Arc<RwLock<FieldMap>>>,
    tokens: DashMap<i32, RoaringBitmap>,
    dirty_fields: DashMap<String, ()>,
}

impl MetadataIndex {
    pub fn new(config: MetadataIndexConfig, idmap: Arc<IdMap>) -> Self {
        Self {
            config,
            idmap,
            fields: DashMap::new(),
            tokens: DashMap::new(),
            dirty_fields: DashMap::new(),
        }
    }

    pub fn idmap(&self) -> Arc<IdMap> {
        Arc::clone(&self.idmap)
    }

    pub fn config(&self) -> &MetadataIndexConfig {
        &self.config
    }

    /// Indexes every eligible field of `metadata` for `id`.
    pub fn add(&self, id: Uuid, metadata: &MetadataValue) {
        let int_id = self.idmap.get_or_assign(id);
        self.apply(int_id, metadata, true);
    }

    /// Removes `id`'s postings. The caller drops the id-map forward entry
    /// when the entity itself is deleted.
    pub fn remove(&self, id: &Uuid, metadata: &MetadataValue) {
        let Some(int_id) = self.idmap.get_int(id) else {
            return;
        };
        self.apply(int_id, metadata, false);
    }

    fn apply(&self, int_id: u32, metadata: &MetadataValue, insert: bool) {
        let Some(object) = metadata.as_object() else {
            return;
        };
        for (field, value) in object {
            if !self.field_is_indexable(field) {
                continue;
            }
            match value {
                MetadataValue::Array(items) => {
                    for item in items {
                        self.apply_single(int_id, field, item, insert);
                    }
                }
                other => self.apply_single(int_id, field, other, insert),
            }
        }
    }

    fn apply_single(&self, int_id: u32, field: &str, value: &MetadataValue, insert: bool) {
        let Some(key) = self.index_key(field, value) else {
            return;
        };
        if let IndexKey::Str(text) = &key {
            for word in tokenize(text) {
                let hash = hash_word(&word);
                let mut bitmap = self.tokens.entry(hash).or_default();
                if insert {
                    bitmap.insert(int_id);
                } else {
                    bitmap.remove(int_id);
                }
            }
        }
        let slot = self
            .fields
            .entry(field.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(FieldMap::new())))
            .clone();
        let mut map = slot.write();
        if insert {
            map.entry(key).or_default().insert(int_id);
        } else if let Some(bitmap) = map.get_mut(&key) {
            bitmap.remove(int_id);
            if bitmap.is_empty() {
                map.remove(&key);
            }
        }
        self.dirty_fields.insert(field.to_string(), ());
    }

    fn field_is_indexable(&self, field: &str) -> bool {
        field != "id" && !self.config.excluded_fields.iter().any(|f| f == field)
    }

    /// Maps a raw value onto its index key, applying temporal bucketing and
    /// the free-text blob exclusion.
    fn index_key(&self, field: &str, value: &MetadataValue) -> Option<IndexKey> {
        match IndexKey::from_value(value)? {
            IndexKey::Num(n) if is_temporal_field(field) => Some(IndexKey::Num(bucket_value(n))),
            IndexKey::Str(s) => {
                let dense: usize = s.bytes().filter(|b| !b.is_ascii_whitespace()).count();
                if dense > self.config.max_indexed_text_bytes && !is_temporal_field(field) {
                    None
                } else {
                    Some(IndexKey::Str(s))
                }
            }
            key => Some(key),
        }
    }

    pub fn bitmap_for(&self, field: &str, value: &MetadataValue) -> RoaringBitmap {
        let Some(key) = self.index_key(field, value) else {
            return RoaringBitmap::new();
        };
        let Some(slot) = self.fields.get(field) else {
            return RoaringBitmap::new();
        };
        let map = slot.read();
        map.get(&key).cloned().unwrap_or_default()
    }

    pub fn get_ids(&self, field: &str, value: &MetadataValue) -> Vec<Uuid> {
        self.resolve(&self.bitmap_for(field, value))
    }

    /// Conjunction across filters via bitmap AND, short-circuiting on the
    /// first empty operand.
    pub fn get_ids_for_multiple_fields(&self, filters: &[FieldFilter]) -> Vec<Uuid> {
        self.resolve(&self.intersect(filters))
    }

    pub fn intersect(&self, filters: &[FieldFilter]) -> RoaringBitmap {
        let mut combined: Option<RoaringBitmap> = None;
        for filter in filters {
            let bitmap = self.bitmap_for(&filter.field, &filter.value);
            if bitmap.is_empty() {
                return RoaringBitmap::new();
            }
            combined = Some(match combined {
                None => bitmap,
                Some(acc) => acc & bitmap,
            });
            if combined.as_ref().is_some_and(|b| b.is_empty()) {
                return RoaringBitmap::new();
            }
        }
        combined.unwrap_or_default()
    }

    /// Token query: ids ranked by how many distinct query words they match.
    pub fn get_ids_for_text_query(&self, text: &str) -> Vec<(Uuid, usize)> {
        let mut counts: std::collections::HashMap<u32, usize> = std::collections::HashMap::new();
        for word in tokenize(text) {
            if let Some(bitmap) = self.tokens.get(&hash_word(&word)) {
                for int_id in bitmap.iter() {
                    *counts.entry(int_id).or_insert(0) += 1;
                }
            }
        }
        let mut ranked: Vec<(u32, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .filter_map(|(int_id, n)| self.idmap.get_uuid(int_id).map(|id| (id, n)))
            .collect()
    }

    pub fn get_filter_values(&self, field: &str) -> Vec<MetadataValue> {
        let Some(slot) = self.fields.get(field) else {
            return Vec::new();
        };
        let map = slot.read();
        map.keys().map(|k| k.to_value()).collect()
    }

    /// Numeric range query. Temporal fields work on bucket boundaries: buckets
    /// entirely inside the range are certain, the two edge buckets come back
    /// separately for post-filtering against raw values.
    pub fn range(&self, field: &str, min: Option<f64>, max: Option<f64>) -> RangeHits {
        let Some(slot) = self.fields.get(field) else {
            return RangeHits::default();
        };
        let temporal = is_temporal_field(field);
        let (lo, hi) = if temporal {
            (
                min.map(bucket_value).unwrap_or(f64::NEG_INFINITY),
                max.map(bucket_value).unwrap_or(f64::INFINITY),
            )
        } else {
            (
                min.unwrap_or(f64::NEG_INFINITY),
                max.unwrap_or(f64::INFINITY),
            )
        };

        let mut hits = RangeHits::default();
        let map = slot.read();
        for (key, bitmap) in map.range(IndexKey::Num(lo)..=IndexKey::Num(hi)) {
            let IndexKey::Num(n) = key else { continue };
            let edge_bucket = temporal
                && ((min.is_some() && *n == lo) || (max.is_some() && *n == hi));
            if edge_bucket {
                hits.boundary |= bitmap;
            } else {
                hits.certain |= bitmap;
            }
        }
        hits
    }

    pub fn resolve(&self, bitmap: &RoaringBitmap) -> Vec<Uuid> {
        bitmap
            .iter()
            .filter_map(|int_id| self.idmap.get_uuid(int_id))
            .collect()
    }

    pub(crate) fn take_dirty_fields(&self) -> Vec<String> {
        let fields: Vec<String> = self.dirty_fields.iter().map(|e| e.key().clone()).collect();
        for field in &fields {
            self.dirty_fields.remove(field);
        }
        fields
    }

    pub(crate) fn field_map(&self, field: &str) -> Option<Arc<RwLock<FieldMap>>> {
        self.fields.get(field).map(|e| e.clone())
    }

    pub(crate) fn insert_loaded(&self, field: &str, key: IndexKey, bitmap: RoaringBitmap) {
        let slot = self
            .fields
            .entry(field.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(FieldMap::new())))
            .clone();
        let mut map = slot.write();
        let entry = map.entry(key.clone()).or_default();
        *entry |= bitmap.clone();
        drop(map);
        // Token postings are derived from string keys on load.
        if let IndexKey::Str(text) = key {
            for word in tokenize(&text) {
                let mut tokens = self.tokens.entry(hash_word(&word)).or_default();
                *tokens |= bitmap.clone();
            }
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index() -> MetadataIndex {
        MetadataIndex::new(MetadataIndexConfig::default(), Arc::new(IdMap::new()))
    }

    #[test]
    fn equality_lookup_and_intersection() {
        let idx = index();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        idx.add(a, &json!({"category": "tech", "year": 2024}));
        idx.add(b, &json!({"category": "tech", "year": 2023}));

        assert_eq!(idx.get_ids("category", &json!("tech")).len(), 2);
        let both = idx.get_ids_for_multiple_fields(&[
            FieldFilter {
                field: "category".into(),
                value: json!("tech"),
            },
            FieldFilter {
                field: "year".into(),
                value: json!(2024),
            },
        ]);
        assert_eq!(both, vec![a]);
    }

    #[test]
    fn intersection_short_circuits_to_empty() {
        let idx = index();
        idx.add(Uuid::new_v4(), &json!({"category": "tech"}));
        let none = idx.get_ids_for_multiple_fields(&[
            FieldFilter {
                field: "category".into(),
                value: json!("missing"),
            },
            FieldFilter {
                field: "category".into(),
                value: json!("tech"),
            },
        ]);
        assert!(none.is_empty());
    }

    #[test]
    fn id_field_is_never_indexed() {
        let idx = index();
        idx.add(Uuid::new_v4(), &json!({"id": "abc", "name": "ok"}));
        assert!(idx.get_ids("id", &json!("abc")).is_empty());
        assert_eq!(idx.get_ids("name", &json!("ok")).len(), 1);
    }

    #[test]
    fn large_text_blob_is_excluded() {
        let idx = index();
        let blob = "x".repeat(300);
        let id = Uuid::new_v4();
        idx.add(id, &json!({"body": blob, "title": "short"}));
        assert!(idx.get_ids("body", &json!("x".repeat(300))).is_empty());
        assert_eq!(idx.get_ids("title", &json!("short")).len(), 1);
    }

    #[test]
    fn temporal_values_share_minute_buckets() {
        let idx = index();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let base = 1_700_000_040_000f64; // on a minute boundary
        idx.add(a, &json!({"createdAt": base + 1_000.0}));
        idx.add(b, &json!({"createdAt": base + 59_000.0}));
        idx.add(c, &json!({"createdAt": base + 61_000.0}));

        // Same bucket for a and b; lookups by any in-bucket value hit both.
        let hits = idx.get_ids("createdAt", &json!(base + 30_000.0));
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&a) && hits.contains(&b));
        assert_eq!(idx.get_ids("createdAt", &json!(base + 61_500.0)), vec![c]);
    }

    #[test]
    fn non_temporal_numbers_index_exactly() {
        let idx = index();
        let id = Uuid::new_v4();
        idx.add(id, &json!({"score": 61_000.5}));
        assert_eq!(idx.get_ids("score", &json!(61_000.5)), vec![id]);
        assert!(idx.get_ids("score", &json!(0.0)).is_empty());
    }

    #[test]
    fn range_query_splits_certain_and_boundary() {
        let idx = index();
        let early = Uuid::new_v4();
        let mid = Uuid::new_v4();
        let late = Uuid::new_v4();
        let m = 60_000.0;
        idx.add(early, &json!({"updatedAt": 10.0 * m + 5_000.0}));
        idx.add(mid, &json!({"updatedAt": 11.0 * m + 5_000.0}));
        idx.add(late, &json!({"updatedAt": 12.0 * m + 5_000.0}));

        let hits = idx.range("updatedAt", Some(10.0 * m + 30_000.0), Some(12.0 * m + 30_000.0));
        let certain = idx.resolve(&hits.certain);
        let boundary = idx.resolve(&hits.boundary);
        assert_eq!(certain, vec![mid]);
        assert!(boundary.contains(&early) && boundary.contains(&late));
    }

    #[test]
    fn text_query_ranks_by_matched_words() {
        let idx = index();
        let both = Uuid::new_v4();
        let one = Uuid::new_v4();
        idx.add(both, &json!({"title": "modern frontend frameworks"}));
        idx.add(one, &json!({"title": "frontend cookbook"}));

        let ranked = idx.get_ids_for_text_query("modern frontend");
        assert_eq!(ranked[0].0, both);
        assert_eq!(ranked[0].1, 2);
        assert_eq!(ranked[1].0, one);
        assert_eq!(ranked[1].1, 1);
    }

    #[test]
    fn removal_clears_postings() {
        let idx = index();
        let id = Uuid::new_v4();
        let metadata = json!({"category": "tech", "tags": ["a1", "b2"]});
        idx.add(id, &metadata);
        assert_eq!(idx.get_ids("tags", &json!("a1")), vec![id]);
        idx.remove(&id, &metadata);
        assert!(idx.get_ids("category", &json!("tech")).is_empty());
        assert!(idx.get_ids("tags", &json!("a1")).is_empty());
    }

    #[test]
    fn filter_values_enumerate_the_field() {
        let idx = index();
        idx.add(Uuid::new_v4(), &json!({"category": "tech"}));
        idx.add(Uuid::new_v4(), &json!({"category": "science"}));
        let mut values: Vec<String> = idx
            .get_filter_values("category")
            .into_iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();
        values.sort();
        assert_eq!(values, vec!["science", "tech"]);
    }
}
