use crate::{NounType, VerbType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type NounId = Uuid;
pub type VerbId = Uuid;

/// Dense embedding vector. Dimension is fixed per store (default 384) and
/// validated on every ingest.
pub type Vector = Vec<f32>;

/// Metadata is an open tagged tree (null/bool/number/string/array/object).
/// `serde_json::Value` keys its objects with a sorted map, which gives the
/// canonical ordering the persisted layout requires.
pub type MetadataValue = serde_json::Value;

/// Milliseconds since the Unix epoch, the persisted timestamp form.
pub type TimestampMillis = i64;

pub fn now_millis() -> TimestampMillis {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Out,
    In,
    Both,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "out"),
            Direction::In => write!(f, "in"),
            Direction::Both => write!(f, "both"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Noun,
    Verb,
    Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Add,
    Update,
    Delete,
}

/// Persisted noun blob (`nouns/<uuid>`). Connections are keyed by the HNSW
/// layer rendered as a decimal string, each layer holding the neighbor set
/// encoded as an array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NounBlob {
    pub id: NounId,
    pub vector: Vector,
    pub level: u8,
    #[serde(default)]
    pub connections: BTreeMap<String, Vec<NounId>>,
}

impl NounBlob {
    pub fn connections_at(&self, level: u8) -> &[NounId] {
        self.connections
            .get(&level.to_string())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Persisted verb blob (`verbs/<uuid>`). Shaped like a noun without a level:
/// verbs are embedded so the store can search relationships semantically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerbBlob {
    pub id: VerbId,
    pub vector: Vector,
    #[serde(default)]
    pub connections: BTreeMap<String, Vec<VerbId>>,
}

/// Persisted verb metadata (`verbMetadata/<uuid>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerbRecord {
    pub source_id: NounId,
    pub target_id: NounId,
    pub verb: VerbType,
    #[serde(rename = "type")]
    pub type_name: String,
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataValue>,
    pub created_at: TimestampMillis,
    pub updated_at: TimestampMillis,
}

/// Persisted noun metadata record (`nounMetadata/<uuid>`). Arbitrary fields
/// plus the reserved `noun` / `service` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NounMetadataRecord {
    pub noun: NounType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, MetadataValue>,
    pub created_at: TimestampMillis,
    pub updated_at: TimestampMillis,
}

/// Change-log entry (`_system/changelog/<ts>_<rand>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub timestamp: TimestampMillis,
    pub op: ChangeOp,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<MetadataValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Cooperative lock record (`_system/locks/<name>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub lock_value: String,
    pub expires_at: TimestampMillis,
    pub pid: u32,
    pub timestamp: TimestampMillis,
}

impl LockRecord {
    pub fn is_expired(&self, now: TimestampMillis) -> bool {
        self.expires_at <= now
    }
}

/// Version metadata (`_version/<entityId>/<n>/<branch>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub content_hash: String,
    pub created_at: TimestampMillis,
}

/// Branch record (`branches/<name>`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BranchRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: TimestampMillis,
}

/// Statistics blob (`_system/stats/<yyyy-mm-dd>`). Counters merge by max so
/// concurrent flushes from cooperating writers stay monotone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsBlob {
    pub total_nodes: u64,
    pub total_edges: u64,
    pub total_metadata: u64,
    #[serde(default)]
    pub by_type: BTreeMap<String, u64>,
    pub last_updated: TimestampMillis,
}

impl StatisticsBlob {
    /// Monotone merge: take the max of each counter, union the breakdowns.
    pub fn merge_max(&mut self, other: &StatisticsBlob) {
        self.total_nodes = self.total_nodes.max(other.total_nodes);
        self.total_edges = self.total_edges.max(other.total_edges);
        self.total_metadata = self.total_metadata.max(other.total_metadata);
        for (k, v) in &other.by_type {
            let slot = self.by_type.entry(k.clone()).or_insert(0);
            *slot = (*slot).max(*v);
        }
        self.last_updated = self.last_updated.max(other.last_updated);
    }
}

/// Persisted id-map blob (`_system/idmap`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IdMapBlob {
    pub next: u32,
    pub entries: Vec<(Uuid, u32)>,
}

/// Canonical-JSON bytes for a serializable value. Object keys are already
/// sorted by `serde_json`'s map representation; this pins the compact,
/// no-whitespace encoding that content hashes are computed over.
pub fn canonical_json<T: Serialize>(value: &T) -> crate::Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "out" => Ok(Direction::Out),
            "in" => Ok(Direction::In),
            "both" => Ok(Direction::Both),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noun_blob_wire_shape() {
        let id = Uuid::new_v4();
        let n = Uuid::new_v4();
        let mut connections = BTreeMap::new();
        connections.insert("0".to_string(), vec![n]);
        let blob = NounBlob {
            id,
            vector: vec![0.5, 0.25],
            level: 1,
            connections,
        };
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["id"], serde_json::json!(id.to_string()));
        assert_eq!(json["level"], serde_json::json!(1));
        assert_eq!(json["connections"]["0"][0], serde_json::json!(n.to_string()));
        let back: NounBlob = serde_json::from_value(json).unwrap();
        assert_eq!(back, blob);
        assert_eq!(back.connections_at(0), &[n]);
        assert!(back.connections_at(3).is_empty());
    }

    #[test]
    fn verb_record_uses_camel_case() {
        let rec = VerbRecord {
            source_id: Uuid::new_v4(),
            target_id: Uuid::new_v4(),
            verb: VerbType::DependsOn,
            type_name: "dependsOn".into(),
            weight: 0.8,
            metadata: None,
            created_at: 1,
            updated_at: 2,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json.get("sourceId").is_some());
        assert!(json.get("targetId").is_some());
        assert_eq!(json["verb"], serde_json::json!("dependsOn"));
        assert_eq!(json["type"], serde_json::json!("dependsOn"));
    }

    #[test]
    fn statistics_merge_is_monotone() {
        let mut a = StatisticsBlob {
            total_nodes: 10,
            total_edges: 4,
            total_metadata: 10,
            by_type: BTreeMap::from([("person".to_string(), 3)]),
            last_updated: 100,
        };
        let b = StatisticsBlob {
            total_nodes: 7,
            total_edges: 9,
            total_metadata: 10,
            by_type: BTreeMap::from([("person".to_string(), 5), ("task".to_string(), 1)]),
            last_updated: 90,
        };
        a.merge_max(&b);
        assert_eq!(a.total_nodes, 10);
        assert_eq!(a.total_edges, 9);
        assert_eq!(a.by_type["person"], 5);
        assert_eq!(a.by_type["task"], 1);
        assert_eq!(a.last_updated, 100);
    }

    #[test]
    fn canonical_json_sorts_object_keys() {
        let v: serde_json::Value =
            serde_json::from_str(r#"{"zeta":1,"alpha":{"b":2,"a":1}}"#).unwrap();
        let bytes = canonical_json(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"alpha":{"a":1,"b":2},"zeta":1}"#
        );
    }
}
