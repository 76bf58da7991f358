//! End-to-end scenarios over the in-memory backend.

use neurograph_core::{BranchRecord, Dimension, StoreConfig};
use neurograph_engine::{
    AddRequest, CommitOptions, ConnectedSpec, ContentCategory, FieldCondition, FindQuery,
    HashEmbedder, HighlightGranularity, HighlightMatchType, HighlightRequest, MemoryBackend,
    NeuroGraph, NounType, QueryInput, RelateRequest, RelationFilter, SaveOptions, UpdateRequest,
    VersionSelector, VerbType, WhereClause,
};
use serde_json::json;
use std::sync::Arc;

const DIM: usize = 64;

async fn store() -> NeuroGraph {
    store_over(Arc::new(MemoryBackend::new())).await
}

async fn store_over(backend: Arc<MemoryBackend>) -> NeuroGraph {
    let config = StoreConfig {
        dimension: Dimension(DIM),
        ..StoreConfig::default()
    };
    let store = NeuroGraph::new(config, backend, Arc::new(HashEmbedder::new(DIM)));
    store.init().await.unwrap();
    store.ready().await.unwrap();
    store
}

fn concept(data: &str, metadata: serde_json::Value) -> AddRequest {
    AddRequest {
        data: Some(data.to_string()),
        noun_type: NounType::Concept,
        metadata: Some(metadata),
        ..Default::default()
    }
}

#[tokio::test]
async fn s1_insert_and_find() {
    let store = store().await;
    let id = store
        .add(concept(
            "Quantum computing breakthrough",
            json!({"category": "tech", "year": 2024}),
        ))
        .await
        .unwrap();
    for filler in [
        "cooking pasta at home",
        "football season results",
        "gardening tips for spring",
    ] {
        store.add(concept(filler, json!({"category": "misc"}))).await.unwrap();
    }

    let results = store
        .find(FindQuery {
            limit: 5,
            ..FindQuery::text("quantum physics")
        })
        .await
        .unwrap();
    assert!(
        results.iter().take(5).any(|r| r.id == id),
        "expected the quantum noun in the top-5"
    );
}

#[tokio::test]
async fn s2_triple_query() {
    let store = store().await;
    let react = store
        .add(concept("React core library", json!({"category": "library", "year": 2013})))
        .await
        .unwrap();

    let mut related = Vec::new();
    for year in [2021, 2022, 2022, 2023, 2024] {
        let id = store
            .add(concept(
                "modern frontend framework",
                json!({"category": "framework", "year": year}),
            ))
            .await
            .unwrap();
        store
            .relate(RelateRequest {
                from: id,
                to: react,
                verb_type: VerbType::BuiltOn,
                weight: None,
                metadata: None,
            })
            .await
            .unwrap();
        related.push(id);
    }
    // Unrelated nouns that match the filter but not the graph.
    for year in [2021, 2023, 2024, 2019, 2018] {
        store
            .add(concept(
                "another frontend framework",
                json!({"category": "framework", "year": year}),
            ))
            .await
            .unwrap();
    }

    let mut where_clause = WhereClause::new();
    where_clause.insert("year".into(), FieldCondition::greater_than(2020.0));
    where_clause.insert(
        "category".into(),
        FieldCondition::one_of(vec![json!("framework"), json!("library")]),
    );

    let results = store
        .find(FindQuery {
            query: Some(QueryInput::Text("modern frontend frameworks".into())),
            where_clause: Some(where_clause),
            connected: Some(ConnectedSpec {
                to: react,
                depth: 2,
                verb_type: Some(VerbType::BuiltOn),
                direction: None,
            }),
            limit: 10,
            explain: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let mut found: Vec<_> = results.iter().map(|r| r.id).collect();
    found.sort();
    let mut expected = related.clone();
    expected.sort();
    assert_eq!(found, expected, "exactly the five related nouns with year > 2020");
    for result in &results {
        let explain = result.explain.as_ref().unwrap();
        assert!(explain.graph_score > 0.0, "graph signal must contribute");
    }
}

#[tokio::test]
async fn s3_branch_isolation() {
    let store = store().await;
    store
        .add(concept("shared baseline", json!({"category": "base"})))
        .await
        .unwrap();
    store.flush().await.unwrap();

    let fork = store.fork(Some("feature".into()), None).await.unwrap();
    assert_eq!(fork.get_current_branch(), "feature");
    let doc = fork
        .add(AddRequest {
            data: Some("feature only document".into()),
            noun_type: NounType::Document,
            ..Default::default()
        })
        .await
        .unwrap();
    fork.flush().await.unwrap();

    let on_main = store.find(FindQuery { limit: 50, ..Default::default() }).await.unwrap();
    assert!(
        on_main.iter().all(|r| r.id != doc),
        "main must not see the fork's document"
    );

    let on_fork = fork.find(FindQuery { limit: 50, ..Default::default() }).await.unwrap();
    assert!(on_fork.iter().any(|r| r.id == doc));
    // The fork still inherits the parent's data.
    assert_eq!(on_fork.len(), on_main.len() + 1);

    let names: Vec<String> = store.list_branches().iter().map(|b: &BranchRecord| b.name.clone()).collect();
    assert!(names.contains(&"feature".to_string()));
}

#[tokio::test]
async fn s4_versioning_round_trip() {
    let store = store().await;
    let id = store
        .add(AddRequest {
            data: Some("a person".into()),
            noun_type: NounType::Person,
            metadata: Some(json!({"name": "Alice"})),
            ..Default::default()
        })
        .await
        .unwrap();

    store
        .versions()
        .save(id, SaveOptions { tag: Some("v1".into()), ..Default::default() })
        .await
        .unwrap();
    store
        .update(UpdateRequest {
            id,
            metadata: Some(json!({"name": "Alice Smith"})),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .versions()
        .save(id, SaveOptions { tag: Some("v2".into()), ..Default::default() })
        .await
        .unwrap();

    let diff = store.versions().compare(id, 1, 2).await.unwrap();
    assert_eq!(diff.modified[0].path, "metadata.name");
    assert_eq!(diff.modified[0].old_value, json!("Alice"));
    assert_eq!(diff.modified[0].new_value, json!("Alice Smith"));

    // restore(v) followed by get equals the stored content.
    store
        .versions()
        .restore(id, VersionSelector::Tag("v1".into()))
        .await
        .unwrap();
    let entity = store.get(id).await.unwrap().unwrap();
    assert_eq!(entity.metadata["name"], json!("Alice"));
    let content = store.versions().get_content(id, 1).await.unwrap();
    assert_eq!(content["metadata"]["name"], json!("Alice"));
}

#[tokio::test]
async fn s5_highlight_rich_text() {
    let store = store().await;
    let doc = json!({
        "type": "doc",
        "content": [
            {"type": "heading", "content": [{"type": "text", "text": "David Smith"}]},
            {"type": "paragraph", "content": [{"type": "text", "text": "A brave fighter who battles dragons"}]}
        ]
    });
    let results = store
        .highlight(&HighlightRequest {
            query: "david the warrior".into(),
            text: doc.to_string(),
            granularity: HighlightGranularity::Word,
            threshold: Some(0.95),
            content_type: None,
        })
        .await
        .unwrap();

    let david = results.iter().find(|h| h.text == "David").unwrap();
    assert_eq!(david.match_type, HighlightMatchType::Text);
    assert_eq!(david.content_category, ContentCategory::Title);
}

#[tokio::test]
async fn s6_cold_restart_preserves_queries() {
    let backend = Arc::new(MemoryBackend::new());
    let first = store_over(Arc::clone(&backend)).await;
    let mut ids = Vec::new();
    for i in 0..30 {
        ids.push(
            first
                .add(concept(
                    &format!("knowledge item number {i}"),
                    json!({"category": "seed", "rank": i}),
                ))
                .await
                .unwrap(),
        );
    }
    for pair in ids.windows(2) {
        first
            .relate(RelateRequest {
                from: pair[0],
                to: pair[1],
                verb_type: VerbType::ConnectedTo,
                weight: None,
                metadata: None,
            })
            .await
            .unwrap();
    }
    first.flush().await.unwrap();
    first.close().await.unwrap();

    // A fresh process over the same blobs.
    let second = store_over(backend).await;
    let results = second
        .find(FindQuery {
            query: Some(QueryInput::Text("knowledge item number 7".into())),
            limit: 5,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(second.counts().entities().await.unwrap(), 30);
    assert_eq!(second.counts().relationships().await.unwrap(), 29);

    let relations = second
        .get_relations(RelationFilter {
            from: Some(ids[0]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].to, ids[1]);
}

#[tokio::test]
async fn relations_lifecycle() {
    let store = store().await;
    let a = store.add(concept("service a", json!({}))).await.unwrap();
    let b = store.add(concept("service b", json!({}))).await.unwrap();

    let err = store
        .relate(RelateRequest {
            from: a,
            to: a,
            verb_type: VerbType::DependsOn,
            weight: None,
            metadata: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, neurograph_engine::NeuroGraphError::InvalidArgument(_)));

    let rel = store
        .relate(RelateRequest {
            from: a,
            to: b,
            verb_type: VerbType::DependsOn,
            weight: Some(0.7),
            metadata: Some(json!({"reason": "runtime"})),
        })
        .await
        .unwrap();

    let relations = store
        .get_relations(RelationFilter {
            from: Some(a),
            verb_type: Some(VerbType::DependsOn),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].weight, 0.7);
    assert_eq!(
        store.counts().by_verb_type(VerbType::DependsOn).await.unwrap(),
        1
    );

    store.unrelate(rel).await.unwrap();
    assert!(store
        .get_relations(RelationFilter { from: Some(a), ..Default::default() })
        .await
        .unwrap()
        .is_empty());

    // Deleting a noun cascades its edges.
    let rel2 = store
        .relate(RelateRequest {
            from: a,
            to: b,
            verb_type: VerbType::Uses,
            weight: None,
            metadata: None,
        })
        .await
        .unwrap();
    store.delete(b).await.unwrap();
    assert!(store.get(b).await.unwrap().is_none());
    assert!(store.unrelate(rel2).await.is_err());
}

#[tokio::test]
async fn commit_and_as_of_view() {
    let store = store().await;
    let id = store
        .add(AddRequest {
            data: Some("original text".into()),
            noun_type: NounType::Note,
            metadata: Some(json!({"state": "draft"})),
            ..Default::default()
        })
        .await
        .unwrap();
    store.flush().await.unwrap();

    let commit = store
        .commit(CommitOptions {
            message: Some("first snapshot".into()),
            author: Some("tests".into()),
            metadata: None,
        })
        .await
        .unwrap();

    store
        .update(UpdateRequest {
            id,
            metadata: Some(json!({"state": "published"})),
            ..Default::default()
        })
        .await
        .unwrap();

    let view = store.as_of(commit, None).await.unwrap();
    let pinned = view.get(id).await.unwrap().unwrap();
    assert_eq!(pinned.metadata["state"], json!("draft"));
    // The live store moved on.
    let live = store.get(id).await.unwrap().unwrap();
    assert_eq!(live.metadata["state"], json!("published"));

    let history = store.get_history(None, Some(10)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message.as_deref(), Some("first snapshot"));
}

#[tokio::test]
async fn similar_excludes_self_and_ranks_by_distance() {
    let store = store().await;
    let quantum = store
        .add(concept("quantum computing research", json!({})))
        .await
        .unwrap();
    let physics = store
        .add(concept("quantum physics lecture", json!({})))
        .await
        .unwrap();
    store.add(concept("sourdough bread recipe", json!({}))).await.unwrap();

    let results = store.similar(quantum, 2, None).await.unwrap();
    assert!(results.iter().all(|r| r.id != quantum));
    assert_eq!(results[0].id, physics);
}
