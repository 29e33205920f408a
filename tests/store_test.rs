//! Graph store contract tests
//!
//! The same scenarios run against the SQLite store (file-backed, in a temp
//! directory) and the in-memory store, since stages only see the trait.

use std::sync::Arc;

use got_pipeline::config::DatabaseConfig;
use got_pipeline::error::StoreError;
use got_pipeline::graph::{ConfidenceVector, Edge, EdgeType, Hyperedge, Node, NodeType};
use got_pipeline::store::{
    EdgeQuery, GraphStore, InMemoryGraphStore, NodeQuery, SqliteGraphStore, UpsertOutcome,
};

const SCOPE: &str = "root-store";

async fn sqlite_store(dir: &tempfile::TempDir) -> Arc<dyn GraphStore> {
    let config = DatabaseConfig {
        path: dir.path().join("graph.db"),
        max_connections: 2,
    };
    Arc::new(
        SqliteGraphStore::new(&config)
            .await
            .expect("Failed to open sqlite store"),
    )
}

fn memory_store() -> Arc<dyn GraphStore> {
    Arc::new(InMemoryGraphStore::new())
}

async fn seed(store: &dyn GraphStore) {
    for (id, node_type) in [
        (SCOPE, NodeType::Root),
        ("dim-1", NodeType::Dimension),
        ("hyp-1", NodeType::Hypothesis),
        ("ev-1", NodeType::Evidence),
    ] {
        store
            .upsert_node(&Node::new(id, SCOPE, node_type, format!("{} label", id)))
            .await
            .unwrap();
    }
    for (src, tgt, edge_type) in [
        (SCOPE, "dim-1", EdgeType::DecompositionOf),
        ("dim-1", "hyp-1", EdgeType::GeneratesHypothesis),
        ("ev-1", "hyp-1", EdgeType::Causal),
    ] {
        store
            .upsert_edge(&Edge::new(SCOPE, src, tgt, edge_type).with_confidence(0.7))
            .await
            .unwrap();
    }
}

async fn check_upsert_is_idempotent(store: Arc<dyn GraphStore>) {
    let node = Node::new("hyp-x", SCOPE, NodeType::Hypothesis, "Lipid uptake");
    assert_eq!(store.upsert_node(&node).await.unwrap(), UpsertOutcome::Created);

    let revised = node
        .clone()
        .with_confidence(ConfidenceVector::new(0.9, 0.8, 0.7, 0.6));
    assert_eq!(
        store.upsert_node(&revised).await.unwrap(),
        UpsertOutcome::Updated
    );

    let stored = store.get_node("hyp-x").await.unwrap().unwrap();
    assert_eq!(stored.confidence, revised.confidence);
    assert_eq!(store.count_nodes(&NodeQuery::in_scope(SCOPE)).await.unwrap(), 1);
}

async fn check_queries_filter(store: Arc<dyn GraphStore>) {
    seed(store.as_ref()).await;

    let content = store
        .find_nodes(&NodeQuery::in_scope(SCOPE).of_types(&[NodeType::Hypothesis, NodeType::Evidence]))
        .await
        .unwrap();
    let mut ids: Vec<&str> = content.iter().map(|n| n.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["ev-1", "hyp-1"]);

    let touching = store.find_edges(&EdgeQuery::touching("hyp-1")).await.unwrap();
    assert_eq!(touching.len(), 2);

    let causal = store
        .find_edges(&EdgeQuery::in_scope(SCOPE).of_type(EdgeType::Causal).to_target("hyp-1"))
        .await
        .unwrap();
    assert_eq!(causal.len(), 1);
    assert_eq!(causal[0].source_id, "ev-1");
    assert_eq!(causal[0].confidence, Some(0.7));

    assert_eq!(
        store.count_nodes(&NodeQuery::in_scope("other-root")).await.unwrap(),
        0
    );
}

async fn check_edges_need_endpoints(store: Arc<dyn GraphStore>) {
    store
        .upsert_node(&Node::new(SCOPE, SCOPE, NodeType::Root, "root"))
        .await
        .unwrap();
    let dangling = Edge::new(SCOPE, SCOPE, "missing", EdgeType::DecompositionOf);
    let err = store.upsert_edge(&dangling).await.unwrap_err();
    assert!(matches!(err, StoreError::Constraint { .. }));
}

async fn check_delete_detaches_edges(store: Arc<dyn GraphStore>) {
    seed(store.as_ref()).await;

    assert!(store.delete_node("hyp-1").await.unwrap());
    assert!(!store.delete_node("hyp-1").await.unwrap());
    assert!(store
        .find_edges(&EdgeQuery::touching("hyp-1"))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(store.count_edges(&EdgeQuery::in_scope(SCOPE)).await.unwrap(), 1);
}

async fn check_hyperedges_roundtrip(store: Arc<dyn GraphStore>) {
    seed(store.as_ref()).await;
    let hyperedge = Hyperedge::new(
        "hyper-1",
        SCOPE,
        ["hyp-1".to_string(), "ev-1".to_string(), "ev-1".to_string()],
        "joint_evidence",
    )
    .with_confidence(ConfidenceVector::uniform(0.6));

    assert!(store.upsert_hyperedge(&hyperedge).await.unwrap().is_created());
    assert!(!store.upsert_hyperedge(&hyperedge).await.unwrap().is_created());

    let stored = store.find_hyperedges(SCOPE).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].node_ids, vec!["ev-1".to_string(), "hyp-1".to_string()]);
    assert_eq!(stored[0].confidence, ConfidenceVector::uniform(0.6));
    assert!(store.find_hyperedges("other-root").await.unwrap().is_empty());
}

mod sqlite_tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        check_upsert_is_idempotent(sqlite_store(&dir).await).await;
    }

    #[tokio::test]
    async fn test_queries_filter() {
        let dir = tempfile::tempdir().unwrap();
        check_queries_filter(sqlite_store(&dir).await).await;
    }

    #[tokio::test]
    async fn test_edges_need_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        check_edges_need_endpoints(sqlite_store(&dir).await).await;
    }

    #[tokio::test]
    async fn test_delete_detaches_edges() {
        let dir = tempfile::tempdir().unwrap();
        check_delete_detaches_edges(sqlite_store(&dir).await).await;
    }

    #[tokio::test]
    async fn test_hyperedges_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        check_hyperedges_roundtrip(sqlite_store(&dir).await).await;
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        seed(sqlite_store(&dir).await.as_ref()).await;

        let reopened = sqlite_store(&dir).await;
        assert_eq!(reopened.count_nodes(&NodeQuery::in_scope(SCOPE)).await.unwrap(), 4);
        assert_eq!(reopened.count_edges(&EdgeQuery::in_scope(SCOPE)).await.unwrap(), 3);
    }
}

mod memory_tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        check_upsert_is_idempotent(memory_store()).await;
    }

    #[tokio::test]
    async fn test_queries_filter() {
        check_queries_filter(memory_store()).await;
    }

    #[tokio::test]
    async fn test_edges_need_endpoints() {
        check_edges_need_endpoints(memory_store()).await;
    }

    #[tokio::test]
    async fn test_delete_detaches_edges() {
        check_delete_detaches_edges(memory_store()).await;
    }

    #[tokio::test]
    async fn test_hyperedges_roundtrip() {
        check_hyperedges_roundtrip(memory_store()).await;
    }
}
