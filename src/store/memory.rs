//! In-memory graph store for tests and throwaway runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{EdgeQuery, GraphOperation, GraphStore, NodeQuery, UpsertOutcome};
use crate::error::{StoreError, StoreResult};
use crate::graph::{Edge, Hyperedge, Node};

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<String, Node>,
    edges: BTreeMap<String, Edge>,
    hyperedges: BTreeMap<String, Hyperedge>,
}

/// Process-local graph store.
///
/// Clones share the same underlying graph.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphStore {
    state: Arc<RwLock<GraphState>>,
}

impl InMemoryGraphStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_node(&self, node: &Node) -> StoreResult<UpsertOutcome> {
        debug!(op = %GraphOperation::UpsertNode, node_id = %node.id, "memory store");
        let mut state = self.state.write().await;
        match state.nodes.get_mut(&node.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = node.clone();
                existing.created_at = created_at;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                state.nodes.insert(node.id.clone(), node.clone());
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        Ok(self.state.read().await.nodes.get(id).cloned())
    }

    async fn find_nodes(&self, query: &NodeQuery) -> StoreResult<Vec<Node>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .values()
            .filter(|n| query.matches(n))
            .cloned()
            .collect())
    }

    async fn count_nodes(&self, query: &NodeQuery) -> StoreResult<usize> {
        let state = self.state.read().await;
        Ok(state.nodes.values().filter(|n| query.matches(n)).count())
    }

    async fn delete_node(&self, id: &str) -> StoreResult<bool> {
        debug!(op = %GraphOperation::DeleteNode, node_id = %id, "memory store");
        let mut state = self.state.write().await;
        let existed = state.nodes.remove(id).is_some();
        state.edges.retain(|_, e| !e.touches(id));
        Ok(existed)
    }

    async fn upsert_edge(&self, edge: &Edge) -> StoreResult<UpsertOutcome> {
        debug!(op = %GraphOperation::UpsertEdge, edge_id = %edge.id, "memory store");
        let mut state = self.state.write().await;
        for endpoint in [&edge.source_id, &edge.target_id] {
            if !state.nodes.contains_key(endpoint) {
                return Err(StoreError::Constraint {
                    message: format!("edge {} references missing node {}", edge.id, endpoint),
                });
            }
        }
        match state.edges.get_mut(&edge.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = edge.clone();
                existing.created_at = created_at;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                state.edges.insert(edge.id.clone(), edge.clone());
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn find_edges(&self, query: &EdgeQuery) -> StoreResult<Vec<Edge>> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    async fn count_edges(&self, query: &EdgeQuery) -> StoreResult<usize> {
        let state = self.state.read().await;
        Ok(state.edges.values().filter(|e| query.matches(e)).count())
    }

    async fn delete_edge(&self, id: &str) -> StoreResult<bool> {
        debug!(op = %GraphOperation::DeleteEdge, edge_id = %id, "memory store");
        Ok(self.state.write().await.edges.remove(id).is_some())
    }

    async fn upsert_hyperedge(&self, hyperedge: &Hyperedge) -> StoreResult<UpsertOutcome> {
        let mut state = self.state.write().await;
        match state.hyperedges.get_mut(&hyperedge.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = hyperedge.clone();
                existing.created_at = created_at;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                state
                    .hyperedges
                    .insert(hyperedge.id.clone(), hyperedge.clone());
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn find_hyperedges(&self, scope_id: &str) -> StoreResult<Vec<Hyperedge>> {
        let state = self.state.read().await;
        Ok(state
            .hyperedges
            .values()
            .filter(|h| h.scope_id == scope_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeType, NodeType};

    #[tokio::test]
    async fn test_upsert_reports_created_then_updated() {
        let store = InMemoryGraphStore::new();
        let node = Node::new("n1", "root-a", NodeType::Root, "Task");
        assert_eq!(store.upsert_node(&node).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(store.upsert_node(&node).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(store.count_nodes(&NodeQuery::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let store = InMemoryGraphStore::new();
        let node = Node::new("n1", "root-a", NodeType::Root, "Task");
        store.upsert_node(&node).await.unwrap();

        let mut changed = node.clone();
        changed.label = "Renamed".to_string();
        changed.created_at = chrono::Utc::now() + chrono::Duration::days(1);
        store.upsert_node(&changed).await.unwrap();

        let stored = store.get_node("n1").await.unwrap().unwrap();
        assert_eq!(stored.label, "Renamed");
        assert_eq!(stored.created_at, node.created_at);
    }

    #[tokio::test]
    async fn test_edge_requires_endpoints() {
        let store = InMemoryGraphStore::new();
        store
            .upsert_node(&Node::new("a", "root-a", NodeType::Root, "A"))
            .await
            .unwrap();
        let edge = Edge::new("root-a", "a", "missing", EdgeType::Causal);
        let result = store.upsert_edge(&edge).await;
        assert!(matches!(result, Err(StoreError::Constraint { .. })));
    }

    #[tokio::test]
    async fn test_delete_node_detaches_edges() {
        let store = InMemoryGraphStore::new();
        for id in ["a", "b", "c"] {
            store
                .upsert_node(&Node::new(id, "root-a", NodeType::Hypothesis, id))
                .await
                .unwrap();
        }
        store
            .upsert_edge(&Edge::new("root-a", "a", "b", EdgeType::Causal))
            .await
            .unwrap();
        store
            .upsert_edge(&Edge::new("root-a", "b", "c", EdgeType::Temporal))
            .await
            .unwrap();

        assert!(store.delete_node("b").await.unwrap());
        assert!(!store.delete_node("b").await.unwrap());
        assert_eq!(store.count_edges(&EdgeQuery::default()).await.unwrap(), 0);
        assert_eq!(store.count_nodes(&NodeQuery::default()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = InMemoryGraphStore::new();
        let other = store.clone();
        store
            .upsert_node(&Node::new("a", "root-a", NodeType::Root, "A"))
            .await
            .unwrap();
        assert!(other.get_node("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hyperedges_by_scope() {
        let store = InMemoryGraphStore::new();
        let hx = Hyperedge::new("hx-1", "root-a", vec!["x".to_string()], "joint");
        assert!(store.upsert_hyperedge(&hx).await.unwrap().is_created());
        assert_eq!(store.find_hyperedges("root-a").await.unwrap().len(), 1);
        assert!(store.find_hyperedges("root-b").await.unwrap().is_empty());
    }
}
