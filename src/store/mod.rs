//! Graph store adapter.
//!
//! Stages talk to the graph only through [`GraphStore`]. Every write is an
//! upsert keyed on the entity id, so reruns and concurrent runs converge on
//! the same state. Two implementations are provided:
//!
//! - [`SqliteGraphStore`]: persistent, backed by `sqlx`
//! - [`InMemoryGraphStore`]: process-local, for tests and ephemeral runs

mod memory;
mod sqlite;

pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::graph::{Edge, EdgeType, Hyperedge, Node, NodeType};

/// Whether an operation reads or mutates the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// No mutation.
    Read,
    /// Creates, updates or deletes.
    Write,
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryMode::Read => write!(f, "read"),
            QueryMode::Write => write!(f, "write"),
        }
    }
}

/// The closed set of operations a store executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphOperation {
    /// Match-or-create a node.
    UpsertNode,
    /// Fetch a node by id.
    GetNode,
    /// Filter nodes.
    FindNodes,
    /// Count nodes.
    CountNodes,
    /// Delete a node and its incident edges.
    DeleteNode,
    /// Match-or-create an edge.
    UpsertEdge,
    /// Filter edges.
    FindEdges,
    /// Count edges.
    CountEdges,
    /// Delete an edge.
    DeleteEdge,
    /// Match-or-create a hyperedge.
    UpsertHyperedge,
    /// List hyperedges in a scope.
    FindHyperedges,
}

impl GraphOperation {
    /// Read or write.
    pub fn mode(&self) -> QueryMode {
        match self {
            GraphOperation::GetNode
            | GraphOperation::FindNodes
            | GraphOperation::CountNodes
            | GraphOperation::FindEdges
            | GraphOperation::CountEdges
            | GraphOperation::FindHyperedges => QueryMode::Read,
            GraphOperation::UpsertNode
            | GraphOperation::DeleteNode
            | GraphOperation::UpsertEdge
            | GraphOperation::DeleteEdge
            | GraphOperation::UpsertHyperedge => QueryMode::Write,
        }
    }
}

impl std::fmt::Display for GraphOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GraphOperation::UpsertNode => "upsert_node",
            GraphOperation::GetNode => "get_node",
            GraphOperation::FindNodes => "find_nodes",
            GraphOperation::CountNodes => "count_nodes",
            GraphOperation::DeleteNode => "delete_node",
            GraphOperation::UpsertEdge => "upsert_edge",
            GraphOperation::FindEdges => "find_edges",
            GraphOperation::CountEdges => "count_edges",
            GraphOperation::DeleteEdge => "delete_edge",
            GraphOperation::UpsertHyperedge => "upsert_hyperedge",
            GraphOperation::FindHyperedges => "find_hyperedges",
        };
        write!(f, "{}", name)
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No entity with that id existed.
    Created,
    /// An existing entity was updated in place.
    Updated,
}

impl UpsertOutcome {
    /// True for [`UpsertOutcome::Created`].
    pub fn is_created(&self) -> bool {
        matches!(self, UpsertOutcome::Created)
    }
}

/// Node filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeQuery {
    /// Owning root id.
    pub scope_id: Option<String>,
    /// Allowed node kinds.
    pub node_types: Vec<NodeType>,
    /// Allowed ids.
    pub ids: Vec<String>,
    /// Exact `metadata.query_context`.
    pub query_context: Option<String>,
}

impl NodeQuery {
    /// Nodes owned by one root.
    pub fn in_scope(scope_id: impl Into<String>) -> Self {
        Self {
            scope_id: Some(scope_id.into()),
            ..Self::default()
        }
    }

    /// Restrict to one kind
    pub fn of_type(mut self, node_type: NodeType) -> Self {
        self.node_types = vec![node_type];
        self
    }

    /// Restrict to several kinds
    pub fn of_types(mut self, node_types: &[NodeType]) -> Self {
        self.node_types = node_types.to_vec();
        self
    }

    /// Restrict to the given ids
    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to an exact query context
    pub fn with_query_context(mut self, query_context: impl Into<String>) -> Self {
        self.query_context = Some(query_context.into());
        self
    }

    /// Whether a node passes the filter.
    pub fn matches(&self, node: &Node) -> bool {
        self.scope_id.as_ref().map_or(true, |s| &node.scope_id == s)
            && (self.node_types.is_empty() || self.node_types.contains(&node.node_type))
            && (self.ids.is_empty() || self.ids.contains(&node.id))
            && self
                .query_context
                .as_ref()
                .map_or(true, |q| node.metadata.query_context.as_ref() == Some(q))
    }
}

/// Edge filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeQuery {
    /// Owning root id.
    pub scope_id: Option<String>,
    /// Allowed edge kinds.
    pub edge_types: Vec<EdgeType>,
    /// Exact source id.
    pub source_id: Option<String>,
    /// Exact target id.
    pub target_id: Option<String>,
    /// Either endpoint.
    pub touching: Option<String>,
}

impl EdgeQuery {
    /// Edges owned by one root.
    pub fn in_scope(scope_id: impl Into<String>) -> Self {
        Self {
            scope_id: Some(scope_id.into()),
            ..Self::default()
        }
    }

    /// Edges incident to a node, in any scope.
    pub fn touching(node_id: impl Into<String>) -> Self {
        Self {
            touching: Some(node_id.into()),
            ..Self::default()
        }
    }

    /// Restrict to one kind
    pub fn of_type(mut self, edge_type: EdgeType) -> Self {
        self.edge_types = vec![edge_type];
        self
    }

    /// Restrict to several kinds
    pub fn of_types(mut self, edge_types: &[EdgeType]) -> Self {
        self.edge_types = edge_types.to_vec();
        self
    }

    /// Restrict the source
    pub fn from_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Restrict the target
    pub fn to_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// Whether an edge passes the filter.
    pub fn matches(&self, edge: &Edge) -> bool {
        self.scope_id.as_ref().map_or(true, |s| &edge.scope_id == s)
            && (self.edge_types.is_empty() || self.edge_types.contains(&edge.edge_type))
            && self.source_id.as_ref().map_or(true, |s| &edge.source_id == s)
            && self.target_id.as_ref().map_or(true, |t| &edge.target_id == t)
            && self.touching.as_ref().map_or(true, |n| edge.touches(n))
    }
}

/// Graph store adapter consumed by every stage.
///
/// Results of `find_*` are ordered by id. Edge upserts fail with
/// `StoreError::Constraint` when either endpoint is missing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphStore: Send + Sync {
    // Nodes
    /// Match-or-create a node by id. Updates keep the stored `created_at`.
    async fn upsert_node(&self, node: &Node) -> StoreResult<UpsertOutcome>;
    /// Fetch one node.
    async fn get_node(&self, id: &str) -> StoreResult<Option<Node>>;
    /// Fetch every node matching the filter.
    async fn find_nodes(&self, query: &NodeQuery) -> StoreResult<Vec<Node>>;
    /// Count nodes matching the filter.
    async fn count_nodes(&self, query: &NodeQuery) -> StoreResult<usize>;
    /// Delete a node and every edge touching it. Returns whether it existed.
    async fn delete_node(&self, id: &str) -> StoreResult<bool>;

    // Edges
    /// Match-or-create an edge by id.
    async fn upsert_edge(&self, edge: &Edge) -> StoreResult<UpsertOutcome>;
    /// Fetch every edge matching the filter.
    async fn find_edges(&self, query: &EdgeQuery) -> StoreResult<Vec<Edge>>;
    /// Count edges matching the filter.
    async fn count_edges(&self, query: &EdgeQuery) -> StoreResult<usize>;
    /// Delete one edge. Returns whether it existed.
    async fn delete_edge(&self, id: &str) -> StoreResult<bool>;

    // Hyperedges
    /// Match-or-create a hyperedge by id.
    async fn upsert_hyperedge(&self, hyperedge: &Hyperedge) -> StoreResult<UpsertOutcome>;
    /// Every hyperedge in a scope.
    async fn find_hyperedges(&self, scope_id: &str) -> StoreResult<Vec<Hyperedge>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_modes() {
        assert_eq!(GraphOperation::UpsertNode.mode(), QueryMode::Write);
        assert_eq!(GraphOperation::DeleteEdge.mode(), QueryMode::Write);
        assert_eq!(GraphOperation::FindNodes.mode(), QueryMode::Read);
        assert_eq!(GraphOperation::CountEdges.mode(), QueryMode::Read);
        assert_eq!(GraphOperation::UpsertHyperedge.to_string(), "upsert_hyperedge");
    }

    #[test]
    fn test_node_query_matches() {
        let node = Node::new("root-a/dim-0", "root-a", NodeType::Dimension, "Scope");
        assert!(NodeQuery::default().matches(&node));
        assert!(NodeQuery::in_scope("root-a").matches(&node));
        assert!(!NodeQuery::in_scope("root-b").matches(&node));
        assert!(NodeQuery::in_scope("root-a")
            .of_types(&[NodeType::Dimension, NodeType::Root])
            .matches(&node));
        assert!(!NodeQuery::in_scope("root-a")
            .of_type(NodeType::Hypothesis)
            .matches(&node));
        assert!(!NodeQuery::default().with_ids(["other"]).matches(&node));
        assert!(!NodeQuery::default().with_query_context("q").matches(&node));
    }

    #[test]
    fn test_edge_query_matches() {
        let edge = Edge::new("root-a", "dim", "root-a", EdgeType::DecompositionOf);
        assert!(EdgeQuery::touching("dim").matches(&edge));
        assert!(EdgeQuery::touching("root-a").matches(&edge));
        assert!(!EdgeQuery::touching("x").matches(&edge));
        assert!(EdgeQuery::in_scope("root-a")
            .of_type(EdgeType::DecompositionOf)
            .from_source("dim")
            .to_target("root-a")
            .matches(&edge));
        assert!(!EdgeQuery::default().of_type(EdgeType::Causal).matches(&edge));
    }
}
