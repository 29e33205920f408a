//! Deterministic identifiers.
//!
//! Every id is a pure function of its parent id and position, so reruns and
//! concurrent runs over the same query upsert the same entities instead of
//! duplicating them.

use uuid::Uuid;

use super::EdgeType;

/// Lowercased, whitespace-collapsed form used to match queries.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Root id for a query.
pub fn root_id(query: &str) -> String {
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, normalize_query(query).as_bytes());
    format!("root-{}", digest.simple())
}

/// Dimension `index` under a root.
pub fn dimension_id(root_id: &str, index: usize) -> String {
    format!("{}/dim-{}", root_id, index)
}

/// Hypothesis `index` under a dimension.
pub fn hypothesis_id(dimension_id: &str, index: usize) -> String {
    format!("{}/hyp-{}", dimension_id, index)
}

/// Evidence item `index` gathered for a hypothesis.
///
/// Independent of the loop iteration, so a rerun that evaluates the
/// hypothesis at another position upserts the same evidence.
pub fn evidence_id(hypothesis_id: &str, index: usize) -> String {
    format!("{}/ev-{}", hypothesis_id, index)
}

/// Bridge node between an evidence node and a hypothesis.
pub fn ibn_id(evidence_id: &str, hypothesis_id: &str) -> String {
    format!("ibn-{}-{}", evidence_id, hypothesis_id)
}

/// Hyperedge over a hypothesis and its evidence.
pub fn hyperedge_id(hypothesis_id: &str) -> String {
    format!("hx-{}", hypothesis_id)
}

/// Edge id from endpoints and kind.
pub fn edge_id(source_id: &str, edge_type: &EdgeType, target_id: &str) -> String {
    format!("{}--{}-->{}", source_id, edge_type, target_id)
}

/// Session id for one pipeline run.
pub fn session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}
