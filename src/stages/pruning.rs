//! Pruning of weak content and merging of near-duplicate nodes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Stage, StageCore, INITIALIZATION_STAGE, PRUNING_MERGING_STAGE};
use crate::error::StageResult;
use crate::graph::math::label_similarity;
use crate::graph::{Edge, EdgeType, Hyperedge, Node, NodeType};
use crate::pipeline::{
    InitializationContext, MergeRecord, PipelineParams, PruningContext, SessionData, StageContext,
    StageOutput,
};
use crate::store::{EdgeQuery, GraphStore, NodeQuery};

/// Removes weak edges and nodes, then folds same-kind duplicates together.
pub struct PruningMergingStage {
    core: StageCore,
}

#[derive(Default)]
struct PruneTally {
    pruned_nodes: Vec<String>,
    pruned_edges: usize,
    merges: Vec<MergeRecord>,
    edges_repointed: usize,
}

/// Best hypothesis of every dimension: highest average confidence, then
/// impact, then the smaller id.
fn protected_hypotheses(nodes: &BTreeMap<String, Node>, edges: &[Edge]) -> BTreeSet<String> {
    let mut by_dimension: BTreeMap<&str, Vec<&Node>> = BTreeMap::new();
    for edge in edges.iter().filter(|e| e.edge_type == EdgeType::GeneratesHypothesis) {
        if let Some(node) = nodes.get(&edge.target_id) {
            by_dimension.entry(edge.source_id.as_str()).or_default().push(node);
        }
    }
    by_dimension
        .values()
        .filter_map(|hypotheses| {
            hypotheses
                .iter()
                .max_by(|a, b| {
                    a.confidence
                        .average()
                        .total_cmp(&b.confidence.average())
                        .then_with(|| a.impact().total_cmp(&b.impact()))
                        .then_with(|| b.id.cmp(&a.id))
                })
                .map(|n| n.id.clone())
        })
        .collect()
}

fn is_weak(node: &Node, params: &PipelineParams) -> bool {
    node.confidence.min_component() < params.pruning_confidence_threshold
        && node.impact() < params.pruning_impact_threshold
}

/// The node a content node hangs off, used to restrict merging to siblings.
fn merge_anchor<'a>(node: &Node, edges: &'a [Edge]) -> Option<&'a str> {
    let mut candidates: Vec<&str> = match node.node_type {
        NodeType::Hypothesis => edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::GeneratesHypothesis && e.target_id == node.id)
            .map(|e| e.source_id.as_str())
            .collect(),
        NodeType::Evidence => edges
            .iter()
            .filter(|e| e.edge_type.is_evidential() && e.source_id == node.id)
            .map(|e| e.target_id.as_str())
            .collect(),
        NodeType::Ibn => edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::IbnTarget && e.source_id == node.id)
            .map(|e| e.target_id.as_str())
            .collect(),
        _ => Vec::new(),
    };
    candidates.sort_unstable();
    candidates.into_iter().next()
}

/// Orders a merge pair as (keeper, loser).
fn keeper_and_loser<'a>(a: &'a Node, b: &'a Node, protected: &BTreeSet<String>) -> (&'a Node, &'a Node) {
    let (keep, lose) = match a.confidence.average().total_cmp(&b.confidence.average()) {
        std::cmp::Ordering::Greater => (a, b),
        std::cmp::Ordering::Less => (b, a),
        std::cmp::Ordering::Equal if a.id <= b.id => (a, b),
        std::cmp::Ordering::Equal => (b, a),
    };
    if protected.contains(&lose.id) {
        (lose, keep)
    } else {
        (keep, lose)
    }
}

impl PruningMergingStage {
    /// Create the stage over a store.
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            core: StageCore::new(store),
        }
    }

    /// Delete a node and drop it from every hyperedge it belongs to.
    async fn remove_node(&self, id: &str, hyperedges: &mut [Hyperedge]) -> StageResult<bool> {
        let removed = self.core.store().delete_node(id).await?;
        for hyperedge in hyperedges.iter_mut().filter(|h| h.node_ids.iter().any(|m| m == id)) {
            hyperedge.node_ids.retain(|m| m != id);
            self.core.store().upsert_hyperedge(hyperedge).await?;
        }
        Ok(removed)
    }

    async fn merge(
        &self,
        keeper: &Node,
        loser: &Node,
        hyperedges: &mut [Hyperedge],
        tally: &mut PruneTally,
    ) -> StageResult<Node> {
        let store = self.core.store();
        let existing: BTreeSet<String> = store
            .find_edges(&EdgeQuery::touching(&keeper.id))
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        for edge in store.find_edges(&EdgeQuery::touching(&loser.id)).await? {
            let moved = edge.repointed(&loser.id, &keeper.id);
            // The keeper's own edge of the same kind wins.
            if moved.source_id == moved.target_id || existing.contains(&moved.id) {
                continue;
            }
            store.upsert_edge(&moved).await?;
            tally.edges_repointed += 1;
        }

        for hyperedge in hyperedges.iter_mut().filter(|h| h.node_ids.contains(&loser.id)) {
            let members = hyperedge
                .node_ids
                .iter()
                .map(|m| if *m == loser.id { keeper.id.clone() } else { m.clone() });
            let rewritten =
                Hyperedge::new(&hyperedge.id, &hyperedge.scope_id, members, &hyperedge.relation)
                    .with_confidence(hyperedge.confidence);
            store.upsert_hyperedge(&rewritten).await?;
            *hyperedge = rewritten;
        }

        let mut merged = keeper.clone();
        merged
            .metadata
            .disciplinary_tags
            .extend(loser.metadata.disciplinary_tags.iter().cloned());
        merged.metadata.impact_score = keeper.impact().max(loser.impact());
        merged.updated_at = chrono::Utc::now();
        store.upsert_node(&merged).await?;

        // Detaches whatever was not re-pointed (self-loops).
        store.delete_node(&loser.id).await?;
        Ok(merged)
    }

    async fn run(&self, session: &SessionData) -> StageResult<StageOutput> {
        let init = session
            .accumulated_context
            .require::<InitializationContext>(self.name())?;
        let scope = init.root_node_id.as_str();
        let params = &session.parameters;
        let store = self.core.store();
        let mut tally = PruneTally::default();

        // Weak evidential edges. Structural edges are never pruned.
        for edge in store.find_edges(&EdgeQuery::in_scope(scope)).await? {
            let weak = edge.edge_type.is_evidential()
                && edge
                    .confidence
                    .is_some_and(|c| c < params.pruning_edge_confidence_threshold);
            if weak && store.delete_edge(&edge.id).await? {
                debug!(edge_id = %edge.id, "Pruned weak edge");
                tally.pruned_edges += 1;
            }
        }

        let nodes: BTreeMap<String, Node> = store
            .find_nodes(&NodeQuery::in_scope(scope))
            .await?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        let edges = store.find_edges(&EdgeQuery::in_scope(scope)).await?;
        let protected = protected_hypotheses(&nodes, &edges);
        let mut hyperedges = store.find_hyperedges(scope).await?;

        // Low confidence and low impact content.
        for node in nodes.values() {
            if node.node_type.is_content() && !protected.contains(&node.id) && is_weak(node, params) {
                if self.remove_node(&node.id, &mut hyperedges).await? {
                    debug!(node_id = %node.id, "Pruned weak node");
                    tally.pruned_nodes.push(node.id.clone());
                }
            }
        }

        // Nodes left without any edge.
        let edges = store.find_edges(&EdgeQuery::in_scope(scope)).await?;
        let connected: BTreeSet<&str> = edges
            .iter()
            .flat_map(|e| [e.source_id.as_str(), e.target_id.as_str()])
            .collect();
        let pruned: BTreeSet<String> = tally.pruned_nodes.iter().cloned().collect();
        for node in nodes.values() {
            let structural = matches!(node.node_type, NodeType::Root | NodeType::Dimension);
            if structural
                || protected.contains(&node.id)
                || pruned.contains(&node.id)
                || connected.contains(node.id.as_str())
            {
                continue;
            }
            if self.remove_node(&node.id, &mut hyperedges).await? {
                debug!(node_id = %node.id, "Pruned isolated node");
                tally.pruned_nodes.push(node.id.clone());
            }
        }

        self.merge_duplicates(scope, params, &protected, &mut hyperedges, &mut tally)
            .await?;

        let nodes_remaining = store.count_nodes(&NodeQuery::in_scope(scope)).await?;
        let edges_remaining = store.count_edges(&EdgeQuery::in_scope(scope)).await?;

        info!(
            session_id = %session.session_id,
            nodes_pruned = tally.pruned_nodes.len(),
            edges_pruned = tally.pruned_edges,
            nodes_merged = tally.merges.len(),
            nodes_remaining,
            "Pruning and merging finished"
        );

        let summary = format!(
            "Pruned {} nodes and {} edges, merged {} nodes; {} nodes remain",
            tally.pruned_nodes.len(),
            tally.pruned_edges,
            tally.merges.len(),
            nodes_remaining
        );
        let nodes_pruned = tally.pruned_nodes.len();
        let nodes_merged = tally.merges.len();
        let context = PruningContext {
            pruned_node_ids: tally.pruned_nodes,
            pruned_edge_count: tally.pruned_edges,
            merges: tally.merges,
            nodes_remaining,
            edges_remaining,
        };

        Ok(StageOutput::success(self.name(), summary, StageContext::Pruning(context))
            .with_metric("nodes_pruned", nodes_pruned)
            .with_metric("edges_pruned", tally.pruned_edges)
            .with_metric("nodes_merged", nodes_merged)
            .with_metric("edges_repointed", tally.edges_repointed)
            .with_metric("nodes_remaining", nodes_remaining)
            .with_metric("edges_remaining", edges_remaining))
    }

    async fn merge_duplicates(
        &self,
        scope: &str,
        params: &PipelineParams,
        protected: &BTreeSet<String>,
        hyperedges: &mut [Hyperedge],
        tally: &mut PruneTally,
    ) -> StageResult<()> {
        let store = self.core.store();
        let content = store
            .find_nodes(&NodeQuery::in_scope(scope).of_types(&NodeType::CONTENT))
            .await?;
        let edges = store.find_edges(&EdgeQuery::in_scope(scope)).await?;

        let mut groups: BTreeMap<(NodeType, String), Vec<Node>> = BTreeMap::new();
        for node in content {
            if let Some(anchor) = merge_anchor(&node, &edges) {
                groups
                    .entry((node.node_type, anchor.to_string()))
                    .or_default()
                    .push(node);
            }
        }

        for mut group in groups.into_values() {
            group.sort_by(|a, b| a.id.cmp(&b.id));
            let mut removed = BTreeSet::new();
            for i in 0..group.len() {
                for j in (i + 1)..group.len() {
                    if removed.contains(&group[i].id) || removed.contains(&group[j].id) {
                        continue;
                    }
                    let similarity = label_similarity(&group[i].label, &group[j].label);
                    if similarity < params.merge_similarity_threshold {
                        continue;
                    }
                    let (keeper, loser) = keeper_and_loser(&group[i], &group[j], protected);
                    if protected.contains(&loser.id) {
                        continue;
                    }
                    let (keeper, loser) = (keeper.clone(), loser.clone());
                    let merged = self.merge(&keeper, &loser, hyperedges, tally).await?;
                    debug!(kept = %keeper.id, removed = %loser.id, similarity, "Merged nodes");

                    removed.insert(loser.id.clone());
                    tally.merges.push(MergeRecord {
                        kept: keeper.id.clone(),
                        removed: loser.id,
                        similarity,
                    });
                    if let Some(slot) = group.iter_mut().find(|n| n.id == merged.id) {
                        *slot = merged;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for PruningMergingStage {
    fn name(&self) -> &str {
        PRUNING_MERGING_STAGE
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[INITIALIZATION_STAGE]
    }

    async fn execute(&self, session: &SessionData) -> StageOutput {
        self.run(session)
            .await
            .unwrap_or_else(|e| StageOutput::failure(self.name(), e))
    }
}
