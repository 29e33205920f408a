//! Relevance scoring and subgraph selection.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{Stage, StageCore, INITIALIZATION_STAGE, SUBGRAPH_EXTRACTION_STAGE};
use crate::error::StageResult;
use crate::graph::{Edge, Node, NodeType};
use crate::pipeline::{
    ExtractedSubgraph, InitializationContext, SessionData, StageContext, StageOutput,
    SubgraphContext, SubgraphCriterion,
};
use crate::store::{EdgeQuery, GraphStore, NodeQuery};

const CONFIDENCE_WEIGHT: f64 = 0.45;
const IMPACT_WEIGHT: f64 = 0.35;
const RECENCY_WEIGHT: f64 = 0.20;

/// Nodes taken by the fallback when no criterion selects anything.
const FALLBACK_SIZE: usize = 10;
const FALLBACK_NAME: &str = "top_ranked";

/// Selects the subsets of the graph the answer is built from.
pub struct SubgraphExtractionStage {
    core: StageCore,
}

/// Relevance score of every node in the scope.
pub(crate) fn relevance_scores(nodes: &[Node]) -> BTreeMap<String, f64> {
    let oldest = nodes.iter().map(|n| n.updated_at).min();
    let newest = nodes.iter().map(|n| n.updated_at).max();
    nodes
        .iter()
        .map(|n| {
            let score = CONFIDENCE_WEIGHT * n.confidence.average()
                + IMPACT_WEIGHT * n.impact()
                + RECENCY_WEIGHT * recency(n.updated_at, oldest, newest);
            (n.id.clone(), score)
        })
        .collect()
}

fn recency(at: DateTime<Utc>, oldest: Option<DateTime<Utc>>, newest: Option<DateTime<Utc>>) -> f64 {
    match (oldest, newest) {
        (Some(oldest), Some(newest)) if newest > oldest => {
            let span = (newest - oldest).num_milliseconds() as f64;
            (at - oldest).num_milliseconds() as f64 / span
        }
        _ => 1.0,
    }
}

fn matches_criterion(node: &Node, criterion: &SubgraphCriterion) -> bool {
    (criterion.node_types.is_empty() || criterion.node_types.contains(&node.node_type))
        && node.confidence.average() >= criterion.min_confidence
        && node.impact() >= criterion.min_impact
        && (!criterion.knowledge_gaps_only || node.metadata.is_knowledge_gap)
}

/// Ids sorted by descending score, then ascending id.
fn ranked<'a>(ids: impl IntoIterator<Item = &'a str>, scores: &BTreeMap<String, f64>) -> Vec<&'a str> {
    let mut ids: Vec<&str> = ids.into_iter().collect();
    ids.sort_by(|a, b| {
        let sa = scores.get(*a).copied().unwrap_or_default();
        let sb = scores.get(*b).copied().unwrap_or_default();
        sb.total_cmp(&sa).then_with(|| a.cmp(b))
    });
    ids
}

/// Undirected adjacency over the scope's edges.
fn adjacency(edges: &[Edge]) -> BTreeMap<&str, BTreeSet<&str>> {
    let mut adjacent: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for edge in edges {
        adjacent
            .entry(edge.source_id.as_str())
            .or_default()
            .insert(edge.target_id.as_str());
        adjacent
            .entry(edge.target_id.as_str())
            .or_default()
            .insert(edge.source_id.as_str());
    }
    adjacent
}

/// Seeds plus up to `depth` hops of neighbours, at most `cap` nodes.
fn expand<'a>(
    seeds: &[&'a str],
    depth: usize,
    cap: usize,
    adjacent: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    scores: &BTreeMap<String, f64>,
) -> Vec<&'a str> {
    let mut selected: Vec<&str> = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for &seed in seeds.iter().take(cap) {
        if seen.insert(seed) {
            selected.push(seed);
        }
    }

    let mut frontier = selected.clone();
    for _ in 0..depth {
        let mut next = Vec::new();
        for id in &frontier {
            let neighbours = adjacent.get(id).into_iter().flatten().copied();
            for neighbour in ranked(neighbours, scores) {
                if selected.len() >= cap {
                    return selected;
                }
                if seen.insert(neighbour) {
                    selected.push(neighbour);
                    next.push(neighbour);
                }
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    selected
}

fn induced_edges(node_ids: &[&str], edges: &[Edge]) -> Vec<String> {
    let members: BTreeSet<&str> = node_ids.iter().copied().collect();
    edges
        .iter()
        .filter(|e| members.contains(e.source_id.as_str()) && members.contains(e.target_id.as_str()))
        .map(|e| e.id.clone())
        .collect()
}

impl SubgraphExtractionStage {
    /// Create the stage over a store.
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            core: StageCore::new(store),
        }
    }

    async fn run(&self, session: &SessionData) -> StageResult<StageOutput> {
        let init = session
            .accumulated_context
            .require::<InitializationContext>(self.name())?;
        let scope = init.root_node_id.as_str();
        let params = &session.parameters;

        let nodes = self.core.store().find_nodes(&NodeQuery::in_scope(scope)).await?;
        let edges = self.core.store().find_edges(&EdgeQuery::in_scope(scope)).await?;
        let scores = relevance_scores(&nodes);
        let adjacent = adjacency(&edges);
        let cap = params.max_subgraph_nodes;

        let mut subgraphs = Vec::new();
        for criterion in params.criteria() {
            let seeds = ranked(
                nodes
                    .iter()
                    .filter(|n| matches_criterion(n, &criterion))
                    .map(|n| n.id.as_str()),
                &scores,
            );
            if seeds.is_empty() {
                debug!(criterion = %criterion.name, "No seeds for criterion");
                continue;
            }
            let selected = expand(&seeds, criterion.include_neighbors_depth, cap, &adjacent, &scores);
            debug!(criterion = %criterion.name, seeds = seeds.len(), nodes = selected.len(), "Subgraph selected");
            subgraphs.push(ExtractedSubgraph {
                name: criterion.name.clone(),
                description: criterion.description.clone(),
                edge_ids: induced_edges(&selected, &edges),
                node_ids: selected.iter().map(|s| s.to_string()).collect(),
                seed_count: seeds.len().min(cap),
            });
        }

        let used_fallback = subgraphs.is_empty();
        if used_fallback {
            let top: Vec<&str> = ranked(
                nodes
                    .iter()
                    .filter(|n| n.node_type != NodeType::Root)
                    .map(|n| n.id.as_str()),
                &scores,
            )
            .into_iter()
            .take(cap.min(FALLBACK_SIZE))
            .collect();
            if !top.is_empty() {
                subgraphs.push(ExtractedSubgraph {
                    name: FALLBACK_NAME.to_string(),
                    description: "Highest scoring nodes overall".to_string(),
                    edge_ids: induced_edges(&top, &edges),
                    seed_count: top.len(),
                    node_ids: top.iter().map(|s| s.to_string()).collect(),
                });
            }
        }

        let total_nodes: usize = subgraphs.iter().map(|s| s.node_ids.len()).sum();
        info!(
            session_id = %session.session_id,
            subgraphs = subgraphs.len(),
            total_nodes,
            used_fallback,
            "Subgraphs extracted"
        );

        let summary = if subgraphs.is_empty() {
            "No subgraph could be extracted".to_string()
        } else {
            format!(
                "Extracted {} subgraphs: {}",
                subgraphs.len(),
                subgraphs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
            )
        };
        let count = subgraphs.len();
        let context = SubgraphContext {
            no_subgraph_extracted: subgraphs.is_empty(),
            subgraphs,
        };

        Ok(StageOutput::success(self.name(), summary, StageContext::Subgraph(context))
            .with_metric("subgraphs_extracted", count)
            .with_metric("total_nodes_in_subgraphs", total_nodes)
            .with_metric("nodes_scored", scores.len())
            .with_metric("used_fallback", used_fallback))
    }
}

#[async_trait]
impl Stage for SubgraphExtractionStage {
    fn name(&self) -> &str {
        SUBGRAPH_EXTRACTION_STAGE
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
