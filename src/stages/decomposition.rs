//! Query decomposition into conceptual dimensions.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Stage, StageCore, DECOMPOSITION_STAGE, INITIALIZATION_STAGE};
use crate::error::{StageError, StageResult};
use crate::graph::{ids, BiasFlag, BiasSeverity, Edge, EdgeType, EpistemicStatus, Node, NodeType};
use crate::pipeline::{
    DecompositionContext, DimensionSpec, DimensionSummary, InitializationContext, SessionData,
    StageContext, StageOutput,
};
use crate::store::GraphStore;

/// Wording that frames the question as already settled.
const BIAS_CUES: [&str; 6] = ["obviously", "always", "never", "prove", "clearly", "everyone knows"];

const DIMENSION_IMPACT: f64 = 0.7;
const DECOMPOSITION_EDGE_CONFIDENCE: f64 = 0.95;

/// Splits the query into dimensions hanging off the root.
pub struct DecompositionStage {
    core: StageCore,
}

impl DecompositionStage {
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
        let root_id = init.root_node_id.clone();
        let root = self
            .core
            .store()
            .get_node(&root_id)
            .await?
            .ok_or_else(|| StageError::NodeNotFound {
                node_id: root_id.clone(),
            })?;

        let params = &session.parameters;
        let lowered = session.query.to_lowercase();
        let bias_cues = detect_bias_cues(&lowered);

        let mut dimensions = Vec::new();
        let mut created = 0usize;
        let mut reused = 0usize;
        let mut edges = 0usize;

        for (index, dim) in params.dimensions().iter().enumerate() {
            let id = ids::dimension_id(&root_id, index);
            let is_gap = is_knowledge_gap(dim, &lowered);

            let node = match self.core.store().get_node(&id).await? {
                Some(existing) => {
                    reused += 1;
                    existing
                }
                None => {
                    let node = build_dimension(&id, &root, dim, is_gap, &bias_cues, session);
                    self.core.store().upsert_node(&node).await?;
                    created += 1;
                    node
                }
            };

            let edge = Edge::new(&root_id, &node.id, &root_id, EdgeType::DecompositionOf)
                .with_confidence(DECOMPOSITION_EDGE_CONFIDENCE);
            self.core.store().upsert_edge(&edge).await?;
            edges += 1;

            debug!(dimension_id = %node.id, label = %node.label, knowledge_gap = node.metadata.is_knowledge_gap, "Dimension ready");
            dimensions.push(DimensionSummary {
                id: node.id.clone(),
                label: node.label.clone(),
                is_knowledge_gap: node.metadata.is_knowledge_gap,
            });
        }

        let gaps = dimensions.iter().filter(|d| d.is_knowledge_gap).count();
        info!(
            session_id = %session.session_id,
            dimensions = dimensions.len(),
            created,
            reused,
            knowledge_gaps = gaps,
            "Query decomposed"
        );

        let summary = format!(
            "Decomposed query into {} dimensions ({} created, {} reused)",
            dimensions.len(),
            created,
            reused
        );
        let total = dimensions.len();
        let context = DecompositionContext {
            root_node_id: root_id,
            dimensions,
            bias_flags: bias_cues.iter().map(|c| c.to_string()).collect(),
        };

        Ok(StageOutput::success(self.name(), summary, StageContext::Decomposition(context))
            .with_metric("dimensions_created", created)
            .with_metric("dimensions_reused", reused)
            .with_metric("dimensions_total", total)
            .with_metric("edges_upserted", edges)
            .with_metric("knowledge_gaps_flagged", gaps)
            .with_metric("bias_flags_raised", bias_cues.len()))
    }
}

fn detect_bias_cues(lowered_query: &str) -> Vec<&'static str> {
    BIAS_CUES
        .iter()
        .copied()
        .filter(|cue| contains_word(lowered_query, cue))
        .collect()
}

/// A dimension is a gap when the query mentions none of its cue words.
fn is_knowledge_gap(dim: &DimensionSpec, lowered_query: &str) -> bool {
    !dim.cue_words.is_empty()
        && !dim
            .cue_words
            .iter()
            .any(|cue| contains_word(lowered_query, &cue.to_lowercase()))
}

/// Whole-word (or whole-phrase) containment.
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn build_dimension(
    id: &str,
    root: &Node,
    dim: &DimensionSpec,
    is_gap: bool,
    bias_cues: &[&str],
    session: &SessionData,
) -> Node {
    let description = if dim.description.is_empty() {
        format!("{} of the query", dim.label)
    } else {
        dim.description.clone()
    };
    let mut node = Node::new(id, &root.scope_id, NodeType::Dimension, &dim.label)
        .with_confidence(session.parameters.dimension_confidence_vector())
        .with_impact(DIMENSION_IMPACT)
        .with_description(description)
        .with_status(EpistemicStatus::Inferred)
        .with_layer("decomposition_layer")
        .with_tags(root.metadata.disciplinary_tags.iter().cloned());
    node.metadata.query_context = Some(session.query.trim().to_string());
    node.metadata.is_knowledge_gap = is_gap;
    node.metadata.bias_flags = bias_cues
        .iter()
        .map(|cue| BiasFlag {
            bias_type: "framing_bias".to_string(),
            description: format!("Query wording '{}' presupposes the answer", cue),
            severity: BiasSeverity::Medium,
        })
        .collect();
    node
}

#[async_trait]
impl Stage for DecompositionStage {
    fn name(&self) -> &str {
        DECOMPOSITION_STAGE
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
