//! Operational parameters for a pipeline run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::graph::{ConfidenceVector, NodeType};

/// What the orchestrator does with a stage whose hard dependency failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    /// Invoke the stage anyway; it reports the missing context itself.
    #[default]
    Continue,
    /// Record a failure for the stage without invoking it.
    SkipDependents,
}

/// A conceptual dimension the query is decomposed into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSpec {
    /// Dimension label, e.g. `Scope`.
    pub label: String,
    /// What the dimension covers.
    #[serde(default)]
    pub description: String,
    /// Words whose presence in the query shows the dimension is addressed.
    #[serde(default)]
    pub cue_words: Vec<String>,
}

impl DimensionSpec {
    /// Create a dimension.
    pub fn new(label: &str, description: &str, cue_words: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            description: description.to_string(),
            cue_words: cue_words.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// The five dimensions used when the caller supplies none.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "Scope",
                "Boundaries of the question and the phenomena it covers",
                &["scope", "explain", "what", "overview", "define", "describe", "mechanism"],
            ),
            Self::new(
                "Objectives",
                "What a complete answer must achieve",
                &["goal", "objective", "aim", "why", "purpose", "explain", "understand"],
            ),
            Self::new(
                "Constraints",
                "Limits, assumptions and conditions the answer must respect",
                &["constraint", "limit", "only", "without", "must", "condition", "assume"],
            ),
            Self::new(
                "Data Needs",
                "Measurements and sources required to support conclusions",
                &["data", "evidence", "measure", "study", "trial", "dataset", "statistic"],
            ),
            Self::new(
                "Use Cases",
                "Practical applications and affected populations",
                &["use", "application", "apply", "patient", "user", "practice", "deploy"],
            ),
        ]
    }
}

/// Rule selecting one extracted subgraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgraphCriterion {
    /// Subgraph name.
    pub name: String,
    /// What the subgraph is meant to show.
    #[serde(default)]
    pub description: String,
    /// Allowed seed kinds; empty allows all.
    #[serde(default)]
    pub node_types: Vec<NodeType>,
    /// Minimum average confidence of a seed.
    #[serde(default)]
    pub min_confidence: f64,
    /// Minimum impact of a seed.
    #[serde(default)]
    pub min_impact: f64,
    /// Only seed from knowledge-gap nodes.
    #[serde(default)]
    pub knowledge_gaps_only: bool,
    /// Neighbour hops added around each seed.
    #[serde(default)]
    pub include_neighbors_depth: usize,
}

impl SubgraphCriterion {
    /// Default criteria built from the run's thresholds.
    pub fn defaults(min_confidence: f64, min_impact: f64) -> Vec<Self> {
        vec![
            Self {
                name: "high_confidence_core".to_string(),
                description: "Nodes with high confidence and impact".to_string(),
                node_types: NodeType::CONTENT.to_vec(),
                min_confidence,
                min_impact,
                knowledge_gaps_only: false,
                include_neighbors_depth: 1,
            },
            Self {
                name: "key_hypotheses_and_support".to_string(),
                description: "Key hypotheses and their direct support".to_string(),
                node_types: vec![NodeType::Hypothesis],
                min_confidence: 0.5,
                min_impact: 0.5,
                knowledge_gaps_only: false,
                include_neighbors_depth: 1,
            },
            Self {
                name: "knowledge_gaps_focus".to_string(),
                description: "Areas flagged as knowledge gaps".to_string(),
                node_types: Vec::new(),
                min_confidence: 0.0,
                min_impact: 0.0,
                knowledge_gaps_only: true,
                include_neighbors_depth: 1,
            },
        ]
    }
}

/// Operational parameters. Every field has a default, so callers may send
/// a partial JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Root confidence, four values.
    pub initial_confidence: Vec<f64>,
    /// Layer assigned to the root.
    pub initial_layer: String,
    /// Reuse or create the root under this id instead of the query-derived one.
    pub root_node_id: Option<String>,
    /// Tags seeded on the root and spread to children.
    pub default_disciplinary_tags: Vec<String>,

    /// Dimension confidence, four values.
    pub dimension_confidence: Vec<f64>,
    /// Replaces the default dimensions.
    pub decomposition_dimensions: Option<Vec<DimensionSpec>>,

    /// Fewest hypotheses per dimension.
    pub hypotheses_min: usize,
    /// Most hypotheses per dimension.
    pub hypotheses_max: usize,
    /// Starting hypothesis confidence, four values.
    pub hypothesis_confidence: Vec<f64>,
    /// Plan kinds assigned to hypotheses.
    pub plan_types: Vec<String>,

    /// Evidence loop iteration cap.
    pub evidence_max_iterations: usize,
    /// Most evidence nodes per run.
    pub evidence_budget: usize,
    /// Stop when an update changes no component by more than this.
    pub confidence_stability_epsilon: f64,
    /// Timeout around one evidence source call.
    pub evidence_timeout_ms: u64,
    /// Label similarity needed to bridge disjoint disciplines.
    pub ibn_similarity_threshold: f64,
    /// Evidence items per iteration needed to form a hyperedge.
    pub min_nodes_for_hyperedge: usize,

    /// Prune below this minimum confidence component ...
    pub pruning_confidence_threshold: f64,
    /// ... when impact is also below this.
    pub pruning_impact_threshold: f64,
    /// Prune evidential edges below this confidence.
    pub pruning_edge_confidence_threshold: f64,
    /// Merge same-kind nodes at or above this label similarity.
    pub merge_similarity_threshold: f64,

    /// Confidence floor of the default core subgraph.
    pub subgraph_min_confidence: f64,
    /// Impact floor of the default core subgraph.
    pub subgraph_min_impact: f64,
    /// Cap on nodes per extracted subgraph.
    pub max_subgraph_nodes: usize,
    /// Replaces the default extraction criteria.
    pub subgraph_criteria: Option<Vec<SubgraphCriterion>>,

    /// Per-stage switches; absent stages are enabled.
    pub stage_enabled: BTreeMap<String, bool>,
    /// Handling of stages whose hard dependency failed.
    pub dependency_policy: DependencyPolicy,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            initial_confidence: vec![0.9; 4],
            initial_layer: "root_layer".to_string(),
            root_node_id: None,
            default_disciplinary_tags: vec![
                "general_science".to_string(),
                "biology".to_string(),
                "statistics".to_string(),
            ],
            dimension_confidence: vec![0.8; 4],
            decomposition_dimensions: None,
            hypotheses_min: 3,
            hypotheses_max: 5,
            hypothesis_confidence: vec![0.5; 4],
            plan_types: vec![
                "literature_review".to_string(),
                "experiment".to_string(),
                "simulation".to_string(),
                "data_analysis".to_string(),
            ],
            evidence_max_iterations: 5,
            evidence_budget: 20,
            confidence_stability_epsilon: 0.005,
            evidence_timeout_ms: 30000,
            ibn_similarity_threshold: 0.5,
            min_nodes_for_hyperedge: 2,
            pruning_confidence_threshold: 0.2,
            pruning_impact_threshold: 0.3,
            pruning_edge_confidence_threshold: 0.2,
            merge_similarity_threshold: 0.8,
            subgraph_min_confidence: 0.6,
            subgraph_min_impact: 0.5,
            max_subgraph_nodes: 40,
            subgraph_criteria: None,
            stage_enabled: BTreeMap::new(),
            dependency_policy: DependencyPolicy::Continue,
        }
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::invalid(
            field,
            format!("must be within [0, 1], got {}", value),
        ))
    }
}

fn check_vector(field: &str, values: &[f64]) -> Result<(), ValidationError> {
    if values.len() != ConfidenceVector::LEN {
        return Err(ValidationError::invalid(
            field,
            format!("expected 4 values, got {}", values.len()),
        ));
    }
    values.iter().try_for_each(|v| check_unit(field, *v))
}

fn vector(values: &[f64]) -> ConfidenceVector {
    ConfidenceVector::from_slice(values).unwrap_or_default()
}

impl PipelineParams {
    /// Check every field, failing on the first invalid one.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_vector("initial_confidence", &self.initial_confidence)?;
        check_vector("dimension_confidence", &self.dimension_confidence)?;
        check_vector("hypothesis_confidence", &self.hypothesis_confidence)?;

        for (field, value) in [
            ("confidence_stability_epsilon", self.confidence_stability_epsilon),
            ("ibn_similarity_threshold", self.ibn_similarity_threshold),
            ("pruning_confidence_threshold", self.pruning_confidence_threshold),
            ("pruning_impact_threshold", self.pruning_impact_threshold),
            (
                "pruning_edge_confidence_threshold",
                self.pruning_edge_confidence_threshold,
            ),
            ("merge_similarity_threshold", self.merge_similarity_threshold),
            ("subgraph_min_confidence", self.subgraph_min_confidence),
            ("subgraph_min_impact", self.subgraph_min_impact),
        ] {
            check_unit(field, value)?;
        }

        if self.initial_layer.trim().is_empty() {
            return Err(ValidationError::invalid("initial_layer", "must not be empty"));
        }
        if let Some(id) = &self.root_node_id {
            if id.trim().is_empty() {
                return Err(ValidationError::invalid("root_node_id", "must not be empty"));
            }
        }
        if self.hypotheses_min == 0 {
            return Err(ValidationError::invalid("hypotheses_min", "must be at least 1"));
        }
        if self.hypotheses_min > self.hypotheses_max {
            return Err(ValidationError::invalid(
                "hypotheses_min",
                format!(
                    "must not exceed hypotheses_max ({} > {})",
                    self.hypotheses_min, self.hypotheses_max
                ),
            ));
        }
        if self.hypotheses_max > 10 {
            return Err(ValidationError::invalid("hypotheses_max", "must be at most 10"));
        }
        if self.plan_types.is_empty() {
            return Err(ValidationError::invalid("plan_types", "must not be empty"));
        }
        if self.evidence_max_iterations == 0 {
            return Err(ValidationError::invalid(
                "evidence_max_iterations",
                "must be at least 1",
            ));
        }
        if self.evidence_budget == 0 {
            return Err(ValidationError::invalid("evidence_budget", "must be at least 1"));
        }
        if self.evidence_timeout_ms == 0 {
            return Err(ValidationError::invalid(
                "evidence_timeout_ms",
                "must be positive",
            ));
        }
        if self.min_nodes_for_hyperedge < 2 {
            return Err(ValidationError::invalid(
                "min_nodes_for_hyperedge",
                "must be at least 2",
            ));
        }
        if self.max_subgraph_nodes == 0 {
            return Err(ValidationError::invalid("max_subgraph_nodes", "must be at least 1"));
        }

        if let Some(dimensions) = &self.decomposition_dimensions {
            if dimensions.is_empty() {
                return Err(ValidationError::invalid(
                    "decomposition_dimensions",
                    "must contain at least one dimension",
                ));
            }
            if dimensions.iter().any(|d| d.label.trim().is_empty()) {
                return Err(ValidationError::invalid(
                    "decomposition_dimensions",
                    "dimension labels must not be empty",
                ));
            }
        }

        if let Some(criteria) = &self.subgraph_criteria {
            for criterion in criteria {
                if criterion.name.trim().is_empty() {
                    return Err(ValidationError::invalid(
                        "subgraph_criteria",
                        "criterion names must not be empty",
                    ));
                }
                check_unit("subgraph_criteria.min_confidence", criterion.min_confidence)?;
                check_unit("subgraph_criteria.min_impact", criterion.min_impact)?;
            }
        }

        Ok(())
    }

    /// Whether a stage runs in this configuration.
    pub fn is_stage_enabled(&self, stage_name: &str) -> bool {
        self.stage_enabled.get(stage_name).copied().unwrap_or(true)
    }

    /// Disable one stage
    pub fn with_stage_disabled(mut self, stage_name: impl Into<String>) -> Self {
        self.stage_enabled.insert(stage_name.into(), false);
        self
    }

    /// Set the dependency policy
    pub fn with_dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.dependency_policy = policy;
        self
    }

    /// Root confidence as a vector.
    pub fn initial_confidence_vector(&self) -> ConfidenceVector {
        vector(&self.initial_confidence)
    }

    /// Dimension confidence as a vector.
    pub fn dimension_confidence_vector(&self) -> ConfidenceVector {
        vector(&self.dimension_confidence)
    }

    /// Hypothesis confidence as a vector.
    pub fn hypothesis_confidence_vector(&self) -> ConfidenceVector {
        vector(&self.hypothesis_confidence)
    }

    /// Configured or default dimensions.
    pub fn dimensions(&self) -> Vec<DimensionSpec> {
        self.decomposition_dimensions
            .clone()
            .unwrap_or_else(DimensionSpec::defaults)
    }

    /// Configured or default extraction criteria.
    pub fn criteria(&self) -> Vec<SubgraphCriterion> {
        self.subgraph_criteria.clone().unwrap_or_else(|| {
            SubgraphCriterion::defaults(self.subgraph_min_confidence, self.subgraph_min_impact)
        })
    }
}
