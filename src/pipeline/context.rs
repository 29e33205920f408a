//! Typed accumulated context.
//!
//! Each stage publishes one [`StageContext`] under its own name. Downstream
//! stages read it back through [`AccumulatedContext::require`], which turns a
//! missing or failed upstream stage into a `StageError` instead of a lookup
//! on untyped JSON.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{StageError, StageResult};
use crate::graph::ConfidenceVector;
use crate::stages::{
    COMPOSITION_STAGE, DECOMPOSITION_STAGE, EVIDENCE_STAGE, HYPOTHESIS_STAGE,
    INITIALIZATION_STAGE, PRUNING_MERGING_STAGE, REFLECTION_STAGE, SUBGRAPH_EXTRACTION_STAGE,
};

// ============================================================================
// Stage payloads
// ============================================================================

/// Published by the initialization stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializationContext {
    /// Root node of this query.
    pub root_node_id: String,
    /// Tags seeded on the root.
    pub initial_disciplinary_tags: BTreeSet<String>,
    /// Whether an existing root was reused.
    pub used_existing_node: bool,
}

/// One dimension created by decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSummary {
    /// Node id.
    pub id: String,
    /// Label.
    pub label: String,
    /// Whether the query leaves this dimension unaddressed.
    pub is_knowledge_gap: bool,
}

/// Published by the decomposition stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionContext {
    /// Root the dimensions hang off.
    pub root_node_id: String,
    /// Dimensions in creation order.
    pub dimensions: Vec<DimensionSummary>,
    /// Bias cues found in the query wording.
    pub bias_flags: Vec<String>,
}

/// One hypothesis created by the hypothesis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisSummary {
    /// Node id.
    pub id: String,
    /// Parent dimension id.
    pub dimension_id: String,
    /// Label.
    pub label: String,
}

/// Published by the hypothesis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisContext {
    /// Hypotheses across all dimensions.
    pub hypotheses: Vec<HypothesisSummary>,
}

/// Why the evidence loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The evidence budget was used up.
    BudgetExhausted,
    /// The last update barely moved any confidence.
    ConfidenceStable,
    /// Every hypothesis has been evaluated.
    NoCandidates,
    /// The iteration cap was reached.
    MaxIterations,
}

/// Published by the evidence stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceContext {
    /// Hypotheses evidence was gathered for, in order.
    pub evaluated_hypotheses: Vec<String>,
    /// Evidence nodes written.
    pub evidence_node_ids: Vec<String>,
    /// Bridge nodes written.
    pub ibn_node_ids: Vec<String>,
    /// Hyperedges written.
    pub hyperedge_ids: Vec<String>,
    /// Loop iterations run.
    pub iterations_completed: usize,
    /// Why the loop stopped.
    pub termination: TerminationReason,
    /// True when no evidence was gathered at all.
    pub no_evidence_found: bool,
}

/// A node folded into another during merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// Surviving node.
    pub kept: String,
    /// Deleted duplicate.
    pub removed: String,
    /// Label similarity that triggered the merge.
    pub similarity: f64,
}

/// Published by the pruning/merging stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruningContext {
    /// Nodes deleted for low confidence and impact or isolation.
    pub pruned_node_ids: Vec<String>,
    /// Edges deleted for low confidence.
    pub pruned_edge_count: usize,
    /// Merges performed.
    pub merges: Vec<MergeRecord>,
    /// Nodes left in scope.
    pub nodes_remaining: usize,
    /// Edges left in scope.
    pub edges_remaining: usize,
}

/// A bounded subset of the graph selected for composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSubgraph {
    /// Criterion name.
    pub name: String,
    /// Criterion description.
    pub description: String,
    /// Member nodes, best score first.
    pub node_ids: Vec<String>,
    /// Edges between members.
    pub edge_ids: Vec<String>,
    /// Members that matched the criterion directly.
    pub seed_count: usize,
}

/// Published by the subgraph extraction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgraphContext {
    /// Non-empty subgraphs.
    pub subgraphs: Vec<ExtractedSubgraph>,
    /// True when nothing could be extracted.
    pub no_subgraph_extracted: bool,
}

/// One section of the composed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSection {
    /// Heading.
    pub title: String,
    /// Body text with inline node annotations.
    pub content: String,
    /// Section kind, e.g. `analysis` or `knowledge_gaps`.
    pub section_type: String,
    /// Subgraph the section was built from.
    pub referenced_subgraph: Option<String>,
    /// Nodes cited in the body.
    pub related_node_ids: Vec<String>,
}

/// A citation pointing back into the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Citation key, `Node-<id>`.
    pub id: String,
    /// Rendered citation.
    pub text: String,
    /// Cited node.
    pub source_node_id: String,
}

/// Structured answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedOutput {
    /// Title.
    pub title: String,
    /// Short summary.
    pub executive_summary: String,
    /// Body sections.
    pub sections: Vec<OutputSection>,
    /// Citations, one per cited node.
    pub citations: Vec<Citation>,
    /// Summary of earlier stage outcomes.
    pub trace_appendix: String,
}

/// Published by the composition stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionContext {
    /// Structured answer.
    pub composed: ComposedOutput,
    /// Rendered answer text.
    pub final_answer: String,
}

/// Outcome of one audit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// No concerns.
    Pass,
    /// Worth attention.
    Warning,
    /// Undermines the result.
    Fail,
    /// Nothing to check.
    NotApplicable,
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditStatus::Pass => write!(f, "pass"),
            AuditStatus::Warning => write!(f, "warning"),
            AuditStatus::Fail => write!(f, "fail"),
            AuditStatus::NotApplicable => write!(f, "not_applicable"),
        }
    }
}

/// One audit check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditCheckResult {
    /// Check name.
    pub check_name: String,
    /// Outcome.
    pub status: AuditStatus,
    /// Explanation.
    pub message: String,
}

/// Published by the reflection stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionContext {
    /// Audit checks in evaluation order.
    pub audit_results: Vec<AuditCheckResult>,
    /// Confidence in the final answer.
    pub final_confidence_vector: ConfidenceVector,
}

/// Published in place of a payload by a stage that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Error message.
    pub error: String,
}

// ============================================================================
// StageContext
// ============================================================================

/// A stage's contribution to the accumulated context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StageContext {
    /// Root node reference.
    Initialization(InitializationContext),
    /// Dimension list.
    Decomposition(DecompositionContext),
    /// Hypothesis list.
    Hypothesis(HypothesisContext),
    /// Evidence loop results.
    Evidence(EvidenceContext),
    /// Pruning and merging results.
    Pruning(PruningContext),
    /// Extracted subgraphs.
    Subgraph(SubgraphContext),
    /// Composed answer.
    Composition(CompositionContext),
    /// Audit and final confidence.
    Reflection(ReflectionContext),
    /// The stage failed.
    Failed(FailureContext),
    /// Payload of a stage defined outside this crate.
    Custom(serde_json::Value),
}

impl StageContext {
    /// Variant name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            StageContext::Initialization(_) => "initialization",
            StageContext::Decomposition(_) => "decomposition",
            StageContext::Hypothesis(_) => "hypothesis",
            StageContext::Evidence(_) => "evidence",
            StageContext::Pruning(_) => "pruning",
            StageContext::Subgraph(_) => "subgraph",
            StageContext::Composition(_) => "composition",
            StageContext::Reflection(_) => "reflection",
            StageContext::Failed(_) => "failed",
            StageContext::Custom(_) => "custom",
        }
    }

    /// Failure marker.
    pub fn failed(error: impl Into<String>) -> Self {
        StageContext::Failed(FailureContext {
            error: error.into(),
        })
    }

    /// Whether this marks a failed stage.
    pub fn is_failure(&self) -> bool {
        matches!(self, StageContext::Failed(_))
    }

    /// Answer text carried by this payload, if any.
    pub fn final_answer(&self) -> Option<&str> {
        match self {
            StageContext::Composition(c) => Some(&c.final_answer),
            _ => None,
        }
    }

    /// Final confidence carried by this payload, if any.
    pub fn final_confidence(&self) -> Option<ConfidenceVector> {
        match self {
            StageContext::Reflection(r) => Some(r.final_confidence_vector),
            _ => None,
        }
    }
}

/// A payload type published under a fixed stage name.
pub trait StagePayload: Sized {
    /// Context key (the publishing stage's name).
    const KEY: &'static str;

    /// Borrow the payload out of a context entry of the right variant.
    fn from_context(context: &StageContext) -> Option<&Self>;
}

macro_rules! stage_payload {
    ($ty:ty, $variant:ident, $key:expr) => {
        impl StagePayload for $ty {
            const KEY: &'static str = $key;

            fn from_context(context: &StageContext) -> Option<&Self> {
                match context {
                    StageContext::$variant(payload) => Some(payload),
                    _ => None,
                }
            }
        }
    };
}

stage_payload!(InitializationContext, Initialization, INITIALIZATION_STAGE);
stage_payload!(DecompositionContext, Decomposition, DECOMPOSITION_STAGE);
stage_payload!(HypothesisContext, Hypothesis, HYPOTHESIS_STAGE);
stage_payload!(EvidenceContext, Evidence, EVIDENCE_STAGE);
stage_payload!(PruningContext, Pruning, PRUNING_MERGING_STAGE);
stage_payload!(SubgraphContext, Subgraph, SUBGRAPH_EXTRACTION_STAGE);
stage_payload!(CompositionContext, Composition, COMPOSITION_STAGE);
stage_payload!(ReflectionContext, Reflection, REFLECTION_STAGE);

// ============================================================================
// AccumulatedContext
// ============================================================================

/// Append-only map from stage name to payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccumulatedContext {
    entries: BTreeMap<String, StageContext>,
}

impl AccumulatedContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under a new key. Returns `false`, leaving the context unchanged,
    /// when the key is already taken.
    pub fn try_insert(&mut self, key: impl Into<String>, context: StageContext) -> bool {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, context);
        true
    }

    /// Raw entry.
    pub fn get(&self, key: &str) -> Option<&StageContext> {
        self.entries.get(key)
    }

    /// Whether `key` holds a non-failure payload.
    pub fn succeeded(&self, key: &str) -> bool {
        self.entries.get(key).map_or(false, |c| !c.is_failure())
    }

    /// Typed payload a stage cannot run without.
    ///
    /// `requester` names the calling stage for the error message.
    pub fn require<T: StagePayload>(&self, requester: &str) -> StageResult<&T> {
        match self.entries.get(T::KEY) {
            None | Some(StageContext::Failed(_)) => Err(StageError::MissingContext {
                stage: requester.to_string(),
                key: T::KEY.to_string(),
            }),
            Some(context) => T::from_context(context).ok_or_else(|| StageError::MalformedContext {
                key: T::KEY.to_string(),
                message: format!("unexpected {} payload", context.kind()),
            }),
        }
    }

    /// Typed payload a stage can do without.
    pub fn optional<T: StagePayload>(&self) -> Option<&T> {
        self.entries.get(T::KEY).and_then(T::from_context)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no stage has published yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
