//! Graph entities produced and consumed by the pipeline stages.
//!
//! Nodes, edges and hyperedges are plain serde types; persistence lives in
//! [`crate::store`]. Every entity carries a `scope_id` (the id of the root
//! node of the query that produced it) so that runs for different queries can
//! share one store.

pub mod ids;
pub mod math;


use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use math::clamp_unit;

// ============================================================================
// Confidence
// ============================================================================

/// Four independent confidence scores, each kept in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceVector {
    /// Support from observed data.
    pub empirical_support: f64,
    /// Grounding in established theory.
    pub theoretical_basis: f64,
    /// Soundness of the method that produced the claim.
    pub methodological_rigor: f64,
    /// Agreement with the wider consensus.
    pub consensus_alignment: f64,
}

impl ConfidenceVector {
    /// Number of components.
    pub const LEN: usize = 4;

    /// Create a vector, clamping every component.
    pub fn new(empirical: f64, theoretical: f64, methodological: f64, consensus: f64) -> Self {
        Self {
            empirical_support: clamp_unit(empirical),
            theoretical_basis: clamp_unit(theoretical),
            methodological_rigor: clamp_unit(methodological),
            consensus_alignment: clamp_unit(consensus),
        }
    }

    /// Same value in every component.
    pub fn uniform(value: f64) -> Self {
        Self::new(value, value, value, value)
    }

    /// Build from exactly four values.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [e, t, m, c] => Some(Self::new(*e, *t, *m, *c)),
            _ => None,
        }
    }

    /// Components in declaration order.
    pub fn to_array(&self) -> [f64; 4] {
        [
            self.empirical_support,
            self.theoretical_basis,
            self.methodological_rigor,
            self.consensus_alignment,
        ]
    }

    /// Mean of the components.
    pub fn average(&self) -> f64 {
        self.to_array().iter().sum::<f64>() / Self::LEN as f64
    }

    /// Smallest component.
    pub fn min_component(&self) -> f64 {
        self.to_array().iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// True when every component lies in `[0.0, 1.0]`.
    pub fn is_bounded(&self) -> bool {
        self.to_array().iter().all(|v| (0.0..=1.0).contains(v))
    }
}

impl Default for ConfidenceVector {
    fn default() -> Self {
        Self::uniform(0.5)
    }
}

// ============================================================================
// Node and edge kinds
// ============================================================================

/// Kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// The query itself.
    Root,
    /// A conceptual dimension of the query.
    Dimension,
    /// A testable hypothesis under a dimension.
    Hypothesis,
    /// A piece of evidence bearing on a hypothesis.
    Evidence,
    /// Interdisciplinary bridge node.
    Ibn,
}

impl NodeType {
    /// Node kinds that pruning, merging and extraction operate on.
    pub const CONTENT: [NodeType; 3] = [NodeType::Hypothesis, NodeType::Evidence, NodeType::Ibn];

    /// Whether this kind is a content node (hypothesis, evidence, IBN).
    pub fn is_content(&self) -> bool {
        Self::CONTENT.contains(self)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Root => write!(f, "root"),
            NodeType::Dimension => write!(f, "dimension"),
            NodeType::Hypothesis => write!(f, "hypothesis"),
            NodeType::Evidence => write!(f, "evidence"),
            NodeType::Ibn => write!(f, "ibn"),
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "root" => Ok(NodeType::Root),
            "dimension" => Ok(NodeType::Dimension),
            "hypothesis" => Ok(NodeType::Hypothesis),
            "evidence" => Ok(NodeType::Evidence),
            "ibn" => Ok(NodeType::Ibn),
            _ => Err(format!("Unknown node type: {}", s)),
        }
    }
}

/// Kind of a graph edge.
///
/// Serialized as its display string so custom kinds round-trip as
/// `custom:<label>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EdgeType {
    /// Dimension to root.
    DecompositionOf,
    /// Dimension to hypothesis.
    GeneratesHypothesis,
    /// Evidence causally bears on a hypothesis.
    Causal,
    /// Evidence precedes the hypothesised effect.
    Temporal,
    /// Evidence co-varies with the hypothesis.
    Correlative,
    /// Evidence to bridge node.
    IbnSource,
    /// Bridge node to hypothesis.
    IbnTarget,
    /// Caller-defined relation.
    Custom(String),
}

impl EdgeType {
    /// Structural edges hold the decomposition tree together and are never
    /// pruned on confidence.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EdgeType::DecompositionOf
                | EdgeType::GeneratesHypothesis
                | EdgeType::IbnSource
                | EdgeType::IbnTarget
        )
    }

    /// Edges linking evidence to hypotheses.
    pub fn is_evidential(&self) -> bool {
        matches!(
            self,
            EdgeType::Causal | EdgeType::Temporal | EdgeType::Correlative
        )
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeType::DecompositionOf => write!(f, "decomposition_of"),
            EdgeType::GeneratesHypothesis => write!(f, "generates_hypothesis"),
            EdgeType::Causal => write!(f, "causal"),
            EdgeType::Temporal => write!(f, "temporal"),
            EdgeType::Correlative => write!(f, "correlative"),
            EdgeType::IbnSource => write!(f, "ibn_source"),
            EdgeType::IbnTarget => write!(f, "ibn_target"),
            EdgeType::Custom(label) => write!(f, "custom:{}", label),
        }
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(label) = s.strip_prefix("custom:") {
            if label.is_empty() {
                return Err("Custom edge type needs a label".to_string());
            }
            return Ok(EdgeType::Custom(label.to_string()));
        }
        match s.to_lowercase().as_str() {
            "decomposition_of" => Ok(EdgeType::DecompositionOf),
            "generates_hypothesis" => Ok(EdgeType::GeneratesHypothesis),
            "causal" => Ok(EdgeType::Causal),
            "temporal" => Ok(EdgeType::Temporal),
            "correlative" => Ok(EdgeType::Correlative),
            "ibn_source" => Ok(EdgeType::IbnSource),
            "ibn_target" => Ok(EdgeType::IbnTarget),
            _ => Err(format!("Unknown edge type: {}", s)),
        }
    }
}

impl From<EdgeType> for String {
    fn from(edge_type: EdgeType) -> Self {
        edge_type.to_string()
    }
}

impl TryFrom<String> for EdgeType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// Node metadata
// ============================================================================

/// Epistemic standing of a node's claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpistemicStatus {
    /// Taken as given.
    Assumption,
    /// Proposed, not yet tested.
    Hypothesis,
    /// Backed by supporting evidence.
    EvidenceSupported,
    /// Undermined by contradicting evidence.
    EvidenceContradicted,
    /// Derived from other nodes.
    Inferred,
    /// Not assessed.
    #[default]
    Unknown,
}

/// How strongly a bias flag should weigh on the audit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasSeverity {
    /// Minor.
    #[default]
    Low,
    /// Worth a second look.
    Medium,
    /// Undermines the claim.
    High,
}

/// A suspected bias attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasFlag {
    /// Short bias name, e.g. `confirmation_bias`.
    pub bias_type: String,
    /// Why the flag was raised.
    pub description: String,
    /// Severity.
    #[serde(default)]
    pub severity: BiasSeverity,
}

/// What would show a hypothesis to be wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FalsificationCriteria {
    /// Summary of the falsification test.
    pub description: String,
    /// Concrete observable conditions.
    #[serde(default)]
    pub testable_conditions: Vec<String>,
}

/// Execution plan stub attached to a hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Kind of investigation, e.g. `literature_review`.
    pub plan_type: String,
    /// What would be done.
    pub description: String,
    /// Relative cost in `[0.0, 1.0]`.
    pub estimated_cost: f64,
    /// Rough duration estimate.
    pub estimated_duration: String,
    /// Resources needed.
    #[serde(default)]
    pub required_resources: Vec<String>,
}

/// Disciplines bridged by an IBN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterdisciplinaryInfo {
    /// Tags on the evidence side.
    pub source_disciplines: BTreeSet<String>,
    /// Tags on the hypothesis side.
    pub target_disciplines: BTreeSet<String>,
    /// Similarity that triggered the bridge.
    pub similarity: f64,
}

/// One recorded change to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    /// When the change happened.
    pub timestamp: DateTime<Utc>,
    /// Field that changed.
    pub field: String,
    /// Value before.
    pub previous_value: serde_json::Value,
    /// Value after.
    pub new_value: serde_json::Value,
    /// Cause of the change.
    pub reason: String,
}

/// Free-form node attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMetadata {
    /// Longer description.
    pub description: String,
    /// Original query (roots and dimensions).
    pub query_context: Option<String>,
    /// Epistemic standing.
    pub epistemic_status: EpistemicStatus,
    /// Disciplines the node belongs to.
    pub disciplinary_tags: BTreeSet<String>,
    /// Layer the node belongs to.
    pub layer_id: Option<String>,
    /// Expected impact on the answer, in `[0.0, 1.0]`.
    pub impact_score: f64,
    /// Marks an unexplored or missing area.
    pub is_knowledge_gap: bool,
    /// Falsification criteria (hypotheses).
    pub falsification_criteria: Option<FalsificationCriteria>,
    /// Plan stub (hypotheses).
    pub plan: Option<Plan>,
    /// Suspected biases.
    pub bias_flags: Vec<BiasFlag>,
    /// Statistical power estimate (evidence).
    pub statistical_power: Option<f64>,
    /// Information gained by the last update.
    pub information_gain: Option<f64>,
    /// Bridged disciplines (IBNs).
    pub interdisciplinary_info: Option<InterdisciplinaryInfo>,
    /// Change log.
    pub revision_history: Vec<RevisionRecord>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            query_context: None,
            epistemic_status: EpistemicStatus::Unknown,
            disciplinary_tags: BTreeSet::new(),
            layer_id: None,
            impact_score: 0.1,
            is_knowledge_gap: false,
            falsification_criteria: None,
            plan: None,
            bias_flags: Vec::new(),
            statistical_power: None,
            information_gain: None,
            interdisciplinary_info: None,
            revision_history: Vec::new(),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A node in the reasoning graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id across the whole store.
    pub id: String,
    /// Root id of the owning query.
    pub scope_id: String,
    /// Kind of node.
    pub node_type: NodeType,
    /// Short human-readable label.
    pub label: String,
    /// Confidence vector.
    pub confidence: ConfidenceVector,
    /// Attributes.
    pub metadata: NodeMetadata,
    /// When the node was first written.
    pub created_at: DateTime<Utc>,
    /// When the node was last written.
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a node with default confidence and metadata.
    pub fn new(
        id: impl Into<String>,
        scope_id: impl Into<String>,
        node_type: NodeType,
        label: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            scope_id: scope_id.into(),
            node_type,
            label: label.into(),
            confidence: ConfidenceVector::default(),
            metadata: NodeMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the confidence vector
    pub fn with_confidence(mut self, confidence: ConfidenceVector) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the impact score (clamped)
    pub fn with_impact(mut self, impact: f64) -> Self {
        self.metadata.impact_score = clamp_unit(impact);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    /// Set the epistemic status
    pub fn with_status(mut self, status: EpistemicStatus) -> Self {
        self.metadata.epistemic_status = status;
        self
    }

    /// Set the layer
    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.metadata.layer_id = Some(layer.into());
        self
    }

    /// Replace the disciplinary tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.disciplinary_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Impact score.
    pub fn impact(&self) -> f64 {
        self.metadata.impact_score
    }

    /// Replace the confidence vector and append a revision record.
    pub fn revise_confidence(&mut self, posterior: ConfidenceVector, reason: impl Into<String>) {
        let previous = serde_json::to_value(self.confidence).unwrap_or_default();
        let new_value = serde_json::to_value(posterior).unwrap_or_default();
        self.metadata.revision_history.push(RevisionRecord {
            timestamp: Utc::now(),
            field: "confidence".to_string(),
            previous_value: previous,
            new_value,
            reason: reason.into(),
        });
        self.confidence = posterior;
        self.updated_at = Utc::now();
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Deterministic id derived from endpoints and kind.
    pub id: String,
    /// Root id of the owning query.
    pub scope_id: String,
    /// Source node id.
    pub source_id: String,
    /// Target node id.
    pub target_id: String,
    /// Relation kind.
    pub edge_type: EdgeType,
    /// Optional confidence in `[0.0, 1.0]`.
    pub confidence: Option<f64>,
    /// Free-form properties.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// When the edge was first written.
    pub created_at: DateTime<Utc>,
}

impl Edge {
    /// Create an edge with an id derived from its endpoints and kind.
    pub fn new(
        scope_id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        edge_type: EdgeType,
    ) -> Self {
        let source_id = source_id.into();
        let target_id = target_id.into();
        Self {
            id: ids::edge_id(&source_id, &edge_type, &target_id),
            scope_id: scope_id.into(),
            source_id,
            target_id,
            edge_type,
            confidence: None,
            properties: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the confidence (clamped)
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(clamp_unit(confidence));
        self
    }

    /// Add a property
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Whether the edge touches the given node.
    pub fn touches(&self, node_id: &str) -> bool {
        self.source_id == node_id || self.target_id == node_id
    }

    /// The endpoint opposite `node_id`, if the edge touches it.
    pub fn other_end(&self, node_id: &str) -> Option<&str> {
        if self.source_id == node_id {
            Some(&self.target_id)
        } else if self.target_id == node_id {
            Some(&self.source_id)
        } else {
            None
        }
    }

    /// Copy of this edge with one endpoint replaced, re-keyed.
    pub fn repointed(&self, from: &str, to: &str) -> Self {
        let source_id = if self.source_id == from {
            to.to_string()
        } else {
            self.source_id.clone()
        };
        let target_id = if self.target_id == from {
            to.to_string()
        } else {
            self.target_id.clone()
        };
        Self {
            id: ids::edge_id(&source_id, &self.edge_type, &target_id),
            scope_id: self.scope_id.clone(),
            source_id,
            target_id,
            edge_type: self.edge_type.clone(),
            confidence: self.confidence,
            properties: self.properties.clone(),
            created_at: self.created_at,
        }
    }
}

/// A relation over more than two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperedge {
    /// Unique id.
    pub id: String,
    /// Root id of the owning query.
    pub scope_id: String,
    /// Member node ids, sorted.
    pub node_ids: Vec<String>,
    /// Relation description.
    pub relation: String,
    /// Joint confidence.
    pub confidence: ConfidenceVector,
    /// When the hyperedge was first written.
    pub created_at: DateTime<Utc>,
}

impl Hyperedge {
    /// Create a hyperedge over the given members.
    pub fn new(
        id: impl Into<String>,
        scope_id: impl Into<String>,
        members: impl IntoIterator<Item = String>,
        relation: impl Into<String>,
    ) -> Self {
        let mut node_ids: Vec<String> = members.into_iter().collect();
        node_ids.sort();
        node_ids.dedup();
        Self {
            id: id.into(),
            scope_id: scope_id.into(),
            node_ids,
            relation: relation.into(),
            confidence: ConfidenceVector::default(),
            created_at: Utc::now(),
        }
    }

    /// Set the joint confidence
    pub fn with_confidence(mut self, confidence: ConfidenceVector) -> Self {
        self.confidence = confidence;
        self
    }
}
