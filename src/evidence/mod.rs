//! Pluggable evidence sources for the evidence stage.
//!
//! A source receives one hypothesis at a time and returns evidence items
//! bearing on it. [`SimulatedEvidenceSource`] is deterministic and needs no
//! network; [`LangbaseEvidenceSource`] asks a Langbase pipe.

mod langbase;

pub use langbase::{parse_evidence_completion, LangbaseEvidenceSource};

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StageResult;
use crate::graph::math::{stable_index, stable_range, stable_unit};
use crate::graph::EdgeType;

/// What the evidence stage asks a source about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRequest {
    /// Original query.
    pub query: String,
    /// Hypothesis under evaluation.
    pub hypothesis_id: String,
    /// Hypothesis label.
    pub hypothesis_label: String,
    /// Hypothesis disciplines.
    pub disciplinary_tags: BTreeSet<String>,
    /// Evidence loop iteration, starting at 0.
    pub iteration: usize,
    /// Most items the stage will accept.
    pub max_items: usize,
}

fn default_strength() -> f64 {
    0.5
}

fn default_relation() -> EdgeType {
    EdgeType::Correlative
}

/// One piece of evidence returned by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Finding text.
    pub content: String,
    /// Whether the finding supports the hypothesis.
    #[serde(default = "default_supports")]
    pub supports: bool,
    /// How strongly it bears on the hypothesis, in `[0.0, 1.0]`.
    #[serde(default = "default_strength")]
    pub strength: f64,
    /// Statistical power of the underlying study, in `[0.0, 1.0]`.
    #[serde(default = "default_strength")]
    pub statistical_power: f64,
    /// Relation to the hypothesis: causal, temporal or correlative.
    #[serde(default = "default_relation")]
    pub relation: EdgeType,
    /// Disciplines the finding comes from.
    #[serde(default)]
    pub disciplinary_tags: BTreeSet<String>,
    /// Confidence the finding implies for the hypothesis, four values.
    #[serde(default)]
    pub implied_confidence: Option<Vec<f64>>,
}

fn default_supports() -> bool {
    true
}

/// Source of evidence for one hypothesis at a time.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    /// Source name, for logs and edge properties.
    fn name(&self) -> &str;

    /// Gather evidence bearing on the requested hypothesis.
    async fn gather(&self, request: &EvidenceRequest) -> StageResult<Vec<EvidenceItem>>;
}

const SIMULATED_DISCIPLINES: [&str; 6] = [
    "immunology",
    "molecular_biology",
    "epidemiology",
    "pharmacology",
    "biochemistry",
    "statistics",
];

const STUDY_TYPES: [&str; 5] = [
    "Randomised controlled trial",
    "Cohort study",
    "Laboratory assay",
    "Meta-analysis",
    "Case series",
];

const SUPPORTING_OUTCOMES: [&str; 2] = [
    "results consistent with the prediction",
    "effect observed in the expected direction",
];

const CONTRADICTING_OUTCOMES: [&str; 2] = [
    "no measurable effect after adjustment",
    "findings point the opposite way",
];

const RELATIONS: [EdgeType; 3] = [EdgeType::Causal, EdgeType::Temporal, EdgeType::Correlative];

/// Offline source producing one or two reproducible findings per request.
#[derive(Debug, Clone, Default)]
pub struct SimulatedEvidenceSource;

impl SimulatedEvidenceSource {
    /// Create the source.
    pub fn new() -> Self {
        Self
    }

    // Draws are seeded on the hypothesis, not the loop iteration, so a
    // hypothesis gets the same findings wherever the loop reaches it.
    fn item(&self, request: &EvidenceRequest, index: usize) -> EvidenceItem {
        let seed = format!("{}#{}", request.hypothesis_id, index);
        let supports = stable_unit(&format!("{}:supports", seed)) < 0.75;
        let strength = stable_range(&format!("{}:strength", seed), 0.4, 0.9);
        let power = stable_range(&format!("{}:power", seed), 0.5, 0.95);
        let relation = RELATIONS[stable_index(&format!("{}:relation", seed), RELATIONS.len())].clone();

        // Roughly a third of findings come from outside the hypothesis' own
        // disciplines, which is what bridge nodes are built from.
        let foreign = stable_unit(&format!("{}:foreign", seed)) < 0.3;
        let discipline =
            SIMULATED_DISCIPLINES[stable_index(&format!("{}:discipline", seed), SIMULATED_DISCIPLINES.len())];
        let tags: BTreeSet<String> = if !foreign {
            let mut tags = request.disciplinary_tags.clone();
            tags.insert(discipline.to_string());
            tags
        } else if request.disciplinary_tags.contains(discipline) {
            ["interdisciplinary_studies".to_string()].into_iter().collect()
        } else {
            [discipline.to_string()].into_iter().collect()
        };

        let first_study = stable_index(&format!("{}:study", request.hypothesis_id), STUDY_TYPES.len());
        let study = STUDY_TYPES[(first_study + index) % STUDY_TYPES.len()];
        let outcomes = if supports { &SUPPORTING_OUTCOMES } else { &CONTRADICTING_OUTCOMES };
        let outcome = outcomes[index % outcomes.len()];
        EvidenceItem {
            content: format!("{} on {}: {}", study, request.hypothesis_label, outcome),
            supports,
            strength,
            statistical_power: power,
            relation,
            disciplinary_tags: tags,
            implied_confidence: None,
        }
    }
}

#[async_trait]
impl EvidenceSource for SimulatedEvidenceSource {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn gather(&self, request: &EvidenceRequest) -> StageResult<Vec<EvidenceItem>> {
        let seed = format!("{}:count", request.hypothesis_id);
        let count = (1 + stable_index(&seed, 2)).min(request.max_items);
        Ok((0..count).map(|i| self.item(request, i)).collect())
    }
}
