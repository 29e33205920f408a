//! Pipeline stages.
//!
//! Eight stages, run in this order by default:
//!
//! - **Initialization**: create or reuse the root node for the query
//! - **Decomposition**: one dimension node per conceptual dimension
//! - **Hypothesis**: bounded hypotheses per dimension with plans and falsification criteria
//! - **Evidence**: iterative evidence gathering with Bayesian confidence updates
//! - **Pruning/Merging**: drop weak nodes, fold near-duplicates
//! - **Subgraph Extraction**: score and select the most relevant subsets
//! - **Composition**: render the answer with node citations
//! - **Reflection**: audit the run and compute the final confidence

mod composition;
mod decomposition;
mod evidence;
mod hypothesis;
mod initialization;
mod pruning;
mod reflection;
mod subgraph;

#[cfg(test)]
mod test_support;

pub use composition::*;
pub use decomposition::*;
pub use evidence::*;
pub use hypothesis::*;
pub use initialization::*;
pub use pruning::*;
pub use reflection::*;
pub use subgraph::*;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ValidationError;
use crate::evidence::EvidenceSource;
use crate::pipeline::{PipelineOrchestrator, SessionData, StageOutput};
use crate::store::GraphStore;

/// Name of the initialization stage.
pub const INITIALIZATION_STAGE: &str = "InitializationStage";
/// Name of the decomposition stage.
pub const DECOMPOSITION_STAGE: &str = "DecompositionStage";
/// Name of the hypothesis stage.
pub const HYPOTHESIS_STAGE: &str = "HypothesisStage";
/// Name of the evidence stage.
pub const EVIDENCE_STAGE: &str = "EvidenceStage";
/// Name of the pruning/merging stage.
pub const PRUNING_MERGING_STAGE: &str = "PruningMergingStage";
/// Name of the subgraph extraction stage.
pub const SUBGRAPH_EXTRACTION_STAGE: &str = "SubgraphExtractionStage";
/// Name of the composition stage.
pub const COMPOSITION_STAGE: &str = "CompositionStage";
/// Name of the reflection stage.
pub const REFLECTION_STAGE: &str = "ReflectionStage";

/// One phase of the pipeline.
///
/// `execute` never fails: implementations convert every internal error into
/// a failure [`StageOutput`]. The orchestrator additionally converts panics.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Constant identity, used as context key and trace label.
    fn name(&self) -> &str;

    /// Stages whose context this stage cannot run without.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// Run the stage against the current session.
    async fn execute(&self, session: &SessionData) -> StageOutput;
}

/// Dependencies shared by every built-in stage.
#[derive(Clone)]
pub struct StageCore {
    store: Arc<dyn GraphStore>,
}

impl StageCore {
    /// Create a core over a store.
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// The graph store.
    #[inline]
    pub fn store(&self) -> &dyn GraphStore {
        self.store.as_ref()
    }
}

/// The eight built-in stages in pipeline order.
pub fn default_stages(
    store: Arc<dyn GraphStore>,
    evidence_source: Arc<dyn EvidenceSource>,
) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(InitializationStage::new(store.clone())),
        Arc::new(DecompositionStage::new(store.clone())),
        Arc::new(HypothesisStage::new(store.clone())),
        Arc::new(EvidenceStage::new(store.clone(), evidence_source)),
        Arc::new(PruningMergingStage::new(store.clone())),
        Arc::new(SubgraphExtractionStage::new(store.clone())),
        Arc::new(CompositionStage::new(store.clone())),
        Arc::new(ReflectionStage::new(store)),
    ]
}

/// Orchestrator over the built-in stages.
pub fn default_orchestrator(
    store: Arc<dyn GraphStore>,
    evidence_source: Arc<dyn EvidenceSource>,
) -> Result<PipelineOrchestrator, ValidationError> {
    PipelineOrchestrator::new(default_stages(store, evidence_source))
}

/// Shared helper for truncating text in labels and logs.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
