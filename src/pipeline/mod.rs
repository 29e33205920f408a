//! Pipeline orchestration.
//!
//! [`PipelineOrchestrator`] threads a [`SessionData`] through an ordered list
//! of stages. Each stage returns a [`StageOutput`] whose typed payload is
//! merged into the session's [`AccumulatedContext`] under the stage's name.

pub mod context;
mod orchestrator;
mod output;
mod params;
mod session;

pub use context::{
    AccumulatedContext, AuditCheckResult, AuditStatus, Citation, ComposedOutput,
    CompositionContext, DecompositionContext, DimensionSummary, EvidenceContext,
    ExtractedSubgraph, FailureContext, HypothesisContext, HypothesisSummary,
    InitializationContext, MergeRecord, OutputSection, PruningContext, ReflectionContext,
    StageContext, StagePayload, SubgraphContext, TerminationReason,
};
pub use orchestrator::PipelineOrchestrator;
pub use output::{ContextUpdate, MetricValue, StageOutput, StageStatus};
pub use params::{DependencyPolicy, DimensionSpec, PipelineParams, SubgraphCriterion};
pub use session::{RunStatus, SessionData};
