//! Sequential stage execution.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::output::{StageOutput, StageStatus};
use super::params::{DependencyPolicy, PipelineParams};
use super::session::{RunStatus, SessionData};
use crate::error::ValidationError;
use crate::stages::Stage;

/// Runs a fixed, ordered list of stages over one query at a time.
///
/// Holds no graph state; everything structural lives in the store the stages
/// were built with. Runs for different queries may proceed concurrently on
/// the same orchestrator.
pub struct PipelineOrchestrator {
    stages: Vec<Arc<dyn Stage>>,
    defaults: PipelineParams,
}

impl PipelineOrchestrator {
    /// Build an orchestrator, validating stage names and dependency order.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self, ValidationError> {
        let mut configured: BTreeSet<&str> = BTreeSet::new();

        for stage in &stages {
            let name = stage.name();
            if name.trim().is_empty() {
                return Err(ValidationError::invalid("stages", "stage names must not be empty"));
            }
            for dependency in stage.dependencies() {
                if !configured.contains(dependency) {
                    return Err(ValidationError::DependencyOrder {
                        stage: name.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
            }
            if !configured.insert(name) {
                return Err(ValidationError::DuplicateStage {
                    name: name.to_string(),
                });
            }
        }

        Ok(Self {
            stages,
            defaults: PipelineParams::default(),
        })
    }

    /// Set the parameters used when a run supplies none.
    pub fn with_defaults(mut self, defaults: PipelineParams) -> Self {
        self.defaults = defaults;
        self
    }

    /// Default parameters.
    pub fn defaults(&self) -> &PipelineParams {
        &self.defaults
    }

    /// Configured stage names in order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the pipeline for a query.
    ///
    /// Only parameter validation fails; stage problems show up as failure
    /// entries in the returned trace.
    pub async fn run(
        &self,
        query: &str,
        params: Option<PipelineParams>,
    ) -> Result<SessionData, ValidationError> {
        self.run_with_context(query, params, serde_json::Map::new())
            .await
    }

    /// Run the pipeline with caller-supplied context overrides.
    pub async fn run_with_context(
        &self,
        query: &str,
        params: Option<PipelineParams>,
        initial_context: serde_json::Map<String, serde_json::Value>,
    ) -> Result<SessionData, ValidationError> {
        let params = params.unwrap_or_else(|| self.defaults.clone());
        self.validate(&params)?;

        let mut session = SessionData::new(query, params, initial_context);
        let run_start = Instant::now();

        info!(
            session_id = %session.session_id,
            stages = self.stages.len(),
            "Pipeline run started"
        );

        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            if !session.parameters.is_stage_enabled(name) {
                info!(session_id = %session.session_id, stage = name, "Stage disabled, skipping");
                continue;
            }

            session.status = RunStatus::Running { stage_index: index };
            info!(
                session_id = %session.session_id,
                stage = name,
                stage_number = index + 1,
                "Stage started"
            );

            let start = Instant::now();
            let output = match self.unmet_dependency(stage.as_ref(), &session) {
                Some(dependency)
                    if session.parameters.dependency_policy == DependencyPolicy::SkipDependents =>
                {
                    StageOutput::failure(
                        name,
                        format!("skipped: hard dependency {} did not complete", dependency),
                    )
                }
                _ => invoke(stage.as_ref(), &session).await,
            };
            let latency = start.elapsed().as_millis() as u64;

            let output = output
                .with_metric("duration_ms", latency)
                .with_metric("stage_number", index + 1);

            match output.status {
                StageStatus::Success => info!(
                    session_id = %session.session_id,
                    stage = name,
                    latency_ms = latency,
                    summary = %output.summary,
                    "Stage completed"
                ),
                StageStatus::PartialSuccess => warn!(
                    session_id = %session.session_id,
                    stage = name,
                    latency_ms = latency,
                    error = output.error_message.as_deref().unwrap_or_default(),
                    "Stage completed with issues"
                ),
                StageStatus::Failure => error!(
                    session_id = %session.session_id,
                    stage = name,
                    latency_ms = latency,
                    error = output.error_message.as_deref().unwrap_or_default(),
                    "Stage failed"
                ),
            }

            session.record(output);
        }

        session.complete();

        info!(
            session_id = %session.session_id,
            latency_ms = run_start.elapsed().as_millis() as u64,
            executed = session.stage_outputs_trace.len(),
            failed = session.failed_stages().len(),
            has_answer = session.final_answer.is_some(),
            "Pipeline run completed"
        );

        Ok(session)
    }

    fn validate(&self, params: &PipelineParams) -> Result<(), ValidationError> {
        params.validate()?;
        for name in params.stage_enabled.keys() {
            if !self.stages.iter().any(|s| s.name() == name) {
                return Err(ValidationError::UnknownStage { name: name.clone() });
            }
        }
        Ok(())
    }

    fn unmet_dependency(&self, stage: &dyn Stage, session: &SessionData) -> Option<&'static str> {
        stage
            .dependencies()
            .iter()
            .copied()
            .find(|dependency| !session.accumulated_context.succeeded(dependency))
    }
}

async fn invoke(stage: &dyn Stage, session: &SessionData) -> StageOutput {
    match AssertUnwindSafe(stage.execute(session)).catch_unwind().await {
        Ok(output) => output,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            debug!(stage = stage.name(), panic = %message, "Stage panicked");
            StageOutput::failure(stage.name(), format!("stage panicked: {}", message))
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod orchestrator_tests;
