//! Per-run threading record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::context::AccumulatedContext;
use super::output::StageOutput;
use super::params::PipelineParams;
use crate::graph::{ids, ConfidenceVector};

/// Lifecycle of one pipeline run.
///
/// Individual stage failures never leave `Running`; every run ends in
/// `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// Built, no stage invoked yet.
    Created,
    /// Executing the stage at this position in the configured list.
    Running {
        /// Zero-based position.
        stage_index: usize,
    },
    /// Every configured stage was attempted.
    Completed,
}

/// State threaded through one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    /// Trace correlation id.
    pub session_id: String,
    /// Original query.
    pub query: String,
    /// Validated parameters for this run.
    pub parameters: PipelineParams,
    /// Caller-supplied overrides, passed through verbatim.
    pub initial_context: serde_json::Map<String, serde_json::Value>,
    /// One payload per executed stage.
    pub accumulated_context: AccumulatedContext,
    /// One output per executed stage, in execution order.
    pub stage_outputs_trace: Vec<StageOutput>,
    /// Run lifecycle.
    pub status: RunStatus,
    /// Set from the composition payload.
    pub final_answer: Option<String>,
    /// Set from the reflection payload.
    pub final_confidence_vector: Option<ConfidenceVector>,
    /// When the run started.
    pub created_at: DateTime<Utc>,
    /// When the run finished.
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionData {
    /// Fresh session for a query.
    pub fn new(
        query: impl Into<String>,
        parameters: PipelineParams,
        initial_context: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            session_id: ids::session_id(),
            query: query.into(),
            parameters,
            initial_context,
            accumulated_context: AccumulatedContext::new(),
            stage_outputs_trace: Vec::new(),
            status: RunStatus::Created,
            final_answer: None,
            final_confidence_vector: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Merge a stage output into the session and append it to the trace.
    ///
    /// An output whose context key differs from its stage name, or whose key
    /// is already taken, is recorded as a failure and its payload dropped.
    pub(crate) fn record(&mut self, mut output: StageOutput) {
        let key = output.next_stage_context_update.key.clone();

        if key != output.stage_name {
            warn!(
                session_id = %self.session_id,
                stage = %output.stage_name,
                key = %key,
                "Stage published under a foreign context key"
            );
            output = reject(output, format!("context key '{}' does not match stage name", key));
        }

        let payload = output.next_stage_context_update.payload.clone();
        if !self
            .accumulated_context
            .try_insert(output.stage_name.clone(), payload)
        {
            warn!(
                session_id = %self.session_id,
                stage = %output.stage_name,
                "Context key already present"
            );
            let reason = format!("context key '{}' already present", output.stage_name);
            output = reject(output, reason);
        } else {
            let payload = output.payload();
            if let Some(answer) = payload.final_answer() {
                self.final_answer = Some(answer.to_string());
            }
            if let Some(confidence) = payload.final_confidence() {
                self.final_confidence_vector = Some(confidence);
            }
        }

        self.stage_outputs_trace.push(output);
    }

    /// Mark the run finished.
    pub(crate) fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Outputs with failure status.
    pub fn failed_stages(&self) -> Vec<&StageOutput> {
        self.stage_outputs_trace
            .iter()
            .filter(|o| o.is_failure())
            .collect()
    }

    /// The trace entry of a stage.
    pub fn output_for(&self, stage_name: &str) -> Option<&StageOutput> {
        self.stage_outputs_trace
            .iter()
            .find(|o| o.stage_name == stage_name)
    }

    /// Whether the run has finished.
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

fn reject(output: StageOutput, reason: String) -> StageOutput {
    let mut failed = StageOutput::failure(output.stage_name.clone(), &reason);
    failed.metrics = output.metrics;
    failed.warnings = output.warnings;
    failed
}
