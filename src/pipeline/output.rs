//! Stage result envelope.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::context::StageContext;

/// Outcome class of one stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Everything the stage attempted succeeded.
    Success,
    /// The stage produced output but hit a recoverable problem.
    PartialSuccess,
    /// The stage produced no usable output.
    Failure,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Success => write!(f, "success"),
            StageStatus::PartialSuccess => write!(f, "partial_success"),
            StageStatus::Failure => write!(f, "failure"),
        }
    }
}

/// A numeric or boolean metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Flag.
    Bool(bool),
    /// Count.
    Int(i64),
    /// Measurement.
    Float(f64),
}

impl MetricValue {
    /// Numeric view; booleans map to 0 or 1.
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Bool(b) => f64::from(u8::from(*b)),
            MetricValue::Int(i) => *i as f64,
            MetricValue::Float(f) => *f,
        }
    }

    /// Integer view, if this is a count.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetricValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean view, if this is a flag.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Bool(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

impl From<usize> for MetricValue {
    fn from(value: usize) -> Self {
        MetricValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

/// A stage's context contribution, keyed by the stage name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    /// Context key; equals the producing stage's name.
    pub key: String,
    /// Payload.
    pub payload: StageContext,
}

/// Result of one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Producing stage.
    pub stage_name: String,
    /// Outcome class.
    pub status: StageStatus,
    /// What happened, in one line.
    pub summary: String,
    /// Present on failure and on partial success.
    pub error_message: Option<String>,
    /// Contribution to the accumulated context.
    pub next_stage_context_update: ContextUpdate,
    /// Mutation counts, timings and flags.
    pub metrics: BTreeMap<String, MetricValue>,
    /// Non-fatal findings.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl StageOutput {
    fn build(
        stage_name: impl Into<String>,
        status: StageStatus,
        summary: impl Into<String>,
        error_message: Option<String>,
        payload: StageContext,
    ) -> Self {
        let stage_name = stage_name.into();
        Self {
            next_stage_context_update: ContextUpdate {
                key: stage_name.clone(),
                payload,
            },
            stage_name,
            status,
            summary: summary.into(),
            error_message,
            metrics: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Successful output.
    pub fn success(
        stage_name: impl Into<String>,
        summary: impl Into<String>,
        payload: StageContext,
    ) -> Self {
        Self::build(stage_name, StageStatus::Success, summary, None, payload)
    }

    /// Output with a recoverable problem.
    pub fn partial_success(
        stage_name: impl Into<String>,
        summary: impl Into<String>,
        error: impl Display,
        payload: StageContext,
    ) -> Self {
        Self::build(
            stage_name,
            StageStatus::PartialSuccess,
            summary,
            Some(error.to_string()),
            payload,
        )
    }

    /// Failed output; publishes a failure marker under the stage's key.
    pub fn failure(stage_name: impl Into<String>, error: impl Display) -> Self {
        let stage_name = stage_name.into();
        let message = error.to_string();
        Self::build(
            stage_name.clone(),
            StageStatus::Failure,
            format!("{} failed", stage_name),
            Some(message.clone()),
            StageContext::failed(message),
        )
    }

    /// Add a metric.
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(name.into(), value.into());
        self
    }

    /// Add a warning.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Look up a metric.
    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    /// Whether the stage failed.
    pub fn is_failure(&self) -> bool {
        self.status == StageStatus::Failure
    }

    /// The payload carried by this output.
    pub fn payload(&self) -> &StageContext {
        &self.next_stage_context_update.payload
    }
}
