//! Evidence gathered by a Langbase pipe.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{EvidenceItem, EvidenceRequest, EvidenceSource};
use crate::error::{StageError, StageResult};
use crate::graph::math::clamp_unit;
use crate::graph::EdgeType;
use crate::langbase::{strip_code_fences, LangbaseClient, Message, PipeRequest};
use crate::prompts::EVIDENCE_GATHERING_PROMPT;

/// Evidence source backed by an LLM pipe.
#[derive(Clone)]
pub struct LangbaseEvidenceSource {
    client: LangbaseClient,
    pipe_name: String,
}

impl LangbaseEvidenceSource {
    /// Source running `pipe_name` through `client`.
    pub fn new(client: LangbaseClient, pipe_name: impl Into<String>) -> Self {
        Self {
            client,
            pipe_name: pipe_name.into(),
        }
    }

    fn build_request(&self, request: &EvidenceRequest) -> StageResult<PipeRequest> {
        let input = serde_json::json!({
            "query": request.query,
            "hypothesis": request.hypothesis_label,
            "disciplinary_tags": request.disciplinary_tags,
            "max_findings": request.max_items,
        });
        let input = serde_json::to_string(&input).map_err(|e| StageError::InvalidInput {
            message: format!("failed to encode evidence request: {}", e),
        })?;

        Ok(PipeRequest::new(
            &self.pipe_name,
            vec![
                Message::system(EVIDENCE_GATHERING_PROMPT),
                Message::user(input),
            ],
        ))
    }
}

#[async_trait]
impl EvidenceSource for LangbaseEvidenceSource {
    fn name(&self) -> &str {
        &self.pipe_name
    }

    async fn gather(&self, request: &EvidenceRequest) -> StageResult<Vec<EvidenceItem>> {
        let pipe_request = self.build_request(request)?;
        let response = self.client.call_pipe(&pipe_request).await?;

        let mut items = parse_evidence_completion(&response.completion);
        items.truncate(request.max_items);
        debug!(
            pipe = %self.pipe_name,
            hypothesis = %request.hypothesis_id,
            items = items.len(),
            tokens = response.total_tokens(),
            "Evidence completion parsed"
        );
        Ok(items)
    }
}

#[derive(Deserialize)]
struct EvidenceEnvelope {
    #[serde(default)]
    evidence: Vec<RawFinding>,
}

#[derive(Deserialize)]
struct RawFinding {
    content: String,
    #[serde(default)]
    supports: Option<bool>,
    #[serde(default)]
    strength: Option<f64>,
    #[serde(default)]
    statistical_power: Option<f64>,
    #[serde(default)]
    relation: Option<String>,
    #[serde(default)]
    disciplinary_tags: BTreeSet<String>,
    #[serde(default)]
    implied_confidence: Option<Vec<f64>>,
}

impl RawFinding {
    fn into_item(self) -> Option<EvidenceItem> {
        let content = self.content.trim().to_string();
        if content.is_empty() {
            return None;
        }
        // Anything other than the three evidential relations is treated as
        // correlative.
        let relation = self
            .relation
            .as_deref()
            .and_then(|r| r.trim().to_lowercase().parse::<EdgeType>().ok())
            .filter(EdgeType::is_evidential)
            .unwrap_or(EdgeType::Correlative);

        Some(EvidenceItem {
            content,
            supports: self.supports.unwrap_or(true),
            strength: clamp_unit(self.strength.unwrap_or(0.5)),
            statistical_power: clamp_unit(self.statistical_power.unwrap_or(0.5)),
            relation,
            disciplinary_tags: self.disciplinary_tags,
            implied_confidence: self.implied_confidence.filter(|v| v.len() == 4),
        })
    }
}

/// Parse `{"evidence": [...]}` out of a completion.
///
/// Tolerates code fences and prose around the object. An unparseable
/// completion yields no items.
pub fn parse_evidence_completion(completion: &str) -> Vec<EvidenceItem> {
    let body = strip_code_fences(completion);
    let json = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            warn!(completion_len = completion.len(), "Evidence completion contains no JSON object");
            return Vec::new();
        }
    };

    match serde_json::from_str::<EvidenceEnvelope>(json) {
        Ok(envelope) => envelope
            .evidence
            .into_iter()
            .filter_map(RawFinding::into_item)
            .collect(),
        Err(e) => {
            warn!(error = %e, "Failed to parse evidence completion");
            Vec::new()
        }
    }
}
