//! Answer composition from the extracted subgraphs.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{excerpt, Stage, StageCore, COMPOSITION_STAGE, SUBGRAPH_EXTRACTION_STAGE};
use crate::error::StageResult;
use crate::graph::{Node, NodeType};
use crate::pipeline::{
    Citation, ComposedOutput, CompositionContext, ExtractedSubgraph, InitializationContext,
    OutputSection, SessionData, StageContext, StageOutput, SubgraphContext,
};
use crate::store::{EdgeQuery, GraphStore, NodeQuery};

const MAX_CLAIMS_PER_SECTION: usize = 3;
const CLAIM_THRESHOLD: f64 = 0.6;
const MAX_EDGE_ANNOTATIONS: usize = 2;

/// Turns the extracted subgraphs into a structured, cited answer.
pub struct CompositionStage {
    core: StageCore,
}

fn is_claim(node: &Node) -> bool {
    node.node_type.is_content()
        && (node.confidence.average() > CLAIM_THRESHOLD || node.impact() > CLAIM_THRESHOLD)
}

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn citation_for(node: &Node) -> Citation {
    Citation {
        id: format!("Node-{}", node.id),
        text: format!(
            "Reasoning graph node. ID: {}. Label: {}. Type: {}. Created: {}.",
            node.id,
            node.label,
            node.node_type,
            node.created_at.format("%Y-%m-%d")
        ),
        source_node_id: node.id.clone(),
    }
}

/// One line per recorded stage, with its number and duration.
fn trace_appendix(session: &SessionData) -> String {
    let mut lines = vec!["Reasoning trace:".to_string()];
    for output in &session.stage_outputs_trace {
        let number = output
            .metric("stage_number")
            .and_then(|m| m.as_i64())
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        let duration = output
            .metric("duration_ms")
            .and_then(|m| m.as_i64())
            .map_or_else(|| "n/a".to_string(), |d| format!("{}ms", d));
        lines.push(format!(
            "  Stage {}. {} [{}]: {} ({})",
            number, output.stage_name, output.status, output.summary, duration
        ));
    }
    lines.join("\n")
}

/// Render the composed output as markdown.
pub fn render_answer(composed: &ComposedOutput) -> String {
    let mut text = format!("# {}\n\n{}\n", composed.title, composed.executive_summary);
    for section in &composed.sections {
        let _ = write!(text, "\n## {}\n\n{}\n", section.title, section.content);
    }
    if !composed.citations.is_empty() {
        text.push_str("\n## References\n\n");
        for citation in &composed.citations {
            let _ = writeln!(text, "[{}] {}", citation.id, citation.text);
        }
    }
    if !composed.trace_appendix.is_empty() {
        let _ = write!(text, "\n{}\n", composed.trace_appendix);
    }
    text
}

impl CompositionStage {
    /// Create the stage over a store.
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            core: StageCore::new(store),
        }
    }

    /// Claim text with its node reference and supporting edges.
    async fn claim(&self, node: &Node, members: &BTreeSet<&str>) -> StageResult<String> {
        let mut text = format!("{} [node {}]", node.label, node.id);
        if !node.metadata.description.is_empty() && node.metadata.description != node.label {
            let _ = write!(text, ": {}", excerpt(&node.metadata.description, 100));
        }
        let incoming = self
            .core
            .store()
            .find_edges(&EdgeQuery::touching(&node.id).to_target(&node.id))
            .await?;
        let support: Vec<String> = incoming
            .iter()
            .filter(|e| members.contains(e.source_id.as_str()))
            .take(MAX_EDGE_ANNOTATIONS)
            .map(|e| format!("supported via {} edge from {}", e.edge_type, e.source_id))
            .collect();
        if !support.is_empty() {
            let _ = write!(text, " ({})", support.join("; "));
        }
        Ok(text)
    }

    async fn section(
        &self,
        subgraph: &ExtractedSubgraph,
        citations: &mut Vec<Citation>,
    ) -> StageResult<(OutputSection, usize)> {
        let mut claims = Vec::new();
        for id in &subgraph.node_ids {
            if let Some(node) = self.core.store().get_node(id).await? {
                if is_claim(&node) {
                    claims.push(node);
                }
            }
        }
        claims.sort_by(|a, b| {
            b.impact()
                .total_cmp(&a.impact())
                .then_with(|| b.confidence.average().total_cmp(&a.confidence.average()))
                .then_with(|| a.id.cmp(&b.id))
        });
        claims.truncate(MAX_CLAIMS_PER_SECTION);

        let members: BTreeSet<&str> = subgraph.node_ids.iter().map(String::as_str).collect();
        let mut lines = vec![format!(
            "Findings from the '{}' subgraph, which focuses on: {}.",
            subgraph.name,
            if subgraph.description.is_empty() {
                "the selected nodes"
            } else {
                subgraph.description.as_str()
            }
        )];
        for (index, node) in claims.iter().enumerate() {
            lines.push(format!("Key point {}: {}", index + 1, self.claim(node, &members).await?));
            let citation = citation_for(node);
            if !citations.iter().any(|c| c.id == citation.id) {
                citations.push(citation);
            }
        }
        if claims.is_empty() {
            lines.push("No high-impact claims met the selection thresholds in this subgraph.".to_string());
        }

        let section = OutputSection {
            title: format!("Analysis: {}", title_case(&subgraph.name)),
            content: lines.join("\n"),
            section_type: "analysis_subgraph".to_string(),
            referenced_subgraph: Some(subgraph.name.clone()),
            related_node_ids: subgraph.node_ids.clone(),
        };
        Ok((section, claims.len()))
    }

    /// Section listing the dimensions the query leaves unaddressed.
    async fn gaps_section(&self, scope: &str) -> StageResult<Option<OutputSection>> {
        let gaps: Vec<Node> = self
            .core
            .store()
            .find_nodes(&NodeQuery::in_scope(scope).of_type(NodeType::Dimension))
            .await?
            .into_iter()
            .filter(|n| n.metadata.is_knowledge_gap)
            .collect();
        if gaps.is_empty() {
            return Ok(None);
        }
        let content = gaps
            .iter()
            .map(|n| format!("- {} [node {}]: not addressed by the query", n.label, n.id))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(OutputSection {
            title: "Knowledge Gaps".to_string(),
            content,
            section_type: "gaps".to_string(),
            referenced_subgraph: None,
            related_node_ids: gaps.into_iter().map(|n| n.id).collect(),
        }))
    }

    async fn run(&self, session: &SessionData) -> StageResult<StageOutput> {
        let extracted = session
            .accumulated_context
            .require::<SubgraphContext>(self.name())?;
        let scope = session
            .accumulated_context
            .optional::<InitializationContext>()
            .map(|init| init.root_node_id.clone());
        let query = session.query.trim();

        if extracted.subgraphs.is_empty() {
            warn!(session_id = %session.session_id, "No subgraphs to compose from; emitting minimal answer");
            let composed = ComposedOutput {
                title: format!("Analysis (minimal): {}", excerpt(query, 50)),
                executive_summary: "No subgraphs were extracted for detailed composition. \
                    The graph may be too sparse or the criteria too strict."
                    .to_string(),
                sections: Vec::new(),
                citations: Vec::new(),
                trace_appendix: trace_appendix(session),
            };
            let final_answer = render_answer(&composed);
            return Ok(StageOutput::success(
                self.name(),
                "Composed minimal answer (no subgraphs)",
                StageContext::Composition(CompositionContext {
                    composed,
                    final_answer,
                }),
            )
            .with_metric("sections_generated", 0usize)
            .with_metric("citations_generated", 0usize)
            .with_metric("key_claims", 0usize));
        }

        let mut sections = Vec::new();
        let mut citations = Vec::new();
        let mut key_claims = 0usize;
        for subgraph in &extracted.subgraphs {
            let (section, claims) = self.section(subgraph, &mut citations).await?;
            debug!(subgraph = %subgraph.name, claims, "Section composed");
            key_claims += claims;
            sections.push(section);
        }

        let mut gaps_reported = 0usize;
        if let Some(scope) = scope.as_deref() {
            if let Some(gaps) = self.gaps_section(scope).await? {
                gaps_reported = gaps.related_node_ids.len();
                sections.push(gaps);
            }
        }

        let names: Vec<&str> = extracted.subgraphs.iter().map(|s| s.name.as_str()).collect();
        let executive_summary = format!(
            "Analysis of the query '{}' drew on {} subgraphs ({}), yielding {} key claims with {} cited nodes.",
            query,
            names.len(),
            names.join(", "),
            key_claims,
            citations.len()
        );
        let composed = ComposedOutput {
            title: format!("Analysis: {}", excerpt(query, 80)),
            executive_summary,
            sections,
            citations,
            trace_appendix: trace_appendix(session),
        };
        let final_answer = render_answer(&composed);

        info!(
            session_id = %session.session_id,
            sections = composed.sections.len(),
            citations = composed.citations.len(),
            key_claims,
            "Answer composed"
        );

        let summary = format!(
            "Composed {} sections with {} citations",
            composed.sections.len(),
            composed.citations.len()
        );
        let sections_generated = composed.sections.len();
        let citations_generated = composed.citations.len();
        Ok(StageOutput::success(
            self.name(),
            summary,
            StageContext::Composition(CompositionContext {
                composed,
                final_answer,
            }),
        )
        .with_metric("sections_generated", sections_generated)
        .with_metric("citations_generated", citations_generated)
        .with_metric("key_claims", key_claims)
        .with_metric("knowledge_gaps_reported", gaps_reported))
    }
}

#[async_trait]
impl Stage for CompositionStage {
    fn name(&self) -> &str {
        COMPOSITION_STAGE
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[SUBGRAPH_EXTRACTION_STAGE]
    }

    async fn execute(&self, session: &SessionData) -> StageOutput {
        self.run(session)
            .await
            .unwrap_or_else(|e| StageOutput::failure(self.name(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ConfidenceVector, Edge, EdgeType};
    use crate::pipeline::{PipelineParams, StageStatus};
    use crate::stages::test_support::{memory_store, run_through, session, step};

    fn subgraph_session(subgraphs: Vec<ExtractedSubgraph>) -> SessionData {
        let mut s = session(PipelineParams::default());
        s.record(StageOutput::success(
            SUBGRAPH_EXTRACTION_STAGE,
            "ok",
            StageContext::Subgraph(SubgraphContext {
                no_subgraph_extracted: subgraphs.is_empty(),
                subgraphs,
            }),
        ));
        s
    }

    #[tokio::test]
    async fn test_claims_are_ranked_and_annotated() {
        let store = memory_store();
        let nodes = [
            Node::new("hyp", "r", NodeType::Hypothesis, "Main hypothesis")
                .with_confidence(ConfidenceVector::uniform(0.7))
                .with_impact(0.9),
            Node::new("ev", "r", NodeType::Evidence, "Trial finding")
                .with_confidence(ConfidenceVector::uniform(0.8))
                .with_impact(0.5),
            Node::new("weak", "r", NodeType::Evidence, "Weak finding")
                .with_confidence(ConfidenceVector::uniform(0.3))
                .with_impact(0.2),
            Node::new("dim", "r", NodeType::Dimension, "Scope")
                .with_confidence(ConfidenceVector::uniform(0.9))
                .with_impact(0.9),
        ];
        for n in &nodes {
            store.upsert_node(n).await.unwrap();
        }
        store
            .upsert_edge(&Edge::new("r", "ev", "hyp", EdgeType::Causal))
            .await
            .unwrap();

        let mut s = subgraph_session(vec![ExtractedSubgraph {
            name: "high_confidence_core".to_string(),
            description: "core".to_string(),
            node_ids: nodes.iter().map(|n| n.id.clone()).collect(),
            edge_ids: Vec::new(),
            seed_count: 2,
        }]);
        let out = step(&CompositionStage::new(store.clone()), &mut s).await;
        assert_eq!(out.status, StageStatus::Success);
        assert_eq!(out.metric("key_claims").and_then(|m| m.as_i64()), Some(2));

        let ctx = s.accumulated_context.require::<CompositionContext>("test").unwrap();
        let section = &ctx.composed.sections[0];
        assert_eq!(section.title, "Analysis: High Confidence Core");
        assert_eq!(section.referenced_subgraph.as_deref(), Some("high_confidence_core"));
        let first = section.content.lines().nth(1).unwrap();
        assert!(first.starts_with("Key point 1: Main hypothesis [node hyp]"));
        assert!(first.contains("supported via causal edge from ev"));
        assert!(!section.content.contains("Weak finding"));

        let ids: Vec<&str> = ctx.composed.citations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["Node-hyp", "Node-ev"]);
        assert!(ctx.final_answer.contains("## References"));
        assert_eq!(s.final_answer.as_deref(), Some(ctx.final_answer.as_str()));
    }

    #[tokio::test]
    async fn test_minimal_answer_without_subgraphs() {
        let mut s = subgraph_session(Vec::new());
        let out = step(&CompositionStage::new(memory_store()), &mut s).await;
        assert_eq!(out.status, StageStatus::Success);

        let ctx = s.accumulated_context.require::<CompositionContext>("test").unwrap();
        assert!(ctx.composed.sections.is_empty());
        assert!(ctx.composed.title.starts_with("Analysis (minimal)"));
        assert!(ctx.final_answer.contains("Reasoning trace:"));
    }

    #[tokio::test]
    async fn test_missing_subgraph_context_fails() {
        let stage = CompositionStage::new(memory_store());
        let out = stage.execute(&session(PipelineParams::default())).await;
        assert!(out.is_failure());
        assert!(out
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains(SUBGRAPH_EXTRACTION_STAGE)));
    }

    #[tokio::test]
    async fn test_full_run_reports_gaps_and_trace() {
        let store = memory_store();
        let s = run_through(&store, PipelineParams::default(), 7).await;
        let ctx = s.accumulated_context.require::<CompositionContext>("test").unwrap();

        let gaps = ctx
            .composed
            .sections
            .iter()
            .find(|sec| sec.section_type == "gaps")
            .unwrap();
        assert_eq!(gaps.related_node_ids.len(), 3);
        assert!(gaps.content.contains("Data Needs"));
        for stage in [crate::stages::INITIALIZATION_STAGE, SUBGRAPH_EXTRACTION_STAGE] {
            assert!(ctx.composed.trace_appendix.contains(stage));
        }
        assert!(!ctx.final_answer.is_empty());
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("knowledge_gaps_focus"), "Knowledge Gaps Focus");
        assert_eq!(title_case("top__ranked"), "Top Ranked");
    }
}
