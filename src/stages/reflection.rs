//! Self-audit of the finished graph and the final confidence vector.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Stage, StageCore, INITIALIZATION_STAGE, REFLECTION_STAGE};
use crate::error::StageResult;
use crate::graph::math::clamp_unit;
use crate::graph::{BiasSeverity, ConfidenceVector, Edge, EdgeType, Node, NodeType};
use crate::pipeline::{
    AuditCheckResult, AuditStatus, CompositionContext, InitializationContext, ReflectionContext,
    SessionData, StageContext, StageOutput,
};
use crate::store::{EdgeQuery, GraphStore, NodeQuery};

const HIGH_CONFIDENCE: f64 = 0.7;
const HIGH_IMPACT: f64 = 0.7;
const FALSIFIABLE_RATIO: f64 = 0.6;
const ADEQUATE_POWER: f64 = 0.7;
const POWERED_RATIO: f64 = 0.5;
const POWERED_RATIO_WARNING: f64 = 0.2;
const CAUSAL_POWER: f64 = 0.6;

/// Audits the run and computes the overall confidence in the answer.
pub struct ReflectionStage {
    core: StageCore,
}

fn check(name: &str, status: AuditStatus, message: impl Into<String>) -> AuditCheckResult {
    AuditCheckResult {
        check_name: name.to_string(),
        status,
        message: message.into(),
    }
}

fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn coverage_check(nodes: &[Node]) -> AuditCheckResult {
    const NAME: &str = "high_confidence_impact_coverage";
    let content: Vec<&Node> = nodes.iter().filter(|n| n.node_type.is_content()).collect();
    if content.is_empty() {
        return check(NAME, AuditStatus::NotApplicable, "No content nodes to assess.");
    }
    let confident = content
        .iter()
        .filter(|n| n.confidence.average() >= HIGH_CONFIDENCE)
        .count();
    let impactful = content.iter().filter(|n| n.impact() >= HIGH_IMPACT).count();
    let conf_cov = ratio(confident, content.len());
    let impact_cov = ratio(impactful, content.len());
    let message = format!(
        "{:.0}% of content nodes have high confidence, {:.0}% have high impact.",
        conf_cov * 100.0,
        impact_cov * 100.0
    );
    if conf_cov >= 0.3 && impact_cov >= 0.2 {
        check(NAME, AuditStatus::Pass, message)
    } else if conf_cov >= 0.1 || impact_cov >= 0.1 {
        check(NAME, AuditStatus::Warning, format!("Moderate coverage. {}", message))
    } else {
        check(NAME, AuditStatus::Fail, format!("Poor coverage. {}", message))
    }
}

fn bias_check(nodes: &[Node]) -> AuditCheckResult {
    const NAME: &str = "bias_flags_assessment";
    let flagged = nodes.iter().filter(|n| !n.metadata.bias_flags.is_empty()).count();
    let high = nodes
        .iter()
        .flat_map(|n| n.metadata.bias_flags.iter())
        .filter(|f| f.severity == BiasSeverity::High)
        .count();
    let message = format!("{} nodes carry bias flags, {} of high severity.", flagged, high);
    if high > 0 {
        check(NAME, AuditStatus::Fail, message)
    } else if flagged > 0 {
        check(NAME, AuditStatus::Warning, format!("Potential biases flagged. {}", message))
    } else {
        check(NAME, AuditStatus::Pass, "No bias flags raised.")
    }
}

fn gaps_check(nodes: &[Node], composition: Option<&CompositionContext>) -> AuditCheckResult {
    const NAME: &str = "knowledge_gaps_addressed";
    if !nodes.iter().any(|n| n.metadata.is_knowledge_gap) {
        return check(NAME, AuditStatus::NotApplicable, "No knowledge gaps were identified.");
    }
    let mentioned = composition.is_some_and(|c| {
        c.composed.sections.iter().any(|s| {
            s.title.to_lowercase().contains("gap") || s.section_type.to_lowercase().contains("gap")
        })
    });
    if mentioned {
        check(NAME, AuditStatus::Pass, "Knowledge gaps are discussed in the composed answer.")
    } else {
        check(
            NAME,
            AuditStatus::Warning,
            "Knowledge gaps exist but the composed answer does not discuss them.",
        )
    }
}

fn falsifiability_check(nodes: &[Node]) -> AuditCheckResult {
    const NAME: &str = "hypothesis_falsifiability";
    let hypotheses: Vec<&Node> = nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Hypothesis)
        .collect();
    if hypotheses.is_empty() {
        return check(NAME, AuditStatus::NotApplicable, "No hypotheses to assess.");
    }
    let falsifiable = hypotheses
        .iter()
        .filter(|n| {
            n.metadata
                .falsification_criteria
                .as_ref()
                .is_some_and(|c| !c.description.is_empty())
        })
        .count();
    let r = ratio(falsifiable, hypotheses.len());
    let message = format!(
        "{}/{} hypotheses have falsification criteria.",
        falsifiable,
        hypotheses.len()
    );
    if r >= FALSIFIABLE_RATIO {
        check(NAME, AuditStatus::Pass, message)
    } else if r > 0.0 {
        check(NAME, AuditStatus::Warning, message)
    } else {
        check(NAME, AuditStatus::Fail, message)
    }
}

fn rigor_check(nodes: &[Node]) -> AuditCheckResult {
    const NAME: &str = "statistical_rigor_of_evidence";
    let evidence: Vec<&Node> = nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Evidence)
        .collect();
    if evidence.is_empty() {
        return check(NAME, AuditStatus::NotApplicable, "No evidence to assess.");
    }
    let powered = evidence
        .iter()
        .filter(|n| n.metadata.statistical_power.is_some_and(|p| p >= ADEQUATE_POWER))
        .count();
    let r = ratio(powered, evidence.len());
    let message = format!(
        "{}/{} evidence nodes have statistical power >= {}.",
        powered,
        evidence.len(),
        ADEQUATE_POWER
    );
    if r >= POWERED_RATIO {
        check(NAME, AuditStatus::Pass, message)
    } else if r >= POWERED_RATIO_WARNING {
        check(NAME, AuditStatus::Warning, format!("Limited rigor. {}", message))
    } else {
        check(NAME, AuditStatus::Fail, format!("Weak rigor. {}", message))
    }
}

fn causal_check(nodes: &BTreeMap<&str, &Node>, edges: &[Edge]) -> AuditCheckResult {
    const NAME: &str = "causal_claim_validity";
    let causal: Vec<&Edge> = edges.iter().filter(|e| e.edge_type == EdgeType::Causal).collect();
    if causal.is_empty() {
        return check(NAME, AuditStatus::NotApplicable, "No causal claims in the graph.");
    }
    let weak: Vec<&str> = causal
        .iter()
        .filter(|e| {
            nodes
                .get(e.source_id.as_str())
                .and_then(|n| n.metadata.statistical_power)
                .map_or(true, |p| p < CAUSAL_POWER)
        })
        .map(|e| e.source_id.as_str())
        .collect();
    if weak.is_empty() {
        check(
            NAME,
            AuditStatus::Pass,
            format!("All {} causal claims rest on adequately powered evidence.", causal.len()),
        )
    } else {
        check(
            NAME,
            AuditStatus::Warning,
            format!(
                "{}/{} causal claims rest on evidence with power below {}.",
                weak.len(),
                causal.len(),
                CAUSAL_POWER
            ),
        )
    }
}

/// Whether the directed graph has a cycle.
fn has_cycle(adjacent: &BTreeMap<&str, Vec<&str>>) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    for &start in adjacent.keys() {
        if marks.contains_key(start) {
            continue;
        }
        // Iterative DFS: (node, index of next child to visit).
        let mut stack = vec![(start, 0usize)];
        marks.insert(start, Mark::Visiting);
        while let Some((node, next)) = stack.last().copied() {
            let children = adjacent.get(node).map(Vec::as_slice).unwrap_or_default();
            match children.get(next) {
                Some(&child) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    match marks.get(child) {
                        Some(Mark::Visiting) => return true,
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(child, Mark::Visiting);
                            stack.push((child, 0));
                        }
                    }
                }
                None => {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                }
            }
        }
    }
    false
}

fn temporal_check(edges: &[Edge]) -> AuditCheckResult {
    const NAME: &str = "temporal_consistency";
    let mut adjacent: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for edge in edges.iter().filter(|e| e.edge_type == EdgeType::Temporal) {
        adjacent
            .entry(edge.source_id.as_str())
            .or_default()
            .push(edge.target_id.as_str());
    }
    if adjacent.is_empty() {
        return check(NAME, AuditStatus::NotApplicable, "No temporal relations in the graph.");
    }
    if has_cycle(&adjacent) {
        check(NAME, AuditStatus::Fail, "Temporal relations form a cycle.")
    } else {
        check(NAME, AuditStatus::Pass, "Temporal relations are acyclic.")
    }
}

fn status_of(results: &[AuditCheckResult], name: &str) -> Option<AuditStatus> {
    results.iter().find(|r| r.check_name == name).map(|r| r.status)
}

/// Final confidence from a neutral start, adjusted by the audit outcome.
pub(crate) fn final_confidence(results: &[AuditCheckResult], nodes: &[Node]) -> ConfidenceVector {
    let mut methodological: f64 = 0.5;
    match status_of(results, "hypothesis_falsifiability") {
        Some(AuditStatus::Pass) => methodological += 0.2,
        Some(AuditStatus::Warning) => methodological += 0.05,
        Some(AuditStatus::Fail) => methodological -= 0.2,
        _ => {}
    }
    match status_of(results, "bias_flags_assessment") {
        Some(AuditStatus::Pass) => methodological += 0.1,
        Some(AuditStatus::Fail) => methodological -= 0.15,
        _ => {}
    }

    let mut empirical: f64 = 0.5;
    match status_of(results, "statistical_rigor_of_evidence") {
        Some(AuditStatus::Pass) => empirical += 0.2,
        Some(AuditStatus::Warning) => empirical -= 0.1,
        _ => {}
    }

    let hypotheses: Vec<f64> = nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Hypothesis)
        .map(|n| n.confidence.theoretical_basis)
        .collect();
    let theoretical = if hypotheses.is_empty() {
        0.5
    } else {
        hypotheses.iter().sum::<f64>() / hypotheses.len() as f64
    };

    let mut consensus: f64 = 0.5;
    match status_of(results, "high_confidence_impact_coverage") {
        Some(AuditStatus::Pass) => consensus += 0.1,
        Some(AuditStatus::Fail) => consensus -= 0.1,
        _ => {}
    }

    ConfidenceVector::new(
        clamp_unit(empirical),
        clamp_unit(theoretical),
        clamp_unit(methodological),
        clamp_unit(consensus),
    )
}

impl ReflectionStage {
    /// Create the stage over a store.
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            core: StageCore::new(store),
        }
    }

    async fn run(&self, session: &SessionData) -> StageResult<StageOutput> {
        let init = session
            .accumulated_context
            .require::<InitializationContext>(self.name())?;
        let scope = init.root_node_id.as_str();
        let composition = session.accumulated_context.optional::<CompositionContext>();

        let nodes = self.core.store().find_nodes(&NodeQuery::in_scope(scope)).await?;
        let edges = self.core.store().find_edges(&EdgeQuery::in_scope(scope)).await?;
        let by_id: BTreeMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let results = vec![
            coverage_check(&nodes),
            bias_check(&nodes),
            gaps_check(&nodes, composition),
            falsifiability_check(&nodes),
            rigor_check(&nodes),
            causal_check(&by_id, &edges),
            temporal_check(&edges),
        ];
        let confidence = final_confidence(&results, &nodes);

        let count = |status: AuditStatus| results.iter().filter(|r| r.status == status).count();
        let passed = count(AuditStatus::Pass);
        let warned = count(AuditStatus::Warning);
        let failed = count(AuditStatus::Fail);
        let not_applicable = count(AuditStatus::NotApplicable);

        let mut flagged = BTreeSet::new();
        for result in results.iter().filter(|r| matches!(r.status, AuditStatus::Warning | AuditStatus::Fail)) {
            warn!(
                session_id = %session.session_id,
                check = %result.check_name,
                status = %result.status,
                "{}",
                result.message
            );
            flagged.insert(format!("{} ({}): {}", result.check_name, result.status, result.message));
        }

        info!(
            session_id = %session.session_id,
            passed,
            warned,
            failed,
            final_confidence = confidence.average(),
            "Reflection finished"
        );

        let summary = format!(
            "Audit: {} passed, {} warnings, {} failed; final confidence {:.2}",
            passed,
            warned,
            failed,
            confidence.average()
        );
        let context = ReflectionContext {
            audit_results: results,
            final_confidence_vector: confidence,
        };

        let output = flagged.into_iter().fold(
            StageOutput::success(self.name(), summary, StageContext::Reflection(context)),
            |output, warning| output.with_warning(warning),
        );
        Ok(output
            .with_metric("audit_pass_count", passed)
            .with_metric("audit_warning_count", warned)
            .with_metric("audit_fail_count", failed)
            .with_metric("audit_not_applicable_count", not_applicable)
            .with_metric("final_confidence_avg", confidence.average()))
    }
}

#[async_trait]
impl Stage for ReflectionStage {
    fn name(&self) -> &str {
        REFLECTION_STAGE
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[INITIALIZATION_STAGE]
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
    use crate::graph::{BiasFlag, FalsificationCriteria};
    use crate::pipeline::{PipelineParams, StageStatus};
    use crate::stages::test_support::{memory_store, run_through, session};

    fn node(id: &str, node_type: NodeType) -> Node {
        Node::new(id, "r", node_type, id)
    }

    fn status(results: &[AuditCheckResult], name: &str) -> AuditStatus {
        status_of(results, name).unwrap()
    }

    #[test]
    fn test_temporal_cycle_detection() {
        let forward = vec![
            Edge::new("r", "a", "b", EdgeType::Temporal),
            Edge::new("r", "b", "c", EdgeType::Temporal),
            Edge::new("r", "a", "c", EdgeType::Temporal),
        ];
        assert_eq!(temporal_check(&forward).status, AuditStatus::Pass);

        let mut cyclic = forward.clone();
        cyclic.push(Edge::new("r", "c", "a", EdgeType::Temporal));
        assert_eq!(temporal_check(&cyclic).status, AuditStatus::Fail);

        // Causal edges do not count toward temporal order.
        let mixed = vec![
            Edge::new("r", "a", "b", EdgeType::Temporal),
            Edge::new("r", "b", "a", EdgeType::Causal),
        ];
        assert_eq!(temporal_check(&mixed).status, AuditStatus::Pass);
        assert_eq!(temporal_check(&[]).status, AuditStatus::NotApplicable);
    }

    #[test]
    fn test_causal_claims_need_powered_evidence() {
        let mut strong = node("ev-strong", NodeType::Evidence);
        strong.metadata.statistical_power = Some(0.8);
        let mut weak = node("ev-weak", NodeType::Evidence);
        weak.metadata.statistical_power = Some(0.4);
        let by_id: BTreeMap<&str, &Node> = [("ev-strong", &strong), ("ev-weak", &weak)].into_iter().collect();

        let ok = vec![Edge::new("r", "ev-strong", "hyp", EdgeType::Causal)];
        assert_eq!(causal_check(&by_id, &ok).status, AuditStatus::Pass);

        let mut bad = ok.clone();
        bad.push(Edge::new("r", "ev-weak", "hyp", EdgeType::Causal));
        assert_eq!(causal_check(&by_id, &bad).status, AuditStatus::Warning);
    }

    #[test]
    fn test_high_severity_bias_fails() {
        let mut flagged = node("dim", NodeType::Dimension);
        flagged.metadata.bias_flags.push(BiasFlag {
            bias_type: "framing_bias".to_string(),
            description: "x".to_string(),
            severity: BiasSeverity::High,
        });
        assert_eq!(bias_check(&[flagged.clone()]).status, AuditStatus::Fail);

        flagged.metadata.bias_flags[0].severity = BiasSeverity::Low;
        assert_eq!(bias_check(&[flagged]).status, AuditStatus::Warning);
        assert_eq!(bias_check(&[node("a", NodeType::Hypothesis)]).status, AuditStatus::Pass);
    }

    #[test]
    fn test_final_confidence_adjustments() {
        let mut hyp = node("hyp", NodeType::Hypothesis)
            .with_confidence(ConfidenceVector::new(0.5, 0.8, 0.5, 0.5));
        hyp.metadata.falsification_criteria = Some(FalsificationCriteria {
            description: "fails if".to_string(),
            testable_conditions: Vec::new(),
        });
        let results = vec![
            check("hypothesis_falsifiability", AuditStatus::Pass, ""),
            check("bias_flags_assessment", AuditStatus::Fail, ""),
            check("statistical_rigor_of_evidence", AuditStatus::Warning, ""),
            check("high_confidence_impact_coverage", AuditStatus::Pass, ""),
        ];
        let c = final_confidence(&results, &[hyp]);
        assert!((c.methodological_rigor - 0.55).abs() < 1e-9);
        assert!((c.empirical_support - 0.4).abs() < 1e-9);
        assert!((c.theoretical_basis - 0.8).abs() < 1e-9);
        assert!((c.consensus_alignment - 0.6).abs() < 1e-9);

        let neutral = final_confidence(&[], &[]);
        assert_eq!(neutral, ConfidenceVector::uniform(0.5));
    }

    #[test]
    fn test_rigor_thresholds() {
        let mut nodes = Vec::new();
        for (i, power) in [0.9, 0.3, 0.3, 0.3].into_iter().enumerate() {
            let mut n = node(&format!("ev-{}", i), NodeType::Evidence);
            n.metadata.statistical_power = Some(power);
            nodes.push(n);
        }
        assert_eq!(rigor_check(&nodes).status, AuditStatus::Warning);
        nodes[1].metadata.statistical_power = Some(0.75);
        assert_eq!(rigor_check(&nodes).status, AuditStatus::Pass);
        assert_eq!(rigor_check(&nodes[2..]).status, AuditStatus::Fail);
    }

    #[tokio::test]
    async fn test_full_run_audit() {
        let store = memory_store();
        let s = run_through(&store, PipelineParams::default(), 8).await;
        let out = s.output_for(REFLECTION_STAGE).unwrap();
        assert_eq!(out.status, StageStatus::Success);

        let ctx = s.accumulated_context.require::<ReflectionContext>("test").unwrap();
        assert_eq!(ctx.audit_results.len(), 7);
        assert_eq!(status(&ctx.audit_results, "knowledge_gaps_addressed"), AuditStatus::Pass);
        assert_eq!(status(&ctx.audit_results, "hypothesis_falsifiability"), AuditStatus::Pass);
        assert!(ctx.final_confidence_vector.is_bounded());
        assert_eq!(s.final_confidence_vector, Some(ctx.final_confidence_vector));

        let flagged = ctx
            .audit_results
            .iter()
            .filter(|r| matches!(r.status, AuditStatus::Warning | AuditStatus::Fail))
            .count();
        assert_eq!(out.warnings.len(), flagged);
    }

    #[tokio::test]
    async fn test_missing_initialization_fails() {
        let stage = ReflectionStage::new(memory_store());
        let out = stage.execute(&session(PipelineParams::default())).await;
        assert!(out.is_failure());
    }
}
