//! Iterative evidence integration.
//!
//! Each iteration picks the most promising unevaluated hypothesis, asks the
//! evidence source about it, writes evidence nodes with typed edges and moves
//! the hypothesis' confidence toward what the evidence implies. Interdisciplinary
//! bridge nodes and joint-evidence hyperedges are added along the way.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{excerpt, Stage, StageCore, EVIDENCE_STAGE, HYPOTHESIS_STAGE};
use crate::error::{StageError, StageResult};
use crate::evidence::{EvidenceItem, EvidenceRequest, EvidenceSource};
use crate::graph::math::{
    bayesian_update, clamp_unit, confidence_spread, evidence_weight, information_gain,
    label_similarity, max_component_delta,
};
use crate::graph::{
    ids, ConfidenceVector, Edge, EdgeType, EpistemicStatus, Hyperedge, InterdisciplinaryInfo,
    Node, NodeType, RevisionRecord,
};
use crate::pipeline::{
    EvidenceContext, HypothesisContext, SessionData, StageContext, StageOutput, TerminationReason,
};
use crate::store::GraphStore;

/// Cost weight in the selection priority.
const COST_WEIGHT: f64 = 0.25;
/// Cost assumed for hypotheses without a plan.
const DEFAULT_COST: f64 = 0.5;
/// Reason prefix of revisions made by applying evidence.
const EVIDENCE_REVISION: &str = "evidence ";

/// Gathers evidence for hypotheses and updates their confidence.
pub struct EvidenceStage {
    core: StageCore,
    source: Arc<dyn EvidenceSource>,
}

/// Selection priority: high impact, far-from-neutral confidence, cheap plan.
///
/// Scored on the confidence the hypothesis had before any evidence, so a
/// rerun over an updated graph selects in the same order as the first run.
pub(crate) fn priority(node: &Node) -> f64 {
    let cost = node
        .metadata
        .plan
        .as_ref()
        .map_or(DEFAULT_COST, |p| p.estimated_cost);
    node.impact() + confidence_spread(&baseline_confidence(node)) - COST_WEIGHT * cost
}

fn revision_reason(evidence_id: &str) -> String {
    format!("{}{}", EVIDENCE_REVISION, evidence_id)
}

fn parse_confidence(value: &serde_json::Value) -> Option<ConfidenceVector> {
    serde_json::from_value(value.clone()).ok()
}

/// Confidence before the first evidence revision.
pub(crate) fn baseline_confidence(node: &Node) -> ConfidenceVector {
    node.metadata
        .revision_history
        .iter()
        .find(|r| r.reason.starts_with(EVIDENCE_REVISION))
        .and_then(|r| parse_confidence(&r.previous_value))
        .unwrap_or(node.confidence)
}

/// Largest component change an earlier revision recorded.
fn recorded_delta(revision: &RevisionRecord) -> Option<f64> {
    let prior = parse_confidence(&revision.previous_value)?;
    let posterior = parse_confidence(&revision.new_value)?;
    Some(max_component_delta(&prior, &posterior))
}

/// Index of the unevaluated candidate with the highest priority, ties broken
/// by the smaller id.
fn select_next(candidates: &[Node], evaluated: &BTreeSet<String>) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, n)| !evaluated.contains(&n.id))
        .max_by(|(_, a), (_, b)| {
            priority(a)
                .total_cmp(&priority(b))
                .then_with(|| b.id.cmp(&a.id))
        })
        .map(|(index, _)| index)
}

/// Confidence the item implies for the hypothesis.
fn implied_vector(item: &EvidenceItem) -> [f64; 4] {
    match item.implied_confidence.as_deref() {
        Some([a, b, c, d]) => [clamp_unit(*a), clamp_unit(*b), clamp_unit(*c), clamp_unit(*d)],
        _ if item.supports => [1.0; 4],
        _ => [0.0; 4],
    }
}

/// Running totals of one stage execution.
#[derive(Default)]
struct Tally {
    evaluated: Vec<String>,
    evidence_ids: Vec<String>,
    ibn_ids: Vec<String>,
    hyperedge_ids: Vec<String>,
    evidence_created: usize,
    evidence_reused: usize,
    updates_replayed: usize,
    hypotheses_updated: BTreeSet<String>,
    ibns_created: usize,
    hyperedges_created: usize,
    source_failures: Vec<String>,
}

impl EvidenceStage {
    /// Create the stage over a store and an evidence source.
    pub fn new(store: Arc<dyn GraphStore>, source: Arc<dyn EvidenceSource>) -> Self {
        Self {
            core: StageCore::new(store),
            source,
        }
    }

    async fn gather(&self, request: &EvidenceRequest, timeout_ms: u64) -> StageResult<Vec<EvidenceItem>> {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), self.source.gather(request)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout {
                operation: format!("evidence source {}", self.source.name()),
                timeout_ms,
            }),
        }
    }

    async fn run(&self, session: &SessionData) -> StageResult<StageOutput> {
        let hypothesis_ctx = session
            .accumulated_context
            .require::<HypothesisContext>(self.name())?;
        let params = &session.parameters;

        let mut candidates = Vec::with_capacity(hypothesis_ctx.hypotheses.len());
        for summary in &hypothesis_ctx.hypotheses {
            match self.core.store().get_node(&summary.id).await? {
                Some(node) => candidates.push(node),
                None => debug!(hypothesis_id = %summary.id, "Hypothesis no longer in store"),
            }
        }

        let mut tally = Tally::default();
        let mut evaluated = BTreeSet::new();
        let mut budget = params.evidence_budget;
        let mut termination = TerminationReason::MaxIterations;
        let mut iterations = 0usize;

        for iteration in 0..params.evidence_max_iterations {
            if budget == 0 {
                termination = TerminationReason::BudgetExhausted;
                break;
            }
            let Some(position) = select_next(&candidates, &evaluated) else {
                termination = TerminationReason::NoCandidates;
                break;
            };
            evaluated.insert(candidates[position].id.clone());
            tally.evaluated.push(candidates[position].id.clone());
            iterations += 1;

            let request = EvidenceRequest {
                query: session.query.clone(),
                hypothesis_id: candidates[position].id.clone(),
                hypothesis_label: candidates[position].label.clone(),
                disciplinary_tags: candidates[position].metadata.disciplinary_tags.clone(),
                iteration,
                max_items: budget,
            };

            let items = match self.gather(&request, params.evidence_timeout_ms).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(
                        session_id = %session.session_id,
                        hypothesis_id = %request.hypothesis_id,
                        source = self.source.name(),
                        error = %e,
                        "Evidence source call failed"
                    );
                    tally.source_failures.push(e.to_string());
                    continue;
                }
            };

            let hypothesis = &mut candidates[position];
            let mut iteration_evidence = Vec::new();
            let mut max_delta: Option<f64> = None;

            for (index, item) in items.iter().take(budget).enumerate() {
                budget -= 1;
                let evidence = evidence_node(hypothesis, item, index);
                let created = self.core.store().upsert_node(&evidence).await?.is_created();

                let edge = Edge::new(
                    &hypothesis.scope_id,
                    &evidence.id,
                    &hypothesis.id,
                    item.relation.clone(),
                )
                .with_confidence(item.strength)
                .with_property("supports", serde_json::Value::Bool(item.supports))
                .with_property("source", serde_json::Value::String(self.source.name().to_string()));
                self.core.store().upsert_edge(&edge).await?;

                if created {
                    tally.evidence_created += 1;
                } else {
                    tally.evidence_reused += 1;
                }

                // An update is applied once per hypothesis and evidence id;
                // later runs replay the recorded change instead.
                let reason = revision_reason(&evidence.id);
                let (delta, confidence_after) = match hypothesis
                    .metadata
                    .revision_history
                    .iter()
                    .find(|r| r.reason == reason)
                {
                    Some(earlier) => {
                        tally.updates_replayed += 1;
                        (
                            recorded_delta(earlier),
                            parse_confidence(&earlier.new_value).unwrap_or(hypothesis.confidence),
                        )
                    }
                    None => {
                        let prior = hypothesis.confidence;
                        let weight = evidence_weight(item.strength, item.statistical_power, &item.relation);
                        let posterior = bayesian_update(&prior, &implied_vector(item), weight);
                        hypothesis.revise_confidence(posterior, reason);
                        hypothesis.metadata.information_gain = Some(information_gain(&prior, &posterior));
                        self.core.store().upsert_node(hypothesis).await?;
                        tally.hypotheses_updated.insert(hypothesis.id.clone());
                        (Some(max_component_delta(&prior, &posterior)), posterior)
                    }
                };
                if let Some(delta) = delta {
                    max_delta = Some(max_delta.map_or(delta, |d: f64| d.max(delta)));
                }

                if let Some(ibn_id) = self
                    .bridge(
                        hypothesis,
                        confidence_after,
                        &evidence,
                        session.parameters.ibn_similarity_threshold,
                        &mut tally,
                    )
                    .await?
                {
                    tally.ibn_ids.push(ibn_id);
                }

                debug!(
                    evidence_id = %evidence.id,
                    hypothesis_id = %hypothesis.id,
                    created,
                    supports = item.supports,
                    "Evidence integrated"
                );
                iteration_evidence.push(evidence.id.clone());
                tally.evidence_ids.push(evidence.id);
            }

            if iteration_evidence.len() >= params.min_nodes_for_hyperedge {
                let members = std::iter::once(hypothesis.id.clone()).chain(iteration_evidence.iter().cloned());
                let hyperedge = Hyperedge::new(
                    ids::hyperedge_id(&hypothesis.id),
                    &hypothesis.scope_id,
                    members,
                    "joint_evidence",
                )
                .with_confidence(hypothesis.confidence);
                if self.core.store().upsert_hyperedge(&hyperedge).await?.is_created() {
                    tally.hyperedges_created += 1;
                }
                tally.hyperedge_ids.push(hyperedge.id);
            }

            if max_delta.is_some_and(|d| d < params.confidence_stability_epsilon) {
                termination = TerminationReason::ConfidenceStable;
                break;
            }
        }

        info!(
            session_id = %session.session_id,
            iterations,
            evidence_created = tally.evidence_created,
            hypotheses_updated = tally.hypotheses_updated.len(),
            termination = ?termination,
            "Evidence integration finished"
        );

        let summary = format!(
            "Integrated {} evidence items for {} hypotheses over {} iterations",
            tally.evidence_ids.len(),
            tally.evaluated.len(),
            iterations
        );
        let context = EvidenceContext {
            evaluated_hypotheses: tally.evaluated,
            no_evidence_found: tally.evidence_ids.is_empty(),
            evidence_node_ids: tally.evidence_ids,
            ibn_node_ids: tally.ibn_ids,
            hyperedge_ids: tally.hyperedge_ids,
            iterations_completed: iterations,
            termination,
        };
        let failures = tally.source_failures.len();
        let payload = StageContext::Evidence(context);

        let output = if failures == 0 {
            StageOutput::success(self.name(), summary, payload)
        } else {
            StageOutput::partial_success(
                self.name(),
                summary,
                format!(
                    "{} evidence source call(s) failed; last: {}",
                    failures,
                    tally.source_failures.last().map(String::as_str).unwrap_or_default()
                ),
                payload,
            )
        };

        Ok(output
            .with_metric("iterations_completed", iterations)
            .with_metric("evidence_nodes_created", tally.evidence_created)
            .with_metric("evidence_nodes_reused", tally.evidence_reused)
            .with_metric("evidence_updates_replayed", tally.updates_replayed)
            .with_metric("hypotheses_updated", tally.hypotheses_updated.len())
            .with_metric("ibns_created", tally.ibns_created)
            .with_metric("hyperedges_created", tally.hyperedges_created)
            .with_metric("source_failures", failures))
    }

    /// Create a bridge node when evidence from disjoint disciplines is still
    /// close in wording to the hypothesis. `hypothesis_confidence` is the
    /// hypothesis' confidence right after this evidence was applied.
    async fn bridge(
        &self,
        hypothesis: &Node,
        hypothesis_confidence: ConfidenceVector,
        evidence: &Node,
        threshold: f64,
        tally: &mut Tally,
    ) -> StageResult<Option<String>> {
        let ev_tags = &evidence.metadata.disciplinary_tags;
        let hyp_tags = &hypothesis.metadata.disciplinary_tags;
        if ev_tags.is_empty() || hyp_tags.is_empty() || !ev_tags.is_disjoint(hyp_tags) {
            return Ok(None);
        }
        let similarity = label_similarity(&evidence.label, &hypothesis.label);
        if similarity < threshold {
            return Ok(None);
        }

        let id = ids::ibn_id(&evidence.id, &hypothesis.id);
        let label = format!(
            "Bridge between {} and {}",
            ev_tags.iter().cloned().collect::<Vec<_>>().join(", "),
            hyp_tags.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        let (e, h) = (evidence.confidence.to_array(), hypothesis_confidence.to_array());
        let mut node = Node::new(&id, &hypothesis.scope_id, NodeType::Ibn, label)
            .with_confidence(ConfidenceVector::new(
                (e[0] + h[0]) / 2.0,
                (e[1] + h[1]) / 2.0,
                (e[2] + h[2]) / 2.0,
                (e[3] + h[3]) / 2.0,
            ))
            .with_impact((evidence.impact() + hypothesis.impact()) / 2.0)
            .with_description(format!(
                "Links evidence {} to hypothesis {} across disciplines",
                evidence.id, hypothesis.id
            ))
            .with_status(EpistemicStatus::Inferred)
            .with_layer("ibn_layer")
            .with_tags(ev_tags.union(hyp_tags).cloned());
        node.metadata.interdisciplinary_info = Some(InterdisciplinaryInfo {
            source_disciplines: ev_tags.clone(),
            target_disciplines: hyp_tags.clone(),
            similarity,
        });

        if self.core.store().upsert_node(&node).await?.is_created() {
            tally.ibns_created += 1;
        }
        let source_edge = Edge::new(&hypothesis.scope_id, &evidence.id, &id, EdgeType::IbnSource)
            .with_confidence(similarity);
        let target_edge = Edge::new(&hypothesis.scope_id, &id, &hypothesis.id, EdgeType::IbnTarget)
            .with_confidence(similarity);
        self.core.store().upsert_edge(&source_edge).await?;
        self.core.store().upsert_edge(&target_edge).await?;

        debug!(ibn_id = %id, similarity, "Bridge node ready");
        Ok(Some(id))
    }
}

fn evidence_node(hypothesis: &Node, item: &EvidenceItem, index: usize) -> Node {
    let strength = clamp_unit(item.strength);
    let power = clamp_unit(item.statistical_power);
    let status = if item.supports {
        EpistemicStatus::EvidenceSupported
    } else {
        EpistemicStatus::EvidenceContradicted
    };
    let tags = if item.disciplinary_tags.is_empty() {
        hypothesis.metadata.disciplinary_tags.clone()
    } else {
        item.disciplinary_tags.clone()
    };

    let mut node = Node::new(
        ids::evidence_id(&hypothesis.id, index),
        &hypothesis.scope_id,
        NodeType::Evidence,
        excerpt(&item.content, 160),
    )
    .with_confidence(ConfidenceVector::new(strength, 0.5, 0.8 * strength, 0.5))
    .with_impact(strength * power)
    .with_description(item.content.clone())
    .with_status(status)
    .with_layer("evidence_layer")
    .with_tags(tags);
    node.metadata.statistical_power = Some(power);
    node
}

#[async_trait]
impl Stage for EvidenceStage {
    fn name(&self) -> &str {
        EVIDENCE_STAGE
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[HYPOTHESIS_STAGE]
    }

    async fn execute(&self, session: &SessionData) -> StageOutput {
        self.run(session)
            .await
            .unwrap_or_else(|e| StageOutput::failure(self.name(), e))
    }
}

#[cfg(test)]
#[path = "evidence_tests.rs"]
mod evidence_tests;
