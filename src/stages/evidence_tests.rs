use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::error::StageResult;
use crate::evidence::{EvidenceItem, EvidenceRequest, EvidenceSource};
use crate::graph::{ConfidenceVector, EdgeType, Node, NodeType};
use crate::pipeline::{
    DimensionSpec, EvidenceContext, HypothesisContext, PipelineParams, SessionData, StageStatus,
    TerminationReason,
};
use crate::stages::test_support::{memory_store, run_through, session, step};
use crate::stages::{DecompositionStage, HypothesisStage, InitializationStage, Stage};
use crate::store::{EdgeQuery, GraphStore, NodeQuery};

/// Returns the same items for every request.
struct ScriptedSource {
    items: Vec<EvidenceItem>,
}

#[async_trait]
impl EvidenceSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn gather(&self, request: &EvidenceRequest) -> StageResult<Vec<EvidenceItem>> {
        Ok(self.items.iter().take(request.max_items).cloned().collect())
    }
}

struct FailingSource;

#[async_trait]
impl EvidenceSource for FailingSource {
    fn name(&self) -> &str {
        "failing"
    }

    async fn gather(&self, _request: &EvidenceRequest) -> StageResult<Vec<EvidenceItem>> {
        Err(StageError::Evidence {
            message: "backend offline".to_string(),
        })
    }
}

struct SlowSource;

#[async_trait]
impl EvidenceSource for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }

    async fn gather(&self, _request: &EvidenceRequest) -> StageResult<Vec<EvidenceItem>> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(Vec::new())
    }
}

fn finding(content: &str, supports: bool, tags: &[&str]) -> EvidenceItem {
    EvidenceItem {
        content: content.to_string(),
        supports,
        strength: 0.8,
        statistical_power: 0.9,
        relation: EdgeType::Causal,
        disciplinary_tags: tags.iter().map(|t| t.to_string()).collect(),
        implied_confidence: None,
    }
}

/// One dimension with a single hypothesis.
fn single_hypothesis_params() -> PipelineParams {
    PipelineParams {
        decomposition_dimensions: Some(vec![DimensionSpec::new("Mechanism", "", &["mechanism"])]),
        hypotheses_min: 1,
        hypotheses_max: 1,
        ..PipelineParams::default()
    }
}

/// Session with the first three stages already run.
async fn prepared(store: &Arc<dyn GraphStore>, params: PipelineParams) -> SessionData {
    let mut s = session(params);
    step(&InitializationStage::new(store.clone()), &mut s).await;
    step(&DecompositionStage::new(store.clone()), &mut s).await;
    step(&HypothesisStage::new(store.clone()), &mut s).await;
    s
}

fn only_hypothesis(s: &SessionData) -> String {
    let ctx = s
        .accumulated_context
        .require::<HypothesisContext>("test")
        .unwrap();
    assert_eq!(ctx.hypotheses.len(), 1);
    ctx.hypotheses[0].id.clone()
}

#[tokio::test]
async fn test_default_run_integrates_evidence() {
    let store = memory_store();
    let s = run_through(&store, PipelineParams::default(), 4).await;

    let out = s.output_for(EVIDENCE_STAGE).unwrap();
    assert_eq!(out.status, StageStatus::Success);
    let ctx = s
        .accumulated_context
        .require::<EvidenceContext>("test")
        .unwrap();
    assert!(!ctx.no_evidence_found);
    assert!(ctx.iterations_completed >= 1 && ctx.iterations_completed <= 5);
    assert_eq!(ctx.evaluated_hypotheses.len(), ctx.iterations_completed);
    assert!(ctx.evidence_node_ids.len() <= 20);

    for id in &ctx.evidence_node_ids {
        let node = store.get_node(id).await.unwrap().unwrap();
        assert_eq!(node.node_type, NodeType::Evidence);
        assert!(node.confidence.is_bounded());
        assert!(node.metadata.statistical_power.is_some());
        let edges = store
            .find_edges(&EdgeQuery::touching(id).from_source(id))
            .await
            .unwrap();
        assert!(edges.iter().any(|e| e.edge_type.is_evidential()));
    }

    let updated = out.metric("hypotheses_updated").and_then(|m| m.as_i64()).unwrap();
    assert!(updated >= 1);
    let hypothesis = store
        .get_node(&ctx.evaluated_hypotheses[0])
        .await
        .unwrap()
        .unwrap();
    assert!(hypothesis
        .metadata
        .revision_history
        .iter()
        .any(|r| r.reason.starts_with("evidence ")));
    assert!(hypothesis.metadata.information_gain.is_some());
}

#[tokio::test]
async fn test_budget_caps_evidence_nodes() {
    let store = memory_store();
    let params = PipelineParams {
        evidence_budget: 1,
        ..PipelineParams::default()
    };
    let s = run_through(&store, params, 4).await;
    let ctx = s
        .accumulated_context
        .require::<EvidenceContext>("test")
        .unwrap();
    assert_eq!(ctx.evidence_node_ids.len(), 1);
    assert_eq!(ctx.termination, TerminationReason::BudgetExhausted);
    assert_eq!(
        store
            .count_nodes(&NodeQuery::default().of_type(NodeType::Evidence))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_stops_when_no_candidates_remain() {
    let store = memory_store();
    let params = PipelineParams {
        hypotheses_min: 2,
        hypotheses_max: 2,
        ..single_hypothesis_params()
    };
    let mut s = prepared(&store, params).await;
    let source = Arc::new(ScriptedSource {
        items: vec![finding("Assay result", true, &["biology"])],
    });
    let out = step(&EvidenceStage::new(store.clone(), source), &mut s).await;

    assert_eq!(out.status, StageStatus::Success);
    let ctx = s
        .accumulated_context
        .require::<EvidenceContext>("test")
        .unwrap();
    assert_eq!(ctx.iterations_completed, 2);
    assert_eq!(ctx.termination, TerminationReason::NoCandidates);
}

#[tokio::test]
async fn test_supporting_evidence_raises_confidence() {
    let store = memory_store();
    let mut s = prepared(&store, single_hypothesis_params()).await;
    let hyp_id = only_hypothesis(&s);
    let before = store.get_node(&hyp_id).await.unwrap().unwrap().confidence;

    let source = Arc::new(ScriptedSource {
        items: vec![finding("Trial shows the effect", true, &["biology"])],
    });
    step(&EvidenceStage::new(store.clone(), source), &mut s).await;

    let after = store.get_node(&hyp_id).await.unwrap().unwrap().confidence;
    assert!(after.average() > before.average());
    assert!(after.is_bounded());
}

#[tokio::test]
async fn test_implied_confidence_drives_components() {
    let store = memory_store();
    let mut s = prepared(&store, single_hypothesis_params()).await;
    let hyp_id = only_hypothesis(&s);

    let mut item = finding("Mixed result", true, &["biology"]);
    item.implied_confidence = Some(vec![1.0, 0.0, 1.0, 0.0]);
    let source = Arc::new(ScriptedSource { items: vec![item] });
    step(&EvidenceStage::new(store.clone(), source), &mut s).await;

    let after = store.get_node(&hyp_id).await.unwrap().unwrap().confidence;
    assert!(after.empirical_support > 0.5);
    assert!(after.theoretical_basis < 0.5);
    assert!(after.methodological_rigor > 0.5);
    assert!(after.consensus_alignment < 0.5);
}

#[tokio::test]
async fn test_reingested_evidence_is_not_applied_twice() {
    let store = memory_store();
    let source: Arc<dyn EvidenceSource> = Arc::new(ScriptedSource {
        items: vec![finding("Cohort data agrees", false, &["biology"])],
    });

    let mut first = prepared(&store, single_hypothesis_params()).await;
    let hyp_id = only_hypothesis(&first);
    step(&EvidenceStage::new(store.clone(), source.clone()), &mut first).await;
    let after_first = store.get_node(&hyp_id).await.unwrap().unwrap();

    let mut second = prepared(&store, single_hypothesis_params()).await;
    let out = step(&EvidenceStage::new(store.clone(), source), &mut second).await;
    let after_second = store.get_node(&hyp_id).await.unwrap().unwrap();

    assert_eq!(out.metric("evidence_nodes_created").and_then(|m| m.as_i64()), Some(0));
    assert_eq!(out.metric("evidence_nodes_reused").and_then(|m| m.as_i64()), Some(1));
    assert_eq!(after_first.confidence, after_second.confidence);
    assert_eq!(
        after_first.metadata.revision_history.len(),
        after_second.metadata.revision_history.len()
    );
}

#[tokio::test]
async fn test_bridge_node_for_disjoint_disciplines() {
    let store = memory_store();
    let mut s = prepared(&store, single_hypothesis_params()).await;
    let hyp_id = only_hypothesis(&s);
    let label = store.get_node(&hyp_id).await.unwrap().unwrap().label;

    let source = Arc::new(ScriptedSource {
        items: vec![finding(&format!("{} in animal models", label), true, &["immunology"])],
    });
    let out = step(&EvidenceStage::new(store.clone(), source), &mut s).await;
    assert_eq!(out.metric("ibns_created").and_then(|m| m.as_i64()), Some(1));

    let ctx = s
        .accumulated_context
        .require::<EvidenceContext>("test")
        .unwrap();
    let ibn_id = &ctx.ibn_node_ids[0];
    let ibn = store.get_node(ibn_id).await.unwrap().unwrap();
    assert_eq!(ibn.node_type, NodeType::Ibn);
    let info = ibn.metadata.interdisciplinary_info.unwrap();
    assert!(info.source_disciplines.contains("immunology"));
    assert!(info.target_disciplines.contains("biology"));
    assert!(info.similarity >= 0.5);

    let edges = store.find_edges(&EdgeQuery::touching(ibn_id)).await.unwrap();
    let kinds: BTreeSet<EdgeType> = edges.into_iter().map(|e| e.edge_type).collect();
    assert!(kinds.contains(&EdgeType::IbnSource));
    assert!(kinds.contains(&EdgeType::IbnTarget));
}

#[tokio::test]
async fn test_no_bridge_when_disciplines_overlap() {
    let store = memory_store();
    let mut s = prepared(&store, single_hypothesis_params()).await;
    let hyp_id = only_hypothesis(&s);
    let label = store.get_node(&hyp_id).await.unwrap().unwrap().label;

    let source = Arc::new(ScriptedSource {
        items: vec![finding(&label, true, &["biology", "immunology"])],
    });
    let out = step(&EvidenceStage::new(store.clone(), source), &mut s).await;
    assert_eq!(out.metric("ibns_created").and_then(|m| m.as_i64()), Some(0));
}

#[tokio::test]
async fn test_hyperedge_over_joint_evidence() {
    let store = memory_store();
    let mut s = prepared(&store, single_hypothesis_params()).await;
    let hyp_id = only_hypothesis(&s);

    let source = Arc::new(ScriptedSource {
        items: vec![
            finding("Trial one agrees", true, &["biology"]),
            finding("Assay two agrees", true, &["biology"]),
        ],
    });
    let out = step(&EvidenceStage::new(store.clone(), source), &mut s).await;
    assert_eq!(out.metric("hyperedges_created").and_then(|m| m.as_i64()), Some(1));

    let scope = store.get_node(&hyp_id).await.unwrap().unwrap().scope_id;
    let hyperedges = store.find_hyperedges(&scope).await.unwrap();
    assert_eq!(hyperedges.len(), 1);
    assert_eq!(hyperedges[0].node_ids.len(), 3);
    assert!(hyperedges[0].node_ids.contains(&hyp_id));
}

#[tokio::test]
async fn test_failing_source_yields_partial_success() {
    let store = memory_store();
    let mut s = prepared(&store, single_hypothesis_params()).await;
    let out = step(&EvidenceStage::new(store.clone(), Arc::new(FailingSource)), &mut s).await;

    assert_eq!(out.status, StageStatus::PartialSuccess);
    assert!(out
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("backend offline")));
    assert_eq!(out.metric("source_failures").and_then(|m| m.as_i64()), Some(1));
    let ctx = s
        .accumulated_context
        .require::<EvidenceContext>("test")
        .unwrap();
    assert!(ctx.no_evidence_found);
}

#[tokio::test]
async fn test_source_timeout_is_contained() {
    let store = memory_store();
    let params = PipelineParams {
        evidence_timeout_ms: 20,
        ..single_hypothesis_params()
    };
    let mut s = prepared(&store, params).await;
    let out = step(&EvidenceStage::new(store.clone(), Arc::new(SlowSource)), &mut s).await;

    assert_eq!(out.status, StageStatus::PartialSuccess);
    assert!(out
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("timed out")));
}

#[tokio::test]
async fn test_missing_hypothesis_context_fails() {
    let stage = EvidenceStage::new(memory_store(), Arc::new(FailingSource));
    let out = stage.execute(&session(PipelineParams::default())).await;
    assert!(out.is_failure());
    assert!(out
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains(HYPOTHESIS_STAGE)));
}

#[test]
fn test_selection_prefers_priority_then_smaller_id() {
    let a = Node::new("b-hyp", "root", NodeType::Hypothesis, "a").with_impact(0.5);
    let b = Node::new("a-hyp", "root", NodeType::Hypothesis, "b").with_impact(0.5);
    let c = Node::new("c-hyp", "root", NodeType::Hypothesis, "c")
        .with_impact(0.9)
        .with_confidence(ConfidenceVector::uniform(0.5));
    let candidates = vec![a, b, c];

    let mut evaluated = BTreeSet::new();
    assert_eq!(select_next(&candidates, &evaluated), Some(2));
    evaluated.insert("c-hyp".to_string());
    assert_eq!(select_next(&candidates, &evaluated), Some(1));
    evaluated.insert("a-hyp".to_string());
    evaluated.insert("b-hyp".to_string());
    assert_eq!(select_next(&candidates, &evaluated), None);
}

#[test]
fn test_priority_ignores_evidence_revisions() {
    let fresh = Node::new("hyp", "root", NodeType::Hypothesis, "h")
        .with_impact(0.6)
        .with_confidence(ConfidenceVector::uniform(0.5));
    let mut updated = fresh.clone();
    updated.revise_confidence(ConfidenceVector::uniform(0.95), "evidence hyp/ev-0");
    updated.revise_confidence(ConfidenceVector::uniform(0.99), "evidence hyp/ev-1");

    assert_eq!(baseline_confidence(&updated), ConfidenceVector::uniform(0.5));
    assert!((priority(&updated) - priority(&fresh)).abs() < 1e-12);
}

#[tokio::test]
async fn test_rerun_over_many_hypotheses_replays_updates() {
    let store = memory_store();
    let first = run_through(&store, PipelineParams::default(), 4).await;
    let first_ctx = first
        .accumulated_context
        .require::<EvidenceContext>("test")
        .unwrap();
    assert!(first_ctx.evaluated_hypotheses.len() > 1);

    let hypotheses = first
        .accumulated_context
        .require::<HypothesisContext>("test")
        .unwrap();
    let mut before = Vec::new();
    for summary in &hypotheses.hypotheses {
        before.push(store.get_node(&summary.id).await.unwrap().unwrap());
    }

    let second = run_through(&store, PipelineParams::default(), 4).await;
    let out = second.output_for(EVIDENCE_STAGE).unwrap();
    let second_ctx = second
        .accumulated_context
        .require::<EvidenceContext>("test")
        .unwrap();

    assert_eq!(second_ctx.evaluated_hypotheses, first_ctx.evaluated_hypotheses);
    assert_eq!(second_ctx.evidence_node_ids, first_ctx.evidence_node_ids);
    assert_eq!(second_ctx.termination, first_ctx.termination);
    assert_eq!(out.metric("evidence_nodes_created").and_then(|m| m.as_i64()), Some(0));
    assert_eq!(out.metric("hypotheses_updated").and_then(|m| m.as_i64()), Some(0));
    assert_eq!(
        out.metric("evidence_updates_replayed").and_then(|m| m.as_i64()),
        Some(first_ctx.evidence_node_ids.len() as i64)
    );

    for node in &before {
        let after = store.get_node(&node.id).await.unwrap().unwrap();
        assert_eq!(after.confidence, node.confidence, "{} drifted", node.id);
        assert_eq!(
            after.metadata.revision_history.len(),
            node.metadata.revision_history.len()
        );
    }
}
