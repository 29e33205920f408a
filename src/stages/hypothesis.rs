//! Hypothesis generation per dimension.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{excerpt, Stage, StageCore, DECOMPOSITION_STAGE, HYPOTHESIS_STAGE};
use crate::error::StageResult;
use crate::graph::math::{stable_index, stable_range, stable_unit};
use crate::graph::{
    ids, BiasFlag, BiasSeverity, Edge, EdgeType, EpistemicStatus, FalsificationCriteria, Node,
    NodeType, Plan,
};
use crate::pipeline::{
    DecompositionContext, HypothesisContext, HypothesisSummary, PipelineParams, SessionData,
    StageContext, StageOutput,
};
use crate::store::GraphStore;

const GENERATES_EDGE_CONFIDENCE: f64 = 0.9;
const BIAS_PROBABILITY: f64 = 0.15;

/// Distinct framings; a dimension gets one hypothesis per framing.
const FRAMINGS: [&str; 5] = [
    "a single dominant mechanism accounts for the outcome",
    "several interacting factors jointly shape the result",
    "effects vary strongly across contexts and populations",
    "existing measurements overstate the true effect",
    "established theory already predicts the observed behaviour",
];

/// Creates a bounded number of hypotheses under every dimension.
pub struct HypothesisStage {
    core: StageCore,
}

impl HypothesisStage {
    /// Create the stage over a store.
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            core: StageCore::new(store),
        }
    }

    async fn run(&self, session: &SessionData) -> StageResult<StageOutput> {
        let decomposition = session
            .accumulated_context
            .require::<DecompositionContext>(self.name())?;
        let params = &session.parameters;

        let mut hypotheses = Vec::new();
        let mut created = 0usize;
        let mut reused = 0usize;
        let mut relationships = 0usize;
        let mut dimensions_used = 0usize;
        let mut dimensions_skipped = 0usize;

        for summary in &decomposition.dimensions {
            let Some(dimension) = self.core.store().get_node(&summary.id).await? else {
                warn!(dimension_id = %summary.id, "Dimension no longer in store, skipping");
                dimensions_skipped += 1;
                continue;
            };
            dimensions_used += 1;

            let count = hypothesis_count(&dimension.id, params);
            for index in 0..count {
                let id = ids::hypothesis_id(&dimension.id, index);
                let node = match self.core.store().get_node(&id).await? {
                    Some(existing) => {
                        reused += 1;
                        existing
                    }
                    None => {
                        let node = build_hypothesis(&id, index, &dimension, session);
                        self.core.store().upsert_node(&node).await?;
                        created += 1;
                        node
                    }
                };

                let edge = Edge::new(
                    &dimension.scope_id,
                    &dimension.id,
                    &node.id,
                    EdgeType::GeneratesHypothesis,
                )
                .with_confidence(GENERATES_EDGE_CONFIDENCE);
                if self.core.store().upsert_edge(&edge).await?.is_created() {
                    relationships += 1;
                }

                debug!(hypothesis_id = %node.id, label = %node.label, "Hypothesis ready");
                hypotheses.push(HypothesisSummary {
                    id: node.id,
                    dimension_id: dimension.id.clone(),
                    label: node.label,
                });
            }
        }

        let total = hypotheses.len();
        let avg_per_dimension = if dimensions_used == 0 {
            0.0
        } else {
            total as f64 / dimensions_used as f64
        };

        info!(
            session_id = %session.session_id,
            hypotheses = total,
            created,
            reused,
            "Hypotheses generated"
        );

        let summary = format!(
            "Generated {} hypotheses across {} dimensions ({} created, {} reused)",
            total, dimensions_used, created, reused
        );
        Ok(StageOutput::success(
            self.name(),
            summary,
            StageContext::Hypothesis(HypothesisContext { hypotheses }),
        )
        .with_metric("hypotheses_created", created)
        .with_metric("hypotheses_reused", reused)
        .with_metric("hypotheses_total", total)
        .with_metric("relationships_created", relationships)
        .with_metric("dimensions_skipped", dimensions_skipped)
        .with_metric("avg_hypotheses_per_dimension", avg_per_dimension))
    }
}

/// `min + floor(u * (max - min + 1))`, capped at `max`.
fn hypothesis_count(dimension_id: &str, params: &PipelineParams) -> usize {
    let span = params.hypotheses_max - params.hypotheses_min + 1;
    let extra = (stable_unit(&format!("{}:count", dimension_id)) * span as f64) as usize;
    (params.hypotheses_min + extra).min(params.hypotheses_max)
}

fn hypothesis_label(dimension_label: &str, index: usize) -> String {
    let framing = FRAMINGS[index % FRAMINGS.len()];
    match index / FRAMINGS.len() {
        0 => format!("{}: {}", dimension_label, framing),
        round => format!("{}: {} (alternative framing {})", dimension_label, framing, round + 1),
    }
}

fn plan_for(seed: &str, dimension_label: &str, params: &PipelineParams) -> Plan {
    let plan_type = params.plan_types[stable_index(&format!("{}:plan", seed), params.plan_types.len())].clone();
    let required_resources = match plan_type.as_str() {
        "literature_review" => vec!["database access", "domain expert"],
        "experiment" => vec!["laboratory", "reagents", "research staff"],
        "simulation" => vec!["compute cluster", "modelling software"],
        "data_analysis" => vec!["dataset access", "statistical software"],
        _ => vec!["research staff"],
    }
    .into_iter()
    .map(str::to_string)
    .collect();
    let weeks = 1 + stable_index(&format!("{}:duration", seed), 12);

    Plan {
        description: format!(
            "Run a {} targeting the {} dimension",
            plan_type.replace('_', " "),
            dimension_label.to_lowercase()
        ),
        plan_type,
        estimated_cost: stable_range(&format!("{}:cost", seed), 0.2, 0.8),
        estimated_duration: format!("{} weeks", weeks),
        required_resources,
    }
}

fn build_hypothesis(id: &str, index: usize, dimension: &Node, session: &SessionData) -> Node {
    let params = &session.parameters;
    let label = hypothesis_label(&dimension.label, index);

    let mut tags = dimension.metadata.disciplinary_tags.clone();
    if !params.default_disciplinary_tags.is_empty() {
        let pick = stable_index(&format!("{}:tag", id), params.default_disciplinary_tags.len());
        tags.insert(params.default_disciplinary_tags[pick].clone());
    }

    let mut node = Node::new(id, &dimension.scope_id, NodeType::Hypothesis, &label)
        .with_confidence(params.hypothesis_confidence_vector())
        .with_impact(stable_range(&format!("{}:impact", id), 0.2, 0.9))
        .with_description(format!(
            "Hypothesis {} on {} for query '{}'",
            index + 1,
            dimension.label,
            excerpt(&session.query, 30)
        ))
        .with_status(EpistemicStatus::Hypothesis)
        .with_layer("hypothesis_layer")
        .with_tags(tags);

    node.metadata.falsification_criteria = Some(FalsificationCriteria {
        description: format!(
            "Refuted if controlled evidence on {} contradicts: {}",
            dimension.label.to_lowercase(),
            FRAMINGS[index % FRAMINGS.len()]
        ),
        testable_conditions: vec![
            "No measurable effect appears when the proposed factor is manipulated".to_string(),
            "Independent replication fails to reproduce the predicted outcome".to_string(),
        ],
    });
    node.metadata.plan = Some(plan_for(id, &dimension.label, params));

    if stable_unit(&format!("{}:bias", id)) < BIAS_PROBABILITY {
        node.metadata.bias_flags.push(BiasFlag {
            bias_type: "confirmation_bias".to_string(),
            description: "Framing may favour evidence that agrees with the hypothesis".to_string(),
            severity: BiasSeverity::Low,
        });
    }
    node
}

#[async_trait]
impl Stage for HypothesisStage {
    fn name(&self) -> &str {
        HYPOTHESIS_STAGE
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[DECOMPOSITION_STAGE]
    }

    async fn execute(&self, session: &SessionData) -> StageOutput {
        self.run(session)
            .await
            .unwrap_or_else(|e| StageOutput::failure(self.name(), e))
    }
}
