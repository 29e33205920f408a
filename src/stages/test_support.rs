//! Helpers shared by stage unit tests.

use std::sync::Arc;

use crate::evidence::SimulatedEvidenceSource;
use crate::pipeline::{PipelineParams, SessionData, StageOutput};
use crate::store::{GraphStore, InMemoryGraphStore};

use super::*;

pub(crate) const QUERY: &str = "Explain mRNA vaccine mechanism";

pub(crate) fn memory_store() -> Arc<dyn GraphStore> {
    Arc::new(InMemoryGraphStore::new())
}

pub(crate) fn session(params: PipelineParams) -> SessionData {
    SessionData::new(QUERY, params, serde_json::Map::new())
}

/// Execute `stage` and record its output the way the orchestrator does.
pub(crate) async fn step(stage: &dyn Stage, session: &mut SessionData) -> StageOutput {
    let output = stage.execute(session).await;
    session.record(output.clone());
    output
}

/// Run the first `count` default stages over a fresh session.
pub(crate) async fn run_through(
    store: &Arc<dyn GraphStore>,
    params: PipelineParams,
    count: usize,
) -> SessionData {
    let mut session = session(params);
    let stages = default_stages(store.clone(), Arc::new(SimulatedEvidenceSource::new()));
    for stage in stages.iter().take(count) {
        step(stage.as_ref(), &mut session).await;
    }
    session
}
