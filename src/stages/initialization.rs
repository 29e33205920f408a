//! Root node creation or reuse.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Stage, StageCore, INITIALIZATION_STAGE};
use crate::error::{StageError, StageResult};
use crate::graph::{ids, EpistemicStatus, Node, NodeType};
use crate::pipeline::{InitializationContext, SessionData, StageContext, StageOutput};
use crate::store::{GraphStore, NodeQuery};

const ROOT_LABEL: &str = "Task Understanding";
const ROOT_IMPACT: f64 = 0.9;

/// Creates the root node for a query, or reuses the one a previous run made.
pub struct InitializationStage {
    core: StageCore,
}

impl InitializationStage {
    /// Create the stage over a store.
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            core: StageCore::new(store),
        }
    }

    async fn find_existing(&self, explicit_id: Option<&str>, query: &str) -> StageResult<Option<Node>> {
        if let Some(id) = explicit_id {
            return Ok(self.core.store().get_node(id).await?);
        }
        let matches = self
            .core
            .store()
            .find_nodes(
                &NodeQuery::default()
                    .of_type(NodeType::Root)
                    .with_query_context(query),
            )
            .await?;
        Ok(matches.into_iter().next())
    }

    async fn run(&self, session: &SessionData) -> StageResult<StageOutput> {
        let query = session.query.trim();
        if query.is_empty() {
            return Err(StageError::InvalidInput {
                message: "query must not be empty".to_string(),
            });
        }
        let params = &session.parameters;

        let mut tags: BTreeSet<String> = params.default_disciplinary_tags.iter().cloned().collect();
        tags.extend(supplied_tags(&session.initial_context));

        let existing = self
            .find_existing(params.root_node_id.as_deref(), query)
            .await?;

        let (root, used_existing, tags_updated) = match existing {
            Some(mut root) => {
                let before = root.metadata.disciplinary_tags.len();
                root.metadata.disciplinary_tags.extend(tags.iter().cloned());
                let tags_updated = root.metadata.disciplinary_tags.len() != before;
                if tags_updated {
                    root.updated_at = chrono::Utc::now();
                    self.core.store().upsert_node(&root).await?;
                    debug!(root_id = %root.id, "Merged new tags into existing root");
                }
                (root, true, tags_updated)
            }
            None => {
                let id = params
                    .root_node_id
                    .clone()
                    .unwrap_or_else(|| ids::root_id(query));
                let mut root = Node::new(id.clone(), id, NodeType::Root, ROOT_LABEL)
                    .with_confidence(params.initial_confidence_vector())
                    .with_impact(ROOT_IMPACT)
                    .with_description(format!("Root node for query: {}", query))
                    .with_status(EpistemicStatus::Assumption)
                    .with_layer(params.initial_layer.clone())
                    .with_tags(tags.iter().cloned());
                root.metadata.query_context = Some(query.to_string());
                self.core.store().upsert_node(&root).await?;
                (root, false, false)
            }
        };

        info!(
            session_id = %session.session_id,
            root_id = %root.id,
            used_existing_node = used_existing,
            "Root node ready"
        );

        let summary = if used_existing {
            format!("Reused existing root node {}", root.id)
        } else {
            format!("Created root node {}", root.id)
        };
        let confidence_avg = root.confidence.average();
        let context = InitializationContext {
            root_node_id: root.id.clone(),
            initial_disciplinary_tags: root.metadata.disciplinary_tags.clone(),
            used_existing_node: used_existing,
        };

        Ok(StageOutput::success(self.name(), summary, StageContext::Initialization(context))
            .with_metric("nodes_created", usize::from(!used_existing))
            .with_metric("used_existing_node", used_existing)
            .with_metric("updated_existing_node_tags", tags_updated)
            .with_metric("initial_confidence_avg", confidence_avg))
    }
}

/// `initial_context.disciplinary_tags`, as a list or a comma-separated string.
fn supplied_tags(initial_context: &serde_json::Map<String, serde_json::Value>) -> Vec<String> {
    let tags: Vec<String> = match initial_context.get("disciplinary_tags") {
        Some(serde_json::Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        Some(serde_json::Value::String(joined)) => joined.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[async_trait]
impl Stage for InitializationStage {
    fn name(&self) -> &str {
        INITIALIZATION_STAGE
    }

    async fn execute(&self, session: &SessionData) -> StageOutput {
        self.run(session)
            .await
            .unwrap_or_else(|e| StageOutput::failure(self.name(), e))
    }
}
