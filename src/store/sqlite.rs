//! SQLite-backed graph store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

use super::{EdgeQuery, GraphOperation, GraphStore, NodeQuery, UpsertOutcome};
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::graph::{ConfidenceVector, Edge, EdgeType, Hyperedge, Node, NodeType};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const NODE_COLUMNS: &str = "id, scope_id, node_type, label, empirical_support, theoretical_basis, \
     methodological_rigor, consensus_alignment, metadata, created_at, updated_at";

const EDGE_COLUMNS: &str =
    "id, scope_id, source_id, target_id, edge_type, confidence, properties, created_at";

/// SQLite-backed graph store
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Open (creating if needed) the database at `config.path` and run migrations.
    ///
    /// A path of `:memory:` opens an ephemeral database instead.
    pub async fn new(config: &DatabaseConfig) -> StoreResult<Self> {
        if config.path.to_str() == Some(":memory:") {
            return Self::new_in_memory().await;
        }

        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StoreError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Ephemeral database on a single pooled connection.
    pub async fn new_in_memory() -> StoreResult<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| StoreError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?;

        // Every connection to :memory: is a separate database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StoreError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn node_exists(&self, id: &str) -> StoreResult<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn push_node_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &NodeQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(scope) = &query.scope_id {
        builder.push(" AND scope_id = ").push_bind(scope.clone());
    }
    if !query.node_types.is_empty() {
        builder.push(" AND node_type IN (");
        let mut separated = builder.separated(", ");
        for node_type in &query.node_types {
            separated.push_bind(node_type.to_string());
        }
        separated.push_unseparated(")");
    }
    if !query.ids.is_empty() {
        builder.push(" AND id IN (");
        let mut separated = builder.separated(", ");
        for id in &query.ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");
    }
    if let Some(context) = &query.query_context {
        builder.push(" AND query_context = ").push_bind(context.clone());
    }
}

fn push_edge_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &EdgeQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(scope) = &query.scope_id {
        builder.push(" AND scope_id = ").push_bind(scope.clone());
    }
    if !query.edge_types.is_empty() {
        builder.push(" AND edge_type IN (");
        let mut separated = builder.separated(", ");
        for edge_type in &query.edge_types {
            separated.push_bind(edge_type.to_string());
        }
        separated.push_unseparated(")");
    }
    if let Some(source) = &query.source_id {
        builder.push(" AND source_id = ").push_bind(source.clone());
    }
    if let Some(target) = &query.target_id {
        builder.push(" AND target_id = ").push_bind(target.clone());
    }
    if let Some(node) = &query.touching {
        builder
            .push(" AND (source_id = ")
            .push_bind(node.clone())
            .push(" OR target_id = ")
            .push_bind(node.clone())
            .push(")");
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_node(&self, node: &Node) -> StoreResult<UpsertOutcome> {
        debug!(op = %GraphOperation::UpsertNode, node_id = %node.id, "sqlite store");
        let metadata = serde_json::to_string(&node.metadata)?;

        let mut tx = self.pool.begin().await?;

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM nodes WHERE id = ?")
            .bind(&node.id)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO nodes (
                id, scope_id, node_type, label,
                empirical_support, theoretical_basis, methodological_rigor, consensus_alignment,
                impact_score, is_knowledge_gap, query_context, metadata, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                scope_id = excluded.scope_id,
                node_type = excluded.node_type,
                label = excluded.label,
                empirical_support = excluded.empirical_support,
                theoretical_basis = excluded.theoretical_basis,
                methodological_rigor = excluded.methodological_rigor,
                consensus_alignment = excluded.consensus_alignment,
                impact_score = excluded.impact_score,
                is_knowledge_gap = excluded.is_knowledge_gap,
                query_context = excluded.query_context,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&node.id)
        .bind(&node.scope_id)
        .bind(node.node_type.to_string())
        .bind(&node.label)
        .bind(node.confidence.empirical_support)
        .bind(node.confidence.theoretical_basis)
        .bind(node.confidence.methodological_rigor)
        .bind(node.confidence.consensus_alignment)
        .bind(node.metadata.impact_score)
        .bind(node.metadata.is_knowledge_gap)
        .bind(&node.metadata.query_context)
        .bind(&metadata)
        .bind(node.created_at.to_rfc3339())
        .bind(node.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    async fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        let sql = format!("SELECT {} FROM nodes WHERE id = ?", NODE_COLUMNS);
        let row: Option<NodeRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Node::try_from).transpose()
    }

    async fn find_nodes(&self, query: &NodeQuery) -> StoreResult<Vec<Node>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM nodes", NODE_COLUMNS));
        push_node_filters(&mut builder, query);
        builder.push(" ORDER BY id");

        let rows: Vec<NodeRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Node::try_from).collect()
    }

    async fn count_nodes(&self, query: &NodeQuery) -> StoreResult<usize> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM nodes");
        push_node_filters(&mut builder, query);

        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count.max(0) as usize)
    }

    async fn delete_node(&self, id: &str) -> StoreResult<bool> {
        debug!(op = %GraphOperation::DeleteNode, node_id = %id, "sqlite store");
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM edges WHERE source_id = ? OR target_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_edge(&self, edge: &Edge) -> StoreResult<UpsertOutcome> {
        debug!(op = %GraphOperation::UpsertEdge, edge_id = %edge.id, "sqlite store");
        for endpoint in [&edge.source_id, &edge.target_id] {
            if !self.node_exists(endpoint).await? {
                return Err(StoreError::Constraint {
                    message: format!("edge {} references missing node {}", edge.id, endpoint),
                });
            }
        }

        let properties = serde_json::to_string(&edge.properties)?;
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM edges WHERE id = ?")
            .bind(&edge.id)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO edges (id, scope_id, source_id, target_id, edge_type, confidence, properties, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                scope_id = excluded.scope_id,
                source_id = excluded.source_id,
                target_id = excluded.target_id,
                edge_type = excluded.edge_type,
                confidence = excluded.confidence,
                properties = excluded.properties
            "#,
        )
        .bind(&edge.id)
        .bind(&edge.scope_id)
        .bind(&edge.source_id)
        .bind(&edge.target_id)
        .bind(edge.edge_type.to_string())
        .bind(edge.confidence)
        .bind(&properties)
        .bind(edge.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    async fn find_edges(&self, query: &EdgeQuery) -> StoreResult<Vec<Edge>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM edges", EDGE_COLUMNS));
        push_edge_filters(&mut builder, query);
        builder.push(" ORDER BY id");

        let rows: Vec<EdgeRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Edge::try_from).collect()
    }

    async fn count_edges(&self, query: &EdgeQuery) -> StoreResult<usize> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM edges");
        push_edge_filters(&mut builder, query);

        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count.max(0) as usize)
    }

    async fn delete_edge(&self, id: &str) -> StoreResult<bool> {
        debug!(op = %GraphOperation::DeleteEdge, edge_id = %id, "sqlite store");
        let result = sqlx::query("DELETE FROM edges WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_hyperedge(&self, hyperedge: &Hyperedge) -> StoreResult<UpsertOutcome> {
        let node_ids = serde_json::to_string(&hyperedge.node_ids)?;
        let confidence = serde_json::to_string(&hyperedge.confidence)?;
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM hyperedges WHERE id = ?")
            .bind(&hyperedge.id)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO hyperedges (id, scope_id, node_ids, relation, confidence, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                scope_id = excluded.scope_id,
                node_ids = excluded.node_ids,
                relation = excluded.relation,
                confidence = excluded.confidence
            "#,
        )
        .bind(&hyperedge.id)
        .bind(&hyperedge.scope_id)
        .bind(&node_ids)
        .bind(&hyperedge.relation)
        .bind(&confidence)
        .bind(hyperedge.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    async fn find_hyperedges(&self, scope_id: &str) -> StoreResult<Vec<Hyperedge>> {
        let rows: Vec<HyperedgeRow> = sqlx::query_as(
            r#"
            SELECT id, scope_id, node_ids, relation, confidence, created_at
            FROM hyperedges
            WHERE scope_id = ?
            ORDER BY id
            "#,
        )
        .bind(scope_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Hyperedge::try_from).collect()
    }
}

// Internal row types for SQLx mapping

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(sqlx::FromRow)]
struct NodeRow {
    id: String,
    scope_id: String,
    node_type: String,
    label: String,
    empirical_support: f64,
    theoretical_basis: f64,
    methodological_rigor: f64,
    consensus_alignment: f64,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<NodeRow> for Node {
    type Error = StoreError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        let node_type =
            NodeType::from_str(&row.node_type).map_err(|message| StoreError::Query { message })?;

        Ok(Self {
            id: row.id,
            scope_id: row.scope_id,
            node_type,
            label: row.label,
            confidence: ConfidenceVector::new(
                row.empirical_support,
                row.theoretical_basis,
                row.methodological_rigor,
                row.consensus_alignment,
            ),
            metadata: serde_json::from_str(&row.metadata)?,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct EdgeRow {
    id: String,
    scope_id: String,
    source_id: String,
    target_id: String,
    edge_type: String,
    confidence: Option<f64>,
    properties: String,
    created_at: String,
}

impl TryFrom<EdgeRow> for Edge {
    type Error = StoreError;

    fn try_from(row: EdgeRow) -> Result<Self, Self::Error> {
        let edge_type =
            EdgeType::from_str(&row.edge_type).map_err(|message| StoreError::Query { message })?;

        Ok(Self {
            id: row.id,
            scope_id: row.scope_id,
            source_id: row.source_id,
            target_id: row.target_id,
            edge_type,
            confidence: row.confidence,
            properties: serde_json::from_str(&row.properties)?,
            created_at: parse_timestamp(&row.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct HyperedgeRow {
    id: String,
    scope_id: String,
    node_ids: String,
    relation: String,
    confidence: String,
    created_at: String,
}

impl TryFrom<HyperedgeRow> for Hyperedge {
    type Error = StoreError;

    fn try_from(row: HyperedgeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            scope_id: row.scope_id,
            node_ids: serde_json::from_str(&row.node_ids)?,
            relation: row.relation,
            confidence: serde_json::from_str(&row.confidence)?,
            created_at: parse_timestamp(&row.created_at),
        })
    }
}
