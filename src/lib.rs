//! # Graph-of-Thoughts Research Pipeline
//!
//! Runs a research query through eight ordered stages that build, refine
//! and audit a typed knowledge graph, then compose a cited answer with a
//! multi-dimensional confidence assessment.
//!
//! ## Stages
//!
//! - **Initialization**: root node for the query
//! - **Decomposition**: one dimension node per analytical facet
//! - **Hypothesis**: competing hypotheses per dimension
//! - **Evidence**: iterative evidence gathering with Bayesian updates
//! - **Pruning/Merging**: removes weak elements, merges duplicates
//! - **Subgraph Extraction**: focus subgraphs by relevance criteria
//! - **Composition**: cited answer text from the subgraphs
//! - **Reflection**: quality audit and final confidence vector
//!
//! ## Architecture
//!
//! ```text
//! query → PipelineOrchestrator → Stage × 8 → SessionData
//!                                   ↓
//!                     GraphStore (SQLite / memory)
//!                                   ↓
//!               EvidenceSource (simulated / Langbase pipe)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use got_pipeline::{default_orchestrator, InMemoryGraphStore, SimulatedEvidenceSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = default_orchestrator(
//!         Arc::new(InMemoryGraphStore::new()),
//!         Arc::new(SimulatedEvidenceSource::new()),
//!     )?;
//!     let session = orchestrator.run("Explain mRNA vaccine mechanism", None).await?;
//!     println!("{}", session.final_answer.unwrap_or_default());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Evidence sources consulted by the evidence stage.
pub mod evidence;
/// Graph entities, identifiers and confidence math.
pub mod graph;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// Orchestrator, session record and stage contracts.
pub mod pipeline;
/// System prompts for Langbase pipes.
pub mod prompts;
/// The built-in pipeline stages.
pub mod stages;
/// Graph persistence.
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use evidence::{EvidenceSource, LangbaseEvidenceSource, SimulatedEvidenceSource};
pub use pipeline::{PipelineOrchestrator, PipelineParams, SessionData, StageOutput, StageStatus};
pub use stages::{default_orchestrator, default_stages, Stage};
pub use store::{GraphStore, InMemoryGraphStore, SqliteGraphStore};
