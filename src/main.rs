use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use got_pipeline::{
    config::{Config, LogFormat},
    default_orchestrator,
    evidence::{EvidenceSource, LangbaseEvidenceSource, SimulatedEvidenceSource},
    langbase::LangbaseClient,
    store::{GraphStore, SqliteGraphStore},
};

/// Run a research query through the Graph-of-Thoughts pipeline.
#[derive(Debug, Parser)]
#[command(name = "got-pipeline", version, about)]
struct Cli {
    /// Research query to analyse
    query: String,

    /// Skip a stage by name, e.g. `ReflectionStage` (repeatable)
    #[arg(long = "disable-stage", value_name = "NAME")]
    disabled_stages: Vec<String>,

    /// Override the evidence stage iteration limit
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Print the session record as single-line JSON
    #[arg(long)]
    compact: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "GoT pipeline starting..."
    );

    let store: Arc<dyn GraphStore> = match SqliteGraphStore::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Graph store initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize graph store");
            return Err(e.into());
        }
    };

    let evidence_source: Arc<dyn EvidenceSource> = match &config.langbase {
        Some(langbase) => match LangbaseClient::new(langbase, config.request.clone()) {
            Ok(client) => {
                info!(base_url = %langbase.base_url, pipe = %config.pipes.evidence, "Langbase evidence source initialized");
                Arc::new(LangbaseEvidenceSource::new(client, config.pipes.evidence.clone()))
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize Langbase client");
                return Err(e.into());
            }
        },
        None => {
            info!("LANGBASE_API_KEY not set, using simulated evidence");
            Arc::new(SimulatedEvidenceSource::new())
        }
    };

    let mut params = config.pipeline.clone();
    for name in &cli.disabled_stages {
        params = params.with_stage_disabled(name.clone());
    }
    if let Some(max_iterations) = cli.max_iterations {
        params.evidence_max_iterations = max_iterations;
    }

    let orchestrator = default_orchestrator(store, evidence_source)?.with_defaults(config.pipeline);

    let session = match orchestrator.run(&cli.query, Some(params)).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid parameters: {}", e);
            std::process::exit(2);
        }
    };

    for failed in session.failed_stages() {
        warn!(
            stage = %failed.stage_name,
            error = failed.error_message.as_deref().unwrap_or("unknown"),
            "Stage failed"
        );
    }

    let rendered = if cli.compact {
        serde_json::to_string(&session)?
    } else {
        serde_json::to_string_pretty(&session)?
    };
    println!("{}", rendered);

    info!(session_id = %session.session_id, "Pipeline run complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
