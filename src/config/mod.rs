use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;
use crate::graph::ConfidenceVector;
use crate::pipeline::PipelineParams;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Graph database settings.
    pub database: DatabaseConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
    /// HTTP policy for external calls.
    pub request: RequestConfig,
    /// Langbase credentials; `None` selects the simulated evidence source.
    pub langbase: Option<LangbaseConfig>,
    /// Langbase pipe names.
    pub pipes: PipeConfig,
    /// Default operational parameters for every run.
    pub pipeline: PipelineParams,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    /// API key.
    pub api_key: String,
    /// API base URL.
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`.
    pub path: PathBuf,
    /// Pool size.
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff delay, doubled per retry.
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Pipe used to gather evidence for a hypothesis.
    pub evidence: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = env::var("LANGBASE_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|api_key| LangbaseConfig {
                api_key,
                base_url: env::var("LANGBASE_BASE_URL")
                    .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
            });

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/got.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let defaults = RequestConfig::default();
        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", defaults.timeout_ms),
            max_retries: env_or("MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_or("RETRY_DELAY_MS", defaults.retry_delay_ms),
        };

        let pipes = PipeConfig {
            evidence: env::var("PIPE_EVIDENCE").unwrap_or_else(|_| "got-evidence-v1".to_string()),
        };

        let pipeline = pipeline_from_env()?;

        Ok(Config {
            database,
            logging,
            request,
            langbase,
            pipes,
            pipeline,
        })
    }
}

/// Pipeline defaults with `GOT_*` overrides applied.
fn pipeline_from_env() -> Result<PipelineParams, AppError> {
    let mut params = PipelineParams::default();

    if let Ok(raw) = env::var("GOT_INITIAL_CONFIDENCE") {
        params.initial_confidence = parse_confidence(&raw).ok_or_else(|| AppError::Config {
            message: format!(
                "GOT_INITIAL_CONFIDENCE must be four comma-separated numbers, got '{}'",
                raw
            ),
        })?;
    }

    params.pruning_confidence_threshold = env_or(
        "GOT_PRUNING_CONFIDENCE_THRESHOLD",
        params.pruning_confidence_threshold,
    );
    params.pruning_impact_threshold =
        env_or("GOT_PRUNING_IMPACT_THRESHOLD", params.pruning_impact_threshold);
    params.merge_similarity_threshold = env_or(
        "GOT_MERGE_SIMILARITY_THRESHOLD",
        params.merge_similarity_threshold,
    );
    params.hypotheses_min = env_or("GOT_HYPOTHESES_MIN", params.hypotheses_min);
    params.hypotheses_max = env_or("GOT_HYPOTHESES_MAX", params.hypotheses_max);
    params.evidence_max_iterations =
        env_or("GOT_EVIDENCE_MAX_ITERATIONS", params.evidence_max_iterations);
    params.evidence_budget = env_or("GOT_EVIDENCE_BUDGET", params.evidence_budget);

    if let Ok(raw) = env::var("GOT_DISABLED_STAGES") {
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            params.stage_enabled.insert(name.to_string(), false);
        }
    }

    params.validate()?;
    Ok(params)
}

fn parse_confidence(raw: &str) -> Option<Vec<f64>> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    ConfidenceVector::from_slice(&values).map(|_| values)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}
