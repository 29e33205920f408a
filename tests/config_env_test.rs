//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Config::from_env() also loads a .env file
//! via dotenvy when one is present, so each test sets the variables it checks.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use got_pipeline::config::{Config, LogFormat};
use got_pipeline::error::AppError;
use serial_test::serial;
use std::env;

const GOT_VARS: [&str; 6] = [
    "GOT_INITIAL_CONFIDENCE",
    "GOT_MERGE_SIMILARITY_THRESHOLD",
    "GOT_HYPOTHESES_MIN",
    "GOT_HYPOTHESES_MAX",
    "GOT_EVIDENCE_BUDGET",
    "GOT_DISABLED_STAGES",
];

fn clear_got_vars() {
    for key in GOT_VARS {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_config_without_api_key_uses_simulated_source() {
    clear_got_vars();
    env::set_var("LANGBASE_API_KEY", "   ");

    let config = Config::from_env().unwrap();
    assert!(config.langbase.is_none());

    env::remove_var("LANGBASE_API_KEY");
}

#[test]
#[serial]
fn test_config_with_api_key_and_custom_base_url() {
    clear_got_vars();
    env::set_var("LANGBASE_API_KEY", "lb-test-key");
    env::set_var("LANGBASE_BASE_URL", "https://custom.api.com");

    let config = Config::from_env().unwrap();
    let langbase = config.langbase.expect("api key configured");
    assert_eq!(langbase.api_key, "lb-test-key");
    assert_eq!(langbase.base_url, "https://custom.api.com");

    env::remove_var("LANGBASE_API_KEY");
    env::remove_var("LANGBASE_BASE_URL");
}

#[test]
#[serial]
fn test_config_database_and_logging_overrides() {
    clear_got_vars();
    env::set_var("DATABASE_PATH", "/tmp/got-test/graph.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "9");
    env::set_var("LOG_FORMAT", "JSON");
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str(), Some("/tmp/got-test/graph.db"));
    assert_eq!(config.database.max_connections, 9);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.logging.level, "debug");

    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
    env::remove_var("LOG_FORMAT");
    env::remove_var("LOG_LEVEL");
}

#[test]
#[serial]
fn test_config_unparseable_numbers_fall_back_to_defaults() {
    clear_got_vars();
    env::set_var("REQUEST_TIMEOUT_MS", "soon");
    env::set_var("MAX_RETRIES", "-1");

    let config = Config::from_env().unwrap();
    assert_eq!(config.request.timeout_ms, 30000);
    assert_eq!(config.request.max_retries, 3);

    env::remove_var("REQUEST_TIMEOUT_MS");
    env::remove_var("MAX_RETRIES");
}

#[test]
#[serial]
fn test_config_pipeline_overrides() {
    clear_got_vars();
    env::set_var("GOT_INITIAL_CONFIDENCE", "0.8,0.7,0.6,0.5");
    env::set_var("GOT_HYPOTHESES_MIN", "2");
    env::set_var("GOT_HYPOTHESES_MAX", "2");
    env::set_var("GOT_EVIDENCE_BUDGET", "7");
    env::set_var("GOT_DISABLED_STAGES", "ReflectionStage, CompositionStage");

    let config = Config::from_env().unwrap();
    assert_eq!(config.pipeline.initial_confidence, vec![0.8, 0.7, 0.6, 0.5]);
    assert_eq!(config.pipeline.hypotheses_min, 2);
    assert_eq!(config.pipeline.hypotheses_max, 2);
    assert_eq!(config.pipeline.evidence_budget, 7);
    assert!(!config.pipeline.is_stage_enabled("ReflectionStage"));
    assert!(!config.pipeline.is_stage_enabled("CompositionStage"));
    assert!(config.pipeline.is_stage_enabled("EvidenceStage"));

    clear_got_vars();
}

#[test]
#[serial]
fn test_config_rejects_malformed_confidence() {
    clear_got_vars();
    env::set_var("GOT_INITIAL_CONFIDENCE", "0.8,0.7");

    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, AppError::Config { .. }));
    assert!(err.to_string().contains("GOT_INITIAL_CONFIDENCE"));

    clear_got_vars();
}

#[test]
#[serial]
fn test_config_rejects_out_of_range_threshold() {
    clear_got_vars();
    env::set_var("GOT_MERGE_SIMILARITY_THRESHOLD", "1.5");

    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    clear_got_vars();
}
