use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Graph store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Constraint violated: {message}")]
    Constraint { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors raised inside a stage.
///
/// These never leave a stage: `StageOutput::failure` turns them into a
/// recorded failure entry in the trace.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage} requires context from {key}, which is missing")]
    MissingContext { stage: String, key: String },

    #[error("Context under {key} is malformed: {message}")]
    MalformedContext { key: String, message: String },

    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Evidence source failed: {message}")]
    Evidence { message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Operational parameter and pipeline configuration errors.
///
/// Surfaced by the orchestrator before any stage executes.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid parameter {field}: {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("Stage configured more than once: {name}")]
    DuplicateStage { name: String },

    #[error("Unknown stage: {name}")]
    UnknownStage { name: String },

    #[error("Stage {stage} depends on {dependency}, which is not configured before it")]
    DependencyOrder { stage: String, dependency: String },
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("Langbase unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<LangbaseError> for StageError {
    fn from(err: LangbaseError) -> Self {
        StageError::Evidence {
            message: err.to_string(),
        }
    }
}

impl ValidationError {
    /// Shorthand for an invalid parameter.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidParameter {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for graph store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for work done inside a stage
pub type StageResult<T> = Result<T, StageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Constraint {
            message: "edge endpoint missing".to_string(),
        };
        assert_eq!(err.to_string(), "Constraint violated: edge endpoint missing");
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::MissingContext {
            stage: "HypothesisStage".to_string(),
            key: "DecompositionStage".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "HypothesisStage requires context from DecompositionStage, which is missing"
        );

        let err = StageError::Timeout {
            operation: "evidence gathering".to_string(),
            timeout_ms: 500,
        };
        assert_eq!(err.to_string(), "evidence gathering timed out after 500ms");
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::invalid("hypotheses_min", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid parameter hypotheses_min: must be at least 1"
        );
    }

    #[test]
    fn test_store_error_into_stage_error() {
        let err: StageError = StoreError::Query {
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, StageError::Store(_)));
        assert_eq!(err.to_string(), "Store error: Query failed: boom");
    }

    #[test]
    fn test_langbase_error_into_stage_error() {
        let err: StageError = LangbaseError::Timeout { timeout_ms: 10 }.into();
        assert_eq!(
            err.to_string(),
            "Evidence source failed: Request timeout after 10ms"
        );
    }

    #[test]
    fn test_validation_into_app_error() {
        let err: AppError = ValidationError::UnknownStage {
            name: "Nope".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Validation error: Unknown stage: Nope");
    }
}
