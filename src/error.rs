use thiserror::Error;

/// Main error type for the orchestration loop
#[derive(Error, Debug)]
pub enum WardenError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Broker errors
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    // State errors
    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Strategy errors
    #[error("Strategy error: {0}")]
    Strategy(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl WardenError {
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        WardenError::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// True for failures of an external dependency (broker, store, filesystem)
    /// as opposed to programming or configuration mistakes.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            WardenError::Database(_)
                | WardenError::Broker(_)
                | WardenError::Timeout { .. }
                | WardenError::Io(_)
        )
    }
}

/// Result type alias for WardenError
pub type Result<T> = std::result::Result<T, WardenError>;
