use thiserror::Error;
use uuid::Uuid;

/// Main error type for the execution engine
#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Queue backend errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    RedisPool(#[from] deadpool_redis::PoolError),

    #[error("Redis pool setup error: {0}")]
    RedisPoolSetup(#[from] deadpool_redis::CreatePoolError),

    #[error("Queue error: {0}")]
    Queue(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Order lifecycle errors
    #[error("Order already exists: {0}")]
    Conflict(Uuid),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Routing/execution errors
    #[error("Network congestion: {0}")]
    NetworkCongestion(String),

    #[error("Routing failed: {0}")]
    Routing(String),

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

impl EngineError {
    /// Whether a job hitting this error should be retired immediately
    /// instead of consuming its remaining attempts. Constraint violations
    /// and invalid transitions will not heal on retry; transport errors
    /// might.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Database(sqlx::Error::Database(_))
                | EngineError::Conflict(_)
                | EngineError::InvalidStateTransition { .. }
                | EngineError::Validation(_)
        )
    }
}

/// Result type alias for EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
