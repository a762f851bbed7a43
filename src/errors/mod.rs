use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Scheduling errors
    #[error("Invalid schedule expression: {0}")]
    InvalidSchedule(String),

    // Lookup errors
    #[error("Source not found: {0}")]
    SourceNotFound(i64),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(i64),

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // User input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type HarvestResult<T> = Result<T, HarvestError>;
