use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Not configured: {0}")]
    Configuration(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Stale task state: {0}")]
    StaleState(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Notification error: {0}")]
    Notification(String),
    #[error("Logging error: {0}")]
    Logging(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
