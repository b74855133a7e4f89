//! Error types for inbox-triage.

use std::path::PathBuf;

/// Top-level error type for the triage core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Statistics error: {0}")]
    Stats(#[from] StatsError),
}

/// Configuration-related errors. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("Failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown account '{name}'. Available accounts: {available}")]
    UnknownAccount { name: String, available: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Processed-ledger database errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Mailbox gateway (transport) errors. Abort the current run.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Authentication failed for account {account}: {reason}")]
    Auth { account: String, reason: String },

    #[error("{operation} request failed: {reason}")]
    Request { operation: String, reason: String },

    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from mailbox: {0}")]
    InvalidResponse(String),
}

/// Failure of a single labeling strategy. Contained by the classifier.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("Strategy {strategy} failed: {reason}")]
    Failed { strategy: String, reason: String },
}

/// Statistics document errors. Never block the primary workflow.
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Predictive model loading errors. Turned into "not ready" by the predictor.
#[derive(Debug, thiserror::Error)]
pub enum PredictorError {
    #[error("Model file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),
}

/// Result type alias for the triage core.
pub type Result<T> = std::result::Result<T, Error>;
