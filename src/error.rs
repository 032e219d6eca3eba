//! Error handling for the clipserver pipeline

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Config error (invalid values rejected at load or update)
    #[error("Config error: {0}")]
    Config(String),

    /// Job queue has been closed for shutdown
    #[error("Job queue closed")]
    QueueClosed,

    /// Scorer boundary error
    #[error("Scorer error: {0}")]
    Scorer(String),

    /// Clip encoder error
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Evidence sink error
    #[error("Evidence sink error: {0}")]
    Sink(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
