use thiserror::Error;

#[derive(Error, Debug)]
pub enum CivicWireError {
    /// Missing or invalid source configuration. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-success HTTP status, timeout, or connection failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed JSON/XML/HTML from an upstream system.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Discovery model call failed (the tiered parser handles bad output;
    /// this is for the call itself).
    #[error("Model error: {0}")]
    Model(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl CivicWireError {
    /// Whether the fetch layer should retry with backoff before surfacing.
    pub fn is_transient(&self) -> bool {
        matches!(self, CivicWireError::Transport(_))
    }
}
