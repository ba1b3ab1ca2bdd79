//! Error types for MailPilot

use thiserror::Error;

/// Result type alias using MailPilot's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for MailPilot
#[derive(Error, Debug)]
pub enum Error {
    // Mail errors
    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Connection failed to {host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("Invalid email format: {0}")]
    InvalidEmailFormat(String),

    // Model backend errors
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Returns a user-friendly action message for recoverable errors
    pub fn action_hint(&self) -> Option<&'static str> {
        match self {
            Error::ConnectionFailed { .. } => Some("Check your network connection"),
            Error::Llm(_) | Error::Http(_) => Some("Check that Ollama is running and OLLAMA_HOST is correct"),
            Error::Config(_) => Some("Check your environment variables or .env file"),
            _ => None,
        }
    }
}
