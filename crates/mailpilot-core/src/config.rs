//! Configuration management for MailPilot
//!
//! All settings come from the process environment (a `.env` file is
//! loaded by the binary before this runs). There is no config file;
//! the assistant is meant to be pointed at one mailbox and one local
//! Ollama instance.

use crate::error::{Error, Result};
use tracing::info;

/// Default IMAP TLS port
const DEFAULT_IMAP_PORT: u16 = 993;

/// Default Ollama base URL
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Default chat model. Small, local, and tool-calling capable.
const DEFAULT_CHAT_MODEL: &str = "qwen2.5:3b";

/// The mailbox folder the assistant operates on
pub const IMAP_FOLDER: &str = "INBOX";

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    /// IMAP server host
    pub imap_host: String,

    /// IMAP TLS port
    pub imap_port: u16,

    /// IMAP login user
    pub imap_user: String,

    /// IMAP login password
    pub imap_password: String,

    /// Ollama base URL (e.g. "http://192.168.0.31:11434")
    pub ollama_host: String,

    /// Chat model name
    pub chat_model: String,
}

impl Config {
    /// Build a configuration from the process environment.
    ///
    /// Required: `IMAP_HOST`, `IMAP_USER`, `IMAP_PASSWORD`.
    /// Optional: `IMAP_PORT`, `OLLAMA_HOST`, `CHAT_MODEL`.
    pub fn from_env() -> Result<Self> {
        let imap_host = require("IMAP_HOST")?;
        let imap_user = require("IMAP_USER")?;
        let imap_password = require("IMAP_PASSWORD")?;

        let imap_port = match std::env::var("IMAP_PORT") {
            Ok(raw) => raw.trim().parse::<u16>().map_err(|_| {
                Error::Config(format!("IMAP_PORT is not a valid port number: {raw:?}"))
            })?,
            Err(_) => DEFAULT_IMAP_PORT,
        };

        let ollama_host = std::env::var("OLLAMA_HOST")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());

        let chat_model = std::env::var("CHAT_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());

        let config = Self {
            imap_host,
            imap_port,
            imap_user,
            imap_password,
            ollama_host: ollama_host.trim_end_matches('/').to_string(),
            chat_model,
        };

        info!(
            imap_host = %config.imap_host,
            ollama_host = %config.ollama_host,
            model = %config.chat_model,
            "loaded configuration"
        );

        Ok(config)
    }
}

/// Read a required environment variable, naming it in the error.
fn require(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::Config(format!(
            "missing required environment variable: {name}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names where possible; the required
    // trio is shared, so these tests set all of them before asserting.

    #[test]
    fn test_missing_required_names_the_variable() {
        std::env::remove_var("IMAP_HOST");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("IMAP_HOST"));
    }

    #[test]
    fn test_require_rejects_blank() {
        std::env::set_var("MAILPILOT_TEST_BLANK", "   ");
        assert!(require("MAILPILOT_TEST_BLANK").is_err());
        std::env::set_var("MAILPILOT_TEST_BLANK", "value");
        assert_eq!(require("MAILPILOT_TEST_BLANK").unwrap(), "value");
    }
}
