//! MailPilot Core Library
//!
//! IMAP mailbox access and a tool-calling Ollama chat agent for the
//! command-line email assistant.

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod models;
pub mod tools;

pub use config::Config;
pub use error::{Error, Result};
pub use models::*;
