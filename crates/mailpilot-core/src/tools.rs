//! Tool implementations exposed to the chat model

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::llm::{ChatBackend, ToolCall, ToolDefinition};
use crate::mail::Mailbox;
use crate::models::fmt_local;

/// Get all tool definitions
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            "list_unread_emails",
            "Return a JSON list of unread messages with uid, date, subject, sender.",
            serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        ),
        ToolDefinition::function(
            "summarize_email",
            "Summarize a single e-mail given its IMAP UID. Returns a plain-text summary.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "uid": {
                        "type": "string",
                        "description": "IMAP UID of the message, as returned by list_unread_emails"
                    }
                },
                "required": ["uid"]
            }),
        ),
    ]
}

/// Executes tool calls on behalf of the conversation agent.
///
/// Holds the mailbox and the tool-free model connection; both are shared
/// with the rest of the process, nothing here is global.
pub struct ToolRegistry {
    mailbox: Arc<dyn Mailbox>,
    summarizer: Arc<dyn ChatBackend>,
}

impl ToolRegistry {
    /// Create a registry over a mailbox and a summarization backend
    pub fn new(mailbox: Arc<dyn Mailbox>, summarizer: Arc<dyn ChatBackend>) -> Self {
        Self { mailbox, summarizer }
    }

    /// Execute a tool call, returning its output text.
    ///
    /// Unknown tool names are an error here; the agent converts that into
    /// a tool-result message so the turn survives.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<String> {
        let name = call.function.name.as_str();
        debug!("Executing tool: {} with args: {:?}", name, call.function.arguments);

        match name {
            "list_unread_emails" => self.list_unread_emails().await,
            "summarize_email" => self.summarize_email(&call.function.arguments).await,
            _ => Err(Error::ToolNotFound(name.to_string())),
        }
    }

    /// JSON array of `{uid, date, subject, sender}` for every unread
    /// message. An empty mailbox yields `"[]"`, never an error.
    async fn list_unread_emails(&self) -> Result<String> {
        info!("List unread emails tool called");

        let unread = self.mailbox.list_unread().await?;
        Ok(serde_json::to_string(&unread)?)
    }

    /// Fetch one message and summarize it with the tool-free backend.
    ///
    /// A UID with no matching message produces an explanatory sentence
    /// rather than an error, so the model can relay it to the user.
    async fn summarize_email(&self, args: &Value) -> Result<String> {
        let raw_uid = uid_argument(args)
            .ok_or_else(|| Error::InvalidRequest("Missing uid".to_string()))?;
        info!("Summarize tool called for uid {:?}", raw_uid);

        // Models pad arguments with whitespace often enough to matter
        let uid = match raw_uid.trim().parse::<u32>() {
            Ok(uid) => uid,
            Err(_) => return Ok(not_found_message(raw_uid.trim())),
        };

        let mail = match self.mailbox.fetch_by_uid(uid).await? {
            Some(mail) => mail,
            None => return Ok(not_found_message(raw_uid.trim())),
        };

        let prompt = format!(
            "You are an assistant that summarizes emails clearly and concisely.\n\
             Return a short summary.\n\n\
             Subject: {}\n\
             Sender: {}\n\
             Date: {}\n\n\
             {}",
            mail.subject,
            mail.sender,
            fmt_local(mail.date),
            mail.body
        );

        self.summarizer.generate(&prompt).await
    }
}

/// The not-found sentence relayed to the model verbatim
fn not_found_message(uid: &str) -> String {
    format!("Could not summarize. UID not found: {}", uid)
}

/// Pull the uid argument out of the arguments object, coercing a JSON
/// number to text.
fn uid_argument(args: &Value) -> Option<String> {
    match args.get("uid") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}
