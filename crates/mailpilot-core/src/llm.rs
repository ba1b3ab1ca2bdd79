//! Ollama chat backend.
//!
//! One HTTP client, two entry points: [`ChatBackend::chat`] talks to
//! `/api/chat` with the tool definitions attached and may come back with
//! tool-call requests; [`ChatBackend::generate`] talks to `/api/generate`
//! with a bare prompt and only ever returns text. The summarize tool uses
//! the latter so a summary can never trigger another tool call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// Request timeout for model calls. Local inference on small hardware
/// can be slow, so this is generous.
const REQUEST_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior
    System,
    /// Input from the human user
    User,
    /// Output from the model
    Assistant,
    /// Result of a tool invocation, fed back to the model
    Tool,
}

/// A single entry in the conversation history, in Ollama's wire shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced this message
    pub role: Role,

    /// Textual content. Empty for assistant messages that only carry
    /// tool calls.
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Which tool produced this result (tool-role messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    /// Create an assistant text message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    /// Create an assistant message that carries tool calls
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls,
            tool_name: None,
        }
    }

    /// Create a tool result message, tagged with the originating tool
    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: Some(tool_name.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// The function the model wants invoked
    pub function: FunctionCall,
}

/// Name + arguments of a requested tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Must match a registered tool name
    pub name: String,

    /// Arguments as a JSON object per the tool's schema
    #[serde(default)]
    pub arguments: Value,
}

/// A callable tool advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

/// The function half of a tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a function-type tool definition
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Chat outcome
// ---------------------------------------------------------------------------

/// What the model produced for one request
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    /// A final text answer
    Answer(String),

    /// The model wants one or more tools invoked before answering
    ToolCalls(Vec<ToolCall>),
}

// ---------------------------------------------------------------------------
// Backend trait and Ollama client
// ---------------------------------------------------------------------------

/// Model-serving connection, in its tool-enabled and tool-free modes
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the conversation with the tool definitions attached
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatOutcome>;

    /// Tool-free completion from a bare prompt
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Client for a local Ollama instance
pub struct OllamaClient {
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl OllamaClient {
    /// Create a client from the loaded configuration
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.ollama_host.clone(),
            model: config.chat_model.clone(),
            http,
        })
    }

    /// The configured model name
    pub fn model(&self) -> &str {
        &self.model
    }

    /// POST a JSON body and return the parsed JSON response, mapping
    /// non-success statuses to `Error::Llm` with status and body text.
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, model = %self.model, "sending model request");

        let resp = self.http.post(&url).json(body).send().await?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Llm(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(Error::Llm(format!("API returned {status}: {text}")));
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::Llm(format!("invalid JSON response: {e}")))
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatOutcome> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        let v = self.post_json("/api/chat", &body).await?;
        parse_chat_response(&v)
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let v = self.post_json("/api/generate", &body).await?;
        v.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Llm("response missing 'response' field".to_string()))
    }
}

/// Parse an `/api/chat` response into a [`ChatOutcome`].
///
/// A non-empty `message.tool_calls` wins over any content text.
fn parse_chat_response(v: &Value) -> Result<ChatOutcome> {
    let message = v
        .get("message")
        .ok_or_else(|| Error::Llm("response missing 'message' field".to_string()))?;

    if let Some(calls) = message.get("tool_calls").and_then(|tc| tc.as_array()) {
        if !calls.is_empty() {
            let calls: Vec<ToolCall> = serde_json::from_value(Value::Array(calls.clone()))
                .map_err(|e| Error::Llm(format!("malformed tool_calls: {e}")))?;
            return Ok(ChatOutcome::ToolCalls(calls));
        }
    }

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(ChatOutcome::Answer(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_answer() {
        let v = json!({
            "model": "qwen2.5:3b",
            "message": { "role": "assistant", "content": "You have no unread mail." },
            "done": true
        });
        match parse_chat_response(&v).unwrap() {
            ChatOutcome::Answer(text) => assert_eq!(text, "You have no unread mail."),
            other => panic!("expected Answer, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_tool_calls_win_over_content() {
        let v = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    { "function": { "name": "list_unread_emails", "arguments": {} } }
                ]
            }
        });
        match parse_chat_response(&v).unwrap() {
            ChatOutcome::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].function.name, "list_unread_emails");
            }
            other => panic!("expected ToolCalls, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_tool_calls_is_answer() {
        let v = json!({
            "message": { "role": "assistant", "content": "done", "tool_calls": [] }
        });
        assert!(matches!(
            parse_chat_response(&v).unwrap(),
            ChatOutcome::Answer(_)
        ));
    }

    #[test]
    fn test_missing_message_is_error() {
        assert!(parse_chat_response(&json!({ "done": true })).is_err());
    }

    #[test]
    fn test_tool_definition_wire_shape() {
        let def = ToolDefinition::function(
            "summarize_email",
            "Summarize one email",
            json!({ "type": "object", "properties": { "uid": { "type": "string" } } }),
        );
        let v = serde_json::to_value(&def).unwrap();
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "summarize_email");
        assert_eq!(v["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_tool_message_serializes_tool_name() {
        let msg = ChatMessage::tool_result("list_unread_emails", "[]");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_name"], "list_unread_emails");
        // An empty tool_calls vec stays off the wire
        assert!(v.get("tool_calls").is_none());
    }
}
