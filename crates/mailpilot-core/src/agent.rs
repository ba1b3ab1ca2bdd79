//! Conversation agent
//!
//! Drives one user turn: ask the model, run whatever tools it requested,
//! feed the results back, repeat until the model answers in plain text.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::llm::{ChatBackend, ChatMessage, ChatOutcome, ToolCall, ToolDefinition};
use crate::tools::{get_tool_definitions, ToolRegistry};

/// Upper bound on ask-model/run-tool cycles in a single turn. A model
/// that keeps requesting tools past this gets cut off with a fail-closed
/// answer instead of looping forever.
pub const MAX_TOOL_CYCLES: usize = 8;

/// The fail-closed answer appended when the cycle bound is hit
const GAVE_UP_ANSWER: &str =
    "I could not complete that request within the allowed number of tool calls.";

/// Per-turn execution state
enum TurnState {
    /// Send the accumulated history to the tool-enabled backend
    AskModel,
    /// Dispatch the tool calls the model just requested
    RunTool(Vec<ToolCall>),
    /// The turn is over; the payload is the user-visible answer
    Done(String),
}

/// Runs turns against a chat backend and a tool registry.
///
/// Owns no conversation state: the history lives in the caller and is
/// only appended to here.
pub struct Agent {
    backend: Arc<dyn ChatBackend>,
    tools: ToolRegistry,
    definitions: Vec<ToolDefinition>,
}

impl Agent {
    /// Create an agent over a backend and a tool registry
    pub fn new(backend: Arc<dyn ChatBackend>, tools: ToolRegistry) -> Self {
        Self {
            backend,
            tools,
            definitions: get_tool_definitions(),
        }
    }

    /// Run one turn to completion and return the final answer text.
    ///
    /// The caller has already appended the user message. This appends
    /// the assistant responses and tool results it produces, so the
    /// history stays a faithful transcript across turns.
    pub async fn run_turn(&self, history: &mut Vec<ChatMessage>) -> Result<String> {
        let mut state = TurnState::AskModel;
        let mut tool_cycles = 0usize;

        loop {
            state = match state {
                TurnState::AskModel => {
                    let outcome = self.backend.chat(history, &self.definitions).await?;
                    match outcome {
                        ChatOutcome::Answer(text) => {
                            history.push(ChatMessage::assistant(text.clone()));
                            TurnState::Done(text)
                        }
                        ChatOutcome::ToolCalls(calls) => {
                            history.push(ChatMessage::assistant_tool_calls(calls.clone()));
                            if tool_cycles >= MAX_TOOL_CYCLES {
                                warn!(
                                    "model still requesting tools after {} cycles, failing closed",
                                    tool_cycles
                                );
                                history.push(ChatMessage::assistant(GAVE_UP_ANSWER));
                                TurnState::Done(GAVE_UP_ANSWER.to_string())
                            } else {
                                tool_cycles += 1;
                                TurnState::RunTool(calls)
                            }
                        }
                    }
                }
                TurnState::RunTool(calls) => {
                    for call in &calls {
                        let name = call.function.name.clone();
                        let output = match self.tools.dispatch(call).await {
                            Ok(text) => text,
                            // Bad tool requests stay inside the turn; the
                            // model gets told and can apologize
                            Err(Error::ToolNotFound(n)) => {
                                warn!("model requested unknown tool {:?}", n);
                                format!("The model requested an unknown action: {}", n)
                            }
                            Err(Error::InvalidRequest(reason)) => {
                                warn!("malformed tool arguments: {}", reason);
                                format!("Invalid tool arguments: {}", reason)
                            }
                            Err(e) => return Err(e),
                        };
                        debug!(tool = %name, "tool finished");
                        history.push(ChatMessage::tool_result(name, output));
                    }
                    TurnState::AskModel
                }
                TurnState::Done(answer) => return Ok(answer),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::Mailbox;
    use crate::models::{EmailSummary, FetchedEmail};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mailbox that should never be reached in these tests unless the
    /// scripted calls name a real tool
    struct StubMailbox;

    #[async_trait]
    impl Mailbox for StubMailbox {
        async fn list_unread(&self) -> Result<Vec<EmailSummary>> {
            Ok(vec![])
        }

        async fn fetch_by_uid(&self, _uid: u32) -> Result<Option<FetchedEmail>> {
            Ok(None)
        }
    }

    /// Backend that replays a scripted sequence of outcomes
    struct ScriptedBackend {
        script: Mutex<Vec<ChatOutcome>>,
        chat_calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(mut outcomes: Vec<ChatOutcome>) -> Self {
            outcomes.reverse();
            Self {
                script: Mutex::new(outcomes),
                chat_calls: AtomicUsize::new(0),
            }
        }

        /// Always demands tools, no matter how many times it is asked
        fn relentless() -> Self {
            Self {
                script: Mutex::new(vec![]),
                chat_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> Result<ChatOutcome> {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop();
            Ok(next.unwrap_or_else(|| ChatOutcome::ToolCalls(vec![list_call()])))
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok("summary".to_string())
        }
    }

    fn list_call() -> ToolCall {
        serde_json::from_value(json!({
            "function": { "name": "list_unread_emails", "arguments": {} }
        }))
        .unwrap()
    }

    fn unknown_call() -> ToolCall {
        serde_json::from_value(json!({
            "function": { "name": "reformat_disk", "arguments": {} }
        }))
        .unwrap()
    }

    fn agent_with(backend: Arc<ScriptedBackend>) -> Agent {
        let tools = ToolRegistry::new(Arc::new(StubMailbox), backend.clone());
        Agent::new(backend, tools)
    }

    #[tokio::test]
    async fn test_tool_free_answer_ends_in_one_cycle() {
        let backend = Arc::new(ScriptedBackend::new(vec![ChatOutcome::Answer(
            "hello".to_string(),
        )]));
        let agent = agent_with(backend.clone());

        let mut history = vec![ChatMessage::user("hi")];
        let answer = agent.run_turn(&mut history).await.unwrap();

        assert_eq!(answer, "hello");
        assert_eq!(backend.chat_calls.load(Ordering::SeqCst), 1);
        // user message + one assistant answer
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_one_tool_cycle_then_answer() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ChatOutcome::ToolCalls(vec![list_call()]),
            ChatOutcome::Answer("no unread mail".to_string()),
        ]));
        let agent = agent_with(backend.clone());

        let mut history = vec![ChatMessage::user("what's unread?")];
        let before = history.len();
        let answer = agent.run_turn(&mut history).await.unwrap();

        assert_eq!(answer, "no unread mail");
        // two AskModel cycles, one RunTool cycle
        assert_eq!(backend.chat_calls.load(Ordering::SeqCst), 2);
        // assistant tool-call message, tool result, final answer
        assert_eq!(history.len() - before, 3);
        assert!(matches!(history[before + 1].role, crate::llm::Role::Tool));
        assert_eq!(history[before + 1].content, "[]");
    }

    #[tokio::test]
    async fn test_relentless_model_fails_closed() {
        let backend = Arc::new(ScriptedBackend::relentless());
        let agent = agent_with(backend.clone());

        let mut history = vec![ChatMessage::user("loop forever")];
        let answer = agent.run_turn(&mut history).await.unwrap();

        assert_eq!(answer, GAVE_UP_ANSWER);
        assert_eq!(
            backend.chat_calls.load(Ordering::SeqCst),
            MAX_TOOL_CYCLES + 1
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_recovers_within_turn() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ChatOutcome::ToolCalls(vec![unknown_call()]),
            ChatOutcome::Answer("sorry, I can't do that".to_string()),
        ]));
        let agent = agent_with(backend.clone());

        let mut history = vec![ChatMessage::user("wipe everything")];
        let answer = agent.run_turn(&mut history).await.unwrap();

        assert_eq!(answer, "sorry, I can't do that");
        let tool_msg = history
            .iter()
            .find(|m| matches!(m.role, crate::llm::Role::Tool))
            .unwrap();
        assert!(tool_msg.content.contains("unknown action"));
        assert!(tool_msg.content.contains("reformat_disk"));
    }

    #[tokio::test]
    async fn test_multiple_tool_calls_in_one_batch() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            ChatOutcome::ToolCalls(vec![list_call(), list_call()]),
            ChatOutcome::Answer("done".to_string()),
        ]));
        let agent = agent_with(backend.clone());

        let mut history = vec![ChatMessage::user("check twice")];
        agent.run_turn(&mut history).await.unwrap();

        let tool_results = history
            .iter()
            .filter(|m| matches!(m.role, crate::llm::Role::Tool))
            .count();
        assert_eq!(tool_results, 2);
    }
}
