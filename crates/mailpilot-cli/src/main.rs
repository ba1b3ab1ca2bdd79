//! MailPilot CLI
//!
//! Interactive shell: one line in, one answer out. The conversation
//! history lives here for the life of the process; typing `quit` (any
//! case) exits before anything talks to the network.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

use mailpilot_core::agent::Agent;
use mailpilot_core::config::Config;
use mailpilot_core::llm::{ChatMessage, OllamaClient};
use mailpilot_core::mail::ImapMailbox;
use mailpilot_core::tools::ToolRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so answers on stdout stay clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // A .env file next to the binary is honored but optional
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    println!(
        "Using model: {} base_url: {}",
        config.chat_model, config.ollama_host
    );

    let backend = Arc::new(OllamaClient::new(&config)?);
    let mailbox = Arc::new(ImapMailbox::new(&config));
    let tools = ToolRegistry::new(mailbox, backend.clone());
    let agent = Agent::new(backend, tools);

    println!("Type an instruction or \"quit\".\n");

    let mut history: Vec<ChatMessage> = Vec::new();
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            // EOF ends the session like quit does
            None => break,
        };

        if is_quit(&line) {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        history.push(ChatMessage::user(line));

        match agent.run_turn(&mut history).await {
            Ok(answer) => println!("{}", answer),
            Err(e) => {
                // A failed turn never kills the shell
                error!("turn failed: {}", e);
                match e.action_hint() {
                    Some(hint) => println!("error: {} ({})", e, hint),
                    None => println!("error: {}", e),
                }
            }
        }
    }

    Ok(())
}

/// `quit`, any case, surrounding whitespace ignored
fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("quit")
}
