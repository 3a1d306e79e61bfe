//! Terminal permission prompt
//!
//! Answers prompt envelopes by asking on stderr and reading stdin.

use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use warden_core::{prompt_channel, GrantScope, PromptChannel, PromptDecision};

/// Spawn the terminal responder and return the channel the manager sends on
pub fn spawn_terminal_prompt() -> PromptChannel {
    let (channel, mut rx) = prompt_channel(16);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(envelope) = rx.recv().await {
            eprintln!();
            eprintln!("{}", envelope.request.description);
            eprint!("Allow? [o]nce / [s]ession / [p]ersistent / [n]o [reason]: ");
            let _ = std::io::stderr().flush();

            let decision = match lines.next_line().await {
                Ok(Some(line)) => parse_answer(&line),
                Ok(None) => PromptDecision::Deny { user_message: None },
                Err(e) => {
                    warn!(error = %e, "Failed to read prompt answer");
                    PromptDecision::Deny { user_message: None }
                }
            };

            if !envelope.respond(decision) {
                eprintln!("(request no longer pending)");
            }
        }
    });

    channel
}

/// Map a typed answer to a decision. Anything unrecognised denies.
pub fn parse_answer(line: &str) -> PromptDecision {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let scope = match word.to_ascii_lowercase().as_str() {
        "o" | "once" | "y" | "yes" => Some(GrantScope::Once),
        "s" | "session" => Some(GrantScope::Session),
        "p" | "persistent" | "always" => Some(GrantScope::Persistent),
        _ => None,
    };

    match scope {
        Some(scope) => PromptDecision::Allow { scope },
        None => PromptDecision::Deny {
            user_message: (!rest.is_empty()).then(|| rest.to_string()),
        },
    }
}
