//! Conversation context handed to the reasoning engine.

use std::fmt::Write as _;

use gha_core::types::{ChatMessage, Role};

/// Render prior turns followed by the current query.
///
/// ```text
/// [Previous Conversation]
/// [2026-01-02T03:04:05+00:00]
/// User: ...
/// Tools_Responses: {...}
/// Assistant: ...
///
/// [End of Previous Conversation]
///
/// [Current Query]
/// ...
/// ```
///
/// The previous-conversation block is omitted for a fresh session.
pub fn render_context(history: &[ChatMessage], query: &str) -> String {
    let mut out = String::new();
    if !history.is_empty() {
        out.push_str("[Previous Conversation]\n");
        let mut current_turn = None;
        for message in history {
            if current_turn != Some(message.turn_id) {
                if current_turn.is_some() {
                    out.push('\n');
                }
                current_turn = Some(message.turn_id);
                let _ = writeln!(out, "[{}]", message.timestamp.to_rfc3339());
            }
            match message.role {
                Role::User => {
                    let _ = writeln!(out, "User: {}", message.content);
                }
                Role::Assistant => {
                    if let Some(trace) = message.tools_responses.as_ref().filter(|t| !t.is_empty()) {
                        let rendered = serde_json::to_string(trace).unwrap_or_default();
                        let _ = writeln!(out, "Tools_Responses: {rendered}");
                    }
                    let _ = writeln!(out, "Assistant: {}", message.content);
                }
            }
        }
        out.push_str("\n[End of Previous Conversation]\n\n");
    }
    out.push_str("[Current Query]\n");
    out.push_str(query);
    out
}
