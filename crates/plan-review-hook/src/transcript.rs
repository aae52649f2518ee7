//! Recent user turns from the session's JSONL transcript.
//!
//! Each transcript line is one JSON entry. User turns look like:
//!
//! ```json
//! {"type":"user","message":{"role":"user","content":"..."}}
//! {"type":"user","message":{"role":"user","content":[{"type":"text","text":"..."}]}}
//! ```
//!
//! Tool results are also recorded as user entries; they carry no text blocks
//! and are skipped. Any read failure yields no context.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::Value;
use tracing::debug;

/// User turns included in the review prompt.
pub const RECENT_TURNS: usize = 3;
/// Per-turn character budget.
pub const MAX_TURN_CHARS: usize = 2000;

/// Last `limit` user turns, oldest first, each truncated to `max_chars`.
pub fn recent_user_turns(path: &Path, limit: usize, max_chars: usize) -> Vec<String> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "transcript unavailable");
            return Vec::new();
        }
    };

    let mut turns = VecDeque::with_capacity(limit);
    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "transcript read failed");
                return Vec::new();
            }
        };
        let Some(text) = user_text(&line) else {
            continue;
        };
        if turns.len() == limit {
            turns.pop_front();
        }
        if limit > 0 {
            turns.push_back(truncate_chars(&text, max_chars));
        }
    }
    turns.into()
}

/// Text of a user turn, or `None` for anything else.
fn user_text(line: &str) -> Option<String> {
    let entry: Value = serde_json::from_str(line.trim()).ok()?;
    let message = entry.get("message")?;
    if message.get("role").and_then(Value::as_str) != Some("user") {
        return None;
    }

    let text = match message.get("content")? {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
