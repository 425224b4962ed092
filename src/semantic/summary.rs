//! Session summary synthesis.
//!
//! A short synopsis of a whole chat session, regenerated whenever the
//! session's message set changes. When the transcript blows the character
//! budget, the opening message plus the most recent few stand in for it:
//! the opening states the user's goal, the tail states where it ended up.

use crate::chat::Role;

/// How many trailing messages represent a too-long transcript.
const RECENT_MESSAGES: usize = 3;

const TRUNCATION_SUFFIX: &str = "...";

/// Build the summary text from (role, extracted text) pairs, in
/// conversation order. Returns `None` when there is nothing to summarize.
pub fn summarize_session(messages: &[(Role, String)], max_chars: usize) -> Option<String> {
    let lines: Vec<String> = messages
        .iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(role, text)| {
            let speaker = match role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => "System",
            };
            format!("{speaker}: {}", text.trim())
        })
        .collect();

    if lines.is_empty() {
        return None;
    }

    let full = lines.join("\n");
    if full.chars().count() <= max_chars {
        return Some(full);
    }

    // too long: first message plus the most recent few
    let mut picked: Vec<&String> = vec![&lines[0]];
    let tail_start = lines.len().saturating_sub(RECENT_MESSAGES).max(1);
    picked.extend(&lines[tail_start..]);

    let condensed = picked
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    Some(truncate(&condensed, max_chars))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_SUFFIX.len());
    let truncated: String = text.chars().take(keep).collect();
    format!("{truncated}{TRUNCATION_SUFFIX}")
}
