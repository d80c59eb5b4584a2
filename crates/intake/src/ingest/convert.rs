//! Inbound message to content record conversion helpers.
//!
//! Lengths are counted in characters, never bytes, so multi-byte text is
//! never split inside a code point.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{ContentRecord, InboundMessage};

/// Upper bound on stored content length.
pub const MAX_CONTENT_CHARS: usize = 5000;

/// How far back from the summary cut a sentence end is searched for.
pub const SENTENCE_WINDOW: usize = 50;

const ELLIPSIS: &str = "...";
const UNTITLED: &str = "(no subject)";
const SOURCE_EMAIL: &str = "email";

/// Body text, else HTML body, else subject.
pub fn select_source(message: &InboundMessage) -> &str {
    [&message.body_text, &message.body_html, &message.subject]
        .into_iter()
        .find(|s| !s.trim().is_empty())
        .map(String::as_str)
        .unwrap_or_default()
}

/// Trims and caps content at [`MAX_CONTENT_CHARS`].
pub fn truncate_content(content: &str) -> String {
    let trimmed = content.trim();
    match trimmed.char_indices().nth(MAX_CONTENT_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}

/// Short summary of at most `length` characters.
///
/// Content that fits is returned whole. Otherwise the first `length`
/// characters are cut back to the last sentence terminator within the final
/// [`SENTENCE_WINDOW`] characters of that window; without one, the window is
/// cut hard and `...` appended.
pub fn summarize(content: &str, length: usize) -> String {
    let Some((cut, _)) = content.char_indices().nth(length) else {
        return content.to_string();
    };
    let window = &content[..cut];

    let search_from = length.saturating_sub(SENTENCE_WINDOW);
    let sentence_end = window
        .char_indices()
        .skip(search_from)
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .last();

    match sentence_end {
        Some((idx, c)) => window[..idx + c.len_utf8()].to_string(),
        None => format!("{}{}", window, ELLIPSIS),
    }
}

/// Builds the content record for a message, or `None` if the message has no
/// usable content at all.
pub fn build_record(
    message: &InboundMessage,
    summary_length: usize,
    now: DateTime<Utc>,
) -> Option<ContentRecord> {
    let content = truncate_content(select_source(message));
    if content.is_empty() {
        return None;
    }

    let title = match message.subject.trim() {
        "" => UNTITLED.to_string(),
        subject => subject.to_string(),
    };

    Some(ContentRecord {
        id: Uuid::new_v4().to_string(),
        source: SOURCE_EMAIL.to_string(),
        source_ref: message.id.clone(),
        title,
        summary: summarize(&content, summary_length),
        content,
        author: message.sender.clone(),
        published_at: message.received_at,
        created_at: now,
    })
}
