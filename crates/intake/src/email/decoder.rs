//! Turns fetched message buffers into [`InboundMessage`] records.

use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use mail_parser::{Address, HeaderName, HeaderValue, Message, MessageParser, MimeHeaders, PartType};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{InboundMessage, MessageStatus, Metadata};

use super::connector::RawMessage;
use super::error::{EmailError, Result};

/// Stateless message decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageDecoder;

impl MessageDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decodes one raw buffer.
    ///
    /// A buffer the MIME parser rejects is treated as plain text once; only an
    /// empty buffer is an error.
    pub fn decode(&self, raw: &RawMessage) -> Result<InboundMessage> {
        self.decode_at(raw, Utc::now())
    }

    pub(crate) fn decode_at(&self, raw: &RawMessage, now: DateTime<Utc>) -> Result<InboundMessage> {
        if raw.body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(EmailError::ParseError(format!(
                "message UID {} has an empty body",
                raw.uid
            )));
        }

        let mut metadata = Metadata::new();
        metadata.insert("uid".to_string(), Value::from(raw.uid));
        metadata.insert("sequence".to_string(), Value::from(raw.sequence));
        if let Some(date) = raw.internal_date {
            metadata.insert("internal_date".to_string(), Value::from(date.to_rfc3339()));
        }

        let decoded = match MessageParser::default().parse(&raw.body) {
            Some(message) => decode_mime(&message, &mut metadata),
            None => {
                debug!("UID {} is not a MIME message, using raw text", raw.uid);
                Envelope {
                    body_text: String::from_utf8_lossy(&raw.body).trim().to_string(),
                    ..Envelope::default()
                }
            }
        };

        let received_at = decoded.date.or(raw.internal_date).unwrap_or(now);
        let message_key = match decoded.message_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => synthesize_key(raw.uid, received_at),
        };

        let mut body_text = decoded.body_text;
        if body_text.trim().is_empty() && decoded.body_html.trim().is_empty() {
            body_text = decoded.subject.clone();
        }

        Ok(InboundMessage {
            id: Uuid::new_v4().to_string(),
            message_key,
            sender: decoded.sender,
            subject: decoded.subject,
            body_text,
            body_html: decoded.body_html,
            received_at,
            metadata,
            status: MessageStatus::Pending,
            content_record_id: None,
            error_message: None,
            error_code: None,
            retry_count: 0,
            last_retry_at: None,
        })
    }
}

/// Fallback dedup key for messages without a Message-ID header.
///
/// Not collision-proof: two distinct keyless messages with the same UID and
/// timestamp (e.g. after a UIDVALIDITY reset) collapse into one.
pub fn synthesize_key(sequence: u32, at: DateTime<Utc>) -> String {
    format!("generated-{}-{}", sequence, at.timestamp())
}

#[derive(Default)]
struct Envelope {
    message_id: Option<String>,
    sender: String,
    subject: String,
    date: Option<DateTime<Utc>>,
    body_text: String,
    body_html: String,
}

fn decode_mime(message: &Message<'_>, metadata: &mut Metadata) -> Envelope {
    let from = message.from().and_then(|from| from.first());
    let sender = from
        .and_then(|addr| addr.address())
        .map(|a| a.trim().to_string())
        .unwrap_or_default();
    if let Some(name) = from.and_then(|addr| addr.name()) {
        metadata.insert("from_name".to_string(), Value::from(name));
    }

    insert_addresses(metadata, "to", message.to());
    insert_addresses(metadata, "cc", message.cc());
    insert_addresses(metadata, "reply_to", message.reply_to());
    insert_texts(metadata, "in_reply_to", message.in_reply_to());
    insert_texts(metadata, "references", message.references());

    for header in message.headers() {
        if let HeaderName::Other(name) = &header.name {
            let texts = header_texts(&header.value);
            if texts.is_empty() {
                continue;
            }
            append_value(metadata, name.to_ascii_lowercase(), Value::from(texts.join(" ")));
        }
    }

    let mut body_text = String::new();
    let mut body_html = String::new();
    for part in &message.parts {
        let is_attachment = part.attachment_name().is_some()
            || part
                .content_disposition()
                .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"));
        if is_attachment {
            continue;
        }
        match &part.body {
            PartType::Text(text) => push_section(&mut body_text, text),
            PartType::Html(html) => push_section(&mut body_html, html),
            _ => {}
        }
    }

    Envelope {
        message_id: message.message_id().map(str::to_string),
        sender,
        subject: message.subject().unwrap_or_default().trim().to_string(),
        date: message
            .date()
            .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single()),
        body_text: body_text.trim().to_string(),
        body_html: body_html.trim().to_string(),
    }
}

fn push_section(target: &mut String, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    if !target.is_empty() {
        target.push_str("\n\n");
    }
    target.push_str(text);
}

fn insert_addresses(metadata: &mut Metadata, key: &str, address: Option<&Address<'_>>) {
    let Some(address) = address else {
        return;
    };
    let list: Vec<Value> = address
        .iter()
        .filter_map(|addr| addr.address())
        .map(Value::from)
        .collect();
    if !list.is_empty() {
        metadata.insert(key.to_string(), Value::Array(list));
    }
}

fn insert_texts(metadata: &mut Metadata, key: &str, value: &HeaderValue<'_>) {
    let texts = header_texts(value);
    match texts.len() {
        0 => {}
        1 => {
            metadata.insert(key.to_string(), Value::from(texts[0].clone()));
        }
        _ => {
            metadata.insert(
                key.to_string(),
                Value::Array(texts.into_iter().map(Value::from).collect()),
            );
        }
    }
}

fn header_texts(value: &HeaderValue<'_>) -> Vec<String> {
    let texts: Vec<String> = match value {
        HeaderValue::Text(text) => vec![text.trim().to_string()],
        HeaderValue::TextList(list) => list.iter().map(|t| t.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    texts.into_iter().filter(|t| !t.is_empty()).collect()
}

/// Repeated headers keep every occurrence.
fn append_value(metadata: &mut Metadata, key: String, value: Value) {
    match metadata.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            metadata.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(body: &str) -> RawMessage {
        RawMessage {
            uid: 42,
            sequence: 7,
            internal_date: None,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_decode_simple_message() {
        let message = MessageDecoder::new()
            .decode(&raw(concat!(
                "From: \"Jane Doe\" <jane@example.com>\r\n",
                "To: team@example.com, ops@example.com\r\n",
                "Subject: Quarterly report\r\n",
                "Message-ID: <abc123@example.com>\r\n",
                "Date: Tue, 5 Mar 2024 10:00:00 +0000\r\n",
                "\r\n",
                "Numbers are up.\r\n"
            )))
            .unwrap();

        assert_eq!(message.sender, "jane@example.com");
        assert_eq!(message.subject, "Quarterly report");
        assert_eq!(message.message_key, "abc123@example.com");
        assert_eq!(message.body_text, "Numbers are up.");
        assert_eq!(message.body_html, "");
        assert_eq!(message.received_at.to_rfc3339(), "2024-03-05T10:00:00+00:00");
        assert_eq!(message.status, MessageStatus::Pending);
        assert_eq!(message.metadata["from_name"], "Jane Doe");
        assert_eq!(
            message.metadata["to"],
            serde_json::json!(["team@example.com", "ops@example.com"])
        );
        assert_eq!(message.metadata["uid"], 42);
    }

    #[test]
    fn test_decode_multipart_alternative() {
        let message = MessageDecoder::new()
            .decode(&raw(concat!(
                "From: news@example.com\r\n",
                "Subject: Digest\r\n",
                "MIME-Version: 1.0\r\n",
                "Content-Type: multipart/alternative; boundary=\"b1\"\r\n",
                "\r\n",
                "--b1\r\n",
                "Content-Type: text/plain; charset=utf-8\r\n",
                "\r\n",
                "Plain version\r\n",
                "--b1\r\n",
                "Content-Type: text/html; charset=utf-8\r\n",
                "\r\n",
                "<p>HTML version</p>\r\n",
                "--b1--\r\n"
            )))
            .unwrap();

        assert_eq!(message.body_text, "Plain version");
        assert_eq!(message.body_html, "<p>HTML version</p>");
    }

    #[test]
    fn test_attachment_parts_are_not_bodies() {
        let message = MessageDecoder::new()
            .decode(&raw(concat!(
                "From: a@example.com\r\n",
                "Subject: Invoice\r\n",
                "MIME-Version: 1.0\r\n",
                "Content-Type: multipart/mixed; boundary=\"b2\"\r\n",
                "\r\n",
                "--b2\r\n",
                "Content-Type: text/plain\r\n",
                "\r\n",
                "See attached.\r\n",
                "--b2\r\n",
                "Content-Type: text/plain; name=\"notes.txt\"\r\n",
                "Content-Disposition: attachment; filename=\"notes.txt\"\r\n",
                "\r\n",
                "attachment text\r\n",
                "--b2--\r\n"
            )))
            .unwrap();

        assert_eq!(message.body_text, "See attached.");
    }

    #[test]
    fn test_empty_body_falls_back_to_subject() {
        let message = MessageDecoder::new()
            .decode(&raw("From: a@example.com\r\nSubject: Only a subject\r\n\r\n"))
            .unwrap();
        assert_eq!(message.body_text, "Only a subject");
    }

    #[test]
    fn test_missing_message_id_synthesizes_key() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let message = MessageDecoder::new()
            .decode_at(&raw("From: a@example.com\r\nSubject: Hi\r\n\r\nbody\r\n"), now)
            .unwrap();
        assert_eq!(message.message_key, format!("generated-42-{}", now.timestamp()));
        assert_eq!(message.received_at, now);
    }

    #[test]
    fn test_internal_date_used_when_date_header_missing() {
        let internal = Utc.with_ymd_and_hms(2023, 6, 1, 8, 0, 0).unwrap();
        let mut input = raw("From: a@example.com\r\nSubject: Hi\r\n\r\nbody\r\n");
        input.internal_date = Some(internal);
        let message = MessageDecoder::new().decode(&input).unwrap();
        assert_eq!(message.received_at, internal);
        assert!(message.message_key.ends_with(&internal.timestamp().to_string()));
    }

    #[test]
    fn test_unknown_headers_are_preserved() {
        let message = MessageDecoder::new()
            .decode(&raw(concat!(
                "From: a@example.com\r\n",
                "Subject: Hi\r\n",
                "X-Campaign: spring\r\n",
                "X-Campaign: summer\r\n",
                "In-Reply-To: <parent@example.com>\r\n",
                "\r\n",
                "body\r\n"
            )))
            .unwrap();
        assert_eq!(
            message.metadata["x-campaign"],
            serde_json::json!(["spring", "summer"])
        );
        assert_eq!(message.metadata["in_reply_to"], "parent@example.com");
    }

    #[test]
    fn test_empty_buffer_is_parse_error() {
        let err = MessageDecoder::new().decode(&raw("  \r\n")).unwrap_err();
        assert!(matches!(err, EmailError::ParseError(_)));
    }

    #[test]
    fn test_synthesize_key_format() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(synthesize_key(9, at), "generated-9-1700000000");
    }
}
