//! Domain types shared by the mailbox pipeline and the repositories.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open-ended auxiliary fields captured from a message, in insertion order.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Lifecycle state of an [`InboundMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Processed => "processed",
            MessageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "processing" => Ok(MessageStatus::Processing),
            "processed" => Ok(MessageStatus::Processed),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status '{}'", other)),
        }
    }
}

/// Error codes recorded on failed conversions, for operator triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The content record could not be persisted.
    RecordCreationFailed,
    /// The last permitted retry attempt failed.
    RetryExhausted,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RecordCreationFailed => "RECORD_CREATION_FAILED",
            ErrorCode::RetryExhausted => "RETRY_EXHAUSTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECORD_CREATION_FAILED" => Ok(ErrorCode::RecordCreationFailed),
            "RETRY_EXHAUSTED" => Ok(ErrorCode::RetryExhausted),
            other => Err(format!("unknown error code '{}'", other)),
        }
    }
}

/// One raw ingested item.
///
/// `message_key` is the deduplication key and must be unique across all time.
/// `id` is assigned locally when the message is decoded and is used for the
/// attachment directory and all repository updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    pub message_key: String,
    pub sender: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    pub received_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub status: MessageStatus,
    pub content_record_id: Option<String>,
    pub error_message: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
}

/// A file extracted from an inbound message and stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub storage_path: PathBuf,
}

/// Normalized content produced from an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub id: String,
    /// Source kind, `"email"` for the mailbox pipeline.
    pub source: String,
    /// Id of the inbound message this record was built from.
    pub source_ref: String,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub author: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Message counts by lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    pub pending: u64,
    pub processing: u64,
    pub processed: u64,
    pub failed: u64,
}

impl MessageStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.processed + self.failed
    }
}
