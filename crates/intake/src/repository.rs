//! Persistence contracts consumed by the ingestion processor.
//!
//! The processor only talks to storage through these traits. Implementations
//! must make `exists`/`create` atomic with respect to `message_key`; the
//! processor does no cross-process locking of its own.

use chrono::{DateTime, Utc};

use crate::db::DatabaseError;
use crate::model::{
    Attachment, ContentRecord, ErrorCode, InboundMessage, MessageStats, MessageStatus,
};

pub type RepoResult<T> = std::result::Result<T, DatabaseError>;

pub trait MessageRepository: Send + Sync {
    /// Returns true if a message with this dedup key is already stored.
    fn exists(&self, message_key: &str) -> RepoResult<bool>;

    /// Inserts a new message and returns it as stored.
    fn create(&self, message: &InboundMessage) -> RepoResult<InboundMessage>;

    fn find_by_id(&self, id: &str) -> RepoResult<Option<InboundMessage>>;

    fn find_by_key(&self, message_key: &str) -> RepoResult<Option<InboundMessage>>;

    fn update_status(&self, id: &str, status: MessageStatus) -> RepoResult<()>;

    /// Sets `Processed` together with the content record back-reference.
    fn mark_processed(&self, id: &str, content_record_id: &str) -> RepoResult<()>;

    fn mark_failed(&self, id: &str, error_message: &str) -> RepoResult<()>;

    fn mark_failed_with_code(
        &self,
        id: &str,
        error_message: &str,
        code: ErrorCode,
    ) -> RepoResult<()>;

    /// Increments `retry_count` and stamps `last_retry_at`.
    fn update_last_retry_at(&self, id: &str) -> RepoResult<()>;

    /// Failed messages with `retry_count < max_retries`, oldest retry first.
    fn get_retry_candidates(&self, max_retries: u32, limit: u32)
        -> RepoResult<Vec<InboundMessage>>;

    /// `Pending` or `Processing` messages last updated before `older_than`
    /// with `retry_count < max_retries`. These were abandoned mid-conversion.
    fn get_stale_candidates(
        &self,
        older_than: DateTime<Utc>,
        max_retries: u32,
        limit: u32,
    ) -> RepoResult<Vec<InboundMessage>>;

    fn get_stats(&self) -> RepoResult<MessageStats>;

    fn add_attachments(&self, message_id: &str, attachments: &[Attachment]) -> RepoResult<()>;

    fn list_attachments(&self, message_id: &str) -> RepoResult<Vec<Attachment>>;
}

pub trait ContentRepository: Send + Sync {
    fn create(&self, record: &ContentRecord) -> RepoResult<ContentRecord>;

    fn find_by_id(&self, id: &str) -> RepoResult<Option<ContentRecord>>;
}
