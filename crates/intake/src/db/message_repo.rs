//! Inbound message repository for the `inbound_messages` and
//! `message_attachments` tables.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_timestamp, to_timestamp, Database, DatabaseError};
use crate::model::{
    Attachment, ErrorCode, InboundMessage, Metadata, MessageStats, MessageStatus,
};
use crate::repository::{MessageRepository, RepoResult};

const SELECT_COLUMNS: &str = "id, message_key, sender, subject, body_text, body_html, received_at,
     metadata, status, content_record_id, error_message, error_code, retry_count, last_retry_at";

/// A raw message row as stored, before mapping to [`InboundMessage`].
struct MessageRow {
    id: String,
    message_key: String,
    sender: String,
    subject: String,
    body_text: String,
    body_html: String,
    received_at: String,
    metadata: String,
    status: String,
    content_record_id: Option<String>,
    error_message: Option<String>,
    error_code: Option<String>,
    retry_count: u32,
    last_retry_at: Option<String>,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            message_key: row.get("message_key")?,
            sender: row.get("sender")?,
            subject: row.get("subject")?,
            body_text: row.get("body_text")?,
            body_html: row.get("body_html")?,
            received_at: row.get("received_at")?,
            metadata: row.get("metadata")?,
            status: row.get("status")?,
            content_record_id: row.get("content_record_id")?,
            error_message: row.get("error_message")?,
            error_code: row.get("error_code")?,
            retry_count: row.get("retry_count")?,
            last_retry_at: row.get("last_retry_at")?,
        })
    }

    fn into_message(self) -> Result<InboundMessage, DatabaseError> {
        let metadata: Metadata =
            serde_json::from_str(&self.metadata).map_err(|e| DatabaseError::Corrupt {
                column: "metadata",
                reason: e.to_string(),
            })?;
        let status = self
            .status
            .parse::<MessageStatus>()
            .map_err(|reason| DatabaseError::Corrupt {
                column: "status",
                reason,
            })?;
        let error_code = self
            .error_code
            .map(|code| code.parse::<ErrorCode>())
            .transpose()
            .map_err(|reason| DatabaseError::Corrupt {
                column: "error_code",
                reason,
            })?;
        let last_retry_at = self
            .last_retry_at
            .as_deref()
            .map(|ts| parse_timestamp("last_retry_at", ts))
            .transpose()?;

        Ok(InboundMessage {
            id: self.id,
            message_key: self.message_key,
            sender: self.sender,
            subject: self.subject,
            body_text: self.body_text,
            body_html: self.body_html,
            received_at: parse_timestamp("received_at", &self.received_at)?,
            metadata,
            status,
            content_record_id: self.content_record_id,
            error_message: self.error_message,
            error_code,
            retry_count: self.retry_count,
            last_retry_at,
        })
    }
}

/// [`MessageRepository`] backed by the local SQLite database.
#[derive(Clone)]
pub struct SqliteMessageRepository {
    db: Database,
}

impl SqliteMessageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Runs an UPDATE and turns "no row touched" into `NotFound`.
fn update_one(
    conn: &Connection,
    id: &str,
    sql: &str,
    values: &[&dyn rusqlite::types::ToSql],
) -> Result<(), DatabaseError> {
    let changed = conn.execute(sql, values)?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "message",
            id: id.to_string(),
        });
    }
    Ok(())
}

fn find_message(conn: &Connection, id: &str) -> Result<Option<InboundMessage>, DatabaseError> {
    let sql = format!("SELECT {} FROM inbound_messages WHERE id = ?1", SELECT_COLUMNS);
    let row = conn
        .query_row(&sql, params![id], MessageRow::from_row)
        .optional()?;
    row.map(MessageRow::into_message).transpose()
}

impl MessageRepository for SqliteMessageRepository {
    fn exists(&self, message_key: &str) -> RepoResult<bool> {
        self.db.with_conn(|conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM inbound_messages WHERE message_key = ?1",
                params![message_key],
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
    }

    fn create(&self, message: &InboundMessage) -> RepoResult<InboundMessage> {
        let metadata = serde_json::to_string(&message.metadata).map_err(|e| {
            DatabaseError::Corrupt {
                column: "metadata",
                reason: e.to_string(),
            }
        })?;
        let now = to_timestamp(&Utc::now());

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO inbound_messages (id, message_key, sender, subject, body_text,
                 body_html, received_at, metadata, status, content_record_id, error_message,
                 error_code, retry_count, last_retry_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
                params![
                    message.id,
                    message.message_key,
                    message.sender,
                    message.subject,
                    message.body_text,
                    message.body_html,
                    to_timestamp(&message.received_at),
                    metadata,
                    message.status.as_str(),
                    message.content_record_id,
                    message.error_message,
                    message.error_code.map(|c| c.as_str()),
                    message.retry_count,
                    message.last_retry_at.as_ref().map(to_timestamp),
                    now,
                ],
            )?;

            find_message(conn, &message.id)?.ok_or_else(|| DatabaseError::NotFound {
                entity: "message",
                id: message.id.clone(),
            })
        })
    }

    fn find_by_id(&self, id: &str) -> RepoResult<Option<InboundMessage>> {
        self.db.with_conn(|conn| find_message(conn, id))
    }

    fn find_by_key(&self, message_key: &str) -> RepoResult<Option<InboundMessage>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM inbound_messages WHERE message_key = ?1",
                SELECT_COLUMNS
            );
            let row = conn
                .query_row(&sql, params![message_key], MessageRow::from_row)
                .optional()?;
            row.map(MessageRow::into_message).transpose()
        })
    }

    fn update_status(&self, id: &str, status: MessageStatus) -> RepoResult<()> {
        let now = to_timestamp(&Utc::now());
        self.db.with_conn(|conn| {
            update_one(
                conn,
                id,
                "UPDATE inbound_messages SET status = ?2, updated_at = ?3 WHERE id = ?1",
                &[&id, &status.as_str(), &now],
            )
        })
    }

    fn mark_processed(&self, id: &str, content_record_id: &str) -> RepoResult<()> {
        let now = to_timestamp(&Utc::now());
        self.db.with_conn(|conn| {
            update_one(
                conn,
                id,
                "UPDATE inbound_messages SET status = 'processed', content_record_id = ?2,
                 updated_at = ?3 WHERE id = ?1",
                &[&id, &content_record_id, &now],
            )
        })
    }

    fn mark_failed(&self, id: &str, error_message: &str) -> RepoResult<()> {
        let now = to_timestamp(&Utc::now());
        self.db.with_conn(|conn| {
            update_one(
                conn,
                id,
                "UPDATE inbound_messages SET status = 'failed', error_message = ?2,
                 updated_at = ?3 WHERE id = ?1",
                &[&id, &error_message, &now],
            )
        })
    }

    fn mark_failed_with_code(
        &self,
        id: &str,
        error_message: &str,
        code: ErrorCode,
    ) -> RepoResult<()> {
        let now = to_timestamp(&Utc::now());
        self.db.with_conn(|conn| {
            update_one(
                conn,
                id,
                "UPDATE inbound_messages SET status = 'failed', error_message = ?2,
                 error_code = ?3, updated_at = ?4 WHERE id = ?1",
                &[&id, &error_message, &code.as_str(), &now],
            )
        })
    }

    fn update_last_retry_at(&self, id: &str) -> RepoResult<()> {
        let now = to_timestamp(&Utc::now());
        self.db.with_conn(|conn| {
            update_one(
                conn,
                id,
                "UPDATE inbound_messages SET retry_count = retry_count + 1,
                 last_retry_at = ?2, updated_at = ?2 WHERE id = ?1",
                &[&id, &now],
            )
        })
    }

    fn get_retry_candidates(
        &self,
        max_retries: u32,
        limit: u32,
    ) -> RepoResult<Vec<InboundMessage>> {
        self.db.with_conn(|conn| {
            // Never-retried messages first, then the ones that waited longest.
            let sql = format!(
                "SELECT {} FROM inbound_messages
                 WHERE status = 'failed' AND retry_count < ?1
                 ORDER BY last_retry_at IS NOT NULL, last_retry_at ASC, created_at ASC
                 LIMIT ?2",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![max_retries, limit], MessageRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    fn get_stale_candidates(
        &self,
        older_than: DateTime<Utc>,
        max_retries: u32,
        limit: u32,
    ) -> RepoResult<Vec<InboundMessage>> {
        let cutoff = to_timestamp(&older_than);
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM inbound_messages
                 WHERE status IN ('pending', 'processing') AND updated_at < ?1
                   AND retry_count < ?2
                 ORDER BY updated_at ASC
                 LIMIT ?3",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![cutoff, max_retries, limit], MessageRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    fn get_stats(&self) -> RepoResult<MessageStats> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM inbound_messages GROUP BY status")?;
            let counts = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut stats = MessageStats::default();
            for (status, count) in counts {
                match status.parse::<MessageStatus>() {
                    Ok(MessageStatus::Pending) => stats.pending = count,
                    Ok(MessageStatus::Processing) => stats.processing = count,
                    Ok(MessageStatus::Processed) => stats.processed = count,
                    Ok(MessageStatus::Failed) => stats.failed = count,
                    Err(reason) => log::warn!("Ignoring rows with {}", reason),
                }
            }
            Ok(stats)
        })
    }

    fn add_attachments(&self, message_id: &str, attachments: &[Attachment]) -> RepoResult<()> {
        if attachments.is_empty() {
            return Ok(());
        }

        let now = to_timestamp(&Utc::now());
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO message_attachments
                 (message_id, filename, content_type, size_bytes, storage_path, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for attachment in attachments {
                stmt.execute(params![
                    message_id,
                    attachment.filename,
                    attachment.content_type,
                    attachment.size_bytes,
                    attachment.storage_path.to_string_lossy(),
                    now,
                ])?;
            }
            Ok(())
        })
    }

    fn list_attachments(&self, message_id: &str) -> RepoResult<Vec<Attachment>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT filename, content_type, size_bytes, storage_path
                 FROM message_attachments WHERE message_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![message_id], |row| {
                    Ok(Attachment {
                        filename: row.get(0)?,
                        content_type: row.get(1)?,
                        size_bytes: row.get(2)?,
                        storage_path: PathBuf::from(row.get::<_, String>(3)?),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
