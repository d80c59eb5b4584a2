//! Content record repository over the `content_records` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_timestamp, to_timestamp, Database, DatabaseError};
use crate::model::ContentRecord;
use crate::repository::{ContentRepository, RepoResult};

struct ContentRow {
    id: String,
    source: String,
    source_ref: String,
    title: String,
    content: String,
    summary: String,
    author: String,
    published_at: String,
    created_at: String,
}

impl ContentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source: row.get("source")?,
            source_ref: row.get("source_ref")?,
            title: row.get("title")?,
            content: row.get("content")?,
            summary: row.get("summary")?,
            author: row.get("author")?,
            published_at: row.get("published_at")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_record(self) -> Result<ContentRecord, DatabaseError> {
        Ok(ContentRecord {
            id: self.id,
            source: self.source,
            source_ref: self.source_ref,
            title: self.title,
            content: self.content,
            summary: self.summary,
            author: self.author,
            published_at: parse_timestamp("published_at", &self.published_at)?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

/// [`ContentRepository`] backed by the local SQLite database.
#[derive(Clone)]
pub struct SqliteContentRepository {
    db: Database,
}

impl SqliteContentRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ContentRepository for SqliteContentRepository {
    fn create(&self, record: &ContentRecord) -> RepoResult<ContentRecord> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO content_records (id, source, source_ref, title, content, summary,
                 author, published_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id,
                    record.source,
                    record.source_ref,
                    record.title,
                    record.content,
                    record.summary,
                    record.author,
                    to_timestamp(&record.published_at),
                    to_timestamp(&record.created_at),
                ],
            )?;
            Ok(record.clone())
        })
    }

    fn find_by_id(&self, id: &str) -> RepoResult<Option<ContentRecord>> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT * FROM content_records WHERE id = ?1",
                    params![id],
                    ContentRow::from_row,
                )
                .optional()?;
            row.map(ContentRow::into_record).transpose()
        })
    }
}
