//! In-memory stand-ins for the mailbox, enrichment service and repositories.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use intake::db::{DatabaseError, SqliteContentRepository, SqliteMessageRepository};
use intake::email::{EmailError, MailboxConnector, MailboxSession, RawMessage, SearchCriteria};
use intake::ingest::{EnrichmentError, EnrichmentService};
use intake::repository::{ContentRepository, MessageRepository, RepoResult};
use intake::{Attachment, ContentRecord, ErrorCode, InboundMessage, MessageStats, MessageStatus};

#[derive(Debug, Clone)]
struct StoredMail {
    uid: u32,
    body: Vec<u8>,
    seen: bool,
}

#[derive(Default)]
struct MailboxState {
    mails: Vec<StoredMail>,
    next_uid: u32,
    searches: Vec<SearchCriteria>,
    fetches: Vec<u32>,
    connects: u32,
}

/// A mailbox held in memory. Clones share state.
#[derive(Clone, Default)]
pub struct FakeMailbox {
    state: Arc<Mutex<MailboxState>>,
    failing_connects: Arc<AtomicU32>,
    reject_login: Arc<AtomicBool>,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a message and returns its UID.
    pub fn deliver(&self, body: Vec<u8>) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.next_uid += 1;
        let uid = state.next_uid;
        state.mails.push(StoredMail {
            uid,
            body,
            seen: false,
        });
        uid
    }

    /// The next `n` connection attempts fail with a transient error.
    pub fn fail_next_connects(&self, n: u32) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }

    pub fn reject_login(&self) {
        self.reject_login.store(true, Ordering::SeqCst);
    }

    pub fn is_seen(&self, uid: u32) -> bool {
        let state = self.state.lock().unwrap();
        state.mails.iter().any(|m| m.uid == uid && m.seen)
    }

    pub fn mark_all_seen(&self) {
        let mut state = self.state.lock().unwrap();
        for mail in state.mails.iter_mut() {
            mail.seen = true;
        }
    }

    pub fn searches(&self) -> Vec<SearchCriteria> {
        self.state.lock().unwrap().searches.clone()
    }

    pub fn fetches(&self) -> Vec<u32> {
        self.state.lock().unwrap().fetches.clone()
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }
}

#[async_trait]
impl MailboxConnector for FakeMailbox {
    async fn open(&self) -> Result<Box<dyn MailboxSession>, EmailError> {
        self.state.lock().unwrap().connects += 1;
        if self.reject_login.load(Ordering::SeqCst) {
            return Err(EmailError::AuthenticationFailed("invalid credentials".into()));
        }
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(EmailError::ConnectionFailed("connection refused".into()));
        }
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<MailboxState>>,
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>, EmailError> {
        let mut state = self.state.lock().unwrap();
        state.searches.push(criteria.clone());
        Ok(state
            .mails
            .iter()
            .filter(|m| match criteria {
                SearchCriteria::Unseen => !m.seen,
                SearchCriteria::Since(_) => true,
            })
            .map(|m| m.uid)
            .collect())
    }

    async fn fetch(&mut self, uid: u32) -> Result<RawMessage, EmailError> {
        let mut state = self.state.lock().unwrap();
        state.fetches.push(uid);
        let mail = state
            .mails
            .iter()
            .find(|m| m.uid == uid)
            .ok_or_else(|| EmailError::ProtocolError(format!("no message {}", uid)))?;
        Ok(RawMessage {
            uid,
            sequence: uid,
            internal_date: None,
            body: mail.body.clone(),
        })
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), EmailError> {
        let mut state = self.state.lock().unwrap();
        if let Some(mail) = state.mails.iter_mut().find(|m| m.uid == uid) {
            mail.seen = true;
        }
        Ok(())
    }

    async fn logout(&mut self) -> Result<(), EmailError> {
        Ok(())
    }
}

/// Records every content id it is asked to enrich; optionally fails.
#[derive(Default)]
pub struct RecordingEnrichment {
    calls: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingEnrichment {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnrichmentService for RecordingEnrichment {
    async fn process(&self, content_id: &str) -> Result<(), EnrichmentError> {
        self.calls.lock().unwrap().push(content_id.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(EnrichmentError::Failed("model unavailable".into()));
        }
        Ok(())
    }
}

/// Content repository that can be switched into a failing mode.
pub struct FlakyContentRepository {
    inner: SqliteContentRepository,
    failing: AtomicBool,
}

impl FlakyContentRepository {
    pub fn new(inner: SqliteContentRepository) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ContentRepository for FlakyContentRepository {
    fn create(&self, record: &ContentRecord) -> RepoResult<ContentRecord> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DatabaseError::LockPoisoned);
        }
        self.inner.create(record)
    }

    fn find_by_id(&self, id: &str) -> RepoResult<Option<ContentRecord>> {
        self.inner.find_by_id(id)
    }
}

/// Message repository operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageOp {
    Exists,
    Create,
    MarkProcessed,
    MarkFailed,
}

/// Message repository whose individual operations can be switched into a
/// failing mode. Reads other than `exists` always pass through.
pub struct FlakyMessageRepository {
    inner: SqliteMessageRepository,
    failing: Mutex<HashSet<MessageOp>>,
}

impl FlakyMessageRepository {
    pub fn new(inner: SqliteMessageRepository) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, op: MessageOp) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, op: MessageOp) -> RepoResult<()> {
        if self.failing.lock().unwrap().contains(&op) {
            return Err(DatabaseError::LockPoisoned);
        }
        Ok(())
    }
}

impl MessageRepository for FlakyMessageRepository {
    fn exists(&self, message_key: &str) -> RepoResult<bool> {
        self.check(MessageOp::Exists)?;
        self.inner.exists(message_key)
    }

    fn create(&self, message: &InboundMessage) -> RepoResult<InboundMessage> {
        self.check(MessageOp::Create)?;
        self.inner.create(message)
    }

    fn find_by_id(&self, id: &str) -> RepoResult<Option<InboundMessage>> {
        self.inner.find_by_id(id)
    }

    fn find_by_key(&self, message_key: &str) -> RepoResult<Option<InboundMessage>> {
        self.inner.find_by_key(message_key)
    }

    fn update_status(&self, id: &str, status: MessageStatus) -> RepoResult<()> {
        self.inner.update_status(id, status)
    }

    fn mark_processed(&self, id: &str, content_record_id: &str) -> RepoResult<()> {
        self.check(MessageOp::MarkProcessed)?;
        self.inner.mark_processed(id, content_record_id)
    }

    fn mark_failed(&self, id: &str, error_message: &str) -> RepoResult<()> {
        self.check(MessageOp::MarkFailed)?;
        self.inner.mark_failed(id, error_message)
    }

    fn mark_failed_with_code(
        &self,
        id: &str,
        error_message: &str,
        code: ErrorCode,
    ) -> RepoResult<()> {
        self.check(MessageOp::MarkFailed)?;
        self.inner.mark_failed_with_code(id, error_message, code)
    }

    fn update_last_retry_at(&self, id: &str) -> RepoResult<()> {
        self.inner.update_last_retry_at(id)
    }

    fn get_retry_candidates(&self, max_retries: u32, limit: u32) -> RepoResult<Vec<InboundMessage>> {
        self.inner.get_retry_candidates(max_retries, limit)
    }

    fn get_stale_candidates(
        &self,
        older_than: DateTime<Utc>,
        max_retries: u32,
        limit: u32,
    ) -> RepoResult<Vec<InboundMessage>> {
        self.inner.get_stale_candidates(older_than, max_retries, limit)
    }

    fn get_stats(&self) -> RepoResult<MessageStats> {
        self.inner.get_stats()
    }

    fn add_attachments(&self, message_id: &str, attachments: &[Attachment]) -> RepoResult<()> {
        self.inner.add_attachments(message_id, attachments)
    }

    fn list_attachments(&self, message_id: &str) -> RepoResult<Vec<Attachment>> {
        self.inner.list_attachments(message_id)
    }
}
