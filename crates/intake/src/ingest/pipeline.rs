//! One poll cycle: fetch, decode, filter, dedup, persist, convert, retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{Config, MailboxConfig};
use crate::db::{Database, SqliteContentRepository, SqliteMessageRepository};
use crate::email::{
    connect_with_retry, is_spam, AttachmentExtractor, CandidateFetcher, EmailError,
    ImapConnector, MailboxConnector, MessageDecoder, RawMessage, RetryPolicy, SearchCriteria,
    SearchMode, SenderFilter, SpamClassifier,
};
use crate::error::Result;
use crate::model::{ErrorCode, InboundMessage, MessageStatus};
use crate::repository::{ContentRepository, MessageRepository};
use crate::sanitize::{redact_address, redact_path};
use crate::shutdown::Shutdown;

use super::convert::build_record;
use super::enrichment::{service_from_config, EnrichmentDispatcher, EnrichmentService};

/// Per-cycle tuning taken from the configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry_policy: RetryPolicy,
    pub mark_as_read: bool,
    pub max_days_back: u32,
    pub batch_size: u32,
    pub spam_threshold: f64,
    pub max_retry_attempts: u32,
    pub retry_batch_size: u32,
    pub summary_length: usize,
    /// Age after which an unfinished message is swept like a failed one.
    pub stale_after: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        let mailbox: &MailboxConfig = &config.mailbox;
        Self {
            retry_policy: RetryPolicy {
                max_retries: mailbox.max_retries,
                retry_delay: mailbox.retry_delay(),
            },
            mark_as_read: mailbox.mark_as_read,
            max_days_back: mailbox.max_days_back,
            batch_size: mailbox.batch_size,
            spam_threshold: config.spam.threshold,
            max_retry_attempts: config.processing.max_retry_attempts,
            retry_batch_size: config.processing.retry_batch_size,
            summary_length: config.processing.summary_length,
            stale_after: config.processing.stale_after(),
        }
    }
}

/// What happened to one fetched candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    RejectedSender,
    RejectedSpam,
    Duplicate,
    /// A repository call failed; the message was skipped.
    PersistenceError,
    Converted(ConversionOutcome),
}

/// Result of one conversion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    Processed,
    Failed(Option<ErrorCode>),
    /// A status update failed; the message keeps whatever state it had.
    Skipped,
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub mode: String,
    pub candidates: usize,
    pub fetch_failures: usize,
    pub decode_failures: usize,
    pub rejected_sender: usize,
    pub rejected_spam: usize,
    pub duplicates: usize,
    pub persistence_errors: usize,
    pub processed: usize,
    pub failed: usize,
    /// Set when the shutdown signal stopped the cycle early.
    pub interrupted: bool,
    pub retry: SweepReport,
}

impl CycleReport {
    fn record(&mut self, outcome: CandidateOutcome) {
        match outcome {
            CandidateOutcome::RejectedSender => self.rejected_sender += 1,
            CandidateOutcome::RejectedSpam => self.rejected_spam += 1,
            CandidateOutcome::Duplicate => self.duplicates += 1,
            CandidateOutcome::PersistenceError => self.persistence_errors += 1,
            CandidateOutcome::Converted(ConversionOutcome::Processed) => self.processed += 1,
            CandidateOutcome::Converted(ConversionOutcome::Failed(_)) => self.failed += 1,
            CandidateOutcome::Converted(ConversionOutcome::Skipped) => {
                self.persistence_errors += 1
            }
        }
    }
}

/// Counters for one retry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub attempted: usize,
    pub recovered: usize,
    pub failed: usize,
    pub exhausted: usize,
}

/// The mailbox ingestion pipeline.
///
/// Holds every collaborator a cycle needs. Cycles are driven by
/// [`IngestionProcessor`](super::IngestionProcessor) or run directly.
pub struct Pipeline {
    connector: Arc<dyn MailboxConnector>,
    messages: Arc<dyn MessageRepository>,
    contents: Arc<dyn ContentRepository>,
    decoder: MessageDecoder,
    filter: SenderFilter,
    spam: SpamClassifier,
    attachments: AttachmentExtractor,
    enrichment: EnrichmentDispatcher,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        connector: Arc<dyn MailboxConnector>,
        messages: Arc<dyn MessageRepository>,
        contents: Arc<dyn ContentRepository>,
        enrichment: Arc<dyn EnrichmentService>,
    ) -> Result<Self> {
        let spam = SpamClassifier::new(
            config.spam.keywords.as_slice(),
            config.spam.patterns.as_slice(),
        )?;
        let filter = SenderFilter::new(config.filters.allowed_senders.as_slice());
        if filter.allows_everyone() {
            warn!("allowedSenders is empty: messages from every sender will be ingested");
        }

        Ok(Self {
            connector,
            messages,
            contents,
            decoder: MessageDecoder::new(),
            filter,
            spam,
            attachments: AttachmentExtractor::new(&config.attachments),
            enrichment: EnrichmentDispatcher::new(enrichment, config.enrichment.timeout()),
            settings: PipelineSettings::from_config(config),
        })
    }

    /// Wires the IMAP connector, SQLite repositories and the configured
    /// enrichment adapter.
    pub fn from_config(config: &Config, db: Database) -> Result<Self> {
        let enrichment = service_from_config(&config.enrichment)?;
        Self::new(
            config,
            Arc::new(ImapConnector::new(config.mailbox.clone())),
            Arc::new(SqliteMessageRepository::new(db.clone())),
            Arc::new(SqliteContentRepository::new(db)),
            enrichment,
        )
    }

    pub fn messages(&self) -> &Arc<dyn MessageRepository> {
        &self.messages
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs one poll cycle.
    ///
    /// Connection and search failures abort the cycle before anything is
    /// fetched. Per-message failures are counted and the cycle continues.
    /// Incremental cycles end with a retry sweep.
    pub async fn poll_cycle(
        &self,
        mode: SearchMode,
        shutdown: &Shutdown,
    ) -> std::result::Result<CycleReport, EmailError> {
        let span = info_span!("poll_cycle", mode = mode.as_str());
        async {
            let mut report = self.fetch_and_ingest(mode, shutdown).await?;
            if mode == SearchMode::Incremental && !report.interrupted {
                report.retry = self.retry_sweep(shutdown).await;
            }
            info!(
                candidates = report.candidates,
                processed = report.processed,
                failed = report.failed,
                duplicates = report.duplicates,
                retried = report.retry.attempted,
                "poll cycle finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn fetch_and_ingest(
        &self,
        mode: SearchMode,
        shutdown: &Shutdown,
    ) -> std::result::Result<CycleReport, EmailError> {
        let mut report = CycleReport {
            mode: mode.as_str().to_string(),
            ..CycleReport::default()
        };
        if shutdown.is_triggered() {
            return Err(EmailError::Cancelled);
        }

        let mut session =
            connect_with_retry(self.connector.as_ref(), &self.settings.retry_policy, shutdown)
                .await?;

        let criteria = SearchCriteria::build(mode, self.settings.max_days_back, Utc::now());
        let mut uids = match session.search(&criteria).await {
            Ok(uids) => uids,
            Err(e) => {
                if let Err(logout_err) = session.logout().await {
                    debug!(error = %logout_err, "logout after failed search");
                }
                return Err(e);
            }
        };

        let limit = self.settings.batch_size.max(1) as usize;
        if uids.len() > limit {
            info!(
                found = uids.len(),
                limit, "more candidates than the batch size, the rest wait for the next cycle"
            );
            uids.truncate(limit);
        }
        report.candidates = uids.len();

        let mut fetcher = CandidateFetcher::new(session.as_mut(), uids);
        loop {
            if shutdown.is_triggered() {
                info!(remaining = fetcher.remaining(), "shutdown requested, stopping cycle");
                report.interrupted = true;
                break;
            }
            let Some((uid, fetched)) = fetcher.next().await else {
                break;
            };

            let raw = match fetched {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(uid, error = %e, "fetch failed, skipping message");
                    report.fetch_failures += 1;
                    continue;
                }
            };

            let message = match self.decoder.decode(&raw) {
                Ok(message) => message,
                Err(e) => {
                    warn!(uid, error = %e, "decode failed, skipping message");
                    report.decode_failures += 1;
                    continue;
                }
            };

            if self.settings.mark_as_read {
                if let Err(e) = fetcher.mark_seen(uid).await {
                    warn!(uid, error = %e, "failed to mark message as read");
                }
            }

            let outcome = self.ingest(&raw, message).await;
            report.record(outcome);
        }

        if let Err(e) = session.logout().await {
            debug!(error = %e, "logout failed");
        }
        Ok(report)
    }

    /// Filters, deduplicates, persists and converts one decoded message.
    pub async fn ingest(&self, raw: &RawMessage, mut message: InboundMessage) -> CandidateOutcome {
        if !self.filter.is_allowed(&message.sender) {
            debug!(sender = %redact_address(&message.sender), "sender not allowed");
            return CandidateOutcome::RejectedSender;
        }

        let score = self
            .spam
            .score(&message.subject, &message.body_text, &message.body_html);
        if is_spam(score, self.settings.spam_threshold) {
            debug!(
                sender = %redact_address(&message.sender),
                score,
                reasons = ?self.spam.explain(&message.subject, &message.body_text, &message.body_html),
                "message classified as spam"
            );
            return CandidateOutcome::RejectedSpam;
        }
        message
            .metadata
            .insert("spam_score".to_string(), serde_json::Value::from(score));

        match self.messages.exists(&message.message_key) {
            Ok(true) => {
                debug!(message_key = %message.message_key, "already ingested");
                return CandidateOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "existence check failed, skipping message");
                return CandidateOutcome::PersistenceError;
            }
        }

        message.status = MessageStatus::Pending;
        let stored = match self.messages.create(&message) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "failed to persist message");
                return CandidateOutcome::PersistenceError;
            }
        };
        info!(
            message_id = %stored.id,
            sender = %redact_address(&stored.sender),
            "message persisted"
        );

        let attachments = self.attachments.extract(&raw.body, &stored.id).await;
        if !attachments.is_empty() {
            let names: Vec<String> = attachments
                .iter()
                .map(|a| redact_path(&a.storage_path))
                .collect();
            match self.messages.add_attachments(&stored.id, &attachments) {
                Ok(()) => debug!(message_id = %stored.id, ?names, "attachments stored"),
                Err(e) => warn!(message_id = %stored.id, error = %e, "failed to record attachments"),
            }
        }

        CandidateOutcome::Converted(self.convert(&stored, ErrorCode::RecordCreationFailed))
    }

    /// Converts a message into a content record.
    ///
    /// `failure_code` is recorded if the content record cannot be persisted.
    /// If a repository write fails midway, the message is put back in the
    /// status it had on entry.
    pub fn convert(&self, message: &InboundMessage, failure_code: ErrorCode) -> ConversionOutcome {
        let prior = message.status;
        if let Err(e) = self
            .messages
            .update_status(&message.id, MessageStatus::Processing)
        {
            warn!(message_id = %message.id, error = %e, "failed to mark message processing");
            return ConversionOutcome::Skipped;
        }

        let Some(record) = build_record(message, self.settings.summary_length, Utc::now()) else {
            return self.fail(message, prior, "message has no usable content", None);
        };

        let stored = match self.contents.create(&record) {
            Ok(stored) => stored,
            Err(e) => {
                let reason = format!("content record creation failed: {}", e);
                return self.fail(message, prior, &reason, Some(failure_code));
            }
        };

        if let Err(e) = self.messages.mark_processed(&message.id, &stored.id) {
            error!(
                message_id = %message.id,
                content_id = %stored.id,
                error = %e,
                "content record created but message could not be marked processed"
            );
            self.restore(message, prior);
            return ConversionOutcome::Skipped;
        }

        info!(message_id = %message.id, content_id = %stored.id, "message processed");
        self.enrichment.dispatch(stored.id);
        ConversionOutcome::Processed
    }

    fn fail(
        &self,
        message: &InboundMessage,
        prior: MessageStatus,
        reason: &str,
        code: Option<ErrorCode>,
    ) -> ConversionOutcome {
        let result = match code {
            Some(code) => self.messages.mark_failed_with_code(&message.id, reason, code),
            None => self.messages.mark_failed(&message.id, reason),
        };
        match result {
            Ok(()) => {
                warn!(
                    message_id = %message.id,
                    code = code.map(|c| c.as_str()).unwrap_or("-"),
                    reason,
                    "conversion failed"
                );
                ConversionOutcome::Failed(code)
            }
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "failed to record conversion failure");
                self.restore(message, prior);
                ConversionOutcome::Skipped
            }
        }
    }

    fn restore(&self, message: &InboundMessage, prior: MessageStatus) {
        match self.messages.update_status(&message.id, prior) {
            Ok(()) => debug!(message_id = %message.id, status = %prior, "message status restored"),
            Err(e) => warn!(
                message_id = %message.id,
                status = %prior,
                error = %e,
                "failed to restore message status, leaving it to the stale sweep"
            ),
        }
    }

    /// Re-attempts conversion of failed messages still under the retry
    /// ceiling, then of pending or processing messages nobody has touched
    /// for `stale_after`. The retry counter is bumped before each attempt.
    pub async fn retry_sweep(&self, shutdown: &Shutdown) -> SweepReport {
        let span = info_span!("retry_sweep");
        async {
            let mut report = SweepReport::default();
            let max_attempts = self.settings.max_retry_attempts;
            let batch = self.settings.retry_batch_size;
            let mut candidates = match self.messages.get_retry_candidates(max_attempts, batch) {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(error = %e, "failed to load retry candidates");
                    return report;
                }
            };
            let room = (batch as usize).saturating_sub(candidates.len());
            if room > 0 {
                candidates.extend(self.stale_candidates(max_attempts, room as u32));
            }

            for message in candidates {
                if shutdown.is_triggered() {
                    break;
                }
                if let Err(e) = self.messages.update_last_retry_at(&message.id) {
                    warn!(message_id = %message.id, error = %e, "failed to stamp retry attempt");
                    continue;
                }

                let attempt = message.retry_count + 1;
                let code = if attempt >= max_attempts {
                    ErrorCode::RetryExhausted
                } else {
                    ErrorCode::RecordCreationFailed
                };
                debug!(message_id = %message.id, attempt, max_attempts, "retrying conversion");

                report.attempted += 1;
                match self.convert(&message, code) {
                    ConversionOutcome::Processed => report.recovered += 1,
                    ConversionOutcome::Failed(Some(ErrorCode::RetryExhausted)) => {
                        report.exhausted += 1
                    }
                    ConversionOutcome::Failed(_) | ConversionOutcome::Skipped => {
                        report.failed += 1
                    }
                }
            }

            if report.attempted > 0 {
                info!(
                    attempted = report.attempted,
                    recovered = report.recovered,
                    exhausted = report.exhausted,
                    "retry sweep finished"
                );
            }
            report
        }
        .instrument(span)
        .await
    }

    fn stale_candidates(&self, max_attempts: u32, limit: u32) -> Vec<InboundMessage> {
        let Some(cutoff) = chrono::Duration::from_std(self.settings.stale_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Vec::new();
        };
        match self.messages.get_stale_candidates(cutoff, max_attempts, limit) {
            Ok(stale) => {
                if !stale.is_empty() {
                    info!(count = stale.len(), "resuming unfinished messages");
                }
                stale
            }
            Err(e) => {
                warn!(error = %e, "failed to load unfinished messages");
                Vec::new()
            }
        }
    }
}
