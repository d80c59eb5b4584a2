//! Test harness wiring a pipeline to in-memory collaborators.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use intake::config::Config;
use intake::db::{Database, SqliteContentRepository, SqliteMessageRepository};
use intake::email::SearchMode;
use intake::ingest::{CycleReport, IngestionProcessor, Pipeline};
use intake::repository::{ContentRepository, MessageRepository};
use intake::shutdown::{self, Shutdown, ShutdownTrigger};
use intake::{ContentRecord, InboundMessage};

use super::builders::test_config;
use super::fakes::{
    FakeMailbox, FlakyContentRepository, FlakyMessageRepository, RecordingEnrichment,
};

/// Isolated environment: temp storage, in-memory SQLite, fake mailbox.
pub struct TestHarness {
    pub temp_dir: TempDir,
    pub config: Config,
    pub mailbox: FakeMailbox,
    pub messages: Arc<FlakyMessageRepository>,
    pub contents: Arc<FlakyContentRepository>,
    pub enrichment: Arc<RecordingEnrichment>,
    pub pipeline: Arc<Pipeline>,
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(|_| {}, RecordingEnrichment::default())
    }

    /// Harness with configuration tweaks applied before wiring.
    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        Self::build(tweak, RecordingEnrichment::default())
    }

    pub fn with_failing_enrichment() -> Self {
        Self::build(|_| {}, RecordingEnrichment::failing())
    }

    fn build(tweak: impl FnOnce(&mut Config), enrichment: RecordingEnrichment) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = test_config(temp_dir.path());
        tweak(&mut config);

        let db = Database::open_in_memory().expect("Failed to open database");
        let mailbox = FakeMailbox::new();
        let messages = Arc::new(FlakyMessageRepository::new(SqliteMessageRepository::new(
            db.clone(),
        )));
        let contents = Arc::new(FlakyContentRepository::new(SqliteContentRepository::new(db)));
        let enrichment = Arc::new(enrichment);

        let pipeline = Pipeline::new(
            &config,
            Arc::new(mailbox.clone()),
            messages.clone(),
            contents.clone(),
            enrichment.clone(),
        )
        .expect("Failed to build pipeline");

        let (trigger, shutdown) = shutdown::channel();
        Self {
            temp_dir,
            config,
            mailbox,
            messages,
            contents,
            enrichment,
            pipeline: Arc::new(pipeline),
            trigger,
            shutdown,
        }
    }

    pub fn processor(&self) -> IngestionProcessor {
        IngestionProcessor::new(&self.config, Arc::clone(&self.pipeline))
    }

    pub async fn poll(&self) -> CycleReport {
        self.pipeline
            .poll_cycle(SearchMode::Incremental, &self.shutdown)
            .await
            .expect("poll cycle failed")
    }

    pub async fn backfill(&self) -> CycleReport {
        self.pipeline
            .poll_cycle(SearchMode::Backfill, &self.shutdown)
            .await
            .expect("backfill cycle failed")
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn trigger_shutdown(&self) {
        self.trigger.trigger();
    }

    /// The stored message for a Message-ID.
    pub fn message(&self, message_key: &str) -> Option<InboundMessage> {
        self.messages.find_by_key(message_key).unwrap()
    }

    pub fn content_for(&self, message: &InboundMessage) -> Option<ContentRecord> {
        message
            .content_record_id
            .as_deref()
            .and_then(|id| self.contents.find_by_id(id).unwrap())
    }

    pub fn message_count(&self) -> u64 {
        self.messages.get_stats().unwrap().total()
    }

    /// Waits until enrichment has been called `n` times, or panics.
    pub async fn wait_for_enrichment(&self, n: usize) -> Vec<String> {
        for _ in 0..200 {
            let calls = self.enrichment.calls();
            if calls.len() >= n {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} enrichment calls, saw {}",
            n,
            self.enrichment.calls().len()
        );
    }
}
