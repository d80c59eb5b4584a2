use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub spam: SpamConfig,
    #[serde(default)]
    pub attachments: AttachmentConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection and polling settings for the remote mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxConfig {
    /// IMAP server hostname (e.g., "imap.example.com").
    pub host: String,

    #[serde(default = "default_imap_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub use_tls: bool,

    pub username: String,

    /// Where the password comes from (direct value, file or env var).
    #[serde(flatten)]
    pub password: SecretSource,

    #[serde(default = "default_inbox")]
    pub folder: String,

    /// Connection attempts before a cycle gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between connection attempts; attempt `n` waits `n` times this.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Set `\Seen` on messages once they decoded successfully.
    #[serde(default = "default_true")]
    pub mark_as_read: bool,

    /// Reserved. Parsed but never acted on.
    #[serde(default)]
    pub delete_after_read: bool,

    /// Run a one-time backfill over `max_days_back` days when the processor starts.
    #[serde(default)]
    pub fetch_existing: bool,

    #[serde(default = "default_max_days_back")]
    pub max_days_back: u32,

    /// Maximum number of messages fetched per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl MailboxConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    /// Sender addresses accepted for ingestion. Empty accepts everyone.
    #[serde(default)]
    pub allowed_senders: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpamConfig {
    /// Score at or above which a message is dropped as spam.
    #[serde(default = "default_spam_threshold")]
    pub threshold: f64,

    #[serde(default = "default_spam_keywords")]
    pub keywords: Vec<String>,

    /// Regular expressions matched against the lowercased content.
    #[serde(default = "default_spam_patterns")]
    pub patterns: Vec<String>,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            threshold: default_spam_threshold(),
            keywords: default_spam_keywords(),
            patterns: default_spam_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentConfig {
    /// Root directory; each message gets a `message_<id>` directory below it.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Maximum decoded attachment size in bytes.
    #[serde(default = "default_max_attachment_size")]
    pub max_size: u64,

    /// Allowed content types, compared against the type without parameters.
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            max_size: default_max_attachment_size(),
            allowed_types: default_allowed_types(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Retry ceiling for failed conversions.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Failed messages re-attempted per sweep.
    #[serde(default = "default_retry_batch_size")]
    pub retry_batch_size: u32,

    #[serde(default = "default_summary_length")]
    pub summary_length: usize,

    #[serde(default = "default_backfill_timeout_secs")]
    pub backfill_timeout_secs: u64,

    /// Pending or processing messages untouched for this long are picked up
    /// again by the retry sweep. Keep it above `backfillTimeoutSecs`.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl ProcessingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backfill_timeout(&self) -> Duration {
        Duration::from_secs(self.backfill_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_batch_size: default_retry_batch_size(),
            summary_length: default_summary_length(),
            backfill_timeout_secs: default_backfill_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentConfig {
    /// Webhook notified with each new content record id. Unset disables enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_enrichment_timeout_secs")]
    pub timeout_secs: u64,
}

impl EnrichmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_enrichment_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `~/.intake/data/intake.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_imap_port() -> u16 {
    993
}

fn default_inbox() -> String {
    "INBOX".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_days_back() -> u32 {
    30
}

fn default_batch_size() -> u32 {
    50
}

fn default_spam_threshold() -> f64 {
    0.7
}

fn default_spam_keywords() -> Vec<String> {
    [
        "viagra",
        "lottery",
        "you have won",
        "free money",
        "click here",
        "act now",
        "limited time offer",
        "wire transfer",
        "crypto giveaway",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_spam_patterns() -> Vec<String> {
    vec![
        r"\$\d{1,3}(,\d{3})+".to_string(),
        r"100% (free|guaranteed)".to_string(),
    ]
}

fn default_storage_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".intake").join("attachments"))
        .unwrap_or_else(|| PathBuf::from("attachments"))
}

fn default_max_attachment_size() -> u64 {
    10_485_760 // 10 MiB
}

fn default_allowed_types() -> Vec<String> {
    [
        "application/pdf",
        "image/jpeg",
        "image/png",
        "image/gif",
        "text/plain",
        "text/csv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_batch_size() -> u32 {
    10
}

fn default_summary_length() -> usize {
    200
}

fn default_backfill_timeout_secs() -> u64 {
    600
}

fn default_stale_after_secs() -> u64 {
    900
}

fn default_enrichment_timeout_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}
