//! Mailbox session abstraction, search criteria and the connection retry policy.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};
use log::{debug, info, warn};

use crate::shutdown::Shutdown;

use super::error::{EmailError, Result};

/// One message as fetched from the server, before decoding.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    /// Message sequence number within the selected folder.
    pub sequence: u32,
    pub internal_date: Option<DateTime<Utc>>,
    pub body: Vec<u8>,
}

/// Which candidates a poll cycle looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// One-time sweep over a historical date window.
    Backfill,
    /// Steady-state poll for unread messages.
    Incremental,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Backfill => "backfill",
            SearchMode::Incremental => "incremental",
        }
    }
}

/// A server-side search. The two strategies are never combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    Since(DateTime<Utc>),
    Unseen,
}

impl SearchCriteria {
    pub fn build(mode: SearchMode, max_days_back: u32, now: DateTime<Utc>) -> Self {
        match mode {
            SearchMode::Backfill => {
                let since = now
                    .checked_sub_days(Days::new(u64::from(max_days_back)))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                SearchCriteria::Since(since)
            }
            SearchMode::Incremental => SearchCriteria::Unseen,
        }
    }

    /// Renders the criteria as an IMAP SEARCH query.
    pub fn to_imap_query(&self) -> String {
        match self {
            // IMAP dates are DD-Mon-YYYY with no time component.
            SearchCriteria::Since(date) => format!("SINCE {}", date.format("%d-%b-%Y")),
            SearchCriteria::Unseen => "UNSEEN".to_string(),
        }
    }
}

/// Opens authenticated sessions to a mailbox.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn MailboxSession>>;
}

/// An authenticated session with the target folder selected.
#[async_trait]
pub trait MailboxSession: Send {
    /// Returns the UIDs matching the criteria in ascending order.
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>>;

    /// Fetches one full message without setting `\Seen`.
    async fn fetch(&mut self, uid: u32) -> Result<RawMessage>;

    async fn mark_seen(&mut self, uid: u32) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;
}

/// Connection retry settings.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total connection attempts; zero is treated as one.
    pub max_retries: u32,
    /// Attempt `n` (zero-based) waits `n * retry_delay` first.
    pub retry_delay: Duration,
}

/// Opens a session, retrying transient failures with linearly growing delay.
///
/// Authentication failures are returned immediately. The shutdown signal
/// aborts both an in-flight attempt and a pending backoff.
pub async fn connect_with_retry(
    connector: &dyn MailboxConnector,
    policy: &RetryPolicy,
    shutdown: &Shutdown,
) -> Result<Box<dyn MailboxSession>> {
    let attempts = policy.max_retries.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        let mut cancel = shutdown.clone();

        if attempt > 0 {
            let delay = policy.retry_delay * attempt;
            debug!(
                "Waiting {:?} before connection attempt {}/{}",
                delay,
                attempt + 1,
                attempts
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.triggered() => return Err(EmailError::Cancelled),
            }
        }

        let result = tokio::select! {
            result = connector.open() => result,
            _ = cancel.triggered() => return Err(EmailError::Cancelled),
        };

        match result {
            Ok(session) => {
                if attempt > 0 {
                    info!("Connected to mailbox after {} attempts", attempt + 1);
                }
                return Ok(session);
            }
            Err(e) if e.is_auth_failure() => return Err(e),
            Err(e) => {
                warn!(
                    "Mailbox connection attempt {}/{} failed: {}",
                    attempt + 1,
                    attempts,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    Err(EmailError::ConnectionFailed(format!(
        "giving up after {} attempts: {}",
        attempts,
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string())
    )))
}

/// Lazy, finite sequence of fetched candidates.
///
/// Each body is fully read before the next fetch is issued.
pub struct CandidateFetcher<'a> {
    session: &'a mut dyn MailboxSession,
    pending: VecDeque<u32>,
}

impl<'a> CandidateFetcher<'a> {
    pub fn new(session: &'a mut dyn MailboxSession, uids: Vec<u32>) -> Self {
        Self {
            session,
            pending: uids.into(),
        }
    }

    /// Number of candidates not yet fetched.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Fetches the next candidate, or `None` once the sequence is exhausted.
    /// A failed fetch yields `Some(Err)` and the sequence moves on.
    pub async fn next(&mut self) -> Option<(u32, Result<RawMessage>)> {
        let uid = self.pending.pop_front()?;
        Some((uid, self.session.fetch(uid).await))
    }

    pub async fn mark_seen(&mut self, uid: u32) -> Result<()> {
        self.session.mark_seen(uid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct NullSession;

    #[async_trait]
    impl MailboxSession for NullSession {
        async fn search(&mut self, _criteria: &SearchCriteria) -> Result<Vec<u32>> {
            Ok(Vec::new())
        }

        async fn fetch(&mut self, uid: u32) -> Result<RawMessage> {
            if uid == 13 {
                return Err(EmailError::ProtocolError("gone".into()));
            }
            Ok(RawMessage {
                uid,
                sequence: uid,
                internal_date: None,
                body: format!("Subject: {}\r\n\r\nbody", uid).into_bytes(),
            })
        }

        async fn mark_seen(&mut self, _uid: u32) -> Result<()> {
            Ok(())
        }

        async fn logout(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Fails the first `failures` attempts with `error`, then succeeds.
    struct FlakyConnector {
        failures: u32,
        auth: bool,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl MailboxConnector for FlakyConnector {
        async fn open(&self) -> Result<Box<dyn MailboxSession>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                if self.auth {
                    return Err(EmailError::AuthenticationFailed("bad password".into()));
                }
                return Err(EmailError::ConnectionFailed("refused".into()));
            }
            Ok(Box::new(NullSession))
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backfill_criteria_uses_date_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let criteria = SearchCriteria::build(SearchMode::Backfill, 30, now);
        assert_eq!(
            criteria,
            SearchCriteria::Since(Utc.with_ymd_and_hms(2024, 2, 14, 12, 0, 0).unwrap())
        );
        assert_eq!(criteria.to_imap_query(), "SINCE 14-Feb-2024");
    }

    #[test]
    fn test_incremental_criteria_is_unseen_only() {
        let criteria = SearchCriteria::build(SearchMode::Incremental, 30, Utc::now());
        assert_eq!(criteria, SearchCriteria::Unseen);
        assert_eq!(criteria.to_imap_query(), "UNSEEN");
    }

    #[tokio::test]
    async fn test_connect_retries_transient_failures() {
        let (_trigger, shutdown) = shutdown::channel();
        let attempts = Arc::new(AtomicU32::new(0));
        let connector = FlakyConnector {
            failures: 2,
            auth: false,
            attempts: attempts.clone(),
        };

        let session = connect_with_retry(&connector, &policy(3), &shutdown).await;
        assert!(session.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_max_retries() {
        let (_trigger, shutdown) = shutdown::channel();
        let attempts = Arc::new(AtomicU32::new(0));
        let connector = FlakyConnector {
            failures: u32::MAX,
            auth: false,
            attempts: attempts.clone(),
        };

        let err = connect_with_retry(&connector, &policy(3), &shutdown)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EmailError::ConnectionFailed(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let (_trigger, shutdown) = shutdown::channel();
        let attempts = Arc::new(AtomicU32::new(0));
        let connector = FlakyConnector {
            failures: u32::MAX,
            auth: true,
            attempts: attempts.clone(),
        };

        let err = connect_with_retry(&connector, &policy(5), &shutdown)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EmailError::AuthenticationFailed(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_backoff() {
        let (trigger, shutdown) = shutdown::channel();
        let connector = FlakyConnector {
            failures: u32::MAX,
            auth: false,
            attempts: Arc::new(AtomicU32::new(0)),
        };
        let slow = RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
        };

        trigger.trigger();
        let err = connect_with_retry(&connector, &slow, &shutdown)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EmailError::Cancelled));
    }

    #[tokio::test]
    async fn test_fetcher_yields_each_candidate_once() {
        let mut session = NullSession;
        let mut fetcher = CandidateFetcher::new(&mut session, vec![1, 13, 2]);
        assert_eq!(fetcher.remaining(), 3);

        let mut seen = Vec::new();
        while let Some((uid, result)) = fetcher.next().await {
            seen.push((uid, result.is_ok()));
        }
        assert_eq!(seen, vec![(1, true), (13, false), (2, true)]);
        assert_eq!(fetcher.remaining(), 0);
    }
}
