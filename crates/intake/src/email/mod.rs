//! Mailbox side of the pipeline.
//!
//! Connects to an IMAP mailbox, fetches candidate messages, decodes them and
//! applies the sender, spam and attachment policies.

pub mod attachments;
pub mod client;
pub mod connector;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod spam;

pub use attachments::{sanitize_filename, AttachmentExtractor};
pub use client::{ImapConnector, ImapSession};
pub use connector::{
    connect_with_retry, CandidateFetcher, MailboxConnector, MailboxSession, RawMessage,
    RetryPolicy, SearchCriteria, SearchMode,
};
pub use decoder::{synthesize_key, MessageDecoder};
pub use error::EmailError;
pub use filter::SenderFilter;
pub use spam::{is_spam, SpamClassifier};
