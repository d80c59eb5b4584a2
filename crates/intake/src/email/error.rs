//! Mailbox ingestion error types.

use thiserror::Error;

/// Errors that can occur while talking to the mailbox or decoding its messages.
#[derive(Error, Debug)]
pub enum EmailError {
    /// Failed to connect to the IMAP server.
    #[error("IMAP connection failed: {0}")]
    ConnectionFailed(String),

    /// TLS/SSL error during connection.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// The server rejected the credentials. Never retried.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Failed to resolve the mailbox password.
    #[error("Credentials unavailable: {0}")]
    CredentialsNotFound(String),

    /// IMAP protocol error.
    #[error("IMAP protocol error: {0}")]
    ProtocolError(String),

    /// Failed to parse email message.
    #[error("Failed to parse email: {0}")]
    ParseError(String),

    /// An attachment could not be written to storage.
    #[error("Failed to extract attachment: {0}")]
    AttachmentError(String),

    /// The attachment directory could not be created.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Folder not found.
    #[error("IMAP folder '{0}' not found")]
    FolderNotFound(String),

    /// The shutdown signal fired while the operation was in progress.
    #[error("Operation cancelled by shutdown")]
    Cancelled,
}

impl EmailError {
    /// Authentication and credential failures are permanent until the
    /// configuration changes, so the connector does not retry them.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            EmailError::AuthenticationFailed(_) | EmailError::CredentialsNotFound(_)
        )
    }
}

impl From<async_native_tls::Error> for EmailError {
    fn from(err: async_native_tls::Error) -> Self {
        EmailError::TlsError(err.to_string())
    }
}

impl From<crate::secrets::SecretError> for EmailError {
    fn from(err: crate::secrets::SecretError) -> Self {
        EmailError::CredentialsNotFound(err.to_string())
    }
}

/// Result type for email operations.
pub type Result<T> = std::result::Result<T, EmailError>;
