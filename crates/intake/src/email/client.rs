//! IMAP client for connecting to email servers.

use std::fmt::Debug;
use std::net::TcpStream;

use async_imap::Session;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::io::{AsyncRead, AsyncWrite};
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::ExposeSecret;

use crate::config::MailboxConfig;

use super::connector::{MailboxConnector, MailboxSession, RawMessage, SearchCriteria};
use super::error::{EmailError, Result};

/// Byte stream under the IMAP protocol, TLS-wrapped or plain TCP.
trait ImapStream: AsyncRead + AsyncWrite + Unpin + Debug + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Debug + Send> ImapStream for T {}

type BoxedStream = Box<dyn ImapStream>;

/// Opens IMAP sessions from the mailbox configuration.
pub struct ImapConnector {
    config: MailboxConfig,
}

impl ImapConnector {
    pub fn new(config: MailboxConfig) -> Self {
        if !config.use_tls {
            warn!(
                "TLS is disabled for mailbox {}:{}; credentials will be sent in clear text",
                config.host, config.port
            );
        }
        Self { config }
    }

    async fn open_stream(&self) -> Result<BoxedStream> {
        let addr = tokio::net::lookup_host((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?
            .next()
            .ok_or_else(|| {
                EmailError::ConnectionFailed(format!(
                    "no address found for {}",
                    self.config.host
                ))
            })?;

        info!("Connecting to IMAP server at {}", addr);

        let tcp_stream = async_io::Async::<TcpStream>::connect(addr)
            .await
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;

        if !self.config.use_tls {
            return Ok(Box::new(tcp_stream));
        }

        let tls_stream = TlsConnector::new()
            .connect(&self.config.host, tcp_stream)
            .await?;
        Ok(Box::new(tls_stream))
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn open(&self) -> Result<Box<dyn MailboxSession>> {
        let password = self.config.password.resolve()?;
        let stream = self.open_stream().await?;

        let mut client = async_imap::Client::new(stream);
        // The server greeting has to be consumed before the first command.
        client
            .read_response()
            .await
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        let mut session = client
            .login(&self.config.username, password.expose_secret())
            .await
            .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))?;
        info!("Successfully authenticated to IMAP server");

        // EXAMINE keeps the folder read-only; marking messages read needs SELECT.
        let folder = &self.config.folder;
        let opened = if self.config.mark_as_read {
            session.select(folder).await
        } else {
            session.examine(folder).await
        };
        let mailbox = opened.map_err(|e| {
            if e.to_string().contains("doesn't exist") || e.to_string().contains("NO") {
                EmailError::FolderNotFound(folder.clone())
            } else {
                EmailError::ProtocolError(e.to_string())
            }
        })?;
        debug!("Folder '{}' opened with {} messages", folder, mailbox.exists);

        Ok(Box::new(ImapSession {
            session: Some(session),
        }))
    }
}

/// An authenticated IMAP session with the configured folder open.
pub struct ImapSession {
    session: Option<Session<BoxedStream>>,
}

impl ImapSession {
    fn session(&mut self) -> Result<&mut Session<BoxedStream>> {
        self.session
            .as_mut()
            .ok_or_else(|| EmailError::ConnectionFailed("Not connected".to_string()))
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        let query = criteria.to_imap_query();
        debug!("Searching with query: {}", query);

        let uids = self
            .session()?
            .uid_search(&query)
            .await
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        let mut uid_list: Vec<u32> = uids.into_iter().collect();
        uid_list.sort_unstable();
        debug!("Found {} messages matching search", uid_list.len());
        Ok(uid_list)
    }

    async fn fetch(&mut self, uid: u32) -> Result<RawMessage> {
        debug!("Fetching email with UID {}", uid);

        // BODY.PEEK[] leaves the \Seen flag untouched.
        let session = self.session()?;
        let mut messages = session
            .uid_fetch(uid.to_string(), "(UID INTERNALDATE BODY.PEEK[])")
            .await
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        let mut found = None;
        while let Some(message) = messages.next().await {
            let message = message.map_err(|e| EmailError::ProtocolError(e.to_string()))?;
            if found.is_none() && message.uid == Some(uid) {
                let body = message.body().ok_or_else(|| {
                    EmailError::ProtocolError(format!("Message with UID {} has no body", uid))
                })?;
                found = Some(RawMessage {
                    uid,
                    sequence: message.message,
                    internal_date: message.internal_date().map(|d| d.with_timezone(&Utc)),
                    body: body.to_vec(),
                });
            }
        }

        found.ok_or_else(|| EmailError::ProtocolError(format!("Message with UID {} not found", uid)))
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<()> {
        let session = self.session()?;
        let updates = session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .await
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;
        let responses: Vec<_> = updates.collect().await;
        for response in responses {
            response.map_err(|e| EmailError::ProtocolError(e.to_string()))?;
        }
        debug!("Marked UID {} as seen", uid);
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            info!("Disconnecting from IMAP server");
            session
                .logout()
                .await
                .map_err(|e| EmailError::ProtocolError(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for ImapSession {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("ImapSession dropped without logout - session will be closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn test_config() -> MailboxConfig {
        load_config_from_str(
            "mailbox:\n  host: imap.invalid\n  port: 993\n  username: test@example.com\n",
        )
        .unwrap()
        .mailbox
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_connecting() {
        let connector = ImapConnector::new(test_config());
        let err = connector.open().await.err().unwrap();
        assert!(matches!(err, EmailError::CredentialsNotFound(_)));
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_connection_failure() {
        let mut config = test_config();
        config.password.direct = Some("secret".to_string());
        let connector = ImapConnector::new(config);
        let err = connector.open().await.err().unwrap();
        assert!(matches!(err, EmailError::ConnectionFailed(_)));
        assert!(!err.is_auth_failure());
    }

    #[tokio::test]
    async fn test_disconnected_session_reports_not_connected() {
        let mut session = ImapSession { session: None };
        let err = session.search(&SearchCriteria::Unseen).await.unwrap_err();
        assert!(matches!(err, EmailError::ConnectionFailed(_)));
        session.logout().await.unwrap();
    }
}
