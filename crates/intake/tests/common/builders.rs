//! Builders for raw RFC 5322 messages and test configurations.

#![allow(dead_code)]

use std::path::Path;

use intake::config::{load_config_from_str, Config};

/// Builder for raw message buffers as an IMAP server would return them.
pub struct MessageBuilder {
    from: String,
    subject: String,
    message_id: Option<String>,
    date: Option<String>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<(String, String, Vec<u8>)>,
}

impl MessageBuilder {
    /// A plain-text message from `from` with a fixed Message-ID.
    pub fn new(from: &str, message_id: &str) -> Self {
        Self {
            from: from.to_string(),
            subject: "Test message".to_string(),
            message_id: Some(message_id.to_string()),
            date: Some("Mon, 4 Mar 2024 09:30:00 +0000".to_string()),
            text: Some("Hello from the test suite.".to_string()),
            html: None,
            attachments: Vec::new(),
        }
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn html(mut self, html: &str) -> Self {
        self.html = Some(html.to_string());
        self
    }

    /// Removes both bodies, leaving only headers.
    pub fn no_body(mut self) -> Self {
        self.text = None;
        self.html = None;
        self
    }

    pub fn no_message_id(mut self) -> Self {
        self.message_id = None;
        self
    }

    pub fn attachment(mut self, filename: &str, content_type: &str, content: &[u8]) -> Self {
        self.attachments
            .push((filename.to_string(), content_type.to_string(), content.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut raw = String::new();
        raw.push_str(&format!("From: {}\r\n", self.from));
        raw.push_str("To: inbox@example.com\r\n");
        raw.push_str(&format!("Subject: {}\r\n", self.subject));
        if let Some(id) = &self.message_id {
            raw.push_str(&format!("Message-ID: <{}>\r\n", id));
        }
        if let Some(date) = &self.date {
            raw.push_str(&format!("Date: {}\r\n", date));
        }
        raw.push_str("MIME-Version: 1.0\r\n");

        let simple = self.html.is_none() && self.attachments.is_empty();
        if simple {
            raw.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
            if let Some(text) = &self.text {
                raw.push_str(text);
                raw.push_str("\r\n");
            }
            return raw.into_bytes();
        }

        raw.push_str("Content-Type: multipart/mixed; boundary=\"part-boundary\"\r\n\r\n");
        if let Some(text) = &self.text {
            raw.push_str("--part-boundary\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n");
            raw.push_str(text);
            raw.push_str("\r\n");
        }
        if let Some(html) = &self.html {
            raw.push_str("--part-boundary\r\nContent-Type: text/html; charset=utf-8\r\n\r\n");
            raw.push_str(html);
            raw.push_str("\r\n");
        }
        for (filename, content_type, content) in &self.attachments {
            raw.push_str(&format!(
                "--part-boundary\r\nContent-Type: {}; name=\"{}\"\r\nContent-Disposition: attachment; filename=\"{}\"\r\n\r\n",
                content_type, filename, filename
            ));
            raw.push_str(&String::from_utf8_lossy(content));
            raw.push_str("\r\n");
        }
        raw.push_str("--part-boundary--\r\n");
        raw.into_bytes()
    }
}

/// Configuration for pipeline tests: attachments under `root`, no
/// connection backoff, everything else at its defaults.
pub fn test_config(root: &Path) -> Config {
    let yaml = format!(
        r#"
mailbox:
  host: imap.test
  username: ingest@example.com
  passwordInsecure: secret
  retryDelaySecs: 0
attachments:
  storageRoot: {}
  maxSize: 4096
"#,
        root.join("attachments").display()
    );
    load_config_from_str(&yaml).expect("test config must be valid")
}
