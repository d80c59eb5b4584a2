//! Attachment extraction, policy checks and storage.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use mail_parser::{MessageParser, MessagePart, MimeHeaders};

use crate::config::AttachmentConfig;
use crate::model::Attachment;

use super::error::{EmailError, Result};

const MAX_FILENAME_LEN: usize = 255;

/// Extracts attachments that pass the type and size policy and writes them
/// to `<storage_root>/message_<id>/`.
#[derive(Debug, Clone)]
pub struct AttachmentExtractor {
    storage_root: PathBuf,
    max_size: u64,
    allowed_types: HashSet<String>,
}

/// An attachment part that passed policy, before it is written to disk.
#[derive(Debug)]
struct Candidate {
    filename: String,
    content_type: String,
    content: Vec<u8>,
}

impl AttachmentExtractor {
    pub fn new(config: &AttachmentConfig) -> Self {
        Self {
            storage_root: config.storage_root.clone(),
            max_size: config.max_size,
            allowed_types: config
                .allowed_types
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Directory holding one message's attachments.
    pub fn message_dir(&self, message_id: &str) -> PathBuf {
        self.storage_root.join(format!("message_{}", message_id))
    }

    /// Extracts and stores every acceptable attachment of `raw`.
    ///
    /// Best effort: a part that is rejected or fails to store is logged and
    /// skipped, the remaining parts are still processed.
    pub async fn extract(&self, raw: &[u8], message_id: &str) -> Vec<Attachment> {
        let candidates = match self.candidates(raw) {
            Ok(candidates) => candidates,
            Err(e) => {
                debug!("No attachments extracted for message {}: {}", message_id, e);
                return Vec::new();
            }
        };
        if candidates.is_empty() {
            return Vec::new();
        }

        let dir = match self.prepare_dir(message_id).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Skipping attachments of message {}: {}", message_id, e);
                return Vec::new();
            }
        };

        let mut stored = Vec::with_capacity(candidates.len());
        let mut used_names = HashSet::new();
        for candidate in candidates {
            let filename = unique_name(&candidate.filename, &mut used_names);
            match store(&dir, filename, candidate).await {
                Ok(attachment) => {
                    debug!(
                        "Stored attachment {} ({}, {} bytes)",
                        attachment.filename, attachment.content_type, attachment.size_bytes
                    );
                    stored.push(attachment);
                }
                Err(e) => warn!("{}", e),
            }
        }
        stored
    }

    /// Creates the per-message directory on demand.
    async fn prepare_dir(&self, message_id: &str) -> Result<PathBuf> {
        let dir = self.message_dir(message_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    fn candidates(&self, raw: &[u8]) -> Result<Vec<Candidate>> {
        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| EmailError::ParseError("Failed to parse email message".to_string()))?;

        let mut candidates = Vec::new();
        for part in message.parts.iter() {
            let Some(raw_name) = attachment_filename(part) else {
                continue;
            };
            let content_type = base_content_type(part);
            let content = part.contents();

            if !self.allowed_types.contains(&content_type) {
                debug!(
                    "Attachment '{}' skipped: type {} not allowed",
                    raw_name, content_type
                );
                continue;
            }
            if content.len() as u64 > self.max_size {
                debug!(
                    "Attachment '{}' skipped: {} bytes exceeds limit of {}",
                    raw_name,
                    content.len(),
                    self.max_size
                );
                continue;
            }

            candidates.push(Candidate {
                filename: sanitize_filename(raw_name),
                content_type,
                content: content.to_vec(),
            });
        }
        Ok(candidates)
    }
}

async fn store(dir: &Path, filename: String, candidate: Candidate) -> Result<Attachment> {
    let path = dir.join(&filename);
    tokio::fs::write(&path, &candidate.content)
        .await
        .map_err(|e| EmailError::AttachmentError(format!("cannot write {}: {}", filename, e)))?;
    Ok(Attachment {
        filename,
        content_type: candidate.content_type,
        size_bytes: candidate.content.len() as u64,
        storage_path: path,
    })
}

/// Name of an attachment part, or `None` for inline body parts.
///
/// A part is an attachment when it has `Content-Disposition: attachment`
/// with a filename, or a `name` parameter on its content type.
fn attachment_filename<'a>(part: &'a MessagePart<'_>) -> Option<&'a str> {
    let disposition_name = part
        .content_disposition()
        .filter(|d| d.ctype().eq_ignore_ascii_case("attachment"))
        .and_then(|d| d.attribute("filename"));
    disposition_name
        .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")))
        .filter(|name| !name.trim().is_empty())
}

/// `type/subtype` without parameters, lowercased.
fn base_content_type(part: &MessagePart<'_>) -> String {
    part.content_type()
        .map(|ct| match ct.subtype() {
            Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
        .to_ascii_lowercase()
}

/// Makes an attachment name safe to use as a single path component.
///
/// `..` sequences, path separators, control characters and
/// `: * ? " < > |` are each replaced with `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let without_parents = filename.replace("..", "_");
    let cleaned: String = without_parents
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." {
        return "attachment".to_string();
    }
    truncate_name(cleaned)
}

/// Caps the name at 255 bytes, keeping a short extension intact.
fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_FILENAME_LEN {
        return name.to_string();
    }
    let ext = match name.rfind('.') {
        Some(idx) if name.len() - idx <= 16 => &name[idx..],
        _ => "",
    };
    let mut end = MAX_FILENAME_LEN - ext.len();
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &name[..end], ext)
}

/// Disambiguates repeated names within one message: `a.pdf`, `a_1.pdf`, ...
fn unique_name(name: &str, used: &mut HashSet<String>) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = format!("{}_{}{}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
