//! Mailbox credential resolution.
//!
//! A password can come from three places, checked in this order:
//!
//! 1. **Direct value** (`passwordInsecure`) - quick local testing only
//! 2. **File** (`passwordFile`) - Docker/Kubernetes secret mounts
//! 3. **Environment variable** (`passwordEnvVar`)

use std::fs;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Error type for secret resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// The configured sources for one secret. Empty strings count as unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretSource {
    #[serde(
        rename = "passwordInsecure",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub direct: Option<String>,

    #[serde(rename = "passwordFile", default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(
        rename = "passwordEnvVar",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub env_var: Option<String>,
}

impl SecretSource {
    /// Returns true if at least one non-empty source is configured.
    pub fn is_configured(&self) -> bool {
        non_empty(&self.direct).is_some()
            || non_empty(&self.file).is_some()
            || non_empty(&self.env_var).is_some()
    }

    /// True when the secret is stored inline in the configuration.
    pub fn is_insecure(&self) -> bool {
        non_empty(&self.direct).is_some()
    }

    /// Resolves the secret from the first configured source.
    pub fn resolve(&self) -> Result<SecretString> {
        if let Some(value) = non_empty(&self.direct) {
            return Ok(SecretString::from(value.to_string()));
        }

        if let Some(path) = non_empty(&self.file) {
            let expanded = expand_home(path);
            return fs::read_to_string(&expanded)
                .map(|content| SecretString::from(content.trim().to_string()))
                .map_err(|e| SecretError::FileReadError {
                    path: expanded,
                    source: e,
                });
        }

        if let Some(name) = non_empty(&self.env_var) {
            return match std::env::var(name) {
                // Env vars and secret files often carry a trailing newline.
                Ok(value) => Ok(SecretString::from(value.trim().to_string())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            };
        }

        Err(SecretError::NoSourceProvided)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Expands a leading `~` to the current user's home directory.
///
/// `~user/path` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}
