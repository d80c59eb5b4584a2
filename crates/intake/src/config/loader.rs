use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mailbox = &config.mailbox;

    if mailbox.host.trim().is_empty() {
        return Err(invalid("mailbox.host must not be empty"));
    }
    if mailbox.username.trim().is_empty() {
        return Err(invalid("mailbox.username must not be empty"));
    }
    if mailbox.port == 0 {
        return Err(invalid("mailbox.port must be non-zero"));
    }
    if mailbox.batch_size == 0 {
        return Err(invalid("mailbox.batchSize must be at least 1"));
    }

    let threshold = config.spam.threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(invalid(format!(
            "spam.threshold must be between 0 and 1, got {}",
            threshold
        )));
    }

    for pattern in &config.spam.patterns {
        if let Err(e) = regex::Regex::new(pattern) {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            });
        }
    }

    for content_type in &config.attachments.allowed_types {
        let mut parts = content_type.split('/');
        let well_formed = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(t), Some(s), None) if !t.is_empty() && !s.is_empty()
        );
        if !well_formed {
            return Err(invalid(format!(
                "attachments.allowedTypes entry '{}' is not of the form type/subtype",
                content_type
            )));
        }
    }

    if config.processing.poll_interval_secs == 0 {
        return Err(invalid("processing.pollIntervalSecs must be at least 1"));
    }
    if config.processing.summary_length == 0 {
        return Err(invalid("processing.summaryLength must be at least 1"));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
