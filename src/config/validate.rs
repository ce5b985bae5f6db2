use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, MailSettings, RawConfigFile, TrackerSettings};
use crate::errors::{Result, TrackerError};
use crate::mail::retry::RetryPolicy;
use crate::types::{BROKEN_SUBFOLDER, FAILED_SUBFOLDER};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::TrackerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let tracker = TrackerSettings {
            fqdn: raw.tracker.fqdn.trim().to_string(),
            accept_unqualified_emails: raw.tracker.accept_unqualified_emails,
            data_path: raw.tracker.data_path,
        };

        let mail = MailSettings {
            maildir: raw.mail.maildir,
            max_workers: raw.mail.max_workers,
            poll_interval: duration_field("mail.poll_interval", &raw.mail.poll_interval)?,
            processed_subfolder: raw.mail.processed_subfolder,
        };

        let retry = RetryPolicy {
            initial_delay: duration_field("retry.initial_delay", &raw.retry.initial_delay)?,
            multiplier: raw.retry.multiplier,
            max_delay: duration_field("retry.max_delay", &raw.retry.max_delay)?,
            max_tries: raw.retry.max_tries,
        };

        Ok(ConfigFile::new_unchecked(
            tracker,
            mail,
            retry,
            raw.bounces.threshold,
            raw.tasks.on_failure,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_tracker(cfg)?;
    validate_mail(cfg)?;
    validate_retry(cfg)?;

    if cfg.bounces.threshold == 0 {
        return Err(TrackerError::ConfigError(
            "[bounces].threshold must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

fn validate_tracker(cfg: &RawConfigFile) -> Result<()> {
    let fqdn = cfg.tracker.fqdn.trim();
    if fqdn.is_empty() {
        return Err(TrackerError::ConfigError(
            "[tracker].fqdn must be set".to_string(),
        ));
    }
    if fqdn.contains('@') || fqdn.chars().any(char::is_whitespace) {
        return Err(TrackerError::ConfigError(format!(
            "[tracker].fqdn '{}' is not a domain name",
            fqdn
        )));
    }
    Ok(())
}

fn validate_mail(cfg: &RawConfigFile) -> Result<()> {
    if cfg.mail.max_workers == 0 {
        return Err(TrackerError::ConfigError(
            "[mail].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }

    let poll = duration_field("mail.poll_interval", &cfg.mail.poll_interval)?;
    if poll.is_zero() {
        return Err(TrackerError::ConfigError(
            "[mail].poll_interval must be greater than zero".to_string(),
        ));
    }

    if let Some(ref sub) = cfg.mail.processed_subfolder {
        let sub = sub.trim();
        if sub.is_empty() || sub.contains('/') || sub.starts_with('.') {
            return Err(TrackerError::ConfigError(format!(
                "[mail].processed_subfolder '{}' must be a plain folder name",
                sub
            )));
        }
        if sub == FAILED_SUBFOLDER || sub == BROKEN_SUBFOLDER {
            return Err(TrackerError::ConfigError(format!(
                "[mail].processed_subfolder cannot be the reserved '{}' folder",
                sub
            )));
        }
    }

    Ok(())
}

fn validate_retry(cfg: &RawConfigFile) -> Result<()> {
    if cfg.retry.max_tries == 0 {
        return Err(TrackerError::ConfigError(
            "[retry].max_tries must be >= 1 (got 0)".to_string(),
        ));
    }

    if !cfg.retry.multiplier.is_finite() || cfg.retry.multiplier < 1.0 {
        return Err(TrackerError::ConfigError(format!(
            "[retry].multiplier must be >= 1.0 (got {})",
            cfg.retry.multiplier
        )));
    }

    let initial = duration_field("retry.initial_delay", &cfg.retry.initial_delay)?;
    let max = duration_field("retry.max_delay", &cfg.retry.max_delay)?;
    if initial.is_zero() {
        return Err(TrackerError::ConfigError(
            "[retry].initial_delay must be greater than zero".to_string(),
        ));
    }
    if max < initial {
        return Err(TrackerError::ConfigError(
            "[retry].max_delay must not be shorter than initial_delay".to_string(),
        ));
    }

    Ok(())
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| TrackerError::ConfigError(format!("[{}]: {}", field, e)))
}
