use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::mail::retry::RetryPolicy;
use crate::types::FailurePolicy;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [tracker]
/// fqdn = "tracker.debian.org"
/// accept_unqualified_emails = false
/// data_path = "/var/lib/distro-tracker"
///
/// [mail]
/// maildir = "/var/lib/distro-tracker/maildir"
/// max_workers = 4
/// poll_interval = "1s"
///
/// [retry]
/// initial_delay = "30s"
/// max_tries = 5
/// ```
///
/// Every section is optional except that `tracker.fqdn` must be set for the
/// file to validate.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub tracker: TrackerSection,

    #[serde(default)]
    pub mail: MailSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub bounces: BouncesSection,

    #[serde(default)]
    pub tasks: TasksSection,
}

/// `[tracker]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerSection {
    /// Domain the tracker receives mail for; only delivery addresses in
    /// exactly this domain are considered.
    #[serde(default)]
    pub fqdn: String,

    /// Route unknown local parts (and, as a last resort, addresses in other
    /// domains) to `dispatch` instead of rejecting them.
    #[serde(default)]
    pub accept_unqualified_emails: bool,

    /// Directory for the outbox and the subscription store.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data")
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            fqdn: String::new(),
            accept_unqualified_emails: false,
            data_path: default_data_path(),
        }
    }
}

/// `[mail]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MailSection {
    /// Root of the maildir; incoming mail lands in `<maildir>/new`.
    #[serde(default = "default_maildir")]
    pub maildir: PathBuf,

    /// Upper bound on messages processed concurrently.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How often the runtime polls the watcher and the queue (e.g. `"1s"`).
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Subfolder receiving successfully processed messages. When unset the
    /// messages are deleted.
    #[serde(default)]
    pub processed_subfolder: Option<String>,
}

fn default_maildir() -> PathBuf {
    PathBuf::from("maildir")
}

fn default_max_workers() -> usize {
    4
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            maildir: default_maildir(),
            max_workers: default_max_workers(),
            poll_interval: default_poll_interval(),
            processed_subfolder: None,
        }
    }
}

/// `[retry]` section: backoff for transiently failing messages.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay: String,

    /// Number of retries granted after the first failed attempt.
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
}

fn default_initial_delay() -> String {
    "30s".to_string()
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> String {
    "1h".to_string()
}

fn default_max_tries() -> u32 {
    5
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay: default_max_delay(),
            max_tries: default_max_tries(),
        }
    }
}

/// `[bounces]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BouncesSection {
    /// Number of bounces after which a user loses all subscriptions.
    #[serde(default = "default_bounce_threshold")]
    pub threshold: u32,
}

fn default_bounce_threshold() -> u32 {
    3
}

impl Default for BouncesSection {
    fn default() -> Self {
        Self {
            threshold: default_bounce_threshold(),
        }
    }
}

/// `[tasks]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TasksSection {
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

/// Resolved `[tracker]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    pub fqdn: String,
    pub accept_unqualified_emails: bool,
    pub data_path: PathBuf,
}

impl TrackerSettings {
    /// Directory receiving messages sent by the handlers.
    pub fn outbox_dir(&self) -> PathBuf {
        self.data_path.join("outbox")
    }

    /// JSON file holding the subscription store.
    pub fn subscriptions_path(&self) -> PathBuf {
        self.data_path.join("subscriptions.json")
    }
}

/// Resolved `[mail]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub maildir: PathBuf,
    pub max_workers: usize,
    pub poll_interval: Duration,
    pub processed_subfolder: Option<String>,
}

/// Validated configuration, built from a [`RawConfigFile`] via `TryFrom`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub tracker: TrackerSettings,
    pub mail: MailSettings,
    pub retry: RetryPolicy,
    pub bounce_threshold: u32,
    pub on_failure: FailurePolicy,
}

impl ConfigFile {
    /// Assemble a config from already validated parts.
    pub fn new_unchecked(
        tracker: TrackerSettings,
        mail: MailSettings,
        retry: RetryPolicy,
        bounce_threshold: u32,
        on_failure: FailurePolicy,
    ) -> Self {
        Self {
            tracker,
            mail,
            retry,
            bounce_threshold,
            on_failure,
        }
    }
}
