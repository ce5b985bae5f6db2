#![allow(dead_code)]

use std::path::Path;

use distro_tracker::config::{ConfigFile, RawConfigFile};
use distro_tracker::mail::Message;
use distro_tracker::types::FailurePolicy;

pub const TEST_FQDN: &str = "tracker.example.org";

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the defaults of every section with `tracker.fqdn` set to
/// [`TEST_FQDN`].
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.tracker.fqdn = TEST_FQDN.to_string();
        Self { config }
    }

    pub fn fqdn(mut self, fqdn: &str) -> Self {
        self.config.tracker.fqdn = fqdn.to_string();
        self
    }

    pub fn accept_unqualified_emails(mut self, val: bool) -> Self {
        self.config.tracker.accept_unqualified_emails = val;
        self
    }

    pub fn data_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.tracker.data_path = path.as_ref().to_path_buf();
        self
    }

    pub fn maildir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.mail.maildir = path.as_ref().to_path_buf();
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.mail.max_workers = n;
        self
    }

    pub fn poll_interval(mut self, s: &str) -> Self {
        self.config.mail.poll_interval = s.to_string();
        self
    }

    pub fn processed_subfolder(mut self, name: &str) -> Self {
        self.config.mail.processed_subfolder = Some(name.to_string());
        self
    }

    pub fn retry(mut self, initial_delay: &str, max_tries: u32) -> Self {
        self.config.retry.initial_delay = initial_delay.to_string();
        self.config.retry.max_tries = max_tries;
        self
    }

    pub fn bounce_threshold(mut self, n: u32) -> Self {
        self.config.bounces.threshold = n;
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.config.tasks.on_failure = policy;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for incoming `Message`s.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    headers: Vec<(String, String)>,
    body: String,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn sender(self, addr: &str) -> Self {
        self.header("From", addr)
    }

    pub fn delivered_to(self, addr: &str) -> Self {
        self.header("Delivered-To", addr)
    }

    pub fn subject(self, subject: &str) -> Self {
        self.header("Subject", subject)
    }

    pub fn message_id(self, id: &str) -> Self {
        self.header("Message-ID", id)
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    /// Body made of one command per line.
    pub fn body_lines(mut self, lines: &[&str]) -> Self {
        self.body = lines.iter().map(|l| format!("{l}\n")).collect();
        self
    }

    pub fn build(&self) -> Message {
        let mut msg = Message::new();
        for (name, value) in &self.headers {
            msg.add_header(name.as_str(), value.as_str());
        }
        msg.set_body(self.body.as_bytes().to_vec());
        msg
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.build().to_bytes()
    }
}
