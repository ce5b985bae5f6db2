use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::fs::FileSystem;
use crate::mail::maildir::Maildir;
use crate::mail::message::Message;

/// Maildir the tracker drops outgoing messages into; delivery to the
/// network is left to the local MTA.
#[derive(Debug, Clone)]
pub struct Outbox {
    maildir: Maildir,
}

impl Outbox {
    pub fn new(dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            maildir: Maildir::new(dir, fs),
        }
    }

    pub fn dir(&self) -> &Path {
        self.maildir.root()
    }

    /// Directory holding the stored messages.
    pub fn new_dir(&self) -> PathBuf {
        self.maildir.new_dir()
    }

    pub fn send(&self, msg: &Message) -> Result<PathBuf> {
        let path = self.maildir.deliver(&msg.to_bytes())?;
        debug!(path = ?path, to = msg.get("To").unwrap_or(""), "queued outgoing message");
        Ok(path)
    }
}
