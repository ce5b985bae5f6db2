//! The function a pool worker runs for one queue entry.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::errors::MailProcessorError;
use crate::fs::FileSystem;
use crate::mail::maildir::Maildir;
use crate::mail::message::Message;
use crate::mail::processor::MailProcessor;

/// Processes the message stored at a path.
///
/// Implementations run on worker threads, so they get only the path and
/// shared read-only state. Returning a [`MailProcessorError`] is a
/// permanent failure; anything else is retried.
pub trait ProcessMail: Send + Sync {
    fn process(&self, path: &Path) -> Result<()>;
}

impl<F> ProcessMail for F
where
    F: Fn(&Path) -> Result<()> + Send + Sync,
{
    fn process(&self, path: &Path) -> Result<()> {
        self(path)
    }
}

/// Production worker: parse, classify, then delete or archive the file.
#[derive(Debug, Clone)]
pub struct MaildirProcessor {
    maildir: Maildir,
    processor: MailProcessor,
    processed_subfolder: Option<String>,
}

impl MaildirProcessor {
    pub fn new(
        maildir: Maildir,
        processor: MailProcessor,
        processed_subfolder: Option<String>,
    ) -> Self {
        Self {
            maildir,
            processor,
            processed_subfolder,
        }
    }

    fn fs(&self) -> &Arc<dyn FileSystem> {
        self.maildir.fs()
    }

    fn finish(&self, path: &Path) -> Result<()> {
        match &self.processed_subfolder {
            Some(folder) => {
                let dir = self.maildir.subfolder_dir(folder);
                self.fs().create_dir_all(&dir)?;
                let name = path
                    .file_name()
                    .with_context(|| format!("{:?} has no file name", path))?;
                self.fs().rename(path, &dir.join(name))?;
                debug!(path = ?path, folder = %folder, "archived processed message");
            }
            None => {
                self.fs().remove_file(path)?;
                debug!(path = ?path, "deleted processed message");
            }
        }
        Ok(())
    }
}

impl ProcessMail for MaildirProcessor {
    fn process(&self, path: &Path) -> Result<()> {
        let raw = self.fs().read(path)?;
        let msg = Message::from_bytes(&raw)
            .map_err(|e| match e {
                MailProcessorError::MalformedMessage(why) => {
                    MailProcessorError::MalformedMessage(format!("{}: {}", path.display(), why))
                }
                other => other,
            })?;

        self.processor
            .process(&msg)
            .with_context(|| format!("processing {}", path.display()))?;

        info!(path = ?path, subject = msg.get("Subject").unwrap_or(""), "message processed");
        self.finish(path)
    }
}
