// src/mail/watcher.rs

use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{Result, TrackerError};
use crate::mail::queue::MailQueue;

/// Watches a maildir's `new/` directory and feeds new files to the queue.
///
/// notify delivers events on its own thread; they are forwarded into a
/// channel that [`MailQueueWatcher::process_events`] drains without
/// blocking. Dropping the watcher stops watching.
pub struct MailQueueWatcher {
    dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
    rx: Option<mpsc::UnboundedReceiver<PathBuf>>,
}

impl std::fmt::Debug for MailQueueWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailQueueWatcher")
            .field("dir", &self.dir)
            .field("running", &self.is_running())
            .finish()
    }
}

impl MailQueueWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            watcher: None,
            rx: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Begin watching. The directory must already exist.
    pub fn start(&mut self) -> Result<()> {
        if !self.dir.is_dir() {
            return Err(TrackerError::MissingDirectory(self.dir.clone()));
        }
        if self.is_running() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Some(path) = arrived_path(&event) {
                        if tx.send(path).is_err() {
                            debug!("mail watcher channel closed, dropping event");
                        }
                    }
                }
                Err(err) => warn!(error = %err, "mail watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;

        info!(dir = ?self.dir, "mail queue watcher started");
        self.watcher = Some(watcher);
        self.rx = Some(rx);
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            debug!(dir = ?self.dir, "mail queue watcher stopped");
        }
        self.rx = None;
    }

    /// Add every file reported since the last call to `queue`.
    ///
    /// Never blocks. Returns how many new entries were queued; files that
    /// are already queued or have disappeared again are ignored.
    pub fn process_events(&mut self, queue: &mut MailQueue) -> usize {
        let Some(rx) = self.rx.as_mut() else {
            return 0;
        };

        let mut added = 0;
        while let Ok(path) = rx.try_recv() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if queue.contains(name) || !self.dir.join(name).is_file() {
                continue;
            }
            queue.add(name).set_data("source", "watcher");
            added += 1;
        }

        if added > 0 {
            debug!(added, "queued entries from watcher");
        }
        added
    }
}

/// The path a message arrived under, for create and rename-into events.
fn arrived_path(event: &Event) -> Option<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => event.paths.first().cloned(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.first().cloned(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.last().cloned(),
        _ => None,
    }
}
