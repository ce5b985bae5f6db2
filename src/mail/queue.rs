use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ConfigFile;
use crate::errors::MailProcessorError;
use crate::mail::entry::MailQueueEntry;
use crate::mail::maildir::Maildir;
use crate::mail::pool::WorkerPool;
use crate::mail::retry::RetryPolicy;
use crate::mail::worker::ProcessMail;
use crate::types::{BROKEN_SUBFOLDER, EntryId, FAILED_SUBFOLDER};

pub const DEFAULT_MAX_WORKERS: usize = 4;

/// What happened to an entry whose processing task finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Processed; removed from the queue.
    Succeeded,
    /// Permanent failure; moved to `failed` and removed.
    Failed,
    /// Transient failure; pending again until `next_try_time`.
    Retrying { next_try_time: DateTime<Utc> },
    /// Transient failure with no retries left; moved to `broken` and removed.
    Broken,
}

/// Maildir-backed work queue.
///
/// All bookkeeping (entries, pending order, the pool) is owned here and only
/// touched by the controlling thread; workers see nothing but a file path.
pub struct MailQueue {
    maildir: Maildir,
    max_workers: usize,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    processor: Arc<dyn ProcessMail>,
    entries: HashMap<EntryId, MailQueueEntry>,
    queue: Vec<EntryId>,
    pool: Option<WorkerPool>,
}

impl MailQueue {
    pub fn new(maildir: Maildir, processor: Arc<dyn ProcessMail>) -> Self {
        Self {
            maildir,
            max_workers: DEFAULT_MAX_WORKERS,
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
            processor,
            entries: HashMap::new(),
            queue: Vec::new(),
            pool: None,
        }
    }

    pub fn from_config(cfg: &ConfigFile, maildir: Maildir, processor: Arc<dyn ProcessMail>) -> Self {
        Self::new(maildir, processor)
            .with_max_workers(cfg.mail.max_workers)
            .with_retry_policy(cfg.retry.clone())
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn maildir(&self) -> &Maildir {
        &self.maildir
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Register a pending entry for `identifier`.
    ///
    /// Adding an identifier that is already queued returns the existing
    /// entry untouched.
    pub fn add(&mut self, identifier: impl Into<EntryId>) -> &mut MailQueueEntry {
        let identifier = identifier.into();
        if !self.entries.contains_key(&identifier) {
            debug!(entry = %identifier, "queued");
            self.queue.push(identifier.clone());
        }
        let path = self.maildir.entry_path(&identifier);
        let now = self.clock.now();
        self.entries
            .entry(identifier.clone())
            .or_insert_with(|| MailQueueEntry::new(identifier, path, now))
    }

    /// Drop an entry. Unknown identifiers are ignored.
    pub fn remove(&mut self, identifier: &str) {
        if self.entries.remove(identifier).is_some() {
            self.queue.retain(|id| id != identifier);
            debug!(entry = %identifier, "removed from queue");
        }
    }

    /// Queue every file already sitting in `new/`.
    pub fn initialize(&mut self) -> Result<usize> {
        let names = self.maildir.list_new()?;
        let before = self.len();
        for name in names {
            self.add(name);
        }
        let added = self.len() - before;
        info!(added, maildir = ?self.maildir.root(), "initialized mail queue");
        Ok(added)
    }

    /// One pass over the pending entries.
    ///
    /// Finished tasks are handled first in queue order as they are met;
    /// eligible entries are started while fewer than `max_workers` tasks are
    /// in flight. The pass runs over a snapshot of identifiers, so entries
    /// removed while handling results are simply skipped.
    pub fn process_queue(&mut self) -> Result<Vec<(EntryId, EntryOutcome)>> {
        let now = self.clock.now();
        let mut in_flight = self.in_flight();
        let mut outcomes = Vec::new();

        for id in self.queue.clone() {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };

            if entry.processing_task_started() {
                if let Some(outcome) = self.handle_processing_task_result(&id) {
                    in_flight = in_flight.saturating_sub(1);
                    outcomes.push((id, outcome));
                }
                continue;
            }

            if in_flight >= self.max_workers || !entry.is_ready(now) {
                continue;
            }

            let processor = Arc::clone(&self.processor);
            let pool = Self::ensure_pool(&mut self.pool, self.max_workers)?;
            if let Some(entry) = self.entries.get_mut(&id) {
                if entry.start_processing_task(pool, processor, now) {
                    in_flight += 1;
                }
            }
        }

        Ok(outcomes)
    }

    /// Handle entries whose task already finished, without starting new
    /// ones.
    pub fn reap_finished(&mut self) -> Vec<(EntryId, EntryOutcome)> {
        let mut outcomes = Vec::new();
        for id in self.queue.clone() {
            if let Some(outcome) = self.handle_processing_task_result(&id) {
                outcomes.push((id, outcome));
            }
        }
        outcomes
    }

    /// Apply the retry state machine to a finished entry.
    ///
    /// Returns `None` if the entry is unknown, was never started, or is
    /// still running.
    pub fn handle_processing_task_result(&mut self, identifier: &str) -> Option<EntryOutcome> {
        let entry = self.entries.get_mut(identifier)?;
        let result = entry.take_processing_result()?;

        let outcome = match result {
            Ok(()) => {
                info!(entry = %identifier, "processed successfully");
                EntryOutcome::Succeeded
            }
            Err(err) if MailProcessorError::is_permanent(&err) => {
                warn!(entry = %identifier, error = %format!("{err:#}"), "processing failed permanently");
                self.relocate(identifier, FAILED_SUBFOLDER);
                EntryOutcome::Failed
            }
            Err(err) => {
                let now = self.clock.now();
                if entry.schedule_next_try(&self.retry, now) {
                    let next_try_time = entry.next_try_time().unwrap_or(now);
                    warn!(
                        entry = %identifier,
                        tries = entry.tries(),
                        next_try = %next_try_time,
                        error = %format!("{err:#}"),
                        "processing failed, will retry"
                    );
                    return Some(EntryOutcome::Retrying { next_try_time });
                }
                error!(
                    entry = %identifier,
                    tries = entry.tries(),
                    error = %format!("{err:#}"),
                    "processing failed, giving up"
                );
                self.relocate(identifier, BROKEN_SUBFOLDER);
                EntryOutcome::Broken
            }
        };

        self.remove(identifier);
        Some(outcome)
    }

    fn relocate(&self, identifier: &str, folder: &str) {
        let Some(entry) = self.entries.get(identifier) else {
            return;
        };
        match entry.move_to_subfolder(&self.maildir, folder) {
            Ok(target) => debug!(entry = %identifier, target = ?target, "moved message"),
            Err(err) => error!(
                entry = %identifier,
                folder,
                error = %format!("{err:#}"),
                "could not move message"
            ),
        }
    }

    fn ensure_pool(slot: &mut Option<WorkerPool>, size: usize) -> Result<&WorkerPool> {
        if slot.is_none() {
            *slot = Some(WorkerPool::new(size)?);
        }
        slot.as_ref()
            .ok_or_else(|| anyhow::anyhow!("worker pool unavailable"))
    }

    /// The worker pool, created on first use and reused afterwards.
    pub fn pool(&mut self) -> Result<&WorkerPool> {
        Self::ensure_pool(&mut self.pool, self.max_workers)
    }

    pub fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    /// Wait for submitted work to finish and release the pool.
    ///
    /// Safe to call without a pool. A later [`MailQueue::pool`] or
    /// [`MailQueue::process_queue`] starts a fresh one.
    pub fn close_pool(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.close();
        }
    }

    /// Detach the pool so it can be closed off the controlling thread.
    pub fn take_pool(&mut self) -> Option<WorkerPool> {
        self.pool.take()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    /// Pending identifiers in queue order.
    pub fn identifiers(&self) -> &[EntryId] {
        &self.queue
    }

    pub fn entry(&self, identifier: &str) -> Option<&MailQueueEntry> {
        self.entries.get(identifier)
    }

    pub fn entry_mut(&mut self, identifier: &str) -> Option<&mut MailQueueEntry> {
        self.entries.get_mut(identifier)
    }

    /// Entries with a running (or finished but unhandled) task.
    pub fn in_flight(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.processing_task_started())
            .count()
    }
}

impl Drop for MailQueue {
    fn drop(&mut self) {
        self.close_pool();
    }
}
