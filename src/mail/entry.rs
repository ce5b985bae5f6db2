use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tracing::debug;

use crate::mail::maildir::Maildir;
use crate::mail::pool::{TaskHandle, WorkerPool};
use crate::mail::retry::RetryPolicy;
use crate::mail::worker::ProcessMail;
use crate::types::EntryId;

/// One message waiting in the queue.
///
/// The entry is `pending` while it has no task handle, `processing` while it
/// has one. Terminal states are handled by the queue, which drops the entry.
#[derive(Debug)]
pub struct MailQueueEntry {
    identifier: EntryId,
    path: PathBuf,
    creation_time: DateTime<Utc>,
    next_try_time: Option<DateTime<Utc>>,
    tries: u32,
    task: Option<TaskHandle>,
    data: HashMap<String, Value>,
}

impl MailQueueEntry {
    pub fn new(identifier: impl Into<EntryId>, path: PathBuf, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            path,
            creation_time: now,
            next_try_time: None,
            tries: 0,
            task: None,
            data: HashMap::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    /// `None` until the first retry is scheduled, meaning "eligible now".
    pub fn next_try_time(&self) -> Option<DateTime<Utc>> {
        self.next_try_time
    }

    pub fn set_next_try_time(&mut self, at: DateTime<Utc>) {
        self.next_try_time = Some(at);
    }

    /// Retries scheduled so far.
    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn set_data(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.next_try_time.is_none_or(|at| now >= at)
    }

    /// Submit the processing of this entry's file to `pool`.
    ///
    /// Returns `false` (and does nothing) when the next try time has not
    /// come yet or a task is already running.
    pub fn start_processing_task(
        &mut self,
        pool: &WorkerPool,
        processor: Arc<dyn ProcessMail>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.task.is_some() || !self.is_ready(now) {
            return false;
        }
        let path = self.path.clone();
        self.task = Some(pool.submit(move || processor.process(&path)));
        debug!(entry = %self.identifier, tries = self.tries, "processing started");
        true
    }

    pub fn processing_task_started(&self) -> bool {
        self.task.is_some()
    }

    /// Non-blocking; `false` while the worker is still busy or nothing runs.
    pub fn processing_task_finished(&mut self) -> bool {
        self.task.as_mut().is_some_and(TaskHandle::is_finished)
    }

    /// Detach the finished task and return its result.
    ///
    /// `None` when nothing was started or the worker is still running; the
    /// entry is `pending` again afterwards.
    pub fn take_processing_result(&mut self) -> Option<Result<()>> {
        if !self.processing_task_finished() {
            return None;
        }
        self.task.take().and_then(|mut task| task.take_result())
    }

    /// Decide whether a transiently failed entry gets another attempt.
    ///
    /// On approval the next try time moves forward by the policy's delay and
    /// the entry becomes `pending`. Returns `false` once the policy is
    /// exhausted.
    pub fn schedule_next_try(&mut self, policy: &RetryPolicy, now: DateTime<Utc>) -> bool {
        if !policy.allows(self.tries) {
            return false;
        }

        let delay = TimeDelta::from_std(policy.delay_for(self.tries)).unwrap_or(TimeDelta::MAX);
        self.next_try_time = Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
        self.tries += 1;
        self.task = None;
        true
    }

    /// Move the backing file into a Maildir++ subfolder.
    pub fn move_to_subfolder(&self, maildir: &Maildir, folder: &str) -> Result<PathBuf> {
        maildir.move_to_subfolder(&self.identifier, folder)
    }
}
