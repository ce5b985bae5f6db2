// src/engine/runtime.rs

use std::fmt;
use std::future::Future;

use anyhow::Result;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::mail::{EntryOutcome, MailQueue, MailQueueWatcher};
use crate::types::EntryId;

use super::{RunSummary, RuntimeOptions};

/// Drives the mail queue on a fixed tick.
///
/// Each tick drains the watcher's pending arrivals into the queue, then runs
/// one `process_queue` pass. The loop ends on the shutdown signal or, with
/// `exit_when_idle`, once the queue is empty. Outstanding work is always
/// drained before returning.
pub struct Runtime {
    queue: MailQueue,
    watcher: Option<MailQueueWatcher>,
    options: RuntimeOptions,
    summary: RunSummary,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("pending", &self.queue.len())
            .field("watcher", &self.watcher)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(queue: MailQueue, watcher: Option<MailQueueWatcher>, options: RuntimeOptions) -> Self {
        Self {
            queue,
            watcher,
            options,
            summary: RunSummary::default(),
        }
    }

    pub fn queue(&self) -> &MailQueue {
        &self.queue
    }

    /// Run until Ctrl-C (or until idle with `exit_when_idle`).
    pub async fn run(self) -> Result<RunSummary> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves (or until idle with `exit_when_idle`).
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        info!(
            pending = self.queue.len(),
            watching = self.watcher.as_ref().is_some_and(|w| w.is_running()),
            "distro-tracker runtime started"
        );

        let mut ticker = time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.tick() {
                        error!(error = %err, "queue pass failed; shutting down");
                        break Err(err);
                    }
                    if self.options.exit_when_idle && self.queue.is_empty() {
                        info!("queue is empty; exiting");
                        break Ok(());
                    }
                }
            }
        };

        self.finish(outcome).await
    }

    /// Drain the workers, then report `outcome`. Runs on every exit path so
    /// the pool is never closed from `Drop` on a runtime thread.
    async fn finish(mut self, outcome: Result<()>) -> Result<RunSummary> {
        let drained = self.shutdown().await;
        outcome?;
        drained?;
        info!(
            succeeded = self.summary.succeeded,
            failed = self.summary.failed,
            retried = self.summary.retried,
            broken = self.summary.broken,
            "runtime exiting"
        );
        Ok(self.summary)
    }

    /// One watcher drain plus one queue pass.
    pub fn tick(&mut self) -> Result<()> {
        if let Some(watcher) = self.watcher.as_mut() {
            watcher.process_events(&mut self.queue);
        }
        let outcomes = self.queue.process_queue()?;
        self.record(outcomes);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }

        if let Some(mut pool) = self.queue.take_pool() {
            debug!(in_flight = self.queue.in_flight(), "waiting for workers to finish");
            tokio::task::spawn_blocking(move || pool.close()).await?;
        }

        let outcomes = self.queue.reap_finished();
        self.record(outcomes);
        Ok(())
    }

    fn record(&mut self, outcomes: Vec<(EntryId, EntryOutcome)>) {
        for (id, outcome) in outcomes {
            debug!(entry = %id, ?outcome, "entry finished");
            self.summary.count(&outcome);
        }
    }
}
