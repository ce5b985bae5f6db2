//! Fixed-size pool of OS worker threads.
//!
//! Work is submitted without blocking; each submission returns a
//! [`TaskHandle`] that the controller polls with [`TaskHandle::is_finished`].
//! Results travel back over a oneshot channel read with `try_recv`, so the
//! controller never waits on a worker and needs no async runtime.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Result, anyhow};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

struct Work {
    job: Job,
    reply: oneshot::Sender<Result<()>>,
}

#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
    sender: Option<mpsc::Sender<Work>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Work>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("mail-worker-{n}"))
                .spawn(move || worker_loop(receiver))?;
            workers.push(handle);
        }
        debug!(size, "started worker pool");

        Ok(Self {
            size,
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }

    /// Queue `job` for execution on the next free worker.
    ///
    /// On a closed pool the returned handle is already finished with an
    /// error.
    pub fn submit<F>(&self, job: F) -> TaskHandle
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let mut handle = TaskHandle { rx, result: None };

        let Some(sender) = self.sender.as_ref() else {
            handle.result = Some(Err(anyhow!("worker pool is closed")));
            return handle;
        };
        if sender
            .send(Work {
                job: Box::new(job),
                reply,
            })
            .is_err()
        {
            handle.result = Some(Err(anyhow!("all workers have exited")));
        }
        handle
    }

    /// Stop accepting work, let the workers drain what was submitted, and
    /// join them. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().map(str::to_string);
            if worker.join().is_err() {
                warn!(worker = ?name, "worker thread panicked outside of a job");
            }
        }
        debug!(size = self.size, "worker pool closed");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(receiver: Arc<Mutex<mpsc::Receiver<Work>>>) {
    loop {
        let next = receiver.lock().unwrap_or_else(|e| e.into_inner()).recv();
        let Ok(Work { job, reply }) = next else {
            break;
        };

        let result = catch_unwind(AssertUnwindSafe(job))
            .unwrap_or_else(|payload| Err(anyhow!("worker panicked: {}", panic_message(&*payload))));

        // The controller may have dropped the handle; nothing to report then.
        let _ = reply.send(result);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Pending result of one submitted job.
#[derive(Debug)]
pub struct TaskHandle {
    rx: oneshot::Receiver<Result<()>>,
    result: Option<Result<()>>,
}

impl TaskHandle {
    /// Non-blocking completion check.
    pub fn is_finished(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.result = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                self.result = Some(Err(anyhow!("worker exited without reporting a result")));
                true
            }
        }
    }

    /// Take the job's result if it has finished.
    pub fn take_result(&mut self) -> Option<Result<()>> {
        if self.is_finished() {
            self.result.take()
        } else {
            None
        }
    }
}
