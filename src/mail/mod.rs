// src/mail/mod.rs

//! Incoming mail: the maildir-backed queue, its worker pool and retry
//! policy, the directory watcher, and the processor that routes each
//! message to a handler.

pub mod entry;
pub mod maildir;
pub mod message;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod watcher;
pub mod worker;

pub use entry::MailQueueEntry;
pub use maildir::Maildir;
pub use message::{Message, parse_address};
pub use pool::{TaskHandle, WorkerPool};
pub use processor::{DELIVERY_HEADERS, MailHandler, MailProcessor, identify_service};
pub use queue::{EntryOutcome, MailQueue};
pub use retry::RetryPolicy;
pub use watcher::MailQueueWatcher;
pub use worker::{MaildirProcessor, ProcessMail};
