// src/handlers/mod.rs

//! The tracker's mail handlers.
//!
//! [`TrackerHandler`] implements [`MailHandler`] on top of the subscription
//! store: `control` runs subscription commands, `dispatch` forwards package
//! mail to subscribers, `bounces` counts delivery failures.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use crate::config::ConfigFile;
use crate::fs::FileSystem;
use crate::mail::message::Message;
use crate::mail::processor::MailHandler;
use crate::subscriptions::SubscriptionStore;

pub mod bounces;
pub mod control;
pub mod dispatch;
pub mod outbox;

pub use outbox::Outbox;

/// Header marking mail the tracker already handled.
pub const LOOP_HEADER: &str = "X-Loop";
pub const KEYWORD_HEADER: &str = "X-Distro-Tracker-Keyword";
pub const PACKAGE_HEADER: &str = "X-Distro-Tracker-Package";

/// Default keyword for dispatched mail that names none.
pub const DEFAULT_KEYWORD: &str = "default";

pub struct TrackerHandler {
    fqdn: String,
    fs: Arc<dyn FileSystem>,
    store: Arc<Mutex<SubscriptionStore>>,
    store_path: PathBuf,
    outbox: Outbox,
    bounce_threshold: u32,
}

impl std::fmt::Debug for TrackerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerHandler")
            .field("fqdn", &self.fqdn)
            .field("store_path", &self.store_path)
            .field("outbox", &self.outbox.dir())
            .field("bounce_threshold", &self.bounce_threshold)
            .finish_non_exhaustive()
    }
}

impl TrackerHandler {
    pub fn new(
        fqdn: impl Into<String>,
        fs: Arc<dyn FileSystem>,
        store: Arc<Mutex<SubscriptionStore>>,
        store_path: impl Into<PathBuf>,
        outbox: Outbox,
        bounce_threshold: u32,
    ) -> Self {
        Self {
            fqdn: fqdn.into(),
            fs,
            store,
            store_path: store_path.into(),
            outbox,
            bounce_threshold: bounce_threshold.max(1),
        }
    }

    pub fn from_config(
        cfg: &ConfigFile,
        fs: Arc<dyn FileSystem>,
        store: Arc<Mutex<SubscriptionStore>>,
    ) -> Self {
        let outbox = Outbox::new(cfg.tracker.outbox_dir(), Arc::clone(&fs));
        Self::new(
            cfg.tracker.fqdn.clone(),
            fs,
            store,
            cfg.tracker.subscriptions_path(),
            outbox,
            cfg.bounce_threshold,
        )
    }

    pub fn fqdn(&self) -> &str {
        &self.fqdn
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn store(&self) -> Arc<Mutex<SubscriptionStore>> {
        Arc::clone(&self.store)
    }

    pub fn bounce_threshold(&self) -> u32 {
        self.bounce_threshold
    }

    /// `<service>@<fqdn>`.
    pub fn service_address(&self, service: &str) -> String {
        format!("{service}@{}", self.fqdn)
    }

    /// Whether `msg` already went through `service` once.
    pub(crate) fn is_looping(&self, msg: &Message, service: &str) -> bool {
        let marker = self.service_address(service);
        msg.get_all(LOOP_HEADER)
            .iter()
            .any(|v| v.trim().eq_ignore_ascii_case(&marker))
    }

    pub(crate) fn lock_store(&self) -> MutexGuard<'_, SubscriptionStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn persist(&self, store: &SubscriptionStore) -> Result<()> {
        store.save(self.fs.as_ref(), &self.store_path)
    }
}

impl MailHandler for TrackerHandler {
    fn handle_control(&self, msg: &Message) -> Result<()> {
        control::handle(self, msg)
    }

    fn handle_dispatch(
        &self,
        msg: &Message,
        package: Option<&str>,
        keyword: Option<&str>,
    ) -> Result<()> {
        dispatch::handle(self, msg, package, keyword)
    }

    fn handle_bounces(&self, msg: &Message, details: Option<&str>) -> Result<()> {
        bounces::handle(self, msg, details)
    }
}
