// src/lib.rs

pub mod cli;
pub mod clock;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod handlers;
pub mod logging;
pub mod mail;
pub mod subscriptions;
pub mod types;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{Runtime, RuntimeOptions};
use crate::fs::{FileSystem, RealFileSystem};
use crate::handlers::TrackerHandler;
use crate::mail::{Maildir, MailProcessor, MailQueue, MailQueueWatcher, MaildirProcessor};
use crate::subscriptions::SubscriptionStore;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the subscription store and the mail handlers
/// - the maildir queue and its worker
/// - the directory watcher (disabled in `--once` mode)
/// - the runtime loop and Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let maildir = Maildir::new(cfg.mail.maildir.clone(), Arc::clone(&fs));

    if args.dry_run {
        print_dry_run(&cfg, &maildir);
        return Ok(());
    }

    fs.create_dir_all(&maildir.new_dir())?;

    let store = SubscriptionStore::load(fs.as_ref(), &cfg.tracker.subscriptions_path())?;
    let store = Arc::new(Mutex::new(store));
    let handler = Arc::new(TrackerHandler::from_config(&cfg, Arc::clone(&fs), store));
    let processor = MailProcessor::from_settings(&cfg.tracker, handler);
    let worker = MaildirProcessor::new(
        maildir.clone(),
        processor,
        cfg.mail.processed_subfolder.clone(),
    );

    let mut queue = MailQueue::from_config(&cfg, maildir.clone(), Arc::new(worker));
    queue.initialize()?;

    // Start watching before the first pass so nothing that lands in
    // between is missed; duplicates are ignored by the queue.
    let watcher = if args.once {
        None
    } else {
        let mut watcher = MailQueueWatcher::new(maildir.new_dir());
        watcher.start()?;
        Some(watcher)
    };

    let options = RuntimeOptions {
        exit_when_idle: args.once,
        poll_interval: cfg.mail.poll_interval,
    };

    let summary = Runtime::new(queue, watcher, options).run().await?;
    info!(finished = summary.finished(), retried = summary.retried, "done");
    Ok(())
}

/// Print the resolved settings and what is waiting in `new/`.
fn print_dry_run(cfg: &ConfigFile, maildir: &Maildir) {
    println!("distro-tracker dry-run");
    println!("  tracker.fqdn = {}", cfg.tracker.fqdn);
    println!(
        "  tracker.accept_unqualified_emails = {}",
        cfg.tracker.accept_unqualified_emails
    );
    println!("  tracker.data_path = {}", cfg.tracker.data_path.display());
    println!("  mail.maildir = {}", cfg.mail.maildir.display());
    println!("  mail.max_workers = {}", cfg.mail.max_workers);
    println!("  mail.poll_interval = {:?}", cfg.mail.poll_interval);
    if let Some(ref sub) = cfg.mail.processed_subfolder {
        println!("  mail.processed_subfolder = {sub}");
    }
    println!(
        "  retry = {:?} x{} up to {:?}, {} tries",
        cfg.retry.initial_delay, cfg.retry.multiplier, cfg.retry.max_delay, cfg.retry.max_tries
    );
    println!("  bounces.threshold = {}", cfg.bounce_threshold);
    println!("  tasks.on_failure = {:?}", cfg.on_failure);
    println!();

    match maildir.list_new() {
        Ok(names) => {
            println!("pending messages ({}):", names.len());
            for name in names {
                println!("  - {name}");
            }
        }
        Err(e) => println!("pending messages: unavailable ({e:#})"),
    }

    debug!("dry-run complete (nothing processed)");
}
