// tests/mail_queue.rs

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use distro_tracker::clock::{Clock, ManualClock};
use distro_tracker::errors::MailProcessorError;
use distro_tracker::fs::FileSystem;
use distro_tracker::fs::mock::MockFileSystem;
use distro_tracker::mail::{EntryOutcome, MailQueue, Maildir, ProcessMail, RetryPolicy};
use distro_tracker::types::EntryId;
use distro_tracker_test_utils::{init_tracing, wait_until};

const MAILDIR: &str = "/var/mail/tracker";

fn mock_maildir(files: &[&str]) -> (MockFileSystem, Maildir) {
    let fs = MockFileSystem::new();
    fs.add_dir(format!("{MAILDIR}/new"));
    for name in files {
        fs.add_file(format!("{MAILDIR}/new/{name}"), b"Subject: hi\n\nbody".to_vec());
    }
    let maildir = Maildir::new(MAILDIR, Arc::new(fs.clone()));
    (fs, maildir)
}

/// Processor that deletes the file, like the production worker does on
/// success.
fn deleting(fs: &MockFileSystem) -> Arc<dyn ProcessMail> {
    let fs = fs.clone();
    Arc::new(move |p: &Path| -> anyhow::Result<()> { fs.remove_file(p) })
}

/// Run passes until the queue is empty or `timeout` elapses.
fn drain(queue: &mut MailQueue, timeout: Duration) -> Vec<(EntryId, EntryOutcome)> {
    let deadline = Instant::now() + timeout;
    let mut outcomes = Vec::new();
    while !queue.is_empty() && Instant::now() < deadline {
        outcomes.extend(queue.process_queue().unwrap());
        std::thread::sleep(Duration::from_millis(5));
    }
    outcomes
}

/// Run passes until at least `n` outcomes were produced.
fn collect(queue: &mut MailQueue, n: usize) -> Vec<(EntryId, EntryOutcome)> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut outcomes = Vec::new();
    while outcomes.len() < n && Instant::now() < deadline {
        outcomes.extend(queue.process_queue().unwrap());
        std::thread::sleep(Duration::from_millis(5));
    }
    outcomes
}

#[test]
fn test_initialize_queues_every_file_in_new() {
    let (fs, maildir) = mock_maildir(&["b", "a", "c"]);
    fs.add_dir(format!("{MAILDIR}/new/not-a-message"));
    let mut queue = MailQueue::new(maildir, deleting(&fs));

    assert_eq!(queue.initialize().unwrap(), 3);
    assert_eq!(queue.identifiers(), ["a", "b", "c"]);
    assert!(!queue.has_pool(), "pool is created lazily");
}

#[test]
fn test_add_is_idempotent_and_remove_tolerates_unknown() {
    let (fs, maildir) = mock_maildir(&[]);
    let mut queue = MailQueue::new(maildir, deleting(&fs));

    queue.add("x").set_data("source", "test");
    queue.add("x");
    assert_eq!(queue.len(), 1);
    assert_eq!(
        queue.entry("x").unwrap().get_data("source"),
        Some(&serde_json::json!("test"))
    );
    assert_eq!(
        queue.entry("x").unwrap().path(),
        Path::new("/var/mail/tracker/new/x")
    );

    queue.remove("nope");
    queue.remove("x");
    queue.remove("x");
    assert!(queue.is_empty());
}

#[test]
fn test_successful_entries_leave_the_queue() {
    init_tracing();
    let (fs, maildir) = mock_maildir(&["m1", "m2", "m3"]);
    let mut queue = MailQueue::new(maildir, deleting(&fs));
    queue.initialize().unwrap();

    let outcomes = drain(&mut queue, Duration::from_secs(5));

    assert!(queue.is_empty());
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|(_, o)| *o == EntryOutcome::Succeeded));
    assert!(fs.list(format!("{MAILDIR}/new")).is_empty());
}

#[test]
fn test_permanent_failure_moves_message_to_failed() {
    let (fs, maildir) = mock_maildir(&["bad"]);
    let processor: Arc<dyn ProcessMail> = Arc::new(|_: &Path| -> anyhow::Result<()> {
        Err(MailProcessorError::MissingDeliveryAddress.into())
    });
    let mut queue = MailQueue::new(maildir, processor);
    queue.initialize().unwrap();

    let outcomes = drain(&mut queue, Duration::from_secs(5));

    assert_eq!(outcomes, vec![("bad".to_string(), EntryOutcome::Failed)]);
    assert!(queue.is_empty());
    assert_eq!(fs.list(format!("{MAILDIR}/.failed/new")), vec!["bad"]);
    assert!(fs.list(format!("{MAILDIR}/new")).is_empty());
}

#[test]
fn test_wrapped_processor_error_is_still_permanent() {
    let (fs, maildir) = mock_maildir(&["bad"]);
    let processor: Arc<dyn ProcessMail> = Arc::new(|p: &Path| -> anyhow::Result<()> {
        Err(anyhow::Error::from(MailProcessorError::InvalidDeliveryAddress(
            "nobody@tracker.example.org".into(),
        ))
        .context(format!("processing {}", p.display())))
    });
    let mut queue = MailQueue::new(maildir, processor);
    queue.initialize().unwrap();

    let outcomes = drain(&mut queue, Duration::from_secs(5));

    assert_eq!(outcomes, vec![("bad".to_string(), EntryOutcome::Failed)]);
    assert_eq!(fs.list(format!("{MAILDIR}/.failed/new")), vec!["bad"]);
}

#[test]
fn test_transient_failure_is_retried_after_backoff() {
    let (fs, maildir) = mock_maildir(&["flaky"]);
    let attempts = Arc::new(AtomicUsize::new(0));
    let processor: Arc<dyn ProcessMail> = {
        let attempts = Arc::clone(&attempts);
        let fs = fs.clone();
        Arc::new(move |p: &Path| -> anyhow::Result<()> {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(anyhow!("database is locked"));
            }
            fs.remove_file(p)
        })
    };
    let clock = Arc::new(ManualClock::starting_now());
    let start = clock.now();
    let mut queue = MailQueue::new(maildir, processor).with_clock(clock.clone());
    queue.initialize().unwrap();

    let first = collect(&mut queue, 1);
    match &first[..] {
        [(id, EntryOutcome::Retrying { next_try_time })] => {
            assert_eq!(id, "flaky");
            assert_eq!(*next_try_time, start + chrono::TimeDelta::seconds(30));
        }
        other => panic!("expected one retry, got {other:?}"),
    }
    assert_eq!(queue.entry("flaky").unwrap().tries(), 1);
    assert!(!queue.entry("flaky").unwrap().processing_task_started());

    // Not eligible before the next try time.
    queue.process_queue().unwrap();
    assert!(!queue.entry("flaky").unwrap().processing_task_started());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_secs(31));
    let second = collect(&mut queue, 1);

    assert_eq!(second, vec![("flaky".to_string(), EntryOutcome::Succeeded)]);
    assert!(queue.is_empty());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_exhausted_retries_move_message_to_broken() {
    let (fs, maildir) = mock_maildir(&["doomed"]);
    let processor: Arc<dyn ProcessMail> =
        Arc::new(|_: &Path| -> anyhow::Result<()> { Err(anyhow!("smtp unreachable")) });
    let clock = Arc::new(ManualClock::starting_now());
    let policy = RetryPolicy {
        initial_delay: Duration::from_secs(1),
        multiplier: 2.0,
        max_delay: Duration::from_secs(60),
        max_tries: 2,
    };
    let mut queue = MailQueue::new(maildir, processor)
        .with_clock(clock.clone())
        .with_retry_policy(policy);
    queue.initialize().unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let outcomes = collect(&mut queue, 1);
        seen.extend(outcomes.into_iter().map(|(_, o)| o));
        clock.advance(Duration::from_secs(120));
    }

    assert!(matches!(seen[0], EntryOutcome::Retrying { .. }));
    assert!(matches!(seen[1], EntryOutcome::Retrying { .. }));
    assert_eq!(seen[2], EntryOutcome::Broken);
    assert!(queue.is_empty());
    assert_eq!(fs.list(format!("{MAILDIR}/.broken/new")), vec!["doomed"]);
}

#[test]
fn test_in_flight_entries_never_exceed_max_workers() {
    let names: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let (fs, maildir) = mock_maildir(&refs);

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let processor: Arc<dyn ProcessMail> = {
        let (running, peak, fs) = (Arc::clone(&running), Arc::clone(&peak), fs.clone());
        Arc::new(move |p: &Path| -> anyhow::Result<()> {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            running.fetch_sub(1, Ordering::SeqCst);
            fs.remove_file(p)
        })
    };
    let mut queue = MailQueue::new(maildir, processor).with_max_workers(3);
    queue.initialize().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut finished = 0;
    while !queue.is_empty() && Instant::now() < deadline {
        finished += queue.process_queue().unwrap().len();
        assert!(queue.in_flight() <= 3);
        std::thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(finished, 10);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(queue.pool().unwrap().size(), 3);
}

#[test]
fn test_entries_are_started_in_queue_order() {
    let (fs, maildir) = mock_maildir(&["a", "b", "c"]);
    let order = Arc::new(Mutex::new(Vec::new()));
    let processor: Arc<dyn ProcessMail> = {
        let (order, fs) = (Arc::clone(&order), fs.clone());
        Arc::new(move |p: &Path| -> anyhow::Result<()> {
            let name = p.file_name().unwrap().to_string_lossy().into_owned();
            order.lock().unwrap().push(name);
            fs.remove_file(p)
        })
    };
    let mut queue = MailQueue::new(maildir, processor).with_max_workers(1);
    queue.initialize().unwrap();

    drain(&mut queue, Duration::from_secs(5));

    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
}

#[test]
fn test_close_pool_is_idempotent_and_pool_is_recreated() {
    let (fs, maildir) = mock_maildir(&["a"]);
    let mut queue = MailQueue::new(maildir, deleting(&fs));
    queue.initialize().unwrap();

    queue.process_queue().unwrap();
    assert!(queue.has_pool());

    queue.close_pool();
    queue.close_pool();
    assert!(!queue.has_pool());

    // Work submitted before closing has finished by now.
    assert!(wait_until(Duration::from_secs(1), || queue
        .entry("a")
        .map(|e| e.processing_task_started())
        .unwrap_or(false)));
    let outcomes = queue.reap_finished();
    assert_eq!(outcomes, vec![("a".to_string(), EntryOutcome::Succeeded)]);

    queue.pool().unwrap();
    assert!(queue.has_pool());
}
