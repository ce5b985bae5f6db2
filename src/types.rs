use std::str::FromStr;
use serde::Deserialize;

/// Canonical task name type used by the task engine.
pub type TaskName = String;

/// Canonical event name type used by the task engine.
pub type EventName = String;

/// Identifier of a mail queue entry (the file name inside `new/`).
pub type EntryId = String;

/// What a job does when one of its tasks returns an error.
///
/// - `Isolate`: log the failure, record it in the job report, drop the events
///   the failed task raised and keep running the remaining tasks (default).
/// - `Abort`: stop the job immediately and return the error to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    Isolate,
    Abort,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Isolate
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "isolate" => Ok(FailurePolicy::Isolate),
            "abort" => Ok(FailurePolicy::Abort),
            other => Err(format!(
                "invalid on_failure: {other} (expected \"isolate\" or \"abort\")"
            )),
        }
    }
}

/// Terminal subfolders of the maildir.
pub const FAILED_SUBFOLDER: &str = "failed";
pub const BROKEN_SUBFOLDER: &str = "broken";
