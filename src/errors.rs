// src/errors.rs

//! Crate-wide error types.
//!
//! [`TrackerError`] covers configuration, the task engine and the runtime.
//! [`MailProcessorError`] is the *permanent* failure of a single message:
//! whenever a worker returns one of these (directly or wrapped in an
//! `anyhow::Error`), the queue moves the message to the `failed` folder
//! without retrying. Any other error is treated as transient.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cycle detected in task DAG: {0}")]
    DagCycle(String),

    #[error("Task '{task}' failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Directory does not exist: {0:?}")]
    MissingDirectory(PathBuf),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Non-retryable failure while processing one incoming message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailProcessorError {
    #[error("conflicting delivery addresses: {}", .0.join(", "))]
    ConflictingDeliveryAddresses(Vec<String>),

    #[error("no delivery address found in message headers")]
    MissingDeliveryAddress,

    #[error("invalid delivery address: {0}")]
    InvalidDeliveryAddress(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("{0}")]
    Failed(String),
}

impl MailProcessorError {
    /// Whether `err` (or anything in its cause chain) is a permanent
    /// processing failure.
    pub fn is_permanent(err: &anyhow::Error) -> bool {
        err.chain()
            .any(|cause| cause.downcast_ref::<MailProcessorError>().is_some())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TrackerError>;
