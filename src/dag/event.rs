use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::EventName;

/// A named signal raised by a task, with an optional payload for the tasks
/// that depend on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: EventName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl Event {
    pub fn new(name: impl Into<EventName>) -> Self {
        Self {
            name: name.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(name: impl Into<EventName>, arguments: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            arguments: Some(arguments.into()),
        }
    }
}
