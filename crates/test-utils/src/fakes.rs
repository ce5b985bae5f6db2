//! Fakes standing in for the tracker's pluggable parts.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use serde_json::Value;

use distro_tracker::dag::{Event, Task, TaskContext, TaskSpec};
use distro_tracker::errors::MailProcessorError;
use distro_tracker::mail::{MailHandler, Message};

// ---------------------------------------------------------------------------
// Task engine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LogInner {
    executed: Vec<String>,
    received: Vec<(String, Event)>,
}

/// Shared record of what scripted tasks did during a job.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    inner: Arc<Mutex<LogInner>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task names in the order they executed.
    pub fn executed(&self) -> Vec<String> {
        self.inner.lock().unwrap().executed.clone()
    }

    /// Events delivered to `task`, in delivery order.
    pub fn received_by(&self, task: &str) -> Vec<Event> {
        self.inner
            .lock()
            .unwrap()
            .received
            .iter()
            .filter(|(t, _)| t == task)
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn record_execution(&self, task: &str) {
        self.inner.lock().unwrap().executed.push(task.to_string());
    }

    fn record_event(&self, task: &str, event: &Event) {
        self.inner
            .lock()
            .unwrap()
            .received
            .push((task.to_string(), event.clone()));
    }
}

/// Builder for a task whose behaviour is fixed up front.
///
/// When executed it logs its name, raises the configured events and then
/// succeeds or fails.
#[derive(Debug, Clone)]
pub struct ScriptedTask {
    name: String,
    depends_on: Vec<String>,
    produces: Vec<String>,
    raises: Vec<Event>,
    fails: bool,
    log: ExecutionLog,
}

impl ScriptedTask {
    pub fn new(name: &str, log: &ExecutionLog) -> Self {
        Self {
            name: name.to_string(),
            depends_on: Vec::new(),
            produces: Vec::new(),
            raises: Vec::new(),
            fails: false,
            log: log.clone(),
        }
    }

    pub fn consumes(mut self, events: &[&str]) -> Self {
        self.depends_on = events.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Declare `events` and raise each of them on every run.
    pub fn emits(mut self, events: &[&str]) -> Self {
        for e in events {
            self.produces.push(e.to_string());
            self.raises.push(Event::new(*e));
        }
        self
    }

    /// Declare `events` without raising them.
    pub fn declares(mut self, events: &[&str]) -> Self {
        self.produces.extend(events.iter().map(|e| e.to_string()));
        self
    }

    pub fn emits_with(mut self, event: &str, arguments: Value) -> Self {
        if !self.produces.iter().any(|p| p == event) {
            self.produces.push(event.to_string());
        }
        self.raises.push(Event::with_arguments(event, arguments));
        self
    }

    /// Return an error after raising the events.
    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    pub fn spec(self) -> TaskSpec {
        let name = self.name.clone();
        let depends_on = self.depends_on.clone();
        let produces = self.produces.clone();
        TaskSpec::new(name, depends_on, produces, move || {
            Box::new(self.clone()) as Box<dyn Task>
        })
    }
}

impl Task for ScriptedTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn depends_on(&self) -> Vec<String> {
        self.depends_on.clone()
    }

    fn produces(&self) -> Vec<String> {
        self.produces.clone()
    }

    fn process_event(&mut self, event: &Event) {
        self.log.record_event(&self.name, event);
    }

    fn execute(&mut self, ctx: &mut TaskContext) -> Result<()> {
        self.log.record_execution(&self.name);
        for event in &self.raises {
            ctx.raise_event(event.name.clone(), event.arguments.clone());
        }
        if self.fails {
            return Err(anyhow!("task {} failed on purpose", self.name));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mail handlers
// ---------------------------------------------------------------------------

/// One call received by a [`RecordingHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerCall {
    Control {
        subject: Option<String>,
    },
    Dispatch {
        package: Option<String>,
        keyword: Option<String>,
    },
    Bounces {
        details: Option<String>,
    },
}

#[derive(Debug, Clone)]
enum Failure {
    Permanent(String),
    Transient(String),
}

/// `MailHandler` that records every call and optionally fails.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<HandlerCall>>,
    failure: Mutex<Option<Failure>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later call return a `MailProcessorError`.
    pub fn fail_permanently(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(Failure::Permanent(reason.to_string()));
    }

    /// Make every later call return a retryable error.
    pub fn fail_transiently(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(Failure::Transient(reason.to_string()));
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<HandlerCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: HandlerCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.failure.lock().unwrap().clone() {
            None => Ok(()),
            Some(Failure::Permanent(reason)) => Err(MailProcessorError::Failed(reason).into()),
            Some(Failure::Transient(reason)) => Err(anyhow!(reason)),
        }
    }
}

impl MailHandler for RecordingHandler {
    fn handle_control(&self, msg: &Message) -> Result<()> {
        self.record(HandlerCall::Control {
            subject: msg.get("Subject").map(str::to_string),
        })
    }

    fn handle_dispatch(
        &self,
        _msg: &Message,
        package: Option<&str>,
        keyword: Option<&str>,
    ) -> Result<()> {
        self.record(HandlerCall::Dispatch {
            package: package.map(str::to_string),
            keyword: keyword.map(str::to_string),
        })
    }

    fn handle_bounces(&self, _msg: &Message, details: Option<&str>) -> Result<()> {
        self.record(HandlerCall::Bounces {
            details: details.map(str::to_string),
        })
    }
}
