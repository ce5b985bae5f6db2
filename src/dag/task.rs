// src/dag/task.rs

use std::collections::HashSet;

use anyhow::Result;
use serde_json::Value;

use crate::dag::event::Event;
use crate::types::{EventName, TaskName};

/// A unit of update logic in the task graph.
///
/// `name`, `depends_on` and `produces` describe the task's place in the
/// graph and are read once when the task is registered. A task receives the
/// events it depends on through [`Task::process_event`] before it runs, and
/// raises its own events through the [`TaskContext`] given to
/// [`Task::execute`].
pub trait Task: Send {
    fn name(&self) -> &str;

    fn depends_on(&self) -> Vec<EventName> {
        Vec::new()
    }

    fn produces(&self) -> Vec<EventName> {
        Vec::new()
    }

    /// Called for each delivered event this task depends on.
    fn process_event(&mut self, _event: &Event) {}

    fn execute(&mut self, ctx: &mut TaskContext) -> Result<()>;
}

/// Collects the events a task raises while it executes.
#[derive(Debug, Default)]
pub struct TaskContext {
    raised: Vec<Event>,
}

impl TaskContext {
    pub fn raise_event(&mut self, name: impl Into<EventName>, arguments: Option<Value>) {
        self.raised.push(Event {
            name: name.into(),
            arguments,
        });
    }

    pub fn raised_events(&self) -> &[Event] {
        &self.raised
    }

    fn into_events(self) -> Vec<Event> {
        self.raised
    }
}

/// A task as it lives inside one job run.
pub struct TaskInstance {
    name: TaskName,
    depends_on: HashSet<EventName>,
    task: Box<dyn Task>,
    event_received: bool,
    raised: Vec<Event>,
}

impl std::fmt::Debug for TaskInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInstance")
            .field("name", &self.name)
            .field("event_received", &self.event_received)
            .field("raised", &self.raised)
            .finish_non_exhaustive()
    }
}

impl TaskInstance {
    pub fn new(name: TaskName, depends_on: &[EventName], task: Box<dyn Task>) -> Self {
        Self {
            name,
            depends_on: depends_on.iter().cloned().collect(),
            task,
            event_received: false,
            raised: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event_received(&self) -> bool {
        self.event_received
    }

    pub fn mark_event_received(&mut self) {
        self.event_received = true;
    }

    /// Events raised by the last execution.
    pub fn raised_events(&self) -> &[Event] {
        &self.raised
    }

    /// Deliver `event` if this task depends on it. Returns whether it did.
    pub fn receive_event(&mut self, event: &Event) -> bool {
        if !self.depends_on.contains(&event.name) {
            return false;
        }
        self.task.process_event(event);
        self.event_received = true;
        true
    }

    /// Run the task, keeping whatever events it raised.
    pub fn execute(&mut self) -> Result<()> {
        let mut ctx = TaskContext::default();
        let result = self.task.execute(&mut ctx);
        self.raised = ctx.into_events();
        result
    }

    pub fn discard_raised_events(&mut self) {
        self.raised.clear();
    }
}
