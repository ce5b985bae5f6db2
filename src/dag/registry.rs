// src/dag/registry.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::dag::task::Task;
use crate::errors::{Result, TrackerError};
use crate::types::{EventName, TaskName};

type TaskFactory = Arc<dyn Fn() -> Box<dyn Task> + Send + Sync>;

/// Class-level description of a task: where it sits in the graph and how to
/// build a fresh instance for a job.
#[derive(Clone)]
pub struct TaskSpec {
    pub name: TaskName,
    pub depends_on: Vec<EventName>,
    pub produces: Vec<EventName>,
    factory: TaskFactory,
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("produces", &self.produces)
            .finish_non_exhaustive()
    }
}

impl TaskSpec {
    pub fn new<F>(
        name: impl Into<TaskName>,
        depends_on: Vec<EventName>,
        produces: Vec<EventName>,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Box<dyn Task> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            depends_on,
            produces,
            factory: Arc::new(factory),
        }
    }

    /// Describe `T` by probing a default instance.
    pub fn of<T>() -> Self
    where
        T: Task + Default + 'static,
    {
        let template = T::default();
        Self::new(
            template.name().to_string(),
            template.depends_on(),
            template.produces(),
            || Box::new(T::default()) as Box<dyn Task>,
        )
    }

    pub fn instantiate(&self) -> Box<dyn Task> {
        (self.factory)()
    }
}

/// Explicit, ordered set of known tasks.
///
/// Registration order is significant: it breaks ties in the topological
/// order of the task graph.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    specs: Vec<TaskSpec>,
    by_name: HashMap<TaskName, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: TaskSpec) -> Result<()> {
        if spec.name.trim().is_empty() {
            return Err(TrackerError::ConfigError(
                "task name must not be empty".to_string(),
            ));
        }
        if self.by_name.contains_key(&spec.name) {
            return Err(TrackerError::ConfigError(format!(
                "task '{}' is already registered",
                spec.name
            )));
        }
        self.by_name.insert(spec.name.clone(), self.specs.len());
        self.specs.push(spec);
        Ok(())
    }

    pub fn register_default<T>(&mut self) -> Result<()>
    where
        T: Task + Default + 'static,
    {
        self.register(TaskSpec::of::<T>())
    }

    pub fn get(&self, name: &str) -> Option<&TaskSpec> {
        self.by_name.get(name).map(|&i| &self.specs[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Specs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskSpec> {
        self.specs.iter()
    }
}
