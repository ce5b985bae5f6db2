// src/dag/job.rs

use std::collections::HashMap;

use petgraph::graph::NodeIndex;
use tracing::{debug, error, info};

use crate::dag::event::Event;
use crate::dag::graph::TaskGraph;
use crate::dag::task::TaskInstance;
use crate::errors::{Result, TrackerError};
use crate::types::{FailurePolicy, TaskName};

/// Summary of one job run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Tasks that ran successfully, in execution order.
    pub executed: Vec<TaskName>,
    /// Reachable tasks that never received an event.
    pub skipped: Vec<TaskName>,
    /// Tasks that returned an error, with the rendered error chain.
    pub failed: Vec<(TaskName, String)>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One run of the task graph, triggered by a single task.
///
/// Only the initial task and the tasks reachable from it are instantiated.
/// The initial task always runs; any other task runs only if a task before
/// it raised an event it depends on.
#[derive(Debug)]
pub struct Job<'g> {
    graph: &'g TaskGraph,
    initial: TaskName,
    order: Vec<NodeIndex>,
    instances: HashMap<NodeIndex, TaskInstance>,
    policy: FailurePolicy,
}

impl<'g> Job<'g> {
    pub fn new(graph: &'g TaskGraph, initial: &str) -> Result<Self> {
        let reachable = graph.reachable_set(initial)?;

        let order: Vec<NodeIndex> = graph
            .ordered_nodes()
            .iter()
            .copied()
            .filter(|n| reachable[n.index()])
            .collect();

        let mut instances = HashMap::with_capacity(order.len());
        for &node in &order {
            let spec = graph.spec_at(node);
            let mut instance =
                TaskInstance::new(spec.name.clone(), &spec.depends_on, spec.instantiate());
            if spec.name == initial {
                instance.mark_event_received();
            }
            instances.insert(node, instance);
        }

        debug!(initial, tasks = order.len(), "job created");

        Ok(Self {
            graph,
            initial: initial.to_string(),
            order,
            instances,
            policy: graph.failure_policy(),
        })
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    /// Names of the tasks kept in this job, in execution order.
    pub fn task_names(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|n| self.graph.spec_at(*n).name.as_str())
            .collect()
    }

    pub fn instance(&self, name: &str) -> Option<&TaskInstance> {
        self.instances.values().find(|i| i.name() == name)
    }

    /// Execute the job.
    ///
    /// With [`FailurePolicy::Abort`] the first failing task ends the run
    /// with [`TrackerError::TaskFailed`]. With [`FailurePolicy::Isolate`] the
    /// failure is recorded, the events the task raised are dropped and the
    /// run continues.
    pub fn run(&mut self) -> Result<JobReport> {
        let mut report = JobReport::default();

        for &node in &self.order {
            let Some(instance) = self.instances.get_mut(&node) else {
                continue;
            };
            let name = instance.name().to_string();

            if !instance.event_received() {
                debug!(task = %name, "skipped, no event received");
                report.skipped.push(name);
                continue;
            }

            debug!(task = %name, "executing");
            if let Err(err) = instance.execute() {
                match self.policy {
                    FailurePolicy::Abort => {
                        error!(task = %name, error = %format!("{err:#}"), "task failed, aborting job");
                        return Err(TrackerError::TaskFailed {
                            task: name,
                            source: err,
                        });
                    }
                    FailurePolicy::Isolate => {
                        error!(task = %name, error = %format!("{err:#}"), "task failed");
                        instance.discard_raised_events();
                        report.failed.push((name, format!("{err:#}")));
                        continue;
                    }
                }
            }

            let events: Vec<Event> = instance.raised_events().to_vec();
            report.executed.push(name);
            if events.is_empty() {
                continue;
            }

            for dependent in self.graph.dependent_nodes(node) {
                if let Some(target) = self.instances.get_mut(&dependent) {
                    for event in &events {
                        target.receive_event(event);
                    }
                }
            }
        }

        info!(
            initial = %self.initial,
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "job finished"
        );
        Ok(report)
    }
}

/// Build a job for `initial` and run it with the graph's failure policy.
pub fn run_task(graph: &TaskGraph, initial: &str) -> Result<JobReport> {
    Job::new(graph, initial)?.run()
}

/// Like [`run_task`], overriding the graph's failure policy.
pub fn run_task_with(graph: &TaskGraph, initial: &str, policy: FailurePolicy) -> Result<JobReport> {
    Job::new(graph, initial)?.with_failure_policy(policy).run()
}
