// src/dag/mod.rs

//! Task/event graph.
//!
//! - [`registry`] holds the explicit set of known tasks.
//! - [`graph`] links producers to consumers of each event and orders them.
//! - [`job`] runs the part of the graph reachable from one task.
//! - [`task`] and [`event`] define what flows through it.

pub mod event;
pub mod graph;
pub mod job;
pub mod registry;
pub mod task;

pub use event::Event;
pub use graph::{EventLinks, TaskGraph, event_dependency_graph};
pub use job::{Job, JobReport, run_task, run_task_with};
pub use registry::{TaskRegistry, TaskSpec};
pub use task::{Task, TaskContext, TaskInstance};
