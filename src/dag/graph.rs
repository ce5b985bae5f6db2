// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use crate::config::ConfigFile;
use crate::dag::registry::{TaskRegistry, TaskSpec};
use crate::errors::{Result, TrackerError};
use crate::types::{EventName, FailurePolicy, TaskName};

/// Producers and consumers of one event, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLinks {
    pub producers: Vec<TaskName>,
    pub consumers: Vec<TaskName>,
}

/// For every event name, which tasks produce it and which depend on it.
pub fn event_dependency_graph(registry: &TaskRegistry) -> BTreeMap<EventName, EventLinks> {
    let mut events: BTreeMap<EventName, EventLinks> = BTreeMap::new();
    for spec in registry.iter() {
        for event in &spec.produces {
            let links = events.entry(event.clone()).or_default();
            if !links.producers.contains(&spec.name) {
                links.producers.push(spec.name.clone());
            }
        }
        for event in &spec.depends_on {
            let links = events.entry(event.clone()).or_default();
            if !links.consumers.contains(&spec.name) {
                links.consumers.push(spec.name.clone());
            }
        }
    }
    events
}

/// DAG of all registered tasks.
///
/// Node weights are registration indices, so `NodeIndex::index()` equals the
/// task's position in the registry. An edge `a -> b` means `a` produces an
/// event `b` depends on.
///
/// The graph also carries the [`FailurePolicy`] jobs built from it start
/// with.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    specs: Vec<TaskSpec>,
    graph: DiGraph<usize, ()>,
    index: HashMap<TaskName, NodeIndex>,
    order: Vec<NodeIndex>,
    failure_policy: FailurePolicy,
}

impl TaskGraph {
    /// Build the graph and check that it is acyclic.
    pub fn build(registry: &TaskRegistry) -> Result<Self> {
        let specs: Vec<TaskSpec> = registry.iter().cloned().collect();
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(specs.len(), 0);
        let mut index = HashMap::with_capacity(specs.len());

        for (i, spec) in specs.iter().enumerate() {
            let node = graph.add_node(i);
            index.insert(spec.name.clone(), node);
        }

        for (event, links) in event_dependency_graph(registry) {
            for producer in &links.producers {
                for consumer in &links.consumers {
                    if producer == consumer {
                        return Err(TrackerError::DagCycle(format!(
                            "task '{}' depends on event '{}' it produces itself",
                            producer, event
                        )));
                    }
                    let (a, b) = (index[producer], index[consumer]);
                    graph.update_edge(a, b, ());
                }
            }
        }

        let order = topological_sort(&graph, &specs)?;

        Ok(Self {
            specs,
            graph,
            index,
            order,
            failure_policy: FailurePolicy::default(),
        })
    }

    /// Build the graph with the `[tasks] on_failure` policy of `cfg`.
    pub fn from_config(registry: &TaskRegistry, cfg: &ConfigFile) -> Result<Self> {
        Ok(Self::build(registry)?.with_failure_policy(cfg.on_failure))
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Option<&TaskSpec> {
        self.index.get(name).map(|n| &self.specs[n.index()])
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    /// Direct dependents of `name`, in registration order.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        let Some(&node) = self.index.get(name) else {
            return Vec::new();
        };
        let mut nodes: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        nodes.sort_unstable();
        nodes.into_iter().map(|n| self.name_of(n)).collect()
    }

    /// `name` and every task reachable from it, in topological order.
    pub fn nodes_reachable_from(&self, name: &str) -> Result<Vec<&str>> {
        let reachable = self.reachable_set(name)?;
        Ok(self
            .order
            .iter()
            .filter(|n| reachable[n.index()])
            .map(|&n| self.name_of(n))
            .collect())
    }

    /// Every task, producers before consumers; ties by registration order.
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&n| self.name_of(n)).collect()
    }

    pub(crate) fn reachable_set(&self, name: &str) -> Result<Vec<bool>> {
        let start = *self
            .index
            .get(name)
            .ok_or_else(|| TrackerError::TaskNotFound(name.to_string()))?;

        let mut seen = vec![false; self.specs.len()];
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(n) = dfs.next(&self.graph) {
            seen[n.index()] = true;
        }
        Ok(seen)
    }

    pub(crate) fn ordered_nodes(&self) -> &[NodeIndex] {
        &self.order
    }

    pub(crate) fn dependent_nodes(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(node, Direction::Outgoing)
    }

    pub(crate) fn spec_at(&self, node: NodeIndex) -> &TaskSpec {
        &self.specs[node.index()]
    }

    fn name_of(&self, node: NodeIndex) -> &str {
        &self.specs[node.index()].name
    }
}

/// Kahn's algorithm with a min-heap on registration index.
fn topological_sort(graph: &DiGraph<usize, ()>, specs: &[TaskSpec]) -> Result<Vec<NodeIndex>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<NodeIndex>> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            let d = &mut in_degree[next.index()];
            *d -= 1;
            if *d == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() < in_degree.len() {
        let stuck: Vec<&str> = graph
            .node_indices()
            .filter(|n| in_degree[n.index()] > 0)
            .map(|n| specs[n.index()].name.as_str())
            .collect();
        return Err(TrackerError::DagCycle(format!(
            "cycle detected in task DAG involving tasks: {}",
            stuck.join(", ")
        )));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::task::{Task, TaskContext};

    struct Noop;

    impl Task for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn execute(&mut self, _ctx: &mut TaskContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn spec(name: &str, depends_on: &[&str], produces: &[&str]) -> TaskSpec {
        TaskSpec::new(
            name,
            depends_on.iter().map(|s| s.to_string()).collect(),
            produces.iter().map(|s| s.to_string()).collect(),
            || Box::new(Noop) as Box<dyn Task>,
        )
    }

    fn registry(specs: Vec<TaskSpec>) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for s in specs {
            registry.register(s).unwrap();
        }
        registry
    }

    #[test]
    fn event_map_lists_producers_and_consumers() {
        let reg = registry(vec![
            spec("a", &[], &["e1"]),
            spec("b", &["e1"], &["e2"]),
            spec("c", &["e1", "e2"], &[]),
        ]);

        let events = event_dependency_graph(&reg);
        assert_eq!(events["e1"].producers, vec!["a"]);
        assert_eq!(events["e1"].consumers, vec!["b", "c"]);
        assert_eq!(events["e2"].producers, vec!["b"]);
        assert_eq!(events["e2"].consumers, vec!["c"]);
    }

    #[test]
    fn ties_break_by_registration_order() {
        let reg = registry(vec![
            spec("z", &[], &[]),
            spec("y", &["e"], &[]),
            spec("x", &[], &["e"]),
        ]);
        let graph = TaskGraph::build(&reg).unwrap();
        assert_eq!(graph.topological_order(), vec!["z", "x", "y"]);
    }

    #[test]
    fn self_consumption_is_a_cycle() {
        let reg = registry(vec![spec("a", &["e"], &["e"])]);
        assert!(matches!(TaskGraph::build(&reg), Err(TrackerError::DagCycle(_))));
    }

    #[test]
    fn two_task_cycle_names_both_tasks() {
        let reg = registry(vec![
            spec("a", &["e2"], &["e1"]),
            spec("b", &["e1"], &["e2"]),
        ]);
        let err = TaskGraph::build(&reg).unwrap_err();
        assert!(matches!(err, TrackerError::DagCycle(msg) if msg.contains("a, b")));
    }

    #[test]
    fn unknown_start_is_task_not_found() {
        let graph = TaskGraph::build(&registry(vec![spec("a", &[], &[])])).unwrap();
        assert!(matches!(
            graph.nodes_reachable_from("missing"),
            Err(TrackerError::TaskNotFound(_))
        ));
    }
}
