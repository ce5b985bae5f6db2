use std::collections::HashSet;

use proptest::prelude::*;
use distro_tracker::dag::{TaskGraph, TaskRegistry, run_task};
use distro_tracker_test_utils::{ExecutionLog, ScriptedTask};

// Random acyclic task graphs: task N may only consume events produced by
// tasks 0..N-1, and every task emits its own `done-N` event.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, potential)| {
                    let deps: HashSet<usize> = if i == 0 {
                        HashSet::new()
                    } else {
                        potential.into_iter().map(|d| d % i).collect()
                    };
                    let mut deps: Vec<usize> = deps.into_iter().collect();
                    deps.sort_unstable();
                    deps
                })
                .collect()
        })
    })
}

fn build(deps: &[Vec<usize>], log: &ExecutionLog) -> TaskGraph {
    let mut reg = TaskRegistry::new();
    for (i, task_deps) in deps.iter().enumerate() {
        let consumes: Vec<String> = task_deps.iter().map(|d| format!("done-{d}")).collect();
        let consumes: Vec<&str> = consumes.iter().map(String::as_str).collect();
        let done = format!("done-{i}");
        reg.register(
            ScriptedTask::new(&format!("task_{i}"), log)
                .consumes(&consumes)
                .emits(&[done.as_str()])
                .spec(),
        )
        .unwrap();
    }
    TaskGraph::build(&reg).unwrap()
}

/// Indices reachable from `start` by following dependency edges forward.
fn reachable(deps: &[Vec<usize>], start: usize) -> HashSet<usize> {
    let mut seen = HashSet::from([start]);
    let mut changed = true;
    while changed {
        changed = false;
        for (i, task_deps) in deps.iter().enumerate() {
            if !seen.contains(&i) && task_deps.iter().any(|d| seen.contains(d)) {
                seen.insert(i);
                changed = true;
            }
        }
    }
    seen
}

proptest! {
    #[test]
    fn test_edges_match_declared_dependencies(deps in dag_strategy(8)) {
        let log = ExecutionLog::new();
        let graph = build(&deps, &log);

        for (i, task_deps) in deps.iter().enumerate() {
            for j in 0..deps.len() {
                let expected = task_deps.contains(&j);
                prop_assert_eq!(
                    graph.has_edge(&format!("task_{j}"), &format!("task_{i}")),
                    expected
                );
            }
        }
    }

    #[test]
    fn test_job_executes_exactly_the_reachable_tasks_in_order(
        deps in dag_strategy(8),
        start in 0..8usize,
    ) {
        let start = start % deps.len();
        let log = ExecutionLog::new();
        let graph = build(&deps, &log);

        let report = run_task(&graph, &format!("task_{start}")).unwrap();

        let expected: HashSet<String> = reachable(&deps, start)
            .into_iter()
            .map(|i| format!("task_{i}"))
            .collect();
        let executed = log.executed();
        let executed_set: HashSet<String> = executed.iter().cloned().collect();
        prop_assert_eq!(&executed_set, &expected);
        prop_assert_eq!(executed.len(), expected.len());
        prop_assert!(report.skipped.is_empty());

        // Every task runs after all of its executed producers.
        let position = |name: &str| executed.iter().position(|n| n == name);
        for (i, task_deps) in deps.iter().enumerate() {
            let Some(pi) = position(&format!("task_{i}")) else { continue };
            for d in task_deps {
                if let Some(pd) = position(&format!("task_{d}")) {
                    prop_assert!(pd < pi, "task_{} ran before its producer task_{}", i, d);
                }
            }
        }
    }
}
