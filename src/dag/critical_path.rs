// src/dag/critical_path.rs

//! Longest remaining chain of estimated work through a goal.
//!
//! Reporting only: the scheduler never consults this when picking tasks.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use crate::dag::task::Goal;
use crate::types::TaskId;

/// Weight used for tasks that declare no `estimated_duration_ms`.
pub const DEFAULT_TASK_ESTIMATE_MS: u64 = 60_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CriticalPath {
    /// Task ids from the first task to run to the last.
    pub tasks: Vec<TaskId>,
    /// Sum of the estimates along `tasks`.
    pub total_estimated_ms: u64,
}

impl CriticalPath {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Compute the critical path over the goal's non-terminal tasks.
///
/// Edge direction: dependency -> dependent. The longest weighted path is a
/// single dynamic-programming sweep over the topological order.
pub fn critical_path(goal: &Goal) -> CriticalPath {
    let remaining: Vec<_> = goal
        .tasks_in_order()
        .into_iter()
        .filter(|t| !t.status.is_terminal())
        .collect();

    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    let mut weight: HashMap<NodeIndex, u64> = HashMap::new();

    for task in &remaining {
        let node = graph.add_node(task.id.as_str());
        index.insert(task.id.as_str(), node);
        weight.insert(
            node,
            task.estimated_duration_ms.unwrap_or(DEFAULT_TASK_ESTIMATE_MS),
        );
    }

    for task in &remaining {
        for dep in &task.dependencies {
            // Finished dependencies drop out of the remaining graph.
            if let (Some(&from), Some(&to)) =
                (index.get(dep.as_str()), index.get(task.id.as_str()))
            {
                graph.add_edge(from, to, ());
            }
        }
    }

    // Loaded goals are acyclic, so toposort cannot fail here.
    let Ok(order) = toposort(&graph, None) else {
        return CriticalPath::default();
    };

    // best[n] = (longest path ending at n, predecessor on that path)
    let mut best: HashMap<NodeIndex, (u64, Option<NodeIndex>)> = HashMap::new();
    for &node in &order {
        let own = weight.get(&node).copied().unwrap_or(DEFAULT_TASK_ESTIMATE_MS);
        let mut via: Option<NodeIndex> = None;
        let mut upstream = 0u64;
        for pred in graph.neighbors_directed(node, Direction::Incoming) {
            let dist = best.get(&pred).map(|(d, _)| *d).unwrap_or(0);
            if via.is_none() || dist > upstream {
                upstream = dist;
                via = Some(pred);
            }
        }
        best.insert(node, (upstream + own, via));
    }

    let mut end: Option<(NodeIndex, u64)> = None;
    for &node in &order {
        let dist = best.get(&node).map(|(d, _)| *d).unwrap_or(0);
        if end.is_none_or(|(_, d)| dist > d) {
            end = Some((node, dist));
        }
    }

    let Some((last, total)) = end else {
        return CriticalPath::default();
    };

    let mut tasks = Vec::new();
    let mut cursor = Some(last);
    while let Some(node) = cursor {
        tasks.push(graph[node].to_string());
        cursor = best.get(&node).and_then(|(_, prev)| *prev);
    }
    tasks.reverse();

    CriticalPath {
        tasks,
        total_estimated_ms: total,
    }
}
