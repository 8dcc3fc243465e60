// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use crate::types::TaskId;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies: tasks that must finish before this one can run.
    deps: Vec<TaskId>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<TaskId>,
}

/// In-memory adjacency view of a goal's task graph, keyed by task id.
///
/// Iteration follows declaration order so cycle reports and traversals are
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: HashMap<TaskId, DagNode>,
    order: Vec<TaskId>,
}

impl DagGraph {
    /// Build a graph from `(task, dependencies)` pairs in declaration order.
    ///
    /// Dependencies naming unknown tasks are kept on the dependent's side only;
    /// callers validate references separately.
    pub fn from_edges<'a, I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (&'a TaskId, &'a [TaskId])>,
    {
        let mut nodes: HashMap<TaskId, DagNode> = HashMap::new();
        let mut order = Vec::new();

        // First pass: create nodes with their dependency lists.
        for (id, deps) in edges {
            order.push(id.clone());
            nodes.insert(
                id.clone(),
                DagNode {
                    deps: deps.to_vec(),
                    dependents: Vec::new(),
                },
            );
        }

        // Second pass: populate dependents based on deps.
        for id in &order {
            let deps = nodes.get(id).map(|n| n.deps.clone()).unwrap_or_default();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(id.clone());
                }
            }
        }

        Self { nodes, order }
    }

    /// All task ids, in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task (tasks listing this one as a dependency).
    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Depth-first search for a dependency cycle.
    ///
    /// Returns the participating nodes in dependency order, closed by
    /// repeating the first node (`["A", "B", "C", "A"]`), or `None` if the
    /// graph is acyclic.
    pub fn find_cycle(&self) -> Option<Vec<TaskId>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        for start in &self.order {
            if visited.contains(start.as_str()) {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut visited, &mut on_stack, &mut path) {
                return Some(cycle);
            }
        }

        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<TaskId>> {
        visited.insert(node);
        on_stack.insert(node);
        path.push(node);

        for dep in self.dependencies_of(node) {
            let dep = dep.as_str();
            if !self.nodes.contains_key(dep) {
                continue;
            }
            if on_stack.contains(dep) {
                // Back edge: the cycle is the path from `dep` to here.
                let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle: Vec<TaskId> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
            if !visited.contains(dep) {
                if let Some(cycle) = self.visit(dep, visited, on_stack, path) {
                    return Some(cycle);
                }
            }
        }

        on_stack.remove(node);
        path.pop();
        None
    }
}
