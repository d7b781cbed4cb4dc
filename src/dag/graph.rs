// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use crate::types::TaskId;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies: tasks whose futures this one consumes.
    deps: Vec<TaskId>,
    /// Direct dependents: tasks that consume this one's future.
    dependents: Vec<TaskId>,
}

/// Dependency graph of submitted tasks, grown one submission at a time.
///
/// A task can only reference futures that already exist when it is
/// submitted, so edges always point from older to newer tasks and the graph
/// cannot contain a cycle.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: HashMap<TaskId, DagNode>,
}

impl DagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task and its edges.
    ///
    /// Dependencies that are not part of this graph (futures created by
    /// another kernel) are kept as deps but get no dependents entry.
    pub fn add_task(&mut self, id: TaskId, deps: &[TaskId]) {
        self.nodes.insert(
            id,
            DagNode {
                deps: deps.to_vec(),
                dependents: Vec::new(),
            },
        );

        for dep in deps {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.dependents.push(id);
            }
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Return all task ids.
    pub fn tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.nodes.keys().copied()
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, id: TaskId) -> &[TaskId] {
        self.nodes
            .get(&id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: TaskId) -> &[TaskId] {
        self.nodes
            .get(&id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Every task reachable downstream of `id` (excluding `id` itself).
    pub fn downstream_of(&self, id: TaskId) -> Vec<TaskId> {
        let mut stack: Vec<TaskId> = self.dependents_of(id).to_vec();
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut out = Vec::new();

        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            out.push(next);
            stack.extend(self.dependents_of(next).iter().copied());
        }

        out.sort_unstable();
        out
    }
}
