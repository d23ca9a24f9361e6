//! The task graph: an insertion-ordered registry of named tasks.
//!
//! Edges are implicit. A task depends on every task named by a [`Arg::Ref`]
//! in its arguments and on every name in its `after` list. Structural checks
//! (cycles, ordering) project the registry onto a `petgraph` graph on demand.
//!
//! [`Arg::Ref`]: crate::task::Arg::Ref

use std::collections::HashSet;
use std::fmt::{self, Display};

use indexmap::IndexMap;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use serde::Serialize;

use crate::error::GraphError;
use crate::task::Task;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskGraph {
    first: Option<String>,
    last: Option<String>,
    tasks: IndexMap<String, Task>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task under `name`, which becomes the graph's last task.
    pub fn add(&mut self, name: impl Into<String>, task: Task) -> Result<(), GraphError> {
        let name = name.into();
        if self.tasks.contains_key(&name) {
            return Err(GraphError::DuplicateTask(name));
        }
        if task.dependencies().contains(&name.as_str()) {
            return Err(GraphError::SelfReference(name));
        }

        if self.first.is_none() {
            self.first = Some(name.clone());
        }
        self.last = Some(name.clone());
        self.tasks.insert(name, task);
        Ok(())
    }

    /// Moves every task of `other` into this graph. Nothing is merged when a
    /// name is already taken.
    pub fn merge(&mut self, other: TaskGraph) -> Result<(), GraphError> {
        if let Some(name) = other.tasks.keys().find(|n| self.tasks.contains_key(*n)) {
            return Err(GraphError::DuplicateTask(name.clone()));
        }

        if self.first.is_none() {
            self.first = other.first;
        }
        if other.last.is_some() {
            self.last = other.last;
        }
        self.tasks.extend(other.tasks);
        Ok(())
    }

    /// Names of the tasks that read `symbol`, as a task result, as an
    /// environment variable or through an ordering dependency.
    pub fn find_dependents(&self, symbol: &str) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, task)| task.references(symbol))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Orders `task` after `extra`.
    ///
    /// Fails if `extra` already depends on `task`, directly or transitively,
    /// since the new edge would close a cycle.
    pub fn append_dependency(&mut self, task: &str, extra: &str) -> Result<(), GraphError> {
        for name in [task, extra] {
            if !self.tasks.contains_key(name) {
                return Err(GraphError::UnknownTask(name.to_string()));
            }
        }

        let cycle = task == extra || self.depends_on(extra, task);
        if cycle {
            return Err(GraphError::Cycle {
                task: task.to_string(),
                dependency: extra.to_string(),
            });
        }

        if let Some(entry) = self.tasks.get_mut(task)
            && !entry.after.iter().any(|a| a == extra)
        {
            entry.after.push(extra.to_string());
        }
        Ok(())
    }

    /// Whether `from` reaches `target` through its dependencies. Only the
    /// ancestors of `from` are visited.
    fn depends_on(&self, from: &str, target: &str) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(task) = self.tasks.get(current) {
                stack.extend(task.dependencies());
            }
        }
        false
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Task)> {
        self.tasks.iter().map(|(name, task)| (name.as_str(), task))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn first(&self) -> Option<&str> {
        self.first.as_deref()
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    pub fn dependencies(&self, name: &str) -> Result<Vec<&str>, GraphError> {
        self.tasks
            .get(name)
            .map(Task::dependencies)
            .ok_or_else(|| GraphError::UnknownTask(name.to_string()))
    }

    /// Edges point from a dependency to the task that needs it. References
    /// to unknown tasks are left out; [`TaskGraph::validate`] reports them.
    fn dag(&self) -> DiGraphMap<&str, ()> {
        let mut dag = DiGraphMap::new();
        for name in self.tasks.keys() {
            dag.add_node(name.as_str());
        }
        for (name, task) in &self.tasks {
            for dependency in task.dependencies() {
                if self.tasks.contains_key(dependency) {
                    dag.add_edge(dependency, name.as_str(), ());
                }
            }
        }
        dag
    }

    /// Every task, each one after all of its dependencies.
    pub fn topological_order(&self) -> Result<Vec<&str>, GraphError> {
        let dag = self.dag();
        toposort(&dag, None).map_err(|cycle| {
            let task = cycle.node_id();
            let dependency = self
                .get(task)
                .into_iter()
                .flat_map(Task::dependencies)
                .find(|dep| has_path_connecting(&dag, task, *dep, None))
                .unwrap_or(task);
            GraphError::Cycle {
                task: task.to_string(),
                dependency: dependency.to_string(),
            }
        })
    }

    /// `name` and everything it transitively depends on, dependencies first.
    pub fn required_for(&self, name: &str) -> Result<Vec<&str>, GraphError> {
        let (root, _) = self
            .tasks
            .get_key_value(name)
            .ok_or_else(|| GraphError::UnknownTask(name.to_string()))?;

        let mut visited = HashSet::new();
        let mut acc = Vec::new();
        // (task, the task referencing it, dependencies already pushed)
        let mut stack = vec![(root.as_str(), root.as_str(), false)];

        while let Some((current, parent, expanded)) = stack.pop() {
            if expanded {
                acc.push(current);
                continue;
            }
            if !visited.insert(current) {
                continue;
            }
            stack.push((current, parent, true));

            let task = self.tasks.get(current).ok_or_else(|| GraphError::DanglingReference {
                task: parent.to_string(),
                reference: current.to_string(),
            })?;
            for dependency in task.dependencies().into_iter().rev() {
                if !visited.contains(dependency) {
                    stack.push((dependency, current, false));
                }
            }
        }

        Ok(acc)
    }

    /// Checks that every reference resolves and that the graph is acyclic.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (name, task) in &self.tasks {
            for dependency in task.dependencies() {
                if dependency == name {
                    return Err(GraphError::SelfReference(name.clone()));
                }
                if !self.tasks.contains_key(dependency) {
                    return Err(GraphError::DanglingReference {
                        task: name.clone(),
                        reference: dependency.to_string(),
                    });
                }
            }
        }
        self.topological_order().map(|_| ())
    }

    /// The serialized external form: `first`, `last` and the tasks by name.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Renders the graph as a Mermaid flowchart.
impl Display for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        for (index, (name, task)) in self.tasks.iter().enumerate() {
            let label = format!("{name}: {}", task.label()).replace('"', "#quot;");
            writeln!(f, "    {index}[\"{label}\"]")?;
        }

        for (index, (_, task)) in self.tasks.iter().enumerate() {
            for dependency in task.dependencies() {
                let Some(source) = self.tasks.get_index_of(dependency) else {
                    continue;
                };
                if task.after.iter().any(|a| a == dependency) {
                    writeln!(f, "    {source} -.-> {index}")?;
                } else {
                    writeln!(f, "    {source} --> {index}")?;
                }
            }
        }

        Ok(())
    }
}
