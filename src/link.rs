//! Linking successive definitions into one graph over a shared environment.
//!
//! Each definition `name = expression` compiles to its own tasks followed by
//! a commit task binding `name`. Definitions run in parallel wherever the
//! environment allows it, so the linker adds the ordering edges that keep
//! reads and writes of the same variable in definition order:
//!
//! * a task reading a variable committed earlier waits for that commit;
//! * a commit waits for every earlier reader and writer of its variable.

use indexmap::IndexMap;

use crate::array::Value;
use crate::compile::{Expression, NameAllocator};
use crate::error::LinkError;
use crate::executor::Executor;
use crate::graph::TaskGraph;
use crate::registry::FunctionRegistry;
use crate::task::Task;

/// The combined graph of a list of definitions.
#[derive(Debug, Clone, Default)]
pub struct LinkedGraph {
    pub graph: TaskGraph,
    /// `(variable, commit task)` in definition order.
    pub commits: Vec<(String, String)>,
}

impl LinkedGraph {
    /// The task committing the final value of `variable`.
    pub fn commit_of(&self, variable: &str) -> Option<&str> {
        self.commits
            .iter()
            .rev()
            .find(|(name, _)| name == variable)
            .map(|(_, commit)| commit.as_str())
    }

    pub fn commit_tasks(&self) -> Vec<&str> {
        self.commits.iter().map(|(_, c)| c.as_str()).collect()
    }
}

pub fn link<N, E>(
    definitions: &[(N, E)],
    registry: &FunctionRegistry,
) -> Result<LinkedGraph, LinkError>
where
    N: AsRef<str>,
    E: AsRef<str>,
{
    // Shared by all definitions so task names never collide.
    let mut names = NameAllocator::new();
    let mut linked = LinkedGraph::default();
    let mut latest: IndexMap<String, String> = IndexMap::new();

    for (variable, text) in definitions {
        let variable = variable.as_ref();
        let expression = Expression::parse(text.as_ref())
            .map_err(|e| LinkError::Parse(variable.to_string(), e))?;
        let (subgraph, output) = expression
            .build_with(&mut names, registry)
            .map_err(|e| LinkError::Compile(variable.to_string(), e))?;

        let mut edges = Vec::new();
        for (name, commit) in &latest {
            for dependent in subgraph.find_dependents(name) {
                edges.push((dependent, commit.clone()));
            }
        }

        let mut earlier = linked.graph.find_dependents(variable);
        if let Some(previous) = latest.get(variable) {
            earlier.push(previous.clone());
        }

        linked.graph.merge(subgraph)?;
        for (task, dependency) in &edges {
            linked.graph.append_dependency(task, dependency)?;
        }

        let commit = names.next(&format!("commit-{variable}"));
        linked.graph.add(commit.clone(), Task::commit(variable, output))?;
        for task in &earlier {
            linked.graph.append_dependency(&commit, task)?;
        }

        tracing::debug!(
            variable,
            commit = commit.as_str(),
            reads = edges.len(),
            overwrites = earlier.len(),
            "linked definition"
        );

        latest.insert(variable.to_string(), commit.clone());
        linked.commits.push((variable.to_string(), commit));
    }

    tracing::info!(
        definitions = definitions.len(),
        tasks = linked.graph.len(),
        "Linked definitions"
    );
    Ok(linked)
}

/// A named stage defining new variables, one after another.
///
/// ```rust
/// use std::sync::Arc;
/// use carpenter::{Array, Define, Executor, MemoryEnvironment, Value};
///
/// let env = MemoryEnvironment::new().with("a", Array::Flat(vec![1.0, 2.0]));
/// let executor = Executor::new(Arc::new(env));
///
/// let values = Define::new("derived")
///     .variable("x", "a + 1")
///     .variable("y", "x * x")
///     .run(&executor)
///     .unwrap();
/// assert_eq!(values["y"], Value::Array(Array::Flat(vec![4.0, 9.0])));
/// assert!(executor.env().contains("y"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Define {
    name: String,
    variables: Vec<(String, String)>,
}

impl Define {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Vec::new(),
        }
    }

    pub fn variable(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.variables.push((name.into(), expression.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variables(&self) -> &[(String, String)] {
        &self.variables
    }

    pub fn link(&self, registry: &FunctionRegistry) -> Result<LinkedGraph, LinkError> {
        link(&self.variables, registry)
    }

    /// Links and runs the stage with a registry built from the executor's
    /// settings.
    pub fn run(&self, executor: &Executor) -> anyhow::Result<IndexMap<String, Value>> {
        let registry = if executor.settings().builtins {
            FunctionRegistry::with_builtins()
        } else {
            FunctionRegistry::new()
        };
        self.run_with(executor, &registry)
    }

    /// Links and runs the stage, committing every variable to the executor's
    /// environment. Returns the final value of each variable.
    pub fn run_with(
        &self,
        executor: &Executor,
        registry: &FunctionRegistry,
    ) -> anyhow::Result<IndexMap<String, Value>> {
        let span = tracing::info_span!("define", stage = self.name.as_str());
        let _enter = span.enter();

        let linked = self.link(registry)?;
        let mut results = executor.run(&linked.graph, &linked.commit_tasks())?;

        let mut values = IndexMap::new();
        for (variable, _) in &self.variables {
            if values.contains_key(variable) {
                continue;
            }
            let Some(value) = linked.commit_of(variable).and_then(|c| results.remove(c)) else {
                anyhow::bail!("stage '{}' produced no value for '{variable}'", self.name);
            };
            values.insert(variable.clone(), value);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::array::Array;
    use crate::env::MemoryEnvironment;
    use crate::error::{CompileError, GraphError};
    use crate::settings::Settings;

    fn executor() -> Executor {
        let env = MemoryEnvironment::new()
            .with("a", Array::jagged(&[vec![1.0, 2.0, 3.0], vec![5.0, 6.0]]))
            .with("b", Array::jagged(&[vec![2.0, 3.0, 4.0], vec![6.0, 7.0]]));
        Executor::new(Arc::new(env)).with_settings(Settings {
            quiet: true,
            ..Settings::default()
        })
    }

    #[test]
    fn test_reader_waits_for_commit() {
        let registry = FunctionRegistry::with_builtins();
        let linked = link(&[("x", "a+b"), ("y", "x*2")], &registry).unwrap();

        let names: Vec<_> = linked.graph.names().collect();
        assert_eq!(names, vec!["eval-0", "commit-x-0", "eval-1", "commit-y-0"]);
        assert_eq!(
            linked.graph.dependencies("eval-1").unwrap(),
            vec!["commit-x-0"]
        );
        assert_eq!(linked.graph.last(), Some("commit-y-0"));
        assert_eq!(linked.commit_of("x"), Some("commit-x-0"));
        assert!(linked.graph.validate().is_ok());
    }

    #[test]
    fn test_execution_fills_environment() {
        let registry = FunctionRegistry::with_builtins();
        let linked = link(&[("x", "a+b"), ("y", "x*2")], &registry).unwrap();

        let executor = executor();
        let y = executor.get(&linked.graph, "commit-y-0").unwrap();

        let expected = Array::jagged(&[vec![6.0, 10.0, 14.0], vec![22.0, 26.0]]);
        assert_eq!(y, Value::Array(expected.clone()));
        assert_eq!(executor.env().get("y").unwrap(), Value::Array(expected));
        assert_eq!(
            executor.env().get("x").unwrap(),
            Value::Array(Array::jagged(&[vec![3.0, 5.0, 7.0], vec![11.0, 13.0]]))
        );
    }

    #[test]
    fn test_redefinition_orders_writes_after_reads() {
        let registry = FunctionRegistry::with_builtins();
        let linked = link(&[("x", "a+1"), ("y", "x*2"), ("x", "x*10")], &registry).unwrap();

        assert_eq!(linked.commit_of("x"), Some("commit-x-1"));
        let after = linked.graph.dependencies("commit-x-1").unwrap();
        assert!(after.contains(&"eval-1"));
        assert!(after.contains(&"commit-x-0"));
        assert_eq!(
            linked.graph.dependencies("eval-2").unwrap(),
            vec!["commit-x-0"]
        );

        let values = Define::new("twice")
            .variable("x", "a+1")
            .variable("y", "x*2")
            .variable("x", "x*10")
            .run(&executor())
            .unwrap();
        assert_eq!(
            values["y"],
            Value::Array(Array::jagged(&[vec![4.0, 6.0, 8.0], vec![12.0, 14.0]]))
        );
        assert_eq!(
            values["x"],
            Value::Array(Array::jagged(&[vec![20.0, 30.0, 40.0], vec![60.0, 70.0]]))
        );
    }

    #[test]
    fn test_raw_variable_overwrite_waits_for_readers() {
        let registry = FunctionRegistry::with_builtins();
        let linked = link(&[("y", "a*2"), ("a", "a+1")], &registry).unwrap();
        assert_eq!(
            linked.graph.dependencies("commit-a-0").unwrap(),
            vec!["eval-1", "eval-0"]
        );
    }

    #[test]
    fn test_errors_name_the_definition() {
        let registry = FunctionRegistry::with_builtins();
        match link(&[("x", "a +"), ("y", "b")], &registry) {
            Err(LinkError::Parse(name, _)) => assert_eq!(name, "x"),
            other => panic!("expected a parse error, got {other:?}"),
        }
        assert_eq!(
            link(&[("x", "a"), ("y", "nope(x)")], &registry).unwrap_err(),
            LinkError::Compile("y".into(), CompileError::UnknownFunction("nope".into()))
        );
    }

    #[test]
    fn test_without_builtins() {
        let executor = Executor::new(Arc::new(MemoryEnvironment::new())).with_settings(Settings {
            quiet: true,
            builtins: false,
            ..Settings::default()
        });
        let error = Define::new("bare")
            .variable("x", "sqrt(2)")
            .run(&executor)
            .unwrap_err();
        assert!(error.to_string().contains("sqrt"));
    }

    #[test]
    fn test_empty_definitions() {
        let linked = link::<&str, &str>(&[], &FunctionRegistry::new()).unwrap();
        assert!(linked.graph.is_empty());
        assert_eq!(
            executor().get(&linked.graph, "commit-x-0").unwrap_err().to_string(),
            GraphError::UnknownTask("commit-x-0".into()).to_string()
        );
    }
}
