//! Running task graphs on a thread pool.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::Instant;

use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::array::Value;
use crate::env::Environment;
use crate::error::{ExecutionError, GraphError};
use crate::eval::{Evaluator, VectorEvaluator};
use crate::graph::TaskGraph;
use crate::settings::Settings;
use crate::task::TaskContext;

/// Executes the tasks a requested result needs, each at most once, running
/// independent tasks concurrently.
///
/// ```rust
/// use std::sync::Arc;
/// use carpenter::{Array, Executor, Expression, FunctionRegistry, MemoryEnvironment, Value};
///
/// let env = MemoryEnvironment::new().with("a", Array::jagged(&[vec![1.0, 2.0], vec![3.0]]));
/// let executor = Executor::new(Arc::new(env));
///
/// let mut expression = Expression::parse("sqrt(a * 2 + 2)").unwrap();
/// let graph = expression.to_tasks(&FunctionRegistry::with_builtins()).unwrap();
///
/// let value = executor.get(graph, "func-sqrt-0").unwrap();
/// assert_eq!(value, Value::Array(Array::jagged(&[vec![2.0, 6f64.sqrt()], vec![8f64.sqrt()]])));
/// ```
pub struct Executor {
    env: Arc<dyn Environment>,
    evaluator: Arc<dyn Evaluator>,
    settings: Settings,
}

impl Executor {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self {
            env,
            evaluator: Arc::new(VectorEvaluator),
            settings: Settings::default(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn env(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs `target` and everything it depends on, returning its result.
    pub fn get(&self, graph: &TaskGraph, target: &str) -> Result<Value, ExecutionError> {
        let mut results = self.run(graph, &[target])?;
        results
            .remove(target)
            .ok_or_else(|| GraphError::UnknownTask(target.to_string()).into())
    }

    /// Runs every target together with its dependencies. The results of all
    /// executed tasks are returned by name.
    pub fn run(
        &self,
        graph: &TaskGraph,
        targets: &[&str],
    ) -> Result<HashMap<String, Value>, ExecutionError> {
        // We sort primarily to reject cyclic graphs up front.
        graph.topological_order()?;

        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for target in targets {
            for name in graph.required_for(target)? {
                if seen.insert(name) {
                    nodes.push(name);
                }
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.workers)
            .thread_name(|i| format!("carpenter-{i}"))
            .build()?;

        let start = Instant::now();
        let results = self.run_tasks_parallel(&pool, graph, &nodes)?;
        tracing::info!(
            tasks = nodes.len(),
            elapsed = ?start.elapsed(),
            "Run complete"
        );

        Ok(results)
    }

    /// Dependency-counting scheduler: a task is spawned on the pool as soon as
    /// every task it depends on has reported back to this thread.
    ///
    /// The scheduler loop stays on the calling thread, so every pool worker is
    /// free to run task bodies, even with a single worker.
    fn run_tasks_parallel(
        &self,
        pool: &rayon::ThreadPool,
        graph: &TaskGraph,
        nodes: &[&str],
    ) -> Result<HashMap<String, Value>, ExecutionError> {
        let included: HashSet<&str> = nodes.iter().copied().collect();

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut dependency_counts: HashMap<&str, usize> = HashMap::new();
        for &name in nodes {
            let dependencies = graph.dependencies(name)?;
            let mut count = 0;
            for dependency in dependencies.into_iter().filter(|d| included.contains(d)) {
                dependents.entry(dependency).or_default().push(name);
                count += 1;
            }
            dependency_counts.insert(name, count);
        }

        let total_tasks = nodes.len();
        let mut cache: HashMap<&str, Value> = HashMap::with_capacity(total_tasks);
        if total_tasks == 0 {
            return Ok(HashMap::new());
        }

        let quiet = self.settings.quiet;
        let root_span = if quiet {
            tracing::debug_span!("running_tasks")
        } else {
            tracing::info_span!("running_tasks")
        };
        if let Ok(style) = crate::utils::get_style_run() {
            root_span.pb_set_style(&style);
        }
        root_span.pb_set_length(total_tasks as u64);
        root_span.pb_set_message("Running tasks...");
        let _enter = root_span.enter();

        let task_style = crate::utils::get_style_task().ok();
        let env = self.env.as_ref();
        let evaluator = self.evaluator.as_ref();

        pool.in_place_scope(|s| -> Result<(), ExecutionError> {
            let (result_sender, result_receiver) = channel::<(&str, anyhow::Result<Value>)>();

            let spawn_task = |cache: &HashMap<&str, Value>, name| {
                let Some(task) = graph.get(name) else {
                    let error = anyhow::anyhow!("task is not in the graph");
                    let _ = result_sender.send((name, Err(error)));
                    return;
                };

                let inputs: HashMap<String, Value> = task
                    .dependencies()
                    .into_iter()
                    .filter_map(|dep| cache.get(dep).map(|v| (dep.to_string(), v.clone())))
                    .collect();

                let sender = result_sender.clone();
                let task_style = task_style.clone();

                s.spawn(move |_| {
                    let span = if quiet {
                        tracing::debug_span!("task", name)
                    } else {
                        tracing::info_span!("task", name)
                    };
                    if let Some(style) = &task_style {
                        span.pb_set_style(style);
                    }
                    span.pb_set_message(&format!("Running {name}"));
                    let _enter = span.enter();

                    let context = TaskContext {
                        env,
                        evaluator,
                        span: span.clone(),
                    };

                    // A panicking task only touches its own inputs, which are
                    // dropped with it.
                    let output = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                        || task.execute(&context, |dep| inputs.get(dep)),
                    )) {
                        Ok(result) => result,
                        Err(panic) => {
                            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                                format!("Task panicked: {s}")
                            } else if let Some(s) = panic.downcast_ref::<String>() {
                                format!("Task panicked: {s}")
                            } else {
                                String::from("Task panicked with unknown payload")
                            };
                            Err(anyhow::anyhow!(msg))
                        }
                    };

                    let _ = sender.send((name, output));
                });
            };

            for &name in nodes {
                if dependency_counts.get(name).copied().unwrap_or(0) == 0 {
                    spawn_task(&cache, name);
                }
            }

            let mut completed_tasks = 0;
            while completed_tasks < total_tasks {
                let Ok((name, output)) = result_receiver.recv() else {
                    return Err(ExecutionError::Interrupted);
                };

                let value = output.map_err(|source| ExecutionError::Task {
                    name: name.to_string(),
                    source,
                })?;
                tracing::debug!(task = name, result = value.type_name(), "finished");

                cache.insert(name, value);
                completed_tasks += 1;
                root_span.pb_inc(1);

                if let Some(next) = dependents.get(name) {
                    for &index in next {
                        if let Some(count) = dependency_counts.get_mut(index) {
                            *count -= 1;
                            if *count == 0 {
                                spawn_task(&cache, index);
                            }
                        }
                    }
                }
            }

            Ok(())
        })?;

        Ok(cache
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use crate::compile::Expression;
    use crate::env::MemoryEnvironment;
    use crate::registry::FunctionRegistry;
    use crate::task::{Arg, Task};

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::with_builtins();
        registry
            .register("count", |args: &[Value]| -> anyhow::Result<Value> {
                match args.first() {
                    Some(Value::Array(array)) => Ok(Value::Scalar(array.len() as f64)),
                    _ => anyhow::bail!("count() expects an array"),
                }
            })
            .unwrap();
        registry
            .register("boom", |_: &[Value]| -> anyhow::Result<Value> {
                panic!("kaboom")
            })
            .unwrap();
        registry
    }

    fn executor() -> Executor {
        let env = MemoryEnvironment::new()
            .with("a", Array::jagged(&[vec![1.0, 2.0, 3.0], vec![5.0, 6.0]]))
            .with("b", Array::jagged(&[vec![2.0, 3.0, 4.0], vec![6.0, 7.0]]))
            .with("c", Array::jagged(&[vec![3.0, 4.0, 5.0], vec![7.0, 8.0]]));
        let settings = Settings {
            workers: 2,
            quiet: true,
            ..Settings::default()
        };
        Executor::new(Arc::new(env)).with_settings(settings)
    }

    fn evaluate(text: &str) -> Result<Value, ExecutionError> {
        let mut expression = Expression::parse(text).unwrap();
        let graph = expression.to_tasks(&registry()).unwrap().clone();
        let output = expression.output().unwrap().to_string();
        executor().get(&graph, &output)
    }

    #[test]
    fn test_pure_expression() {
        assert_eq!(
            evaluate("a*2+1").unwrap(),
            Value::Array(Array::jagged(&[vec![3.0, 5.0, 7.0], vec![11.0, 13.0]]))
        );
    }

    #[test]
    fn test_outer_length() {
        assert_eq!(evaluate("count(a+b)").unwrap(), Value::Scalar(2.0));
    }

    #[test]
    fn test_count_of_slice() {
        assert_eq!(evaluate("count(c[1:])").unwrap(), Value::Scalar(1.0));
    }

    #[test]
    fn test_operator_over_calls() {
        assert_eq!(evaluate("count(a) * 10 + count(c[::2])").unwrap(), Value::Scalar(21.0));
    }

    #[test]
    fn test_only_required_tasks_run() {
        let registry = registry();
        let boom = registry.get("boom").unwrap().clone();

        let mut graph = TaskGraph::new();
        graph.add("eval-0", Task::eval("a + 1", &["a"])).unwrap();
        graph
            .add("func-boom-0", Task::function(boom, vec![Arg::reference("eval-0")]))
            .unwrap();

        let results = executor().run(&graph, &["eval-0"]).unwrap();
        assert_eq!(results.len(), 1);

        match executor().get(&graph, "func-boom-0") {
            Err(ExecutionError::Task { name, source }) => {
                assert_eq!(name, "func-boom-0");
                assert!(source.to_string().contains("kaboom"));
            }
            other => panic!("expected a task failure, got {other:?}"),
        }
    }

    #[test]
    fn test_task_error_is_reported() {
        match evaluate("count(missing)") {
            Err(ExecutionError::Task { name, .. }) => assert_eq!(name, "eval-0"),
            other => panic!("expected a task failure, got {other:?}"),
        }
    }

    #[test]
    fn test_single_worker() {
        let settings = Settings {
            workers: 1,
            quiet: true,
            ..Settings::default()
        };
        let env = MemoryEnvironment::new().with("a", Array::Flat(vec![1.0, 4.0]));
        let executor = Executor::new(Arc::new(env)).with_settings(settings);

        let mut expression = Expression::parse("count(a) * 10 + count(a[1:])").unwrap();
        let graph = expression.to_tasks(&registry()).unwrap().clone();
        let output = expression.output().unwrap().to_string();
        assert_eq!(executor.get(&graph, &output).unwrap(), Value::Scalar(21.0));
    }

    #[test]
    fn test_unknown_target() {
        let graph = TaskGraph::new();
        assert!(matches!(
            executor().get(&graph, "eval-0"),
            Err(ExecutionError::Graph(GraphError::UnknownTask(_)))
        ));
    }
}
