//! Tasks: the named units of work a compiled expression is made of.
//!
//! A task is a tagged union over the four kinds of work the compiler emits:
//!
//! * `Constant` yields a literal.
//! * `Eval` runs one vectorized evaluation of a pure expression.
//! * `Function` calls a registered function on the results of other tasks.
//! * `Commit` binds the result of a definition to a variable name.
//!
//! Arguments are tagged, so a reference to another task is never confused
//! with a string literal that happens to look like a task name.

use serde::{Deserialize, Serialize, Serializer};

use crate::array::Value;
use crate::env::Environment;
use crate::eval::Evaluator;
use crate::expr::Literal;
use crate::registry::RegisteredFunction;

/// One argument of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Arg {
    /// The result of the named task.
    Ref(String),
    /// A variable the task reads from the environment.
    Variable(String),
    Literal(Literal),
    /// An omitted slice component.
    Absent,
    Tuple(Vec<Arg>),
}

impl Arg {
    pub fn reference(name: impl Into<String>) -> Self {
        Arg::Ref(name.into())
    }

    /// Whether this argument refers to `name`, either as a task or as a
    /// variable.
    pub fn references(&self, name: &str) -> bool {
        match self {
            Arg::Ref(r) | Arg::Variable(r) => r == name,
            Arg::Tuple(items) => items.iter().any(|item| item.references(name)),
            Arg::Literal(_) | Arg::Absent => false,
        }
    }

    fn collect_refs<'a>(&'a self, acc: &mut Vec<&'a str>) {
        match self {
            Arg::Ref(name) => acc.push(name),
            Arg::Tuple(items) => {
                for item in items {
                    item.collect_refs(acc);
                }
            }
            Arg::Variable(_) | Arg::Literal(_) | Arg::Absent => {}
        }
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Number(n) => Value::Scalar(*n),
        Literal::Text(s) => Value::Text(s.clone()),
        Literal::Bool(b) => Value::Scalar(if *b { 1.0 } else { 0.0 }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    Constant(Literal),
    Eval { expression: String },
    Function(RegisteredFunction),
    Commit { variable: String },
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum KindView<'a> {
    Constant { value: &'a Literal },
    Eval { expression: &'a str },
    Function { function: &'a str },
    Commit { variable: &'a str },
}

impl Serialize for TaskKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let view = match self {
            TaskKind::Constant(value) => KindView::Constant { value },
            TaskKind::Eval { expression } => KindView::Eval { expression },
            TaskKind::Function(function) => KindView::Function {
                function: &function.name,
            },
            TaskKind::Commit { variable } => KindView::Commit { variable },
        };
        view.serialize(serializer)
    }
}

/// Everything a task body may touch while it runs.
pub struct TaskContext<'a> {
    pub env: &'a dyn Environment,
    pub evaluator: &'a dyn Evaluator,
    pub span: tracing::Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    #[serde(flatten)]
    pub kind: TaskKind,
    pub args: Vec<Arg>,
    /// Tasks that must finish first without feeding a value in.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
}

impl Task {
    pub fn new(kind: TaskKind, args: Vec<Arg>) -> Self {
        Self {
            kind,
            args,
            after: Vec::new(),
        }
    }

    pub fn constant(literal: Literal) -> Self {
        Self::new(TaskKind::Constant(literal), Vec::new())
    }

    pub fn eval(expression: impl Into<String>, variables: &[&str]) -> Self {
        let args = variables
            .iter()
            .map(|v| Arg::Variable(v.to_string()))
            .collect();
        Self::new(
            TaskKind::Eval {
                expression: expression.into(),
            },
            args,
        )
    }

    pub fn function(function: RegisteredFunction, args: Vec<Arg>) -> Self {
        Self::new(TaskKind::Function(function), args)
    }

    pub fn commit(variable: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(
            TaskKind::Commit {
                variable: variable.into(),
            },
            vec![Arg::Ref(source.into())],
        )
    }

    /// Short label used in logs and diagrams.
    pub fn label(&self) -> String {
        match &self.kind {
            TaskKind::Constant(literal) => literal.to_string(),
            TaskKind::Eval { expression } => expression.clone(),
            TaskKind::Function(function) => format!("{}()", function.name),
            TaskKind::Commit { variable } => format!("{variable} ="),
        }
    }

    /// Names of the tasks this one waits for: argument references first, then
    /// ordering-only dependencies.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut acc = Vec::new();
        for arg in &self.args {
            arg.collect_refs(&mut acc);
        }
        for name in &self.after {
            if !acc.contains(&name.as_str()) {
                acc.push(name);
            }
        }
        acc
    }

    /// Whether the task reads `name` through an argument or is ordered after
    /// it.
    pub fn references(&self, name: &str) -> bool {
        self.args.iter().any(|arg| arg.references(name)) || self.after.iter().any(|a| a == name)
    }

    /// The variable a commit task binds.
    pub fn committed_variable(&self) -> Option<&str> {
        match &self.kind {
            TaskKind::Commit { variable } => Some(variable),
            _ => None,
        }
    }

    /// Runs the task body. `lookup` returns the result of an already
    /// finished task.
    pub fn execute<'v>(
        &self,
        context: &TaskContext,
        lookup: impl Fn(&str) -> Option<&'v Value>,
    ) -> anyhow::Result<Value> {
        let resolve = |arg: &Arg| resolve_arg(arg, context, &lookup);

        match &self.kind {
            TaskKind::Constant(literal) => Ok(literal_value(literal)),
            TaskKind::Eval { expression } => {
                context.evaluator.evaluate(expression, context.env)
            }
            TaskKind::Function(function) => {
                let args = self
                    .args
                    .iter()
                    .map(resolve)
                    .collect::<anyhow::Result<Vec<_>>>()?;
                function.call(&args)
            }
            TaskKind::Commit { variable } => {
                let Some(source) = self.args.first() else {
                    anyhow::bail!("commit of '{variable}' has no source task");
                };
                let value = resolve(source)?;
                context.env.add(variable, value.clone());
                tracing::debug!(variable = variable.as_str(), "committed");
                Ok(value)
            }
        }
    }
}

fn resolve_arg<'v>(
    arg: &Arg,
    context: &TaskContext,
    lookup: &impl Fn(&str) -> Option<&'v Value>,
) -> anyhow::Result<Value> {
    match arg {
        Arg::Ref(name) => lookup(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("result of task '{name}' is not available")),
        Arg::Variable(name) => Ok(context.env.get(name)?),
        Arg::Literal(literal) => Ok(literal_value(literal)),
        Arg::Absent => Ok(Value::None),
        Arg::Tuple(items) => items
            .iter()
            .map(|item| resolve_arg(item, context, lookup))
            .collect::<anyhow::Result<Vec<_>>>()
            .map(Value::Tuple),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::array::Array;
    use crate::env::MemoryEnvironment;
    use crate::eval::VectorEvaluator;
    use crate::registry::FunctionRegistry;

    fn context<'a>(env: &'a MemoryEnvironment) -> TaskContext<'a> {
        TaskContext {
            env,
            evaluator: &VectorEvaluator,
            span: tracing::Span::none(),
        }
    }

    #[test]
    fn test_dependencies_include_tuples_and_after() {
        let registry = FunctionRegistry::with_builtins();
        let slice = registry.get("slice").unwrap().clone();
        let mut task = Task::function(
            slice,
            vec![
                Arg::reference("eval-0"),
                Arg::Tuple(vec![Arg::reference("constant-0"), Arg::Absent, Arg::Absent]),
            ],
        );
        task.after.push("commit-x-0".into());
        assert_eq!(
            task.dependencies(),
            vec!["eval-0", "constant-0", "commit-x-0"]
        );
        assert!(task.references("constant-0"));
        assert!(!task.references("eval-1"));
    }

    #[test]
    fn test_variables_are_not_task_refs() {
        let task = Task::eval("a + b", &["a", "b"]);
        assert!(task.dependencies().is_empty());
        assert!(task.references("a"));
        assert!(!task.references("eval-0"));
    }

    #[test]
    fn test_execute_function_and_commit() {
        let env = MemoryEnvironment::new();
        let registry = FunctionRegistry::with_builtins();
        let add = registry.get("add").unwrap().clone();

        let mut results = HashMap::new();
        results.insert("constant-0".to_string(), Value::Scalar(2.0));
        results.insert(
            "eval-0".to_string(),
            Value::Array(Array::Flat(vec![1.0, 2.0])),
        );

        let task = Task::function(
            add,
            vec![Arg::reference("eval-0"), Arg::reference("constant-0")],
        );
        let sum = task
            .execute(&context(&env), |name| results.get(name))
            .unwrap();
        assert_eq!(sum, Value::Array(Array::Flat(vec![3.0, 4.0])));

        results.insert("func-add-0".to_string(), sum.clone());
        let commit = Task::commit("x", "func-add-0");
        commit
            .execute(&context(&env), |name| results.get(name))
            .unwrap();
        assert_eq!(env.get("x").unwrap(), sum);
    }

    #[test]
    fn test_missing_reference_fails() {
        let env = MemoryEnvironment::new();
        let task = Task::commit("x", "eval-9");
        assert!(task.execute(&context(&env), |_| None).is_err());
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let task = Task::commit("x", "eval-0");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "commit",
                "variable": "x",
                "args": [{ "type": "ref", "value": "eval-0" }],
            })
        );
    }
}
