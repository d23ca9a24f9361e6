//! Lowering syntax trees into task graphs.
//!
//! Every maximal pure subtree becomes one `eval` task. Everything the
//! vectorized evaluator cannot do in one pass, calls and subscripts, gets a
//! task of its own, with its inputs compiled first:
//!
//! ```text
//! count(c[1:])
//!
//! eval-0        c
//! constant-0    1
//! func-slice-0  slice(eval-0, (constant-0, -, -))
//! func-count-0  count(func-slice-0)
//! ```

use std::collections::HashMap;

use crate::error::{CompileError, ParseError};
use crate::expr::{self, Subscript, SyntaxNode};
use crate::graph::TaskGraph;
use crate::registry::{FunctionRegistry, RegisteredFunction};
use crate::task::{Arg, Task};

/// Hands out `<category>-<n>` task names, counting per category from zero.
#[derive(Debug, Clone, Default)]
pub struct NameAllocator {
    counters: HashMap<String, usize>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, category: &str) -> String {
        let counter = self.counters.entry(category.to_string()).or_default();
        let name = format!("{category}-{counter}");
        *counter += 1;
        name
    }

    /// Restarts every category at zero. Names already handed out belong to
    /// the graphs they were used in and are not affected.
    pub fn reset(&mut self) {
        self.counters.clear();
    }
}

/// A parsed expression and, once built, its task graph.
#[derive(Debug, Clone)]
pub struct Expression {
    text: String,
    tree: SyntaxNode,
    /// Compiled graph and its output task.
    built: Option<(TaskGraph, String)>,
    names: NameAllocator,
}

impl Expression {
    pub fn parse(text: impl Into<String>) -> Result<Self, ParseError> {
        let text = text.into();
        let tree = expr::parse(&text)?;
        Ok(Self::with_text(text, tree))
    }

    pub fn new(tree: SyntaxNode) -> Self {
        Self::with_text(tree.to_string(), tree)
    }

    fn with_text(text: String, tree: SyntaxNode) -> Self {
        Self {
            text,
            tree,
            built: None,
            names: NameAllocator::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tree(&self) -> &SyntaxNode {
        &self.tree
    }

    /// Name of the task producing the value of the whole expression, once
    /// built.
    pub fn output(&self) -> Option<&str> {
        self.built.as_ref().map(|(_, output)| output.as_str())
    }

    /// A copy of the graph and its output task. Compiles on first use, like
    /// [`Expression::to_tasks`].
    pub fn build(
        &mut self,
        registry: &FunctionRegistry,
    ) -> Result<(TaskGraph, String), CompileError> {
        let (graph, output) = self.compiled(registry)?;
        Ok((graph.clone(), output.to_string()))
    }

    /// Drops the cached graph and compiles again, restarting the
    /// expression's own name counters.
    pub fn rebuild(&mut self, registry: &FunctionRegistry) -> Result<&TaskGraph, CompileError> {
        self.built = None;
        self.to_tasks(registry)
    }

    /// Builds a graph drawing names from `names`, which is not reset. Graphs
    /// built from one allocator never share a task name.
    pub fn build_with(
        &self,
        names: &mut NameAllocator,
        registry: &FunctionRegistry,
    ) -> Result<(TaskGraph, String), CompileError> {
        let mut builder = Builder {
            names,
            registry,
            graph: TaskGraph::new(),
        };
        let output = builder.node(&self.tree)?;
        tracing::debug!(
            expression = self.text.as_str(),
            tasks = builder.graph.len(),
            output = output.as_str(),
            "compiled"
        );
        Ok((builder.graph, output))
    }

    /// The task graph of the expression, built on first use and returned
    /// unchanged afterwards.
    pub fn to_tasks(&mut self, registry: &FunctionRegistry) -> Result<&TaskGraph, CompileError> {
        self.compiled(registry).map(|(graph, _)| graph)
    }

    fn compiled(
        &mut self,
        registry: &FunctionRegistry,
    ) -> Result<(&TaskGraph, &str), CompileError> {
        let built = match self.built.take() {
            Some(built) => built,
            None => {
                let mut names = std::mem::take(&mut self.names);
                names.reset();
                let built = self.build_with(&mut names, registry);
                self.names = names;
                built?
            }
        };
        let (graph, output) = &*self.built.insert(built);
        Ok((graph, output.as_str()))
    }
}

struct Builder<'a> {
    names: &'a mut NameAllocator,
    registry: &'a FunctionRegistry,
    graph: TaskGraph,
}

impl Builder<'_> {
    fn emit(&mut self, category: &str, task: Task) -> Result<String, CompileError> {
        let name = self.names.next(category);
        tracing::debug!(task = name.as_str(), label = %task.label(), "emit");
        self.graph.add(name.clone(), task)?;
        Ok(name)
    }

    fn lookup(&self, name: &str) -> Result<RegisteredFunction, CompileError> {
        self.registry
            .get(name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownFunction(name.to_string()))
    }

    /// Compiles `node` and returns the name of the task holding its value.
    fn node(&mut self, node: &SyntaxNode) -> Result<String, CompileError> {
        match node {
            SyntaxNode::Constant(literal) => self.emit("constant", Task::constant(literal.clone())),
            pure if pure.is_pure() => self.eval(pure),
            SyntaxNode::Symbol { name, subscript } => match subscript {
                Some(subscript) => self.function(
                    "slice",
                    std::slice::from_ref(&SyntaxNode::symbol(name.as_str())),
                    Some(subscript),
                ),
                None => self.eval(node),
            },
            SyntaxNode::Function {
                name,
                arguments,
                subscript,
            } => self.function(name, arguments, subscript.as_ref()),
            SyntaxNode::BinaryOp { op, left, right } => {
                let function = self.lookup(op.function_name())?;
                let left = self.node(left)?;
                let right = self.node(right)?;
                self.emit(
                    &format!("func-{}", op.function_name()),
                    Task::function(function, vec![Arg::Ref(left), Arg::Ref(right)]),
                )
            }
            SyntaxNode::UnaryOp { op, operand } => {
                let function = self.lookup(op.function_name())?;
                let operand = self.node(operand)?;
                self.emit(
                    &format!("func-{}", op.function_name()),
                    Task::function(function, vec![Arg::Ref(operand)]),
                )
            }
        }
    }

    fn eval(&mut self, pure: &SyntaxNode) -> Result<String, CompileError> {
        let task = Task::eval(pure.to_string(), &pure.symbols());
        self.emit("eval", task)
    }

    fn function(
        &mut self,
        name: &str,
        arguments: &[SyntaxNode],
        subscript: Option<&Subscript>,
    ) -> Result<String, CompileError> {
        let function = self.lookup(name)?;

        let mut args = Vec::with_capacity(arguments.len() + 1);
        for argument in arguments {
            args.push(Arg::Ref(self.node(argument)?));
        }

        match subscript {
            None => {}
            Some(Subscript::Index(index)) => args.push(Arg::Ref(self.node(index)?)),
            Some(Subscript::Slice { lower, upper, step }) => {
                let mut parts = Vec::with_capacity(3);
                for part in [lower, upper, step] {
                    parts.push(match part {
                        Some(part) => Arg::Ref(self.node(part)?),
                        None => Arg::Absent,
                    });
                }
                args.push(Arg::Tuple(parts));
            }
        }

        self.emit(&format!("func-{name}"), Task::function(function, args))
    }
}
