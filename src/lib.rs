#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod builtins;
mod error;
mod settings;
mod utils;

pub mod array;
pub mod compile;
pub mod env;
pub mod eval;
pub mod executor;
pub mod expr;
pub mod graph;
pub mod jagged;
pub mod link;
pub mod registry;
pub mod task;

pub use crate::array::{Array, Value};
pub use crate::compile::{Expression, NameAllocator};
pub use crate::env::{Environment, MemoryEnvironment};
pub use crate::error::*;
pub use crate::eval::{Evaluator, VectorEvaluator};
pub use crate::executor::Executor;
pub use crate::expr::{SyntaxNode, parse};
pub use crate::graph::TaskGraph;
pub use crate::link::{Define, LinkedGraph, link};
pub use crate::registry::{Function, FunctionRegistry, RegisteredFunction};
pub use crate::settings::Settings;
pub use crate::task::{Arg, Task, TaskContext, TaskKind};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
