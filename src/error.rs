pub use anyhow::Error as RuntimeError;
use thiserror::Error;

/// An expression that does not belong to the expression grammar.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Syntax error at offset {offset}: {message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Function '{0}' already registered")]
    Duplicate(String),

    #[error("Function '{0}' not registered")]
    Unknown(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{task}' cannot depend on '{dependency}': it would create a cycle")]
    Cycle { task: String, dependency: String },

    #[error("Task '{0}' already exists in the graph")]
    DuplicateTask(String),

    #[error("Task '{0}' references itself")]
    SelfReference(String),

    #[error("Task '{0}' not found")]
    UnknownTask(String),

    #[error("Task '{task}' references '{reference}', which is not in the graph")]
    DanglingReference { task: String, reference: String },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    #[error("Definition '{0}':\n{1}")]
    Parse(String, ParseError),

    #[error("Definition '{0}':\n{1}")]
    Compile(String, CompileError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Shape disagreement between jagged arrays.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error(
        "Unable to broadcast '{variable}' to '{target}': counts differ at level {level}, expected {expected:?} but found {found:?}"
    )]
    LevelMismatch {
        level: usize,
        variable: String,
        target: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error(
        "Unable to broadcast '{variable}' to '{target}': expected {expected} entries but found {found}"
    )]
    LengthMismatch {
        variable: String,
        target: String,
        expected: usize,
        found: usize,
    },

    #[error("Counts at level {level} sum to {expected}, but the content has {found} entries")]
    CountMismatch {
        level: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("Variable '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Task '{name}':\n{source}")]
    Task { name: String, source: RuntimeError },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Failed to build the worker pool:\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Workers stopped reporting before every task finished")]
    Interrupted,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Couldn't read settings.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't parse settings.\n{0}")]
    Json(#[from] serde_json::Error),
}
