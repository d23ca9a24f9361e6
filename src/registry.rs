//! Functions callable from expressions.
//!
//! Compilation only checks that a name is registered; the implementation is
//! looked up once and stored in the function task, so later changes to the
//! registry do not affect graphs that were already built.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::array::Value;
use crate::error::RegistryError;

/// An opaque computation over task results.
pub trait Function: Send + Sync {
    fn call(&self, args: &[Value]) -> anyhow::Result<Value>;
}

impl<F> Function for F
where
    F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        self(args)
    }
}

/// A function together with the name it was registered under.
#[derive(Clone)]
pub struct RegisteredFunction {
    pub name: Arc<str>,
    pub implementation: Arc<dyn Function>,
}

impl RegisteredFunction {
    pub fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        self.implementation.call(args)
    }
}

impl Debug for RegisteredFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RegisteredFunction").field(&self.name).finish()
    }
}

/// Two registered functions are the same when they share a name and an
/// implementation.
impl PartialEq for RegisteredFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.implementation, &other.implementation)
    }
}

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, RegisteredFunction>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the operator kernels and the builtin
    /// functions from [`crate::builtins`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::install(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> Result<(), RegistryError>
    where
        F: Function + 'static,
    {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        let entry = RegisteredFunction {
            name: name.as_str().into(),
            implementation: Arc::new(function),
        };
        self.functions.insert(name, entry);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Result<RegisteredFunction, RegistryError> {
        self.functions
            .remove(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(args: &[Value]) -> anyhow::Result<Value> {
        match args.first() {
            Some(Value::Array(array)) => Ok(Value::Scalar(array.len() as f64)),
            _ => anyhow::bail!("count expects an array"),
        }
    }

    #[test]
    fn test_register_and_call() {
        let mut registry = FunctionRegistry::new();
        registry.register("count", count).unwrap();
        let function = registry.get("count").unwrap();
        let result = function
            .call(&[Value::Array(vec![1.0, 2.0].into())])
            .unwrap();
        assert_eq!(result, Value::Scalar(2.0));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = FunctionRegistry::new();
        registry.register("count", count).unwrap();
        assert_eq!(
            registry.register("count", count),
            Err(RegistryError::Duplicate("count".into()))
        );
    }

    #[test]
    fn test_unregister() {
        let mut registry = FunctionRegistry::new();
        registry
            .register("one", |_: &[Value]| -> anyhow::Result<Value> {
                Ok(Value::Scalar(1.0))
            })
            .unwrap();
        assert!(registry.unregister("one").is_ok());
        assert!(!registry.contains("one"));
        assert_eq!(
            registry.unregister("one").unwrap_err(),
            RegistryError::Unknown("one".into())
        );
    }

    #[test]
    fn test_builtins_present() {
        let registry = FunctionRegistry::with_builtins();
        for name in ["slice", "sqrt", "count_nonzero", "add", "invert"] {
            assert!(registry.contains(name), "{name} missing");
        }
    }
}
