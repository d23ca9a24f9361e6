//! The variable-binding environment tasks read from and commit to.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::array::Value;
use crate::error::EnvError;

/// Named columns shared by every task of a graph.
///
/// Reads and writes go through `&self`: a scheduler may run a commit task on
/// one thread while eval tasks read other variables on another.
pub trait Environment: Send + Sync {
    fn get(&self, name: &str) -> Result<Value, EnvError>;

    fn contains(&self, name: &str) -> bool;

    /// Binds `name`, silently replacing any previous value.
    fn add(&self, name: &str, value: Value);

    /// Bound names, in no particular order.
    fn names(&self) -> Vec<String>;
}

/// An [`Environment`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    vars: RwLock<HashMap<String, Value>>,
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), value.into());
        self
    }
}

impl Environment for MemoryEnvironment {
    fn get(&self, name: &str) -> Result<Value, EnvError> {
        let vars = self.vars.read().unwrap_or_else(|e| e.into_inner());
        vars.get(name)
            .cloned()
            .ok_or_else(|| EnvError::NotFound(name.to_string()))
    }

    fn contains(&self, name: &str) -> bool {
        let vars = self.vars.read().unwrap_or_else(|e| e.into_inner());
        vars.contains_key(name)
    }

    fn add(&self, name: &str, value: Value) {
        let mut vars = self.vars.write().unwrap_or_else(|e| e.into_inner());
        vars.insert(name.to_string(), value);
    }

    fn names(&self) -> Vec<String> {
        let vars = self.vars.read().unwrap_or_else(|e| e.into_inner());
        vars.keys().cloned().collect()
    }
}

impl<K, V> FromIterator<(K, V)> for MemoryEnvironment
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let vars = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            vars: RwLock::new(vars),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;

    #[test]
    fn test_add_overwrites() {
        let env = MemoryEnvironment::new().with("a", Array::Flat(vec![1.0]));
        assert!(env.contains("a"));
        env.add("a", Value::Scalar(2.0));
        assert_eq!(env.get("a").unwrap(), Value::Scalar(2.0));
    }

    #[test]
    fn test_missing_variable() {
        let env = MemoryEnvironment::new();
        assert_eq!(env.get("x"), Err(EnvError::NotFound("x".into())));
        assert!(!env.contains("x"));
    }

    #[test]
    fn test_collect() {
        let env: MemoryEnvironment = [("a", 1.0), ("b", 2.0)].into_iter().collect();
        let mut names = env.names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}
