//! Columnar values: flat and jagged arrays, and task results.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::error::BroadcastError;

/// A column of numbers, possibly nested to any depth with irregular inner
/// lengths.
///
/// A jagged array stores the length of each outer entry in `counts` and all
/// inner entries back to back in `content`, the same layout as offset-based
/// columnar formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Array {
    Flat(Vec<f64>),
    Jagged {
        counts: Vec<usize>,
        content: Box<Array>,
    },
}

impl Array {
    /// Wraps `content` one level deeper.
    pub fn from_counts(counts: Vec<usize>, content: Array) -> Result<Self, BroadcastError> {
        let total: usize = counts.iter().sum();
        if total != content.len() {
            return Err(BroadcastError::CountMismatch {
                level: content.depth(),
                expected: total,
                found: content.len(),
            });
        }
        Ok(Array::Jagged {
            counts,
            content: Box::new(content),
        })
    }

    /// Builds a one-level jagged array from nested rows.
    pub fn jagged<R: AsRef<[f64]>>(rows: &[R]) -> Self {
        let counts = rows.iter().map(|r| r.as_ref().len()).collect();
        let content = rows.iter().flat_map(|r| r.as_ref().iter().copied()).collect();
        Array::Jagged {
            counts,
            content: Box::new(Array::Flat(content)),
        }
    }

    /// Number of outer entries.
    pub fn len(&self) -> usize {
        match self {
            Array::Flat(values) => values.len(),
            Array::Jagged { counts, .. } => counts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of nesting levels above the flat content.
    pub fn depth(&self) -> usize {
        match self {
            Array::Flat(_) => 0,
            Array::Jagged { content, .. } => 1 + content.depth(),
        }
    }

    fn offsets(counts: &[usize]) -> Vec<usize> {
        let mut acc = Vec::with_capacity(counts.len() + 1);
        let mut total = 0;
        acc.push(0);
        for count in counts {
            total += count;
            acc.push(total);
        }
        acc
    }

    /// Keeps the outer entries at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> Array {
        match self {
            Array::Flat(values) => Array::Flat(indices.iter().map(|&i| values[i]).collect()),
            Array::Jagged { counts, content } => {
                let offsets = Self::offsets(counts);
                let mut inner = Vec::new();
                let mut kept = Vec::with_capacity(indices.len());
                for &i in indices {
                    kept.push(counts[i]);
                    inner.extend(offsets[i]..offsets[i + 1]);
                }
                Array::Jagged {
                    counts: kept,
                    content: Box::new(content.take(&inner)),
                }
            }
        }
    }

    /// The outer entry at `index`.
    pub fn get(&self, index: usize) -> Option<Value> {
        if index >= self.len() {
            return None;
        }
        match self {
            Array::Flat(values) => Some(Value::Scalar(values[index])),
            Array::Jagged { counts, content } => {
                let offsets = Self::offsets(counts);
                let inner: Vec<usize> = (offsets[index]..offsets[index + 1]).collect();
                Some(Value::Array(content.take(&inner)))
            }
        }
    }

    /// Flat leaf values, ignoring nesting.
    pub fn leaves(&self) -> &[f64] {
        match self {
            Array::Flat(values) => values,
            Array::Jagged { content, .. } => content.leaves(),
        }
    }

    /// Applies `f` to every leaf, keeping the shape.
    pub fn map(&self, f: &impl Fn(f64) -> f64) -> Array {
        match self {
            Array::Flat(values) => Array::Flat(values.iter().map(|&v| f(v)).collect()),
            Array::Jagged { counts, content } => Array::Jagged {
                counts: counts.clone(),
                content: Box::new(content.map(f)),
            },
        }
    }
}

impl From<Vec<f64>> for Array {
    fn from(values: Vec<f64>) -> Self {
        Array::Flat(values)
    }
}

impl Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Array::Flat(values) => write!(f, "{values:?}"),
            Array::Jagged { .. } => {
                f.write_str("[")?;
                for i in 0..self.len() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match self.get(i) {
                        Some(value) => write!(f, "{value}")?,
                        None => f.write_str("?")?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

/// The result of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Scalar(f64),
    Array(Array),
    Text(String),
    Tuple(Vec<Value>),
    None,
}

impl Value {
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Array(_) => "array",
            Value::Text(_) => "text",
            Value::Tuple(_) => "tuple",
            Value::None => "none",
        }
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Value::Array(array)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Scalar(value)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => write!(f, "{v}"),
            Value::Array(array) => write!(f, "{array}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Value::None => f.write_str("None"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_counts_checks_sum() {
        assert!(Array::from_counts(vec![2, 1], Array::Flat(vec![1.0, 2.0, 3.0])).is_ok());
        let err = Array::from_counts(vec![2, 2], Array::Flat(vec![1.0, 2.0, 3.0])).unwrap_err();
        assert_eq!(
            err,
            BroadcastError::CountMismatch {
                level: 0,
                expected: 4,
                found: 3
            }
        );
    }

    #[test]
    fn test_take_and_get() {
        let array = Array::jagged(&[vec![3.0, 4.0, 5.0], vec![7.0, 8.0]]);
        assert_eq!(array.len(), 2);
        assert_eq!(array.take(&[1]), Array::jagged(&[vec![7.0, 8.0]]));
        assert_eq!(array.get(0), Some(Value::Array(Array::Flat(vec![3.0, 4.0, 5.0]))));
        assert_eq!(array.get(2), None);
    }

    #[test]
    fn test_display() {
        let array = Array::jagged(&[vec![1.0, 2.0], vec![]]);
        assert_eq!(array.to_string(), "[[1.0, 2.0], []]");
    }
}
