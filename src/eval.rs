//! Vectorized evaluation of pure expressions against an environment.

use anyhow::bail;

use crate::array::{Array, Value};
use crate::builtins::{binary_kernel, unary_kernel};
use crate::env::Environment;
use crate::error::EnvError;
use crate::expr::{self, Literal, SyntaxNode};
use crate::jagged;

/// Evaluates the text of a pure expression in one pass.
///
/// Implementations must preserve shape: every leaf of the result corresponds
/// to one leaf of the broadcast inputs.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expression: &str, env: &dyn Environment) -> anyhow::Result<Value>;
}

/// Named constants, used when no variable of the same name is bound.
pub fn constant(name: &str) -> Option<f64> {
    match name {
        "nan" => Some(f64::NAN),
        "inf" => Some(f64::INFINITY),
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        _ => None,
    }
}

/// The default evaluator: broadcasts every referenced array to the deepest
/// one, evaluates column by column over the flat leaves and restores the
/// target's nesting.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorEvaluator;

enum Operand {
    Scalar(f64),
    Column(Vec<f64>),
}

struct Inputs<'a> {
    scalars: Vec<(&'a str, f64)>,
    columns: Vec<(String, Vec<f64>)>,
}

impl Inputs<'_> {
    fn lookup(&self, name: &str) -> anyhow::Result<Operand> {
        if let Some((_, v)) = self.scalars.iter().find(|(n, _)| *n == name) {
            return Ok(Operand::Scalar(*v));
        }
        match self.columns.iter().find(|(n, _)| n == name) {
            Some((_, column)) => Ok(Operand::Column(column.clone())),
            None => bail!("variable '{name}' was not resolved"),
        }
    }
}

fn apply_binary(lhs: Operand, rhs: Operand, f: fn(f64, f64) -> f64) -> Operand {
    match (lhs, rhs) {
        (Operand::Scalar(a), Operand::Scalar(b)) => Operand::Scalar(f(a, b)),
        (Operand::Scalar(a), Operand::Column(b)) => {
            Operand::Column(b.into_iter().map(|v| f(a, v)).collect())
        }
        (Operand::Column(a), Operand::Scalar(b)) => {
            Operand::Column(a.into_iter().map(|v| f(v, b)).collect())
        }
        (Operand::Column(a), Operand::Column(b)) => {
            Operand::Column(a.into_iter().zip(b).map(|(x, y)| f(x, y)).collect())
        }
    }
}

fn eval_node(node: &SyntaxNode, inputs: &Inputs) -> anyhow::Result<Operand> {
    match node {
        SyntaxNode::Constant(Literal::Number(n)) => Ok(Operand::Scalar(*n)),
        SyntaxNode::Constant(Literal::Bool(b)) => Ok(Operand::Scalar(if *b { 1.0 } else { 0.0 })),
        SyntaxNode::Constant(Literal::Text(s)) => {
            bail!("string literal {s:?} cannot be used in arithmetic")
        }
        SyntaxNode::Symbol {
            name,
            subscript: None,
        } => inputs.lookup(name),
        SyntaxNode::BinaryOp { op, left, right } => {
            let lhs = eval_node(left, inputs)?;
            let rhs = eval_node(right, inputs)?;
            Ok(apply_binary(lhs, rhs, binary_kernel(*op)))
        }
        SyntaxNode::UnaryOp { op, operand } => {
            let f = unary_kernel(*op);
            Ok(match eval_node(operand, inputs)? {
                Operand::Scalar(v) => Operand::Scalar(f(v)),
                Operand::Column(c) => Operand::Column(c.into_iter().map(f).collect()),
            })
        }
        other => bail!("'{other}' needs its own task and cannot be evaluated in one pass"),
    }
}

impl Evaluator for VectorEvaluator {
    fn evaluate(&self, expression: &str, env: &dyn Environment) -> anyhow::Result<Value> {
        let tree = expr::parse(expression)?;

        let mut scalars = Vec::new();
        let mut arrays = Vec::new();
        for name in tree.symbols() {
            match env.get(name) {
                Ok(Value::Scalar(v)) => scalars.push((name, v)),
                Ok(Value::Array(array)) => arrays.push((name, array)),
                Ok(other) => bail!(
                    "variable '{name}' holds a {}, expected a number or an array",
                    other.type_name()
                ),
                Err(EnvError::NotFound(_)) => match constant(name) {
                    Some(v) => scalars.push((name, v)),
                    None => return Err(EnvError::NotFound(name.to_string()).into()),
                },
            }
        }

        let refs: Vec<(&str, &Array)> = arrays.iter().map(|(n, a)| (*n, a)).collect();
        let aligned = jagged::broadcast(&refs)?;

        tracing::debug!(
            expression,
            target = aligned.target.as_deref().unwrap_or("-"),
            leaves = aligned.len(),
            "evaluating"
        );

        let levels = aligned.levels;
        let inputs = Inputs {
            scalars,
            columns: aligned.columns,
        };

        match eval_node(&tree, &inputs)? {
            Operand::Scalar(v) => Ok(Value::Scalar(v)),
            Operand::Column(content) => {
                let array: Array = jagged::reconstruct(content, &levels)?;
                Ok(Value::Array(array))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MemoryEnvironment;

    fn env() -> MemoryEnvironment {
        MemoryEnvironment::new()
            .with("a", Array::jagged(&[vec![1.0, 2.0, 3.0], vec![5.0, 6.0]]))
            .with("b", Array::jagged(&[vec![2.0, 3.0, 4.0], vec![6.0, 7.0]]))
            .with("w", Array::Flat(vec![10.0, 100.0]))
            .with("k", 3.0)
    }

    #[test]
    fn test_elementwise_jagged() {
        let result = VectorEvaluator.evaluate("a*2 + 1", &env()).unwrap();
        assert_eq!(
            result,
            Value::Array(Array::jagged(&[vec![3.0, 5.0, 7.0], vec![11.0, 13.0]]))
        );
    }

    #[test]
    fn test_broadcast_flat_into_jagged() {
        let result = VectorEvaluator.evaluate("a + w", &env()).unwrap();
        assert_eq!(
            result,
            Value::Array(Array::jagged(&[vec![11.0, 12.0, 13.0], vec![105.0, 106.0]]))
        );
    }

    #[test]
    fn test_scalars_and_constants() {
        assert_eq!(
            VectorEvaluator.evaluate("k * 2", &env()).unwrap(),
            Value::Scalar(6.0)
        );
        let Value::Scalar(v) = VectorEvaluator.evaluate("pi / 2", &env()).unwrap() else {
            panic!("expected a scalar");
        };
        assert!((v - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_logical_mask() {
        let result = VectorEvaluator
            .evaluate("(a > 1) & (b < 7)", &env())
            .unwrap();
        assert_eq!(
            result,
            Value::Array(Array::jagged(&[vec![0.0, 1.0, 1.0], vec![1.0, 0.0]]))
        );
    }

    #[test]
    fn test_errors() {
        assert!(VectorEvaluator.evaluate("missing + 1", &env()).is_err());
        assert!(VectorEvaluator.evaluate("sqrt(a)", &env()).is_err());
        assert!(VectorEvaluator.evaluate("a +", &env()).is_err());
    }
}
