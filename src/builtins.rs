//! Builtin functions and the elementwise operator kernels.
//!
//! Operators that cannot be folded into a single vectorized evaluation (for
//! example `count(a) + 1`) run as function tasks named after the operator,
//! `add`, `mul`, `invert` and so on. The same kernels back the
//! [`VectorEvaluator`](crate::eval::VectorEvaluator).

use anyhow::{Context, anyhow, bail};

use crate::array::{Array, Value};
use crate::expr::{BinOp, UnaryOp};
use crate::jagged;
use crate::registry::FunctionRegistry;

fn truth(v: f64) -> bool {
    v != 0.0
}

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

pub(crate) fn binary_kernel(op: BinOp) -> fn(f64, f64) -> f64 {
    match op {
        BinOp::Add => |a, b| a + b,
        BinOp::Sub => |a, b| a - b,
        BinOp::Mul => |a, b| a * b,
        BinOp::Div => |a, b| a / b,
        BinOp::FloorDiv => |a, b| (a / b).floor(),
        // Sign follows the divisor.
        BinOp::Mod => |a, b| a - b * (a / b).floor(),
        BinOp::Pow => f64::powf,
        BinOp::Eq => |a, b| flag(a == b),
        BinOp::Ne => |a, b| flag(a != b),
        BinOp::Lt => |a, b| flag(a < b),
        BinOp::Le => |a, b| flag(a <= b),
        BinOp::Gt => |a, b| flag(a > b),
        BinOp::Ge => |a, b| flag(a >= b),
        BinOp::And => |a, b| flag(truth(a) && truth(b)),
        BinOp::Or => |a, b| flag(truth(a) || truth(b)),
        BinOp::Xor => |a, b| flag(truth(a) != truth(b)),
    }
}

pub(crate) fn unary_kernel(op: UnaryOp) -> fn(f64) -> f64 {
    match op {
        UnaryOp::Neg => |a| -a,
        UnaryOp::Pos => |a| a,
        UnaryOp::Not => |a| flag(!truth(a)),
    }
}

/// Applies `f` leafwise to a scalar or an array.
pub(crate) fn map_value(value: &Value, f: impl Fn(f64) -> f64) -> anyhow::Result<Value> {
    match value {
        Value::Scalar(v) => Ok(Value::Scalar(f(*v))),
        Value::Array(array) => Ok(Value::Array(array.map(&f))),
        other => bail!("expected a number or an array, got {}", other.type_name()),
    }
}

/// Combines two operands leafwise, broadcasting jagged arrays to the deeper
/// of the two shapes.
pub(crate) fn zip_values(
    lhs: &Value,
    rhs: &Value,
    f: impl Fn(f64, f64) -> f64,
) -> anyhow::Result<Value> {
    match (lhs, rhs) {
        (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(*a, *b))),
        (Value::Scalar(a), Value::Array(b)) => Ok(Value::Array(b.map(&|v| f(*a, v)))),
        (Value::Array(a), Value::Scalar(b)) => Ok(Value::Array(a.map(&|v| f(v, *b)))),
        (Value::Array(a), Value::Array(b)) => {
            let aligned = jagged::broadcast(&[("lhs", a), ("rhs", b)])?;
            let (_, left) = &aligned.columns[0];
            let (_, right) = &aligned.columns[1];
            let content = left.iter().zip(right).map(|(&x, &y)| f(x, y)).collect();
            let array: Array = jagged::reconstruct(content, &aligned.levels)?;
            Ok(Value::Array(array))
        }
        (a, b) => bail!(
            "unsupported operand types {} and {}",
            a.type_name(),
            b.type_name()
        ),
    }
}

fn arg(args: &[Value], index: usize, function: &str) -> anyhow::Result<Value> {
    args.get(index)
        .cloned()
        .ok_or_else(|| anyhow!("{function}() expects at least {} argument(s)", index + 1))
}

fn array_arg(args: &[Value], index: usize, function: &str) -> anyhow::Result<Array> {
    match arg(args, index, function)? {
        Value::Array(array) => Ok(array),
        other => bail!("{function}() expects an array, got {}", other.type_name()),
    }
}

fn integer(value: &Value) -> anyhow::Result<Option<i64>> {
    match value {
        Value::None => Ok(None),
        Value::Scalar(v) if v.fract() == 0.0 && v.is_finite() => Ok(Some(*v as i64)),
        other => bail!("slice indices must be integers, got {other}"),
    }
}

/// Outer indices selected by `[lower:upper:step]` on `len` entries.
pub(crate) fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> anyhow::Result<Vec<usize>> {
    let len = len as i64;
    let step = step.unwrap_or(1);
    if step == 0 {
        bail!("slice step cannot be zero");
    }

    let clamp = |bound: i64, low: i64, high: i64| -> i64 {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };

    let mut acc = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |v| clamp(v, 0, len));
        let stop = upper.map_or(len, |v| clamp(v, 0, len));
        let mut i = start;
        while i < stop {
            acc.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let start = lower.map_or(len - 1, |v| clamp(v, -1, len - 1));
        let stop = upper.map_or(-1, |v| clamp(v, -1, len - 1));
        let mut i = start;
        while i > stop {
            acc.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    Ok(acc)
}

/// `slice(x, (lower, upper, step))` or `slice(x, index)` on the outer axis.
fn slice(args: &[Value]) -> anyhow::Result<Value> {
    let array = array_arg(args, 0, "slice")?;
    match arg(args, 1, "slice")? {
        Value::Tuple(parts) if parts.len() == 3 => {
            let indices = slice_indices(
                array.len(),
                integer(&parts[0])?,
                integer(&parts[1])?,
                integer(&parts[2])?,
            )?;
            Ok(Value::Array(array.take(&indices)))
        }
        index @ Value::Scalar(_) => {
            let Some(i) = integer(&index)? else {
                bail!("slice() expects an integer index");
            };
            let len = array.len() as i64;
            let position = if i < 0 { i + len } else { i };
            if position < 0 || position >= len {
                bail!("index {i} out of range for {len} entries");
            }
            array
                .get(position as usize)
                .context("index out of range")
        }
        other => bail!("slice() expects a slice or an index, got {other}"),
    }
}

fn leaf_count(array: &Array, predicate: impl Fn(f64) -> bool) -> Value {
    match array {
        Array::Flat(values) => Value::Scalar(values.iter().filter(|&&v| predicate(v)).count() as f64),
        Array::Jagged { .. } => {
            let counts = (0..array.len())
                .map(|i| match array.get(i) {
                    Some(Value::Array(entry)) => {
                        entry.leaves().iter().filter(|&&v| predicate(v)).count() as f64
                    }
                    _ => 0.0,
                })
                .collect();
            Value::Array(Array::Flat(counts))
        }
    }
}

/// Number of non-zero leaves in every outer entry.
fn count_nonzero(args: &[Value]) -> anyhow::Result<Value> {
    let array = array_arg(args, 0, "count_nonzero")?;
    Ok(leaf_count(&array, truth))
}

/// Length of every outer entry, or of the array itself when flat.
fn num(args: &[Value]) -> anyhow::Result<Value> {
    match array_arg(args, 0, "num")? {
        Array::Flat(values) => Ok(Value::Scalar(values.len() as f64)),
        Array::Jagged { counts, .. } => Ok(Value::Array(Array::Flat(
            counts.into_iter().map(|c| c as f64).collect(),
        ))),
    }
}

macro_rules! math {
    ($registry:expr, $($name:literal => $f:expr),* $(,)?) => {
        $(
            let _ = $registry.register($name, |args: &[Value]| -> anyhow::Result<Value> {
                map_value(&arg(args, 0, $name)?, $f)
            });
        )*
    };
}

/// Registers the builtins, leaving any name already taken untouched.
pub(crate) fn install(registry: &mut FunctionRegistry) {
    const BINARY: [BinOp; 16] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::Div,
        BinOp::FloorDiv,
        BinOp::Mod,
        BinOp::Pow,
        BinOp::Eq,
        BinOp::Ne,
        BinOp::Lt,
        BinOp::Le,
        BinOp::Gt,
        BinOp::Ge,
        BinOp::And,
        BinOp::Or,
        BinOp::Xor,
    ];

    for op in BINARY {
        let kernel = binary_kernel(op);
        let name = op.function_name();
        let _ = registry.register(name, move |args: &[Value]| -> anyhow::Result<Value> {
            zip_values(&arg(args, 0, name)?, &arg(args, 1, name)?, kernel)
        });
    }

    for op in [UnaryOp::Neg, UnaryOp::Pos, UnaryOp::Not] {
        let kernel = unary_kernel(op);
        let name = op.function_name();
        let _ = registry.register(name, move |args: &[Value]| -> anyhow::Result<Value> {
            map_value(&arg(args, 0, name)?, kernel)
        });
    }

    math!(registry,
        "sqrt" => f64::sqrt,
        "abs" => f64::abs,
        "exp" => f64::exp,
        "log" => f64::ln,
    );

    let _ = registry.register("slice", slice);
    let _ = registry.register("count_nonzero", count_nonzero);
    let _ = registry.register("num", num);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c() -> Array {
        Array::jagged(&[vec![3.0, 4.0, 5.0], vec![7.0, 8.0]])
    }

    #[test]
    fn test_slice_indices_follow_python() {
        assert_eq!(slice_indices(5, Some(1), None, None).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(slice_indices(5, None, Some(-2), None).unwrap(), vec![0, 1, 2]);
        assert_eq!(slice_indices(5, None, None, Some(2)).unwrap(), vec![0, 2, 4]);
        assert_eq!(slice_indices(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(10), None, None).unwrap(), Vec::<usize>::new());
        assert!(slice_indices(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_slice_indices_huge_step() {
        assert_eq!(slice_indices(5, Some(1), None, Some(i64::MAX)).unwrap(), vec![1]);
        assert_eq!(slice_indices(5, Some(3), None, Some(i64::MIN)).unwrap(), vec![3]);

        let step = Value::Scalar(9.223372036854776e18);
        let triple = Value::Tuple(vec![Value::Scalar(1.0), Value::None, step]);
        let result = slice(&[Value::Array(c()), triple]).unwrap();
        assert_eq!(result, Value::Array(Array::jagged(&[vec![7.0, 8.0]])));
    }

    #[test]
    fn test_slice_outer_axis() {
        let triple = Value::Tuple(vec![Value::Scalar(1.0), Value::None, Value::None]);
        let result = slice(&[Value::Array(c()), triple]).unwrap();
        assert_eq!(result, Value::Array(Array::jagged(&[vec![7.0, 8.0]])));
    }

    #[test]
    fn test_index_outer_axis() {
        let result = slice(&[Value::Array(c()), Value::Scalar(-1.0)]).unwrap();
        assert_eq!(result, Value::Array(Array::Flat(vec![7.0, 8.0])));
        assert!(slice(&[Value::Array(c()), Value::Scalar(2.0)]).is_err());
        assert!(slice(&[Value::Array(c()), Value::Scalar(0.5)]).is_err());
    }

    #[test]
    fn test_zip_broadcasts() {
        let weight = Value::Array(Array::Flat(vec![1.0, 10.0]));
        let result = zip_values(&Value::Array(c()), &weight, binary_kernel(BinOp::Mul)).unwrap();
        assert_eq!(
            result,
            Value::Array(Array::jagged(&[vec![3.0, 4.0, 5.0], vec![70.0, 80.0]]))
        );
    }

    #[test]
    fn test_kernels() {
        assert_eq!(binary_kernel(BinOp::Mod)(-1.0, 3.0), 2.0);
        assert_eq!(binary_kernel(BinOp::FloorDiv)(7.0, 2.0), 3.0);
        assert_eq!(binary_kernel(BinOp::And)(2.0, 0.0), 0.0);
        assert_eq!(binary_kernel(BinOp::Xor)(2.0, 0.0), 1.0);
        assert_eq!(unary_kernel(UnaryOp::Not)(0.0), 1.0);
    }

    #[test]
    fn test_reductions() {
        let data = Value::Array(Array::jagged(&[vec![0.0, 1.0, 2.0], vec![0.0]]));
        assert_eq!(
            count_nonzero(std::slice::from_ref(&data)).unwrap(),
            Value::Array(Array::Flat(vec![2.0, 0.0]))
        );
        assert_eq!(
            num(&[data]).unwrap(),
            Value::Array(Array::Flat(vec![3.0, 1.0]))
        );
    }
}
