//! Expression syntax: tokens, parsing and the typed syntax tree.
//!
//! Expressions are pure: no statements, no assignments. Dotted identifier
//! chains such as `Muon.pt` are a single column name, and an identifier or a
//! call may carry one trailing subscript, e.g. `Jet_pt[1:]` or `f(x)[0]`.
//!
//! ```rust
//! use carpenter::expr::{SyntaxNode, parse};
//!
//! let tree = parse("sqrt(Muon.px**2 + Muon.py**2)").unwrap();
//! assert!(matches!(tree, SyntaxNode::Function { .. }));
//! assert_eq!(tree.symbols(), vec!["Muon.px", "Muon.py"]);
//! ```

mod lexer;
mod parser;

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

pub use crate::expr::parser::parse;

/// A literal value written in an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Literal {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Text(s) => write!(f, "{s:?}"),
            Literal::Bool(true) => f.write_str("True"),
            Literal::Bool(false) => f.write_str("False"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
}

impl BinOp {
    /// Operator as written in an expression.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
        }
    }

    /// Name of the registered function implementing this operator.
    pub fn function_name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::FloorDiv => "floordiv",
            BinOp::Mod => "mod",
            BinOp::Pow => "pow",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::Lt => "lt",
            BinOp::Le => "le",
            BinOp::Gt => "gt",
            BinOp::Ge => "ge",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }

    /// Binding strength; higher binds tighter.
    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 1,
            BinOp::Or => 2,
            BinOp::Xor => 3,
            BinOp::And => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => 6,
            BinOp::Pow => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => "~",
        }
    }

    pub fn function_name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Pos => "pos",
            UnaryOp::Not => "invert",
        }
    }
}

const UNARY_PRECEDENCE: u8 = 7;
const ATOM_PRECEDENCE: u8 = 9;

/// A trailing `[...]` on a symbol or a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Subscript {
    /// `x[i]`
    Index(Box<SyntaxNode>),
    /// `x[lower:upper:step]`, every component optional.
    Slice {
        lower: Option<Box<SyntaxNode>>,
        upper: Option<Box<SyntaxNode>>,
        step: Option<Box<SyntaxNode>>,
    },
}

impl Display for Subscript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscript::Index(index) => write!(f, "[{index}]"),
            Subscript::Slice { lower, upper, step } => {
                f.write_str("[")?;
                if let Some(lower) = lower {
                    write!(f, "{lower}")?;
                }
                f.write_str(":")?;
                if let Some(upper) = upper {
                    write!(f, "{upper}")?;
                }
                if let Some(step) = step {
                    write!(f, ":{step}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Typed syntax tree of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxNode {
    Constant(Literal),
    Symbol {
        name: String,
        subscript: Option<Subscript>,
    },
    Function {
        name: String,
        arguments: Vec<SyntaxNode>,
        subscript: Option<Subscript>,
    },
    BinaryOp {
        op: BinOp,
        left: Box<SyntaxNode>,
        right: Box<SyntaxNode>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<SyntaxNode>,
    },
}

impl SyntaxNode {
    pub fn symbol(name: impl Into<String>) -> Self {
        SyntaxNode::Symbol {
            name: name.into(),
            subscript: None,
        }
    }

    pub fn number(value: f64) -> Self {
        SyntaxNode::Constant(Literal::Number(value))
    }

    pub fn binary(op: BinOp, left: SyntaxNode, right: SyntaxNode) -> Self {
        SyntaxNode::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// A subtree is pure when it contains no function call and no
    /// subscripted symbol, so a single vectorized evaluation can compute it.
    pub fn is_pure(&self) -> bool {
        match self {
            SyntaxNode::Constant(_) => true,
            SyntaxNode::Symbol { subscript, .. } => subscript.is_none(),
            SyntaxNode::Function { .. } => false,
            SyntaxNode::BinaryOp { left, right, .. } => left.is_pure() && right.is_pure(),
            SyntaxNode::UnaryOp { operand, .. } => operand.is_pure(),
        }
    }

    /// Variable names referenced anywhere in the tree, in order of first
    /// occurrence.
    pub fn symbols(&self) -> Vec<&str> {
        let mut acc = Vec::new();
        self.collect_symbols(&mut acc);
        acc
    }

    fn collect_symbols<'a>(&'a self, acc: &mut Vec<&'a str>) {
        match self {
            SyntaxNode::Constant(_) => {}
            SyntaxNode::Symbol { name, subscript } => {
                if !acc.contains(&name.as_str()) {
                    acc.push(name);
                }
                if let Some(subscript) = subscript {
                    subscript.collect_symbols(acc);
                }
            }
            SyntaxNode::Function {
                arguments,
                subscript,
                ..
            } => {
                for argument in arguments {
                    argument.collect_symbols(acc);
                }
                if let Some(subscript) = subscript {
                    subscript.collect_symbols(acc);
                }
            }
            SyntaxNode::BinaryOp { left, right, .. } => {
                left.collect_symbols(acc);
                right.collect_symbols(acc);
            }
            SyntaxNode::UnaryOp { operand, .. } => operand.collect_symbols(acc),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            SyntaxNode::BinaryOp { op, .. } => op.precedence(),
            SyntaxNode::UnaryOp { .. } => UNARY_PRECEDENCE,
            SyntaxNode::Constant(Literal::Number(n)) if n.is_sign_negative() => UNARY_PRECEDENCE,
            _ => ATOM_PRECEDENCE,
        }
    }
}

impl Subscript {
    fn collect_symbols<'a>(&'a self, acc: &mut Vec<&'a str>) {
        match self {
            Subscript::Index(index) => index.collect_symbols(acc),
            Subscript::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    part.collect_symbols(acc);
                }
            }
        }
    }
}

fn write_operand(
    f: &mut fmt::Formatter<'_>,
    node: &SyntaxNode,
    parenthesize: bool,
) -> fmt::Result {
    if parenthesize {
        write!(f, "({node})")
    } else {
        write!(f, "{node}")
    }
}

/// Renders the tree back to expression text, adding only the parentheses
/// needed for the text to parse to the same tree.
impl Display for SyntaxNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxNode::Constant(literal) => write!(f, "{literal}"),
            SyntaxNode::Symbol { name, subscript } => {
                f.write_str(name)?;
                if let Some(subscript) = subscript {
                    write!(f, "{subscript}")?;
                }
                Ok(())
            }
            SyntaxNode::Function {
                name,
                arguments,
                subscript,
            } => {
                write!(f, "{name}(")?;
                for (i, argument) in arguments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{argument}")?;
                }
                f.write_str(")")?;
                if let Some(subscript) = subscript {
                    write!(f, "{subscript}")?;
                }
                Ok(())
            }
            SyntaxNode::BinaryOp { op, left, right } => {
                let own = op.precedence();
                // `**` is right-associative and binds tighter than a unary
                // operator on its left; everything else is left-associative.
                let (left_paren, right_paren) = if *op == BinOp::Pow {
                    (left.precedence() <= own, right.precedence() < UNARY_PRECEDENCE)
                } else if own == BinOp::Eq.precedence() {
                    (left.precedence() <= own, right.precedence() <= own)
                } else {
                    (left.precedence() < own, right.precedence() <= own)
                };
                write_operand(f, left, left_paren)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right, right_paren)
            }
            SyntaxNode::UnaryOp { op, operand } => {
                f.write_str(op.symbol())?;
                write_operand(f, operand, operand.precedence() < UNARY_PRECEDENCE)
            }
        }
    }
}
