//! Broadcasting of jagged arrays with different nesting depths.
//!
//! Every input is *deconstructed* into its flat leaves plus one count array
//! per nesting level, innermost level first. The deepest input becomes the
//! broadcast target; shallower inputs must agree with the target on the
//! levels they share, and their leaves are replicated through the remaining
//! levels until every column lines up with the target's leaves one-to-one.
//! After an elementwise computation over the flat columns the target's levels
//! are folded back on with [`reconstruct`].
//!
//! The engine only needs to know how to peel one level off an array and put
//! it back, which is what [`Layout`] describes.

use crate::array::Array;
use crate::error::BroadcastError;

/// Counts of one nesting level: the length of every entry at that level.
pub type Counts = Vec<usize>;

/// Nested-layout introspection for one array backend.
pub trait Layout: Sized {
    type Leaf: Clone;

    fn is_nested(&self) -> bool;

    /// Splits off the outermost level, returning the child content and the
    /// length of every outer entry. `None` for flat arrays.
    fn split_outer(&self) -> Option<(Self, Counts)>;

    /// Wraps `content` in one more level.
    fn wrap(content: Self, counts: Counts) -> Result<Self, BroadcastError>;

    /// Leaves of a flat array.
    fn to_leaves(&self) -> Vec<Self::Leaf>;

    fn from_leaves(leaves: Vec<Self::Leaf>) -> Self;
}

impl Layout for Array {
    type Leaf = f64;

    fn is_nested(&self) -> bool {
        matches!(self, Array::Jagged { .. })
    }

    fn split_outer(&self) -> Option<(Self, Counts)> {
        match self {
            Array::Flat(_) => None,
            Array::Jagged { counts, content } => Some(((**content).clone(), counts.clone())),
        }
    }

    fn wrap(content: Self, counts: Counts) -> Result<Self, BroadcastError> {
        Array::from_counts(counts, content)
    }

    fn to_leaves(&self) -> Vec<f64> {
        self.leaves().to_vec()
    }

    fn from_leaves(leaves: Vec<f64>) -> Self {
        Array::Flat(leaves)
    }
}

/// Flat leaves plus the counts of every level, innermost first.
#[derive(Debug, Clone, PartialEq)]
pub struct Deconstructed<T> {
    pub content: Vec<T>,
    pub levels: Vec<Counts>,
}

impl<T> Deconstructed<T> {
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

pub fn deconstruct<A: Layout>(array: &A) -> Deconstructed<A::Leaf> {
    let mut levels = Vec::new();
    let mut current: Option<A> = None;

    while current.as_ref().unwrap_or(array).is_nested() {
        let Some((child, counts)) = current.as_ref().unwrap_or(array).split_outer() else {
            break;
        };
        levels.insert(0, counts);
        current = Some(child);
    }

    Deconstructed {
        content: current.as_ref().unwrap_or(array).to_leaves(),
        levels,
    }
}

/// Folds `levels` back onto flat leaves, innermost level first.
pub fn reconstruct<A: Layout>(
    content: Vec<A::Leaf>,
    levels: &[Counts],
) -> Result<A, BroadcastError> {
    let mut array = A::from_leaves(content);
    for counts in levels {
        array = A::wrap(array, counts.clone())?;
    }
    Ok(array)
}

/// Inputs aligned to a common target.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast<T> {
    /// Name of the deepest input, or `None` when there were no inputs.
    pub target: Option<String>,
    /// The target's levels, innermost first.
    pub levels: Vec<Counts>,
    /// Every input's flat leaves, aligned with the target, in input order.
    pub columns: Vec<(String, Vec<T>)>,
}

impl<T> Broadcast<T> {
    pub fn column(&self, name: &str) -> Option<&[T]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_slice())
    }

    /// Number of aligned leaves in every column.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn repeat<T: Clone>(content: &[T], counts: &[usize]) -> Vec<T> {
    let mut acc = Vec::with_capacity(counts.iter().sum());
    for (item, &copies) in content.iter().zip(counts) {
        acc.extend(std::iter::repeat_n(item.clone(), copies));
    }
    acc
}

/// Aligns every input with the most deeply nested one.
///
/// When several inputs share the greatest depth the first one supplied is
/// the target; the others must then match it level for level.
pub fn broadcast<A: Layout>(inputs: &[(&str, &A)]) -> Result<Broadcast<A::Leaf>, BroadcastError> {
    let parts: Vec<(&str, Deconstructed<A::Leaf>)> = inputs
        .iter()
        .map(|(name, array)| (*name, deconstruct(*array)))
        .collect();

    let mut target: Option<usize> = None;
    for (i, (_, part)) in parts.iter().enumerate() {
        if target.is_none_or(|t| part.depth() > parts[t].1.depth()) {
            target = Some(i);
        }
    }

    let Some(target) = target else {
        return Ok(Broadcast {
            target: None,
            levels: Vec::new(),
            columns: Vec::new(),
        });
    };

    let (target_name, target_part) = &parts[target];
    let depth = target_part.depth();
    let mut columns = Vec::with_capacity(parts.len());

    for (i, (name, part)) in parts.iter().enumerate() {
        if i == target {
            columns.push((name.to_string(), part.content.clone()));
            continue;
        }

        let own = part.depth();
        let shared = &target_part.levels[depth - own..];
        for (offset, (expected, found)) in shared.iter().zip(&part.levels).enumerate() {
            if expected != found {
                return Err(BroadcastError::LevelMismatch {
                    level: depth - own + offset,
                    variable: name.to_string(),
                    target: target_name.to_string(),
                    expected: expected.clone(),
                    found: found.clone(),
                });
            }
        }

        if own == depth {
            if part.content.len() != target_part.content.len() {
                return Err(BroadcastError::LengthMismatch {
                    variable: name.to_string(),
                    target: target_name.to_string(),
                    expected: target_part.content.len(),
                    found: part.content.len(),
                });
            }
            columns.push((name.to_string(), part.content.clone()));
            continue;
        }

        // The shallower leaves line up with the entries of the target level
        // just above its own depth.
        let expected = target_part.levels[depth - own - 1].len();
        if part.content.len() != expected {
            return Err(BroadcastError::LengthMismatch {
                variable: name.to_string(),
                target: target_name.to_string(),
                expected,
                found: part.content.len(),
            });
        }

        let mut content = part.content.clone();
        for counts in target_part.levels[..depth - own].iter().rev() {
            content = repeat(&content, counts);
        }

        tracing::debug!(
            variable = %name,
            target = %target_name,
            levels = depth - own,
            "replicated through deeper levels"
        );

        columns.push((name.to_string(), content));
    }

    Ok(Broadcast {
        target: Some(target_name.to_string()),
        levels: target_part.levels.clone(),
        columns,
    })
}
