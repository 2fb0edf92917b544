//! Multi-axis cell coordinates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The coordinate of one cell inside a segment: for each axis, the
/// ordinal of the axis key making up the coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellKey {
    ordinals: Vec<usize>,
}

impl CellKey {
    /// Creates a cell key from per-axis ordinals.
    #[must_use]
    pub fn new(ordinals: Vec<usize>) -> Self {
        Self { ordinals }
    }

    /// Creates the zero coordinate with the given number of axes.
    #[must_use]
    pub fn zero(arity: usize) -> Self {
        Self {
            ordinals: vec![0; arity],
        }
    }

    /// Returns the number of axes.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.ordinals.len()
    }

    /// Returns the ordinal on the given axis.
    #[must_use]
    pub fn axis(&self, axis: usize) -> usize {
        self.ordinals[axis]
    }

    /// Sets the ordinal on the given axis.
    pub fn set_axis(&mut self, axis: usize, ordinal: usize) {
        self.ordinals[axis] = ordinal;
    }

    /// Returns the ordinals as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.ordinals
    }

    /// Computes the row-major offset of this coordinate within a dense
    /// dataset whose axes have the given lengths. Returns `None` if any
    /// ordinal is out of range.
    #[must_use]
    pub fn dense_offset(&self, shape: &[usize]) -> Option<usize> {
        if shape.len() != self.ordinals.len() {
            return None;
        }
        let mut offset = 0usize;
        for (ordinal, len) in self.ordinals.iter().zip(shape.iter()) {
            if ordinal >= len {
                return None;
            }
            offset = offset * len + ordinal;
        }
        Some(offset)
    }
}

impl From<Vec<usize>> for CellKey {
    fn from(ordinals: Vec<usize>) -> Self {
        Self::new(ordinals)
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, ordinal) in self.ordinals.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ordinal)?;
        }
        write!(f, ")")
    }
}
