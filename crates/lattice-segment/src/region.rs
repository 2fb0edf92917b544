//! Excluded regions: coordinates guaranteed absent from a segment.
//!
//! Flushing a region from a segment produces a sub-segment whose
//! excluded-region set records what was removed. Lookups and the
//! segment index consult the set so that a flushed cell is a cache
//! miss, never a stale answer.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use lattice_common::types::DataValue;

use crate::compound::StarPredicate;
use crate::predicate::ColumnPredicate;

/// A region of cell coordinates guaranteed absent from a segment's
/// dataset.
///
/// Identity is the predicates; the cell-count estimate is advisory and
/// ignored by equality and hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludedRegion {
    /// Per-column constraints of the flushed region, by bit position,
    /// ascending.
    pub column_predicates: Vec<(usize, ColumnPredicate)>,
    /// Multi-column constraints of the flushed region.
    pub multi_predicates: Vec<StarPredicate>,
    /// Estimate of how many cells the region removed.
    pub cell_count: f64,
}

impl ExcludedRegion {
    /// Creates a region, sorting column constraints by bit position.
    #[must_use]
    pub fn new(
        mut column_predicates: Vec<(usize, ColumnPredicate)>,
        multi_predicates: Vec<StarPredicate>,
        cell_count: f64,
    ) -> Self {
        column_predicates.sort_by_key(|(bit, _)| *bit);
        Self {
            column_predicates,
            multi_predicates,
            cell_count,
        }
    }

    /// Returns whether the region covers the given coordinate values.
    ///
    /// Covering means every column predicate accepts its value and
    /// every multi-column predicate might accept the tuple. A
    /// multi-column predicate mentioning a column with no value is
    /// treated as covering, which errs toward a cache miss rather than
    /// a stale answer.
    #[must_use]
    pub fn covers(&self, values: &HashMap<usize, DataValue>) -> bool {
        for (bit, predicate) in &self.column_predicates {
            if !predicate.evaluate_opt(values.get(bit)) {
                return false;
            }
        }
        for predicate in &self.multi_predicates {
            let fully_bound = predicate
                .constrained_columns()
                .iter()
                .all(|(bit, _)| values.contains_key(bit));
            if fully_bound && !predicate.evaluate(values) {
                return false;
            }
        }
        true
    }
}

impl PartialEq for ExcludedRegion {
    fn eq(&self, other: &Self) -> bool {
        self.column_predicates == other.column_predicates
            && self.multi_predicates == other.multi_predicates
    }
}

impl Eq for ExcludedRegion {}

impl Hash for ExcludedRegion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.column_predicates.hash(state);
        self.multi_predicates.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(usize, DataValue)]) -> HashMap<usize, DataValue> {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn test_covers_column_predicates() {
        let region = ExcludedRegion::new(
            vec![(0, ColumnPredicate::Value(DataValue::from(1997)))],
            Vec::new(),
            2.0,
        );
        assert!(region.covers(&values(&[
            (0, DataValue::from(1997)),
            (1, DataValue::from("CA"))
        ])));
        assert!(!region.covers(&values(&[(0, DataValue::from(1998))])));
    }

    #[test]
    fn test_unconstrained_column_is_covered() {
        // Region constrains only year; any state coordinate is covered.
        let region = ExcludedRegion::new(
            vec![(0, ColumnPredicate::Value(DataValue::from(1997)))],
            Vec::new(),
            2.0,
        );
        assert!(region.covers(&values(&[(0, DataValue::from(1997))])));
    }

    #[test]
    fn test_multi_predicate_excludes_mismatch() {
        let multi = StarPredicate::And(vec![
            StarPredicate::column(0, "year", ColumnPredicate::Value(DataValue::from(1997))),
            StarPredicate::column(1, "quarter", ColumnPredicate::Value(DataValue::from("Q3"))),
        ]);
        let region = ExcludedRegion::new(Vec::new(), vec![multi], 1.0);
        assert!(region.covers(&values(&[
            (0, DataValue::from(1997)),
            (1, DataValue::from("Q3"))
        ])));
        assert!(!region.covers(&values(&[
            (0, DataValue::from(1997)),
            (1, DataValue::from("Q1"))
        ])));
    }

    #[test]
    fn test_equality_ignores_cell_count() {
        let a = ExcludedRegion::new(
            vec![(0, ColumnPredicate::Value(DataValue::from(1997)))],
            Vec::new(),
            2.0,
        );
        let b = ExcludedRegion::new(
            vec![(0, ColumnPredicate::Value(DataValue::from(1997)))],
            Vec::new(),
            8.0,
        );
        assert_eq!(a, b);
    }
}
