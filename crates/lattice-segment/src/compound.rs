//! Compound (star) predicates: constraints over tuples of columns.
//!
//! A compound predicate lifts column predicates over several columns,
//! e.g. `(year=1997 AND quarter=Q2) OR (year=1998 AND quarter=Q1)`.
//! They arrive with cell requests (compound slicers), become part of a
//! batch's aggregation key, and describe flushed regions.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use lattice_common::types::{BitKey, DataValue};

use crate::predicate::ColumnPredicate;

/// A constraint over one or more columns of a star.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StarPredicate {
    /// A column predicate applied to one column, addressed by bit
    /// position.
    Column {
        /// Bit position of the constrained column.
        bit_position: usize,
        /// Name of the constrained column.
        column: String,
        /// The constraint.
        predicate: ColumnPredicate,
    },
    /// Conjunction.
    And(Vec<StarPredicate>),
    /// Disjunction.
    Or(Vec<StarPredicate>),
}

impl StarPredicate {
    /// Builds a single-column predicate.
    pub fn column(
        bit_position: usize,
        column: impl Into<String>,
        predicate: ColumnPredicate,
    ) -> Self {
        StarPredicate::Column {
            bit_position,
            column: column.into(),
            predicate,
        }
    }

    /// Bit key of every column the predicate mentions.
    #[must_use]
    pub fn constrained_bit_key(&self) -> BitKey {
        let mut key = BitKey::empty();
        self.collect_bits(&mut key);
        key
    }

    fn collect_bits(&self, key: &mut BitKey) {
        match self {
            StarPredicate::Column { bit_position, .. } => key.set(*bit_position),
            StarPredicate::And(children) | StarPredicate::Or(children) => {
                for child in children {
                    child.collect_bits(key);
                }
            }
        }
    }

    /// The columns the predicate mentions, as `(bit_position, name)`
    /// pairs in ascending bit order.
    #[must_use]
    pub fn constrained_columns(&self) -> Vec<(usize, String)> {
        let mut columns: HashMap<usize, String> = HashMap::new();
        self.collect_columns(&mut columns);
        let mut out: Vec<(usize, String)> = columns.into_iter().collect();
        out.sort_by_key(|(bit, _)| *bit);
        out
    }

    fn collect_columns(&self, out: &mut HashMap<usize, String>) {
        match self {
            StarPredicate::Column {
                bit_position,
                column,
                ..
            } => {
                out.entry(*bit_position).or_insert_with(|| column.clone());
            }
            StarPredicate::And(children) | StarPredicate::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
        }
    }

    /// Evaluates the predicate over a partial assignment of column
    /// values. A column with no assigned value satisfies only the
    /// literal `True` column predicate, so an equality constraint on an
    /// unknown column evaluates false.
    #[must_use]
    pub fn evaluate(&self, values: &HashMap<usize, DataValue>) -> bool {
        match self {
            StarPredicate::Column {
                bit_position,
                predicate,
                ..
            } => predicate.evaluate_opt(values.get(bit_position)),
            StarPredicate::And(children) => children.iter().all(|c| c.evaluate(values)),
            StarPredicate::Or(children) => children.iter().any(|c| c.evaluate(values)),
        }
    }

    /// Returns whether the two predicates express the same constraint.
    ///
    /// Column nodes compare by constrained value sets; conjunctions and
    /// disjunctions compare child-wise in order.
    #[must_use]
    pub fn equal_constraint(&self, other: &StarPredicate) -> bool {
        match (self, other) {
            (
                StarPredicate::Column {
                    bit_position: ba,
                    predicate: pa,
                    ..
                },
                StarPredicate::Column {
                    bit_position: bb,
                    predicate: pb,
                    ..
                },
            ) => ba == bb && pa.equal_constraint(pb),
            (StarPredicate::And(a), StarPredicate::And(b))
            | (StarPredicate::Or(a), StarPredicate::Or(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.equal_constraint(y))
            }
            _ => false,
        }
    }

    /// Returns whether the two compound predicate lists express equal
    /// constraints pairwise.
    #[must_use]
    pub fn lists_equal(a: &[StarPredicate], b: &[StarPredicate]) -> bool {
        a.len() == b.len()
            && a.iter()
                .zip(b.iter())
                .all(|(x, y)| x.equal_constraint(y))
    }

    /// Conservative intersection test: false only when the predicates
    /// are single-column constraints over the same column with provably
    /// disjoint value sets.
    #[must_use]
    pub fn might_intersect(&self, other: &StarPredicate) -> bool {
        match (self, other) {
            (
                StarPredicate::Column {
                    bit_position: ba,
                    predicate: pa,
                    ..
                },
                StarPredicate::Column {
                    bit_position: bb,
                    predicate: pb,
                    ..
                },
            ) if ba == bb => pa.might_intersect(pb),
            _ => true,
        }
    }
}

impl fmt::Display for StarPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StarPredicate::Column {
                column, predicate, ..
            } => write!(f, "{} {}", column, predicate),
            StarPredicate::And(children) => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " and ")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            StarPredicate::Or(children) => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn year_quarter_slicer() -> StarPredicate {
        // (year=1997 and quarter='Q2') or (year=1998 and quarter='Q1')
        StarPredicate::Or(vec![
            StarPredicate::And(vec![
                StarPredicate::column(0, "year", ColumnPredicate::Value(DataValue::from(1997))),
                StarPredicate::column(1, "quarter", ColumnPredicate::Value(DataValue::from("Q2"))),
            ]),
            StarPredicate::And(vec![
                StarPredicate::column(0, "year", ColumnPredicate::Value(DataValue::from(1998))),
                StarPredicate::column(1, "quarter", ColumnPredicate::Value(DataValue::from("Q1"))),
            ]),
        ])
    }

    #[test]
    fn test_constrained_columns() {
        let p = year_quarter_slicer();
        assert_eq!(p.constrained_bit_key(), BitKey::from_positions([0, 1]));
        let columns = p.constrained_columns();
        assert_eq!(
            columns,
            vec![(0, "year".to_string()), (1, "quarter".to_string())]
        );
    }

    #[test]
    fn test_evaluate_tuples() {
        let p = year_quarter_slicer();
        let mut values = HashMap::new();
        values.insert(0, DataValue::from(1997));
        values.insert(1, DataValue::from("Q2"));
        assert!(p.evaluate(&values));

        values.insert(1, DataValue::from("Q1"));
        assert!(!p.evaluate(&values));

        values.insert(0, DataValue::from(1998));
        assert!(p.evaluate(&values));
    }

    #[test]
    fn test_evaluate_with_unknown_column() {
        let p = year_quarter_slicer();
        let mut values = HashMap::new();
        values.insert(0, DataValue::from(1997));
        // Quarter unknown: every disjunct has an equality it cannot prove.
        assert!(!p.evaluate(&values));
    }

    #[test]
    fn test_equal_constraint() {
        let a = year_quarter_slicer();
        let b = year_quarter_slicer();
        assert!(a.equal_constraint(&b));
        let c = StarPredicate::column(0, "year", ColumnPredicate::Value(DataValue::from(1999)));
        assert!(!a.equal_constraint(&c));
        assert!(StarPredicate::lists_equal(
            std::slice::from_ref(&a),
            std::slice::from_ref(&b)
        ));
    }

    #[test]
    fn test_might_intersect_same_column() {
        let a = StarPredicate::column(0, "year", ColumnPredicate::Value(DataValue::from(1997)));
        let b = StarPredicate::column(0, "year", ColumnPredicate::Value(DataValue::from(1998)));
        assert!(!a.might_intersect(&b));
        assert!(a.might_intersect(&year_quarter_slicer()));
    }
}
