//! Column predicates: decidable constraints over one column's values.
//!
//! A predicate either accepts or rejects a key value. The engine builds
//! them from cell requests (one value each), unions them into IN-lists
//! per batch, subtracts flush predicates from axis predicates, and
//! compares them when matching cached headers against requests.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use lattice_common::types::DataValue;

/// A value constraint carrying hierarchy context: the member's level,
/// its parent member key, and whether that parent is the ALL member.
/// The context feeds the drill-down-aware cardinality estimate used by
/// predicate optimisation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberPredicate {
    /// The member's key value on the constrained column.
    pub value: DataValue,
    /// Unique name of the member's level.
    pub level: String,
    /// Key of the parent member, if the member has one.
    pub parent: Option<String>,
    /// Whether the parent is the hierarchy's ALL member.
    pub parent_is_all: bool,
}

impl MemberPredicate {
    /// Creates a member predicate.
    pub fn new(
        value: impl Into<DataValue>,
        level: impl Into<String>,
        parent: Option<String>,
        parent_is_all: bool,
    ) -> Self {
        Self {
            value: value.into(),
            level: level.into(),
            parent,
            parent_is_all,
        }
    }
}

/// A decidable constraint over one column's values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnPredicate {
    /// Accepts every value.
    True,
    /// Accepts no value.
    False,
    /// Accepts exactly one literal value.
    Value(DataValue),
    /// Accepts one member's key value, with hierarchy context.
    Member(MemberPredicate),
    /// Accepts any value accepted by one of the listed predicates
    /// (an OR of values).
    List(Vec<ColumnPredicate>),
}

impl ColumnPredicate {
    /// Builds a list predicate from values, sorted for deterministic
    /// SQL. A single value collapses to `Value`; an empty set to
    /// `False`.
    #[must_use]
    pub fn from_values<I: IntoIterator<Item = DataValue>>(values: I) -> Self {
        let mut values: Vec<DataValue> = values.into_iter().collect();
        values.sort();
        values.dedup();
        match values.len() {
            0 => ColumnPredicate::False,
            1 => ColumnPredicate::Value(values.pop().expect("len checked")),
            _ => ColumnPredicate::List(values.into_iter().map(ColumnPredicate::Value).collect()),
        }
    }

    /// Evaluates the predicate on a value.
    #[must_use]
    pub fn evaluate(&self, value: &DataValue) -> bool {
        self.evaluate_opt(Some(value))
    }

    /// Evaluates the predicate when the value may be unknown. An
    /// unknown value satisfies only the literal `True` predicate; a
    /// value constraint cannot claim to match a value it cannot see.
    #[must_use]
    pub fn evaluate_opt(&self, value: Option<&DataValue>) -> bool {
        match self {
            ColumnPredicate::True => true,
            ColumnPredicate::False => false,
            ColumnPredicate::Value(v) => value == Some(v),
            ColumnPredicate::Member(m) => value == Some(&m.value),
            ColumnPredicate::List(list) => list.iter().any(|p| p.evaluate_opt(value)),
        }
    }

    /// Returns the literal value this predicate constrains to, if it is
    /// a single-value constraint.
    #[must_use]
    pub fn constrained_value(&self) -> Option<&DataValue> {
        match self {
            ColumnPredicate::Value(v) => Some(v),
            ColumnPredicate::Member(m) => Some(&m.value),
            _ => None,
        }
    }

    /// Collects the literal values this predicate enumerates, sorted.
    /// Returns `None` for `True` (unbounded).
    #[must_use]
    pub fn value_list(&self) -> Option<Vec<&DataValue>> {
        match self {
            ColumnPredicate::True => None,
            ColumnPredicate::False => Some(Vec::new()),
            ColumnPredicate::Value(v) => Some(vec![v]),
            ColumnPredicate::Member(m) => Some(vec![&m.value]),
            ColumnPredicate::List(list) => {
                let mut values = Vec::with_capacity(list.len());
                for p in list {
                    values.extend(p.value_list()?);
                }
                values.sort();
                values.dedup();
                Some(values)
            }
        }
    }

    /// Number of values the predicate enumerates; `None` if unbounded.
    #[must_use]
    pub fn value_count(&self) -> Option<usize> {
        self.value_list().map(|v| v.len())
    }

    /// Returns whether the two predicates might accept a common value.
    /// Conservative: only provable disjointness returns false.
    #[must_use]
    pub fn might_intersect(&self, other: &ColumnPredicate) -> bool {
        match (self.value_list(), other.value_list()) {
            (Some(a), Some(b)) => {
                // Both enumerable; merge-walk the sorted lists.
                let (mut i, mut j) = (0, 0);
                while i < a.len() && j < b.len() {
                    match a[i].cmp(b[j]) {
                        Ordering::Equal => return true,
                        Ordering::Less => i += 1,
                        Ordering::Greater => j += 1,
                    }
                }
                false
            }
            (Some(values), None) | (None, Some(values)) => !values.is_empty(),
            (None, None) => true,
        }
    }

    /// Returns this predicate minus the values accepted by `other`.
    /// `True` stays `True`: an unbounded constraint cannot model a
    /// negative, so callers pair it with an excluded region.
    #[must_use]
    pub fn minus(&self, other: &ColumnPredicate) -> ColumnPredicate {
        match self {
            ColumnPredicate::True => ColumnPredicate::True,
            ColumnPredicate::False => ColumnPredicate::False,
            ColumnPredicate::Value(v) => {
                if other.evaluate(v) {
                    ColumnPredicate::False
                } else {
                    self.clone()
                }
            }
            ColumnPredicate::Member(m) => {
                if other.evaluate(&m.value) {
                    ColumnPredicate::False
                } else {
                    self.clone()
                }
            }
            ColumnPredicate::List(list) => {
                let kept: Vec<ColumnPredicate> = list
                    .iter()
                    .filter(|p| {
                        p.constrained_value()
                            .map_or(true, |v| !other.evaluate(v))
                    })
                    .cloned()
                    .collect();
                Self::normalize_list(kept)
            }
        }
    }

    /// Returns whether the two predicates constrain the same value set.
    #[must_use]
    pub fn equal_constraint(&self, other: &ColumnPredicate) -> bool {
        match (self.value_list(), other.value_list()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => true,
            _ => false,
        }
    }

    /// ORs two predicates over the same column.
    #[must_use]
    pub fn or(&self, other: &ColumnPredicate) -> ColumnPredicate {
        match (self, other) {
            (ColumnPredicate::True, _) | (_, ColumnPredicate::True) => ColumnPredicate::True,
            (ColumnPredicate::False, p) | (p, ColumnPredicate::False) => p.clone(),
            _ => {
                let mut list = Vec::new();
                self.push_terms(&mut list);
                other.push_terms(&mut list);
                list.sort_by(Self::term_order);
                list.dedup();
                Self::normalize_list(list)
            }
        }
    }

    /// ANDs two predicates over the same column (value-set
    /// intersection).
    #[must_use]
    pub fn and(&self, other: &ColumnPredicate) -> ColumnPredicate {
        match (self, other) {
            (ColumnPredicate::True, p) | (p, ColumnPredicate::True) => p.clone(),
            (ColumnPredicate::False, _) | (_, ColumnPredicate::False) => ColumnPredicate::False,
            _ => {
                let mut terms = Vec::new();
                self.push_terms(&mut terms);
                let kept: Vec<ColumnPredicate> = terms
                    .into_iter()
                    .filter(|p| p.constrained_value().map_or(false, |v| other.evaluate(v)))
                    .collect();
                Self::normalize_list(kept)
            }
        }
    }

    fn push_terms(&self, out: &mut Vec<ColumnPredicate>) {
        match self {
            ColumnPredicate::List(list) => {
                for p in list {
                    p.push_terms(out);
                }
            }
            other => out.push(other.clone()),
        }
    }

    fn term_order(a: &ColumnPredicate, b: &ColumnPredicate) -> Ordering {
        match (a.constrained_value(), b.constrained_value()) {
            (Some(va), Some(vb)) => va.cmp(vb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    fn normalize_list(mut list: Vec<ColumnPredicate>) -> ColumnPredicate {
        match list.len() {
            0 => ColumnPredicate::False,
            1 => list.pop().expect("len checked"),
            _ => ColumnPredicate::List(list),
        }
    }
}

impl fmt::Display for ColumnPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnPredicate::True => write!(f, "true"),
            ColumnPredicate::False => write!(f, "false"),
            ColumnPredicate::Value(v) => write!(f, "={}", v),
            ColumnPredicate::Member(m) => write!(f, "={}", m.value),
            ColumnPredicate::List(list) => {
                write!(f, "in (")?;
                for (i, p) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match p.constrained_value() {
                        Some(v) => write!(f, "{}", v)?,
                        None => write!(f, "{}", p)?,
                    }
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn years() -> ColumnPredicate {
        ColumnPredicate::from_values([DataValue::from(1997), DataValue::from(1998)])
    }

    #[test]
    fn test_evaluate() {
        let p = years();
        assert!(p.evaluate(&DataValue::from(1997)));
        assert!(!p.evaluate(&DataValue::from(1999)));
        assert!(ColumnPredicate::True.evaluate(&DataValue::from(5)));
        assert!(!ColumnPredicate::False.evaluate(&DataValue::from(5)));
    }

    #[test]
    fn test_evaluate_unknown_value() {
        assert!(ColumnPredicate::True.evaluate_opt(None));
        assert!(!years().evaluate_opt(None));
        assert!(!ColumnPredicate::False.evaluate_opt(None));
    }

    #[test]
    fn test_from_values_normalizes() {
        let single = ColumnPredicate::from_values([DataValue::from(1)]);
        assert_eq!(single, ColumnPredicate::Value(DataValue::from(1)));
        let empty = ColumnPredicate::from_values([]);
        assert_eq!(empty, ColumnPredicate::False);
        // Duplicates collapse and ordering is canonical.
        let dup = ColumnPredicate::from_values([
            DataValue::from(2),
            DataValue::from(1),
            DataValue::from(2),
        ]);
        assert_eq!(dup.value_count(), Some(2));
    }

    #[test]
    fn test_might_intersect() {
        let a = years();
        let b = ColumnPredicate::from_values([DataValue::from(1998), DataValue::from(1999)]);
        let c = ColumnPredicate::from_values([DataValue::from(2000)]);
        assert!(a.might_intersect(&b));
        assert!(!a.might_intersect(&c));
        assert!(a.might_intersect(&ColumnPredicate::True));
        assert!(!ColumnPredicate::False.might_intersect(&ColumnPredicate::True));
    }

    #[test]
    fn test_minus() {
        let p = years();
        let flushed = p.minus(&ColumnPredicate::Value(DataValue::from(1997)));
        assert_eq!(flushed, ColumnPredicate::Value(DataValue::from(1998)));
        // True cannot model a negative; stays true.
        let t = ColumnPredicate::True.minus(&ColumnPredicate::Value(DataValue::from(1)));
        assert_eq!(t, ColumnPredicate::True);
        // Removing everything yields false.
        let none = p.minus(&p);
        assert_eq!(none, ColumnPredicate::False);
    }

    #[test]
    fn test_equal_constraint_ignores_shape() {
        let member = ColumnPredicate::Member(MemberPredicate::new(
            1997,
            "[Time].[Year]",
            None,
            true,
        ));
        let value = ColumnPredicate::Value(DataValue::from(1997));
        assert!(member.equal_constraint(&value));
        assert!(!member.equal_constraint(&ColumnPredicate::True));
        assert!(ColumnPredicate::True.equal_constraint(&ColumnPredicate::True));
    }

    #[test]
    fn test_or_and() {
        let a = ColumnPredicate::Value(DataValue::from(1));
        let b = ColumnPredicate::Value(DataValue::from(2));
        let or = a.or(&b);
        assert_eq!(or.value_count(), Some(2));
        let and = or.and(&b);
        assert_eq!(and, b);
        assert_eq!(a.and(&b), ColumnPredicate::False);
    }
}
