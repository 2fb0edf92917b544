//! Segment axes: one constrained column and the keys actually seen.

use serde::{Deserialize, Serialize};

use lattice_common::types::DataValue;

use crate::predicate::ColumnPredicate;
use crate::star::StarColumn;

/// One axis of a segment: the constrained column, the predicate it was
/// loaded with, and the sorted distinct keys the fact query returned.
///
/// Invariant: every cell coordinate on this axis is an ordinal into
/// `keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentAxis {
    /// The constrained column.
    pub column: StarColumn,
    /// The predicate the segment was loaded with on this column.
    pub predicate: ColumnPredicate,
    keys: Vec<DataValue>,
}

impl SegmentAxis {
    /// Creates an axis, sorting and deduplicating the keys.
    #[must_use]
    pub fn new(column: StarColumn, predicate: ColumnPredicate, mut keys: Vec<DataValue>) -> Self {
        keys.sort();
        keys.dedup();
        Self {
            column,
            predicate,
            keys,
        }
    }

    /// Returns the sorted keys.
    #[must_use]
    pub fn keys(&self) -> &[DataValue] {
        &self.keys
    }

    /// Number of keys on the axis.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the axis has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the ordinal of a key, if present.
    #[must_use]
    pub fn ordinal_of(&self, key: &DataValue) -> Option<usize> {
        self.keys.binary_search(key).ok()
    }

    /// Number of keys a predicate accepts on this axis.
    #[must_use]
    pub fn match_count(&self, predicate: &ColumnPredicate) -> usize {
        self.keys.iter().filter(|k| predicate.evaluate(k)).count()
    }

    /// Returns a copy of this axis retaining only the keys whose bit is
    /// set in `keep`, with the given replacement predicate.
    #[must_use]
    pub fn retain(&self, keep: &[bool], predicate: ColumnPredicate) -> Self {
        let keys = self
            .keys
            .iter()
            .zip(keep.iter())
            .filter(|(_, &k)| k)
            .map(|(key, _)| key.clone())
            .collect();
        Self {
            column: self.column.clone(),
            predicate,
            keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_axis() -> SegmentAxis {
        SegmentAxis::new(
            StarColumn::new("state", 1, 3),
            ColumnPredicate::True,
            vec![
                DataValue::from("WA"),
                DataValue::from("CA"),
                DataValue::from("OR"),
            ],
        )
    }

    #[test]
    fn test_keys_sorted_and_ordinals() {
        let axis = state_axis();
        assert_eq!(
            axis.keys(),
            &[
                DataValue::from("CA"),
                DataValue::from("OR"),
                DataValue::from("WA")
            ]
        );
        assert_eq!(axis.ordinal_of(&DataValue::from("OR")), Some(1));
        assert_eq!(axis.ordinal_of(&DataValue::from("TX")), None);
    }

    #[test]
    fn test_match_count() {
        let axis = state_axis();
        let p = ColumnPredicate::from_values([DataValue::from("CA"), DataValue::from("TX")]);
        assert_eq!(axis.match_count(&p), 1);
        assert_eq!(axis.match_count(&ColumnPredicate::True), 3);
    }

    #[test]
    fn test_retain() {
        let axis = state_axis();
        let kept = axis.retain(
            &[true, false, true],
            ColumnPredicate::from_values([DataValue::from("CA"), DataValue::from("WA")]),
        );
        assert_eq!(kept.keys(), &[DataValue::from("CA"), DataValue::from("WA")]);
        assert_eq!(kept.len(), 2);
    }
}
