//! Segment headers: compact, serialisable fingerprints of cached
//! segments.
//!
//! A header identifies a segment without its data: the star identity,
//! the measure, the constrained columns with their load-time
//! predicates, the compound predicates, and the excluded regions. Cache
//! tiers exchange headers freely; bodies follow only on demand.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use lattice_common::types::{BitKey, DataValue};

use crate::compound::StarPredicate;
use crate::predicate::ColumnPredicate;
use crate::region::ExcludedRegion;
use crate::star::StarIdentity;

/// One constrained column of a segment, as recorded in its header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstrainedColumn {
    /// Column name.
    pub name: String,
    /// Stable bit position within the star.
    pub bit_position: usize,
    /// The predicate the segment was loaded with.
    pub predicate: ColumnPredicate,
}

/// The fingerprint of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// Identity of the fact source.
    pub star: StarIdentity,
    /// Name of the measure the segment holds.
    pub measure_name: String,
    /// Bit key of the constrained columns.
    pub constrained_bit_key: BitKey,
    /// Constrained columns in ascending bit order.
    pub constrained_columns: Vec<ConstrainedColumn>,
    /// Compound predicates the segment was loaded under.
    pub compound_predicates: Vec<StarPredicate>,
    /// Regions guaranteed absent from the segment.
    pub excluded_regions: Vec<ExcludedRegion>,
}

impl SegmentHeader {
    /// Creates a header, ordering the constrained columns by bit
    /// position.
    #[must_use]
    pub fn new(
        star: StarIdentity,
        measure_name: impl Into<String>,
        constrained_bit_key: BitKey,
        mut constrained_columns: Vec<ConstrainedColumn>,
        compound_predicates: Vec<StarPredicate>,
        excluded_regions: Vec<ExcludedRegion>,
    ) -> Self {
        constrained_columns.sort_by_key(|c| c.bit_position);
        Self {
            star,
            measure_name: measure_name.into(),
            constrained_bit_key,
            constrained_columns,
            compound_predicates,
            excluded_regions,
        }
    }

    /// Returns whether this segment can serve a cell at the given
    /// coordinate values (keyed by bit position): every constrained
    /// column's predicate must accept its value and no excluded region
    /// may shadow the coordinate.
    #[must_use]
    pub fn can_constrain(&self, values: &HashMap<usize, DataValue>) -> bool {
        for column in &self.constrained_columns {
            if !column.predicate.evaluate_opt(values.get(&column.bit_position)) {
                return false;
            }
        }
        !self.excluded_regions.iter().any(|r| r.covers(values))
    }

    /// A weight used to order candidate headers smallest-slice-first:
    /// the product of per-column constrained value counts, with
    /// unbounded (`TRUE`) columns weighted by the full `u32` range.
    #[must_use]
    pub fn domain_weight(&self) -> u128 {
        self.constrained_columns
            .iter()
            .map(|c| {
                c.predicate
                    .value_count()
                    .map_or(u128::from(u32::MAX), |n| n.max(1) as u128)
            })
            .product()
    }

    /// Number of constrained columns.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.constrained_columns.len()
    }

    /// A short description for logs and corruption errors.
    #[must_use]
    pub fn description(&self) -> String {
        format!(
            "{}:{}:{}",
            self.star.fact_table_alias, self.measure_name, self.constrained_bit_key
        )
    }
}

impl fmt::Display for SegmentHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Segment[{}, measure={}, columns=(",
            self.star.fact_table_alias, self.measure_name
        )?;
        for (i, column) in self.constrained_columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", column.name, column.predicate)?;
        }
        write!(f, "), excluded={}]", self.excluded_regions.len())
    }
}
