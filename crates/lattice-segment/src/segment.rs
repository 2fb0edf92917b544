//! Segments: immutable multi-axis cell arrays.
//!
//! A [`Segment`] is the shell: star, measure, constrained columns and
//! their load-time predicates. A [`SegmentWithData`] adds the
//! materialised axes and the dataset. No segment is mutated after
//! registration; flush produces sub-segments instead.

use std::collections::HashMap;
use std::sync::Arc;

use lattice_common::constants::DEFAULT_DENSE_THRESHOLD;
use lattice_common::types::{BitKey, CellKey, CellValue, DataValue};

use crate::axis::SegmentAxis;
use crate::compound::StarPredicate;
use crate::header::{ConstrainedColumn, SegmentHeader};
use crate::predicate::ColumnPredicate;
use crate::region::ExcludedRegion;
use crate::star::{Measure, Star, StarColumn};

/// A segment shell: everything but the data.
#[derive(Debug, Clone)]
pub struct Segment {
    header: SegmentHeader,
    star: Arc<Star>,
    measure: Measure,
    bit_key: BitKey,
    columns: Vec<StarColumn>,
    predicates: Vec<ColumnPredicate>,
    compound_predicates: Vec<StarPredicate>,
    excluded_regions: Vec<ExcludedRegion>,
}

impl Segment {
    /// Creates a segment shell and derives its header fingerprint.
    ///
    /// `columns` and `predicates` are parallel and ordered by bit
    /// position.
    #[must_use]
    pub fn new(
        star: Arc<Star>,
        bit_key: BitKey,
        columns: Vec<StarColumn>,
        measure: Measure,
        predicates: Vec<ColumnPredicate>,
        compound_predicates: Vec<StarPredicate>,
        excluded_regions: Vec<ExcludedRegion>,
    ) -> Self {
        let header = SegmentHeader::new(
            star.identity.clone(),
            measure.name.clone(),
            bit_key.clone(),
            columns
                .iter()
                .zip(predicates.iter())
                .map(|(c, p)| ConstrainedColumn {
                    name: c.name.clone(),
                    bit_position: c.bit_position,
                    predicate: p.clone(),
                })
                .collect(),
            compound_predicates.clone(),
            excluded_regions.clone(),
        );
        Self {
            header,
            star,
            measure,
            bit_key,
            columns,
            predicates,
            compound_predicates,
            excluded_regions,
        }
    }

    /// Returns the header fingerprint.
    #[must_use]
    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// Returns the star.
    #[must_use]
    pub fn star(&self) -> &Arc<Star> {
        &self.star
    }

    /// Returns the measure.
    #[must_use]
    pub fn measure(&self) -> &Measure {
        &self.measure
    }

    /// Returns the constrained-columns bit key.
    #[must_use]
    pub fn bit_key(&self) -> &BitKey {
        &self.bit_key
    }

    /// Returns the constrained columns, ordered by bit position.
    #[must_use]
    pub fn columns(&self) -> &[StarColumn] {
        &self.columns
    }

    /// Returns the load-time predicates, parallel to `columns`.
    #[must_use]
    pub fn predicates(&self) -> &[ColumnPredicate] {
        &self.predicates
    }

    /// Returns the compound predicates.
    #[must_use]
    pub fn compound_predicates(&self) -> &[StarPredicate] {
        &self.compound_predicates
    }

    /// Returns the excluded regions.
    #[must_use]
    pub fn excluded_regions(&self) -> &[ExcludedRegion] {
        &self.excluded_regions
    }
}

/// A segment with its materialised axes and dataset.
#[derive(Debug, Clone)]
pub struct SegmentWithData {
    segment: Segment,
    axes: Vec<SegmentAxis>,
    data: crate::dataset::SegmentDataset,
}

impl SegmentWithData {
    /// Wraps a shell with its axes and dataset. Axes are parallel to
    /// the shell's columns.
    #[must_use]
    pub fn new(
        segment: Segment,
        axes: Vec<SegmentAxis>,
        data: crate::dataset::SegmentDataset,
    ) -> Self {
        Self {
            segment,
            axes,
            data,
        }
    }

    /// Returns the shell.
    #[must_use]
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Returns the header fingerprint.
    #[must_use]
    pub fn header(&self) -> &SegmentHeader {
        self.segment.header()
    }

    /// Returns the axes.
    #[must_use]
    pub fn axes(&self) -> &[SegmentAxis] {
        &self.axes
    }

    /// Returns the dataset.
    #[must_use]
    pub fn data(&self) -> &crate::dataset::SegmentDataset {
        &self.data
    }

    /// Upper bound on cell count: the product of axis lengths.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.axes.iter().map(SegmentAxis::len).product()
    }

    /// Returns the value at a coordinate, or `None` if the cell is
    /// absent from the dataset.
    #[must_use]
    pub fn get_object(&self, key: &CellKey) -> Option<&CellValue> {
        self.data.get(key)
    }

    /// Returns whether a coordinate is populated.
    #[must_use]
    pub fn exists(&self, key: &CellKey) -> bool {
        self.data.exists(key)
    }

    /// Looks up a cell by column values (keyed by bit position).
    ///
    /// Returns `Some(value)` when the segment contains the coordinate;
    /// the value is `CellValue::Null` when the fact query returned no
    /// row there. Returns `None` (a cache miss) when a coordinate is
    /// outside the axes or inside an excluded region.
    #[must_use]
    pub fn lookup(&self, values: &HashMap<usize, DataValue>) -> Option<CellValue> {
        let mut key = CellKey::zero(self.axes.len());
        for (i, axis) in self.axes.iter().enumerate() {
            let value = values.get(&axis.column.bit_position)?;
            key.set_axis(i, axis.ordinal_of(value)?);
        }
        if self.segment.excluded_regions.iter().any(|r| r.covers(values)) {
            return None;
        }
        Some(self.data.get(&key).cloned().unwrap_or(CellValue::Null))
    }

    /// Produces the sub-segment that survives a flush.
    ///
    /// `keep_masks` marks, per axis, the keys that survive. The axis at
    /// `best_column` (if any) has its predicate replaced by
    /// `best_predicate`; the other axes keep their predicates. The
    /// surviving cells are re-addressed against the retained keys.
    #[must_use]
    pub fn create_sub_segment(
        &self,
        keep_masks: &[Vec<bool>],
        best_column: Option<usize>,
        best_predicate: Option<ColumnPredicate>,
        excluded_regions: Vec<ExcludedRegion>,
    ) -> SegmentWithData {
        // Remap each axis ordinal to its position among retained keys.
        let remaps: Vec<Vec<Option<usize>>> = keep_masks
            .iter()
            .map(|mask| {
                let mut next = 0usize;
                mask.iter()
                    .map(|&keep| {
                        if keep {
                            let ordinal = next;
                            next += 1;
                            Some(ordinal)
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .collect();

        let mut predicates = self.segment.predicates.to_vec();
        if let (Some(best), Some(predicate)) = (best_column, best_predicate) {
            predicates[best] = predicate;
        }

        let axes: Vec<SegmentAxis> = self
            .axes
            .iter()
            .enumerate()
            .map(|(i, axis)| axis.retain(&keep_masks[i], predicates[i].clone()))
            .collect();

        let shape: Vec<usize> = axes.iter().map(SegmentAxis::len).collect();
        let mut cells = HashMap::new();
        'cell: for (key, value) in self.data.iter() {
            let mut ordinals = Vec::with_capacity(key.arity());
            for (axis, &ordinal) in key.as_slice().iter().enumerate() {
                match remaps[axis][ordinal] {
                    Some(remapped) => ordinals.push(remapped),
                    None => continue 'cell,
                }
            }
            cells.insert(CellKey::new(ordinals), value.clone());
        }
        let data =
            crate::dataset::SegmentDataset::from_cells(&shape, cells, DEFAULT_DENSE_THRESHOLD);

        let segment = Segment::new(
            Arc::clone(&self.segment.star),
            self.segment.bit_key.clone(),
            self.segment.columns.clone(),
            self.segment.measure.clone(),
            predicates,
            self.segment.compound_predicates.clone(),
            excluded_regions,
        );
        SegmentWithData::new(segment, axes, data)
    }
}
