//! Reconstructing segments from headers and attaching bodies.
//!
//! The cache exchanges headers and bodies; this module turns them back
//! into live segments. `add_data` verifies that a body agrees with its
//! header before a segment becomes visible, failing with
//! `CorruptedSegment` on any mismatch.

use std::collections::HashMap;
use std::sync::Arc;

use lattice_common::error::{LatticeError, LatticeResult};
use lattice_common::types::CellKey;

use crate::axis::SegmentAxis;
use crate::body::{BodyCells, SegmentBody};
use crate::dataset::SegmentDataset;
use crate::header::SegmentHeader;
use crate::segment::{Segment, SegmentWithData};
use crate::star::Star;

/// Reconstructs a segment shell from a header.
///
/// The header carries the constrained columns, predicates, compound
/// predicates, and excluded regions; the star supplies the measure
/// definition and column metadata.
pub fn to_segment(header: &SegmentHeader, star: Arc<Star>) -> LatticeResult<Segment> {
    if star.identity != header.star {
        return Err(LatticeError::invalid_argument(format!(
            "header belongs to star '{}', not '{}'",
            header.star.fact_table_alias, star.identity.fact_table_alias
        )));
    }
    let measure = star
        .measure_by_name(&header.measure_name)
        .ok_or_else(|| {
            LatticeError::invalid_argument(format!(
                "star has no measure '{}'",
                header.measure_name
            ))
        })?
        .clone();
    let mut columns = Vec::with_capacity(header.constrained_columns.len());
    for constrained in &header.constrained_columns {
        let column = star.column_by_bit(constrained.bit_position).ok_or_else(|| {
            LatticeError::invalid_argument(format!(
                "star has no column at bit {}",
                constrained.bit_position
            ))
        })?;
        columns.push(column.clone());
    }
    let predicates = header
        .constrained_columns
        .iter()
        .map(|c| c.predicate.clone())
        .collect();
    Ok(Segment::new(
        star,
        header.constrained_bit_key.clone(),
        columns,
        measure,
        predicates,
        header.compound_predicates.clone(),
        header.excluded_regions.clone(),
    ))
}

/// Attaches a body to a segment shell, producing a queryable segment.
///
/// Verifies axis/keys consistency: arity, key-predicate agreement, and
/// cell addressing. On mismatch fails with `CorruptedSegment`.
pub fn add_data(
    segment: Segment,
    body: SegmentBody,
    dense_threshold: f64,
) -> LatticeResult<SegmentWithData> {
    let corrupt = |reason: String| LatticeError::CorruptedSegment {
        segment: segment.header().description(),
        reason,
    };

    if body.axis_keys.len() != segment.columns().len() {
        return Err(corrupt(format!(
            "body has {} axes, header constrains {} columns",
            body.axis_keys.len(),
            segment.columns().len()
        )));
    }

    let mut axes = Vec::with_capacity(body.axis_keys.len());
    for (i, keys) in body.axis_keys.iter().enumerate() {
        let predicate = &segment.predicates()[i];
        if let Some(bad) = keys.iter().find(|k| !predicate.evaluate(k)) {
            return Err(corrupt(format!(
                "axis '{}' contains key {} outside its predicate",
                segment.columns()[i].name,
                bad
            )));
        }
        axes.push(SegmentAxis::new(
            segment.columns()[i].clone(),
            predicate.clone(),
            keys.clone(),
        ));
    }

    let shape: Vec<usize> = axes.iter().map(SegmentAxis::len).collect();
    let capacity: usize = shape.iter().product();
    let data = match body.cells {
        BodyCells::Dense(cells) => {
            if cells.len() != capacity {
                return Err(corrupt(format!(
                    "dense body holds {} cells, axes address {}",
                    cells.len(),
                    capacity
                )));
            }
            SegmentDataset::Dense { shape, cells }
        }
        BodyCells::Sparse(entries) => {
            let mut cells = HashMap::with_capacity(entries.len());
            for (ordinals, value) in entries {
                let key = CellKey::new(ordinals);
                if key.dense_offset(&shape).is_none() {
                    return Err(corrupt(format!("cell {} is outside the axes", key)));
                }
                cells.insert(key, value);
            }
            SegmentDataset::from_cells(&shape, cells, dense_threshold)
        }
    };

    Ok(SegmentWithData::new(segment, axes, data))
}

/// Extracts the interchange body of a loaded segment.
#[must_use]
pub fn body_of(segment: &SegmentWithData) -> SegmentBody {
    let axis_keys = segment
        .axes()
        .iter()
        .map(|axis| axis.keys().to_vec())
        .collect();
    let cells = match segment.data() {
        SegmentDataset::Dense { cells, .. } => BodyCells::Dense(cells.clone()),
        SegmentDataset::Sparse { cells, .. } => BodyCells::Sparse(
            cells
                .iter()
                .map(|(k, v)| (k.as_slice().to_vec(), v.clone()))
                .collect(),
        ),
    };
    SegmentBody::new(axis_keys, cells)
}
