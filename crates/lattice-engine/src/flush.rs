//! Region-precise cache invalidation.
//!
//! A flush names a region of cells: per-column predicates plus
//! multi-column predicates. Each cached segment either survives
//! untouched, is discarded, or is replaced by a sub-segment whose
//! best-retention axis is tightened and whose excluded-region set
//! records the flushed coordinates. After a flush no cached segment
//! answers any cell inside the region.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use lattice_common::constants::MULTI_PREDICATE_SELECTIVITY;
use lattice_common::error::LatticeResult;
use lattice_common::types::{BitKey, DataValue};
use lattice_segment::builder::{add_data, body_of, to_segment};
use lattice_segment::star::StarIdentity;
use lattice_segment::{
    ColumnPredicate, ExcludedRegion, SegmentHeader, SegmentWithData, StarPredicate,
};

use crate::engine::EngineContext;
use crate::manager::ManagerState;

/// A region of cells to invalidate, built from a fluent description of
/// column constraints.
#[derive(Debug, Clone)]
pub struct CacheRegion {
    star: StarIdentity,
    bit_key: BitKey,
    column_predicates: HashMap<usize, ColumnPredicate>,
    multi_predicates: Vec<StarPredicate>,
}

impl CacheRegion {
    /// Starts an empty region for one star.
    #[must_use]
    pub fn for_star(star: StarIdentity) -> Self {
        Self {
            star,
            bit_key: BitKey::empty(),
            column_predicates: HashMap::new(),
            multi_predicates: Vec::new(),
        }
    }

    /// Constrains one column of the region.
    #[must_use]
    pub fn constrain(mut self, bit_position: usize, predicate: ColumnPredicate) -> Self {
        self.bit_key.set(bit_position);
        self.column_predicates.insert(bit_position, predicate);
        self
    }

    /// Adds a multi-column flush predicate.
    #[must_use]
    pub fn constrain_compound(mut self, predicate: StarPredicate) -> Self {
        for (bit, _) in predicate.constrained_columns() {
            self.bit_key.set(bit);
        }
        self.multi_predicates.push(predicate);
        self
    }

    /// The star the region belongs to.
    #[must_use]
    pub fn star(&self) -> &StarIdentity {
        &self.star
    }

    /// Bit key of every column the region mentions.
    #[must_use]
    pub fn bit_key(&self) -> &BitKey {
        &self.bit_key
    }

    /// The flush predicate on a column, if any.
    #[must_use]
    pub fn predicate_for(&self, bit_position: usize) -> Option<&ColumnPredicate> {
        self.column_predicates.get(&bit_position)
    }
}

/// Statistics of one flush, for tracing and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushResult {
    /// Segments discarded outright.
    pub discarded: usize,
    /// Segments replaced by tightened sub-segments.
    pub tightened: usize,
    /// Segments the region does not touch.
    pub untouched: usize,
}

/// User-facing API for explicit cache management.
pub struct CacheControl {
    ctx: Arc<EngineContext>,
    trace: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl CacheControl {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx, trace: None }
    }

    /// Attaches a trace sink receiving a line per flush decision.
    #[must_use]
    pub fn with_trace(mut self, trace: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Emits a trace message.
    pub fn trace(&self, message: &str) {
        if let Some(trace) = &self.trace {
            trace(message);
        }
    }

    /// Flushes a region from every cache tier. Runs as one cache
    /// manager command, so no concurrent lookup observes a half-flushed
    /// index.
    pub fn flush(&self, region: &CacheRegion) -> LatticeResult<FlushResult> {
        let ctx = Arc::clone(&self.ctx);
        let region = region.clone();
        let trace = self.trace.clone();
        self.ctx.manager.execute(move |state| {
            flush_region(&ctx, state, &region, &|message| {
                if let Some(trace) = &trace {
                    trace(message);
                }
            })
        })
    }
}

fn discard(
    ctx: &Arc<EngineContext>,
    state: &mut ManagerState,
    header: &SegmentHeader,
) {
    state.index.unregister(header);
    for worker in ctx.workers.read().iter() {
        if let Err(e) = worker.remove(header) {
            warn!(cache = worker.name(), error = %e, "remove failed during flush");
        }
    }
}

/// Applies a flush region to every registered segment of its star.
pub(crate) fn flush_region(
    ctx: &Arc<EngineContext>,
    state: &mut ManagerState,
    region: &CacheRegion,
    trace: &dyn Fn(&str),
) -> FlushResult {
    let mut result = FlushResult::default();
    let headers: Vec<SegmentHeader> = state
        .index
        .headers_for_star(region.star())
        .cloned()
        .collect();

    'segments: for header in headers {
        // A segment sharing no column with the flush might hold any of
        // the flushed cells.
        if !header.constrained_bit_key.intersects(region.bit_key()) {
            trace(&format!(
                "discard segment - it has no columns in common: {}",
                header
            ));
            discard(ctx, state, &header);
            result.discarded += 1;
            continue;
        }

        let segment = match materialize(ctx, state, &header) {
            Some(segment) => segment,
            None => {
                trace(&format!("discarding segment with unavailable body: {}", header));
                discard(ctx, state, &header);
                result.discarded += 1;
                continue;
            }
        };

        // Per axis, which keys survive the per-column flush predicates.
        let mut keep_masks: Vec<Vec<bool>> = Vec::with_capacity(segment.axes().len());
        for axis in segment.axes() {
            match region.predicate_for(axis.column.bit_position) {
                None => keep_masks.push(vec![true; axis.len()]),
                Some(flush_predicate) => {
                    if !flush_predicate.might_intersect(&axis.predicate) {
                        // The flush cannot touch this segment at all.
                        result.untouched += 1;
                        continue 'segments;
                    }
                    keep_masks.push(
                        axis.keys()
                            .iter()
                            .map(|key| !flush_predicate.evaluate(key))
                            .collect(),
                    );
                }
            }
        }

        // Multi-column predicates can only remove a key whose every
        // populated cell the predicate flushes.
        for predicate in &region.multi_predicates {
            prune_values(predicate, &segment, &mut keep_masks);
        }

        // Pick the axis that retains the most keys; that is the axis
        // whose predicate gets tightened.
        let mut best: Option<(usize, f64)> = None;
        for (i, axis) in segment.axes().iter().enumerate() {
            if !region.bit_key().get(axis.column.bit_position) {
                continue;
            }
            let surviving = keep_masks[i].iter().filter(|&&keep| keep).count();
            if surviving == 0 {
                trace(&format!("discard segment - axis fully flushed: {}", header));
                discard(ctx, state, &header);
                result.discarded += 1;
                continue 'segments;
            }
            let retention = surviving as f64 / axis.len() as f64;
            if best.map_or(true, |(_, r)| retention > r) {
                best = Some((i, retention));
            }
        }

        // Estimate the flushed cell count; a segment left empty is
        // discarded rather than tightened.
        let mut region_cells = 1.0f64;
        let mut region_column_predicates = Vec::new();
        for axis in segment.axes() {
            let bit = axis.column.bit_position;
            match region.predicate_for(bit) {
                None => {
                    region_cells *= axis.len() as f64;
                    region_column_predicates.push((bit, ColumnPredicate::True));
                }
                Some(predicate) => {
                    region_cells *= axis.match_count(predicate) as f64;
                    region_column_predicates.push((bit, predicate.clone()));
                }
            }
        }
        for _ in &region.multi_predicates {
            region_cells *= MULTI_PREDICATE_SELECTIVITY;
        }
        if segment.cell_count() as f64 - region_cells <= 0.0 {
            trace(&format!("discard segment - nothing left: {}", header));
            discard(ctx, state, &header);
            result.discarded += 1;
            continue;
        }

        let flushed_region = ExcludedRegion::new(
            region_column_predicates,
            region.multi_predicates.clone(),
            region_cells,
        );
        let mut excluded_regions = segment.segment().excluded_regions().to_vec();
        if !excluded_regions.contains(&flushed_region) {
            excluded_regions.push(flushed_region);
        }

        let (best_column, best_predicate) = match best {
            Some((i, _)) => {
                let axis = &segment.axes()[i];
                let predicate = match region.predicate_for(axis.column.bit_position) {
                    Some(flush_predicate) => axis.predicate.minus(flush_predicate),
                    None => axis.predicate.clone(),
                };
                (Some(i), Some(predicate))
            }
            None => (None, None),
        };

        let sub_segment =
            segment.create_sub_segment(&keep_masks, best_column, best_predicate, excluded_regions);
        let new_header = sub_segment.header().clone();
        let body = body_of(&sub_segment);
        for worker in ctx.workers.read().iter() {
            if let Err(e) = worker.put(new_header.clone(), body.clone()) {
                warn!(cache = worker.name(), error = %e, "store failed during flush");
            }
        }
        state.index.register(new_header);
        discard(ctx, state, &header);
        result.tightened += 1;
        trace(&format!("tightened segment: {}", header));
    }
    result
}

/// Fetches a registered segment's body and rebuilds the segment.
fn materialize(
    ctx: &Arc<EngineContext>,
    state: &ManagerState,
    header: &SegmentHeader,
) -> Option<SegmentWithData> {
    let star = state.stars.get(&header.star)?;
    for worker in ctx.workers.read().iter() {
        let body = match worker.get(header) {
            Ok(Some(body)) => body,
            Ok(None) => continue,
            Err(e) => {
                warn!(cache = worker.name(), error = %e, "read failed during flush");
                continue;
            }
        };
        let segment = to_segment(header, Arc::clone(star)).ok()?;
        match add_data(segment, body, ctx.config.dense_threshold) {
            Ok(with_data) => return Some(with_data),
            Err(e) => {
                warn!(segment = %header, error = %e, "corrupted segment during flush");
                return None;
            }
        }
    }
    None
}

/// Applies one multi-column predicate to the keep masks: a key
/// survives if any populated cell carrying it is outside the
/// predicate.
fn prune_values(
    predicate: &StarPredicate,
    segment: &SegmentWithData,
    keep_masks: &mut [Vec<bool>],
) {
    // Axes the predicate constrains. Predicate columns missing from the
    // segment evaluate as unknown, which makes equality constraints
    // false and therefore keeps every key: the conservative direction.
    let predicate_bits: Vec<usize> = predicate
        .constrained_columns()
        .iter()
        .map(|(bit, _)| *bit)
        .collect();
    let participating: Vec<usize> = segment
        .axes()
        .iter()
        .enumerate()
        .filter(|(_, axis)| predicate_bits.contains(&axis.column.bit_position))
        .map(|(i, _)| i)
        .collect();
    if participating.is_empty() {
        return;
    }

    let mut keep_candidates: Vec<Vec<bool>> = segment
        .axes()
        .iter()
        .map(|axis| vec![false; axis.len()])
        .collect();

    for (cell_key, _) in segment.data().iter() {
        let mut values: HashMap<usize, DataValue> = HashMap::new();
        for &axis_index in &participating {
            let axis = &segment.axes()[axis_index];
            let ordinal = cell_key.axis(axis_index);
            values.insert(axis.column.bit_position, axis.keys()[ordinal].clone());
        }
        if !predicate.evaluate(&values) {
            // This populated cell survives the flush, so none of its
            // participating keys may be removed.
            for &axis_index in &participating {
                keep_candidates[axis_index][cell_key.axis(axis_index)] = true;
            }
        }
    }

    for &axis_index in &participating {
        for (mask, candidate) in keep_masks[axis_index]
            .iter_mut()
            .zip(keep_candidates[axis_index].iter())
        {
            *mask &= candidate;
        }
    }
}
