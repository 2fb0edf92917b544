//! The batching cell reader.
//!
//! The reader does not really read cells: asked for a stored measure,
//! it lies, records that the value was wanted, and returns a
//! not-ready marker. Once enough requests accumulate (or evaluation
//! ends), `load_aggregations` turns the misses into a minimal set of
//! bulk queries, waits for the segments, and the evaluator re-runs the
//! affected sub-plan against the statement-local cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use lattice_common::error::{LatticeError, LatticeResult};
use lattice_common::sync::FutureResult;
use lattice_common::types::CellValue;
use lattice_segment::builder::{add_data, to_segment};
use lattice_segment::{SegmentHeader, SegmentWithData};

use crate::batch::{compare_batches, group_batches, Batch, CompositeBatch};
use crate::engine::EngineContext;
use crate::execution::Execution;
use crate::loader::{execute_load, plan_loads};
use crate::manager::ManagerState;
use crate::request::{AggregationKey, CellRequest};

/// Outcome of one cell lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CellResult {
    /// The cell is resolvable now. `CellValue::Null` means the fact
    /// table holds no row for the coordinate.
    Value(CellValue),
    /// The reader lied; call `load_aggregations` and re-run.
    NotReady,
}

/// Per-statement batching cell reader.
pub struct BatchReader {
    ctx: Arc<EngineContext>,
    execution: Arc<Execution>,
    /// Statement-local segments; single-threaded.
    local: Vec<SegmentWithData>,
    cell_requests: Vec<CellRequest>,
    hit_count: usize,
    miss_count: usize,
    pending_count: usize,
    forced_dirty: bool,
}

impl BatchReader {
    pub(crate) fn new(ctx: Arc<EngineContext>, execution: Arc<Execution>) -> Self {
        Self {
            ctx,
            execution,
            local: Vec::new(),
            cell_requests: Vec::new(),
            hit_count: 0,
            miss_count: 0,
            pending_count: 0,
            forced_dirty: false,
        }
    }

    /// Looks up one cell.
    ///
    /// Returns `RequestQuantumExceeded` every `request_quantum`
    /// recorded requests; the evaluator catches it, calls
    /// [`BatchReader::load_aggregations`], and re-runs.
    pub fn get(&mut self, request: Option<CellRequest>) -> LatticeResult<CellResult> {
        let Some(request) = request else {
            return Ok(CellResult::Value(CellValue::Null));
        };
        if request.is_unsatisfiable() {
            return Ok(CellResult::Value(CellValue::Null));
        }

        if let Some(value) = self.find_local(&request) {
            self.hit_count += 1;
            return Ok(CellResult::Value(value));
        }

        if self.is_loading_elsewhere(&request) {
            self.pending_count += 1;
            return Ok(CellResult::NotReady);
        }

        self.record_cell_request(request)?;
        Ok(CellResult::NotReady)
    }

    /// Number of cells answered from the statement-local cache.
    #[must_use]
    pub fn hit_count(&self) -> usize {
        self.hit_count
    }

    /// Number of cells recorded for batch loading.
    #[must_use]
    pub fn miss_count(&self) -> usize {
        self.miss_count
    }

    /// Number of cells found mid-load elsewhere.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Returns whether the reader has told a lie that a load has not
    /// yet repaired.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.forced_dirty || !self.cell_requests.is_empty()
    }

    /// Forces one reload round even with no recorded requests, e.g.
    /// after an external invalidation.
    pub fn set_dirty(&mut self) {
        self.forced_dirty = true;
    }

    fn find_local(&self, request: &CellRequest) -> Option<CellValue> {
        let values = request.value_map();
        self.local.iter().find_map(|segment| {
            let header = segment.header();
            (header.star == request.star().identity
                && header.measure_name == request.measure().name
                && &header.constrained_bit_key == request.bit_key()
                && lattice_segment::StarPredicate::lists_equal(
                    &header.compound_predicates,
                    request.compound_predicates(),
                ))
            .then(|| segment.lookup(&values))
            .flatten()
        })
    }

    fn is_loading_elsewhere(&self, request: &CellRequest) -> bool {
        let values = request.value_map();
        let loading = self.ctx.loading.read();
        loading.iter().any(|(header, future)| {
            !future.is_done() && header_serves(header, request) && header.can_constrain(&values)
        })
    }

    fn record_cell_request(&mut self, request: CellRequest) -> LatticeResult<()> {
        self.miss_count += 1;
        self.cell_requests.push(request);
        if self.cell_requests.len() % self.ctx.config.request_quantum == 0 {
            // Time to ask the cache manager whether it has the cells we
            // need. Not really an error.
            return Err(LatticeError::RequestQuantumExceeded {
                quantum: self.ctx.config.request_quantum,
            });
        }
        Ok(())
    }

    /// Resolves all recorded cell requests.
    ///
    /// Submits one command to the cache manager that answers each
    /// request from the index and cache tiers where possible and turns
    /// the rest into batches, fuses compatible batches into
    /// grouping-sets queries, and starts the loads. Then blocks on
    /// every returned future and registers the segments into the
    /// statement-local cache.
    ///
    /// Returns false if there was nothing to load. After a true
    /// return the evaluator must re-run, because the reader lied.
    pub fn load_aggregations(&mut self) -> LatticeResult<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.execution.check_cancel_or_timeout()?;

        let requests = std::mem::take(&mut self.cell_requests);
        let ctx = Arc::clone(&self.ctx);
        let execution = Arc::clone(&self.execution);
        let futures = self
            .ctx
            .manager
            .execute(move |state| resolve_requests(&ctx, state, &execution, requests))??;

        for (i, future) in futures.iter().enumerate() {
            let segment = loop {
                if let Err(e) = self.execution.check_cancel_or_timeout() {
                    // Instruct the in-flight loads to cancel; the pool
                    // workers close their cursors when they notice.
                    for pending in &futures[i..] {
                        pending.cancel();
                    }
                    self.forced_dirty = false;
                    return Err(e);
                }
                match future.wait_timeout(Duration::from_millis(50)) {
                    Some(Ok(segment)) => break segment,
                    Some(Err(e)) => {
                        self.forced_dirty = false;
                        return Err(e);
                    }
                    None => {}
                }
            };
            self.register_local(segment);
        }
        self.forced_dirty = false;
        Ok(true)
    }

    /// Puts a segment into the statement-local cache.
    fn register_local(&mut self, segment: SegmentWithData) {
        if self
            .local
            .iter()
            .any(|existing| existing.header() == segment.header())
        {
            return;
        }
        self.local.push(segment);
    }
}

fn header_serves(header: &SegmentHeader, request: &CellRequest) -> bool {
    header.star == request.star().identity
        && header.measure_name == request.measure().name
        && &header.constrained_bit_key == request.bit_key()
        && lattice_segment::StarPredicate::lists_equal(
            &header.compound_predicates,
            request.compound_predicates(),
        )
}

/// Runs inside the cache manager: answers requests from cache and
/// starts loads for the rest.
fn resolve_requests(
    ctx: &Arc<EngineContext>,
    state: &mut ManagerState,
    execution: &Execution,
    requests: Vec<CellRequest>,
) -> LatticeResult<Vec<FutureResult<SegmentWithData>>> {
    let mut futures: Vec<FutureResult<SegmentWithData>> = Vec::new();
    let mut seen_headers: HashSet<SegmentHeader> = HashSet::new();
    let mut batches: HashMap<AggregationKey, Batch> = HashMap::new();

    for request in &requests {
        if resolve_one(ctx, state, request, &mut seen_headers, &mut futures)? {
            continue;
        }
        batches
            .entry(request.aggregation_key())
            .or_insert_with(|| {
                debug!(
                    bitkey = %request.bit_key(),
                    measure = %request.measure().name,
                    "new batch"
                );
                Batch::new(request)
            })
            .add(request);
    }

    let mut batch_list: Vec<Batch> = batches.into_values().collect();
    batch_list.sort_by(compare_batches);

    let use_grouping_sets =
        ctx.config.enable_grouping_sets && ctx.dialect.supports_grouping_sets;
    let composites: Vec<CompositeBatch> = if use_grouping_sets {
        debug!("using grouping sets");
        group_batches(batch_list, &ctx.config)
    } else {
        batch_list.into_iter().map(CompositeBatch::new).collect()
    };

    for composite in &composites {
        execution.check_cancel_or_timeout()?;
        for invocation in plan_loads(composite, ctx) {
            futures.extend(execute_load(ctx, invocation));
        }
    }
    Ok(futures)
}

/// Tries to satisfy one request from in-flight loads or cached
/// segments. Returns true if a future now covers it.
fn resolve_one(
    ctx: &Arc<EngineContext>,
    state: &mut ManagerState,
    request: &CellRequest,
    seen_headers: &mut HashSet<SegmentHeader>,
    futures: &mut Vec<FutureResult<SegmentWithData>>,
) -> LatticeResult<bool> {
    let values = request.value_map();

    // A load already in flight (possibly for another statement).
    {
        let loading = ctx.loading.read();
        if let Some((header, future)) = loading
            .iter()
            .find(|(h, _)| header_serves(h, request) && h.can_constrain(&values))
        {
            if seen_headers.insert(header.clone()) {
                futures.push(future.clone());
            }
            return Ok(true);
        }
    }

    // A registered segment whose body some tier still holds.
    let located = state.index.locate(
        &request.star().identity,
        &request.measure().name,
        request.bit_key(),
        &values,
        request.compound_predicates(),
    );
    for header in located {
        if seen_headers.contains(&header) {
            // An earlier request in this round already produced the
            // future for this segment.
            return Ok(true);
        }
        let workers = ctx.workers.read().clone();
        for worker in workers {
            let body = match worker.get(&header) {
                Ok(Some(body)) => body,
                Ok(None) => continue,
                Err(e) => {
                    warn!(cache = worker.name(), error = %e, "cache read failed");
                    continue;
                }
            };
            let segment = to_segment(&header, Arc::clone(request.star()))?;
            match add_data(segment, body, ctx.config.dense_threshold) {
                Ok(with_data) => {
                    seen_headers.insert(header.clone());
                    futures.push(FutureResult::ready(with_data));
                    return Ok(true);
                }
                Err(e) => {
                    // Body does not agree with its header: discard the
                    // segment and evict the header.
                    warn!(segment = %header, error = %e, "corrupted segment discarded");
                    state.index.unregister(&header);
                    let _ = worker.remove(&header);
                    break;
                }
            }
        }
    }
    Ok(false)
}
