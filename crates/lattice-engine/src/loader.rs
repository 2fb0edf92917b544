//! The segment loader: bulk fact queries and segment hydration.
//!
//! A load invocation covers one generated statement: one or more
//! grouping sets, each hydrating one segment per measure. SQL runs on
//! the pool; the manager thread only plans, registers the in-flight
//! headers, and hands back futures. A failing load resolves every
//! future of the invocation with the same error - partial success is
//! not representable.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, error, info};

use lattice_common::error::{LatticeError, LatticeResult};
use lattice_common::sync::{Completer, FutureResult};
use lattice_common::types::{CellKey, CellValue, DataValue};
use lattice_segment::axis::SegmentAxis;
use lattice_segment::builder::body_of;
use lattice_segment::dataset::SegmentDataset;
use lattice_segment::star::Star;
use lattice_segment::{SegmentHeader, SegmentWithData, StarPredicate};

use crate::agg::find_agg;
use crate::batch::{plan_measure_loads, CompositeBatch};
use crate::engine::EngineContext;
use crate::optimize::optimize_predicates;
use crate::sql::{generate_sql, GroupingSet, SqlPlan, SqlRow};

/// One statement's worth of loading work.
#[derive(Debug, Clone)]
pub struct LoadInvocation {
    /// The star being read.
    pub star: Arc<Star>,
    /// Grouping sets, detailed first. All sets share one measure list.
    pub grouping_sets: Vec<GroupingSet>,
    /// Compound predicates applied to the whole statement.
    pub compound_predicates: Vec<StarPredicate>,
    /// Number of cell requests this invocation answers, for logs.
    pub cell_request_count: usize,
}

/// Plans the load invocations of one composite batch.
///
/// A composite with summaries becomes a single grouping-sets
/// invocation. A lone batch splits per the dialect's distinct-count
/// rules, one invocation per measure group.
#[must_use]
pub fn plan_loads(composite: &CompositeBatch, ctx: &EngineContext) -> Vec<LoadInvocation> {
    let detailed = &composite.detailed;
    let star = detailed.star();

    if ctx.config.generate_aggregate_sql {
        info!(
            suggestion = %suggest_aggregate_ddl(detailed),
            "aggregate table suggestion"
        );
    }

    let detailed_predicates = optimize_predicates(
        star,
        detailed.columns(),
        &detailed.init_predicates(),
        &ctx.config,
    );

    if !composite.summaries.is_empty() {
        // Grouping-sets query: measures are identical across member
        // batches, so one invocation covers them all.
        let mut grouping_sets =
            vec![detailed.to_grouping_set(detailed.measures(), &detailed_predicates)];
        for summary in &composite.summaries {
            let predicates = optimize_predicates(
                summary.star(),
                summary.columns(),
                &summary.init_predicates(),
                &ctx.config,
            );
            grouping_sets.push(summary.to_grouping_set(summary.measures(), &predicates));
        }
        return vec![LoadInvocation {
            star: Arc::clone(star),
            grouping_sets,
            compound_predicates: detailed.batch_key().compound_predicates.clone(),
            cell_request_count: composite.cell_request_count(),
        }];
    }

    plan_measure_loads(detailed.measures(), &ctx.dialect)
        .into_iter()
        .map(|measures| LoadInvocation {
            star: Arc::clone(star),
            grouping_sets: vec![detailed.to_grouping_set(&measures, &detailed_predicates)],
            compound_predicates: detailed.batch_key().compound_predicates.clone(),
            cell_request_count: composite.cell_request_count(),
        })
        .collect()
}

/// Renders suggested DDL for an aggregate table collapsing the fact
/// table onto a batch's constrained columns.
fn suggest_aggregate_ddl(batch: &crate::batch::Batch) -> String {
    let fact = &batch.star().identity.fact_table_alias;
    let columns: Vec<&str> = batch.columns().iter().map(|c| c.expression.as_str()).collect();
    let measures: Vec<String> = batch
        .measures()
        .iter()
        .map(|m| {
            let distinct = if m.is_distinct() { "distinct " } else { "" };
            format!(
                "{}({}{}) as {}",
                m.aggregator.sql_name(),
                distinct,
                m.expression.generic_text(),
                m.expression.generic_text()
            )
        })
        .collect();
    format!(
        "create table agg_{fact} as select {cols}, {measures}, count(*) as fact_count \
         from {fact} group by {cols}",
        fact = fact,
        cols = columns.join(", "),
        measures = measures.join(", "),
    )
}

/// Starts a load invocation.
///
/// Runs on the manager thread: generates the statement, registers the
/// in-flight headers, submits the SQL job, and returns one future per
/// segment. The pool worker hydrates the segments, stores them in
/// every cache tier, folds the registrations back through the command
/// queue, and resolves the futures.
pub fn execute_load(
    ctx: &Arc<EngineContext>,
    invocation: LoadInvocation,
) -> Vec<FutureResult<SegmentWithData>> {
    let agg_table = if ctx.config.use_aggregates && invocation.compound_predicates.is_empty() {
        let detailed = &invocation.grouping_sets[0];
        match find_agg(
            &invocation.star,
            &detailed.level_bit_key,
            &detailed.measure_bit_key,
        ) {
            Some((table, rollup)) => {
                debug!(agg_table = %table.name, rollup, "aggregate table match");
                Some(table.clone())
            }
            None => {
                debug!(
                    fact_table = %invocation.star.identity.fact_table_alias,
                    "no aggregate table match"
                );
                None
            }
        }
    } else {
        None
    };

    let plan = generate_sql(
        &invocation.star.identity.fact_table_alias,
        &invocation.grouping_sets,
        &invocation.compound_predicates,
        agg_table.as_ref(),
    );
    debug!(
        sql = %plan.sql,
        cells = invocation.cell_request_count,
        "loading segments"
    );

    let mut futures = Vec::new();
    let mut completers: Vec<Vec<Completer<SegmentWithData>>> = Vec::new();
    {
        let mut loading = ctx.loading.write();
        for set in &invocation.grouping_sets {
            let mut set_completers = Vec::with_capacity(set.segments.len());
            for segment in &set.segments {
                let (future, completer) = FutureResult::pending();
                loading.insert(segment.header().clone(), future.clone());
                futures.push(future);
                set_completers.push(completer);
            }
            completers.push(set_completers);
        }
    }

    let headers: Vec<SegmentHeader> = invocation
        .grouping_sets
        .iter()
        .flat_map(|set| set.segments.iter().map(|s| s.header().clone()))
        .collect();
    let job_ctx = Arc::clone(ctx);
    let submitted = ctx.pool.submit(move || {
        run_load(&job_ctx, &invocation, &plan, &completers);
    });
    if let Err(e) = submitted {
        // Pool is gone; nothing else will resolve the futures.
        error!(error = %e, "SQL pool rejected load");
        let mut loading = ctx.loading.write();
        for header in &headers {
            if let Some(future) = loading.remove(header) {
                future.cancel();
            }
        }
        return headers
            .iter()
            .map(|_| FutureResult::failed(e.clone()))
            .collect();
    }
    futures
}

/// Runs one load on a pool thread.
fn run_load(
    ctx: &Arc<EngineContext>,
    invocation: &LoadInvocation,
    plan: &SqlPlan,
    completers: &[Vec<Completer<SegmentWithData>>],
) {
    let headers: Vec<SegmentHeader> = invocation
        .grouping_sets
        .iter()
        .flat_map(|set| set.segments.iter().map(|s| s.header().clone()))
        .collect();

    let result = stream_and_build(ctx, invocation, plan, completers).and_then(|segments| {
        let workers = ctx.workers.read().clone();
        for per_set in &segments {
            for segment in per_set {
                let body = body_of(segment);
                for worker in &workers {
                    worker.put(segment.header().clone(), body.clone())?;
                }
            }
        }
        Ok(segments)
    });

    // Fold index updates back through the command queue before waking
    // waiters, so a follow-up command sees the registrations.
    let register = result.is_ok();
    let cleanup_ctx = Arc::clone(ctx);
    let _ = ctx.manager.enqueue(move |state| {
        let mut loading = cleanup_ctx.loading.write();
        for header in headers {
            loading.remove(&header);
            if register {
                state.index.register(header);
            }
        }
    });

    match result {
        Ok(segments) => {
            for (per_set, set_completers) in segments.into_iter().zip(completers.iter()) {
                for (segment, completer) in per_set.into_iter().zip(set_completers.iter()) {
                    completer.complete(Ok(segment));
                }
            }
        }
        Err(e) => {
            error!(error = %e, sql = %plan.sql, "segment load failed");
            for completer in completers.iter().flatten() {
                completer.complete(Err(e.clone()));
            }
        }
    }
}

/// Streams the statement's rows and hydrates one segment per measure
/// per grouping set.
fn stream_and_build(
    ctx: &Arc<EngineContext>,
    invocation: &LoadInvocation,
    plan: &SqlPlan,
    completers: &[Vec<Completer<SegmentWithData>>],
) -> LatticeResult<Vec<Vec<SegmentWithData>>> {
    let sets = &invocation.grouping_sets;
    let mut cursor = ctx.executor.execute(&plan.sql, &plan.column_types)?;

    let mut rows_per_set: Vec<Vec<SqlRow>> = vec![Vec::new(); sets.len()];
    loop {
        if completers
            .iter()
            .flatten()
            .any(Completer::is_cancelled)
        {
            cursor.close();
            return Err(LatticeError::Cancelled);
        }
        match cursor.next_row()? {
            Some(row) => {
                if row.grouping_set >= sets.len() {
                    cursor.close();
                    return Err(LatticeError::sql(format!(
                        "row references grouping set {} of {}",
                        row.grouping_set,
                        sets.len()
                    )));
                }
                rows_per_set[row.grouping_set].push(row);
            }
            None => break,
        }
    }
    cursor.close();

    let detailed_columns = &sets[0].columns;
    let mut out = Vec::with_capacity(sets.len());
    for (g, set) in sets.iter().enumerate() {
        // Positions of this set's columns within the detailed row
        // layout.
        let column_indices: Vec<usize> = set
            .columns
            .iter()
            .map(|column| {
                detailed_columns
                    .iter()
                    .position(|d| d.bit_position == column.bit_position)
                    .ok_or_else(|| {
                        LatticeError::internal(format!(
                            "grouping set column '{}' missing from detailed set",
                            column.name
                        ))
                    })
            })
            .collect::<LatticeResult<_>>()?;

        let mut key_sets: Vec<BTreeSet<DataValue>> = vec![BTreeSet::new(); set.columns.len()];
        for row in &rows_per_set[g] {
            for (k, &ci) in column_indices.iter().enumerate() {
                match row.keys.get(ci).and_then(|v| v.as_ref()) {
                    Some(value) => {
                        key_sets[k].insert(value.clone());
                    }
                    None => {
                        return Err(LatticeError::sql(format!(
                            "row in grouping set {} has no value for column '{}'",
                            g, set.columns[k].name
                        )))
                    }
                }
            }
        }

        let axes: Vec<SegmentAxis> = set
            .columns
            .iter()
            .zip(set.predicates.iter())
            .zip(key_sets.into_iter())
            .map(|((column, predicate), keys)| {
                SegmentAxis::new(column.clone(), predicate.clone(), keys.into_iter().collect())
            })
            .collect();
        let shape: Vec<usize> = axes.iter().map(SegmentAxis::len).collect();

        let detailed_measures = sets[0].measures();
        let mut per_set = Vec::with_capacity(set.segments.len());
        for shell in set.segments.iter() {
            // Measure order may differ between member batches; map by
            // identity against the statement's measure columns.
            let measure_column = detailed_measures
                .iter()
                .position(|m| m.name == shell.measure().name)
                .map(|j| plan.measure_columns[j])
                .ok_or_else(|| {
                    LatticeError::internal(format!(
                        "measure '{}' missing from detailed grouping set",
                        shell.measure().name
                    ))
                })?;
            let mut cells: HashMap<CellKey, CellValue> = HashMap::new();
            for row in &rows_per_set[g] {
                let mut ordinals = Vec::with_capacity(axes.len());
                for (k, &ci) in column_indices.iter().enumerate() {
                    let value = row.keys[ci].as_ref().expect("validated above");
                    let ordinal = axes[k].ordinal_of(value).ok_or_else(|| {
                        LatticeError::internal(format!("key {} missing from its axis", value))
                    })?;
                    ordinals.push(ordinal);
                }
                let value = row
                    .measures
                    .get(measure_column)
                    .cloned()
                    .unwrap_or(CellValue::Null);
                if value.is_null() {
                    continue;
                }
                cells
                    .entry(CellKey::new(ordinals))
                    .and_modify(|existing| *existing = existing.add(&value))
                    .or_insert(value);
            }
            let data = SegmentDataset::from_cells(&shape, cells, ctx.config.dense_threshold);
            per_set.push(SegmentWithData::new(shell.clone(), axes.clone(), data));
        }
        out.push(per_set);
    }
    Ok(out)
}
