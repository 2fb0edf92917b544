//! Batches and grouping-sets fusion.
//!
//! Cell requests sharing an aggregation key accumulate into a batch;
//! each batch resolves to one SQL query. Compatible batches fuse into a
//! composite answered by a single grouping-sets query: the detailed
//! batch constrains the most columns, and each summary batch is a
//! rollup of it.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use lattice_common::config::EngineConfig;
use lattice_common::types::{BitKey, DataValue};
use lattice_segment::star::{Measure, Star, StarColumn};
use lattice_segment::{ColumnPredicate, Segment, StarPredicate};

use crate::agg::find_agg;
use crate::dialect::Dialect;
use crate::request::{AggregationKey, CellRequest};
use crate::sql::GroupingSet;

/// A bucket of cell requests sharing an aggregation key.
#[derive(Debug, Clone)]
pub struct Batch {
    star: Arc<Star>,
    columns: Vec<StarColumn>,
    measures: Vec<Measure>,
    value_sets: Vec<BTreeSet<DataValue>>,
    batch_key: AggregationKey,
    cell_request_count: usize,
}

impl Batch {
    /// Creates a batch shaped after its first request.
    #[must_use]
    pub fn new(request: &CellRequest) -> Self {
        Self {
            star: Arc::clone(request.star()),
            columns: request.columns().to_vec(),
            measures: Vec::new(),
            value_sets: vec![BTreeSet::new(); request.columns().len()],
            batch_key: request.aggregation_key(),
            cell_request_count: 0,
        }
    }

    /// Adds a request to the batch.
    pub fn add(&mut self, request: &CellRequest) {
        self.cell_request_count += 1;
        for (set, value) in self.value_sets.iter_mut().zip(request.values()) {
            set.insert(value.clone());
        }
        if !self.measures.contains(request.measure()) {
            debug_assert!(
                self.measures.is_empty()
                    || self.star.identity == request.star().identity,
                "measure must belong to the same star as other measures"
            );
            self.measures.push(request.measure().clone());
        }
    }

    /// The batch's aggregation key.
    #[must_use]
    pub fn batch_key(&self) -> &AggregationKey {
        &self.batch_key
    }

    /// The star the batch reads from.
    #[must_use]
    pub fn star(&self) -> &Arc<Star> {
        &self.star
    }

    /// The constrained columns, ascending bit order.
    #[must_use]
    pub fn columns(&self) -> &[StarColumn] {
        &self.columns
    }

    /// The measures, in discovery order.
    #[must_use]
    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    /// Number of cell requests accumulated.
    #[must_use]
    pub fn cell_request_count(&self) -> usize {
        self.cell_request_count
    }

    /// The constrained-columns bit key.
    #[must_use]
    pub fn bit_key(&self) -> &BitKey {
        &self.batch_key.bit_key
    }

    /// Bit key of the batch's measures.
    #[must_use]
    pub fn measure_bit_key(&self) -> BitKey {
        let mut key = BitKey::empty();
        for measure in &self.measures {
            key.set(measure.bit_position);
        }
        key
    }

    /// Builds the per-column IN-list predicates from the accumulated
    /// value sets. Values are sorted, so generated SQL is
    /// deterministic.
    #[must_use]
    pub fn init_predicates(&self) -> Vec<ColumnPredicate> {
        self.value_sets
            .iter()
            .map(|set| ColumnPredicate::from_values(set.iter().cloned()))
            .collect()
    }

    /// Builds the grouping set loading the given measures with the
    /// given (possibly optimised) predicates.
    #[must_use]
    pub fn to_grouping_set(
        &self,
        measures: &[Measure],
        predicates: &[ColumnPredicate],
    ) -> GroupingSet {
        let segments = measures
            .iter()
            .map(|measure| {
                Segment::new(
                    Arc::clone(&self.star),
                    self.batch_key.bit_key.clone(),
                    self.columns.clone(),
                    measure.clone(),
                    predicates.to_vec(),
                    self.batch_key.compound_predicates.clone(),
                    Vec::new(),
                )
            })
            .collect();
        let mut measure_bit_key = BitKey::empty();
        for measure in measures {
            measure_bit_key.set(measure.bit_position);
        }
        GroupingSet {
            segments,
            columns: self.columns.clone(),
            predicates: predicates.to_vec(),
            level_bit_key: self.batch_key.bit_key.clone(),
            measure_bit_key,
        }
    }

    /// Returns whether the batch holds any distinct-count measure.
    #[must_use]
    pub fn has_distinct_count_measure(&self) -> bool {
        self.measures.iter().any(Measure::is_distinct)
    }

    fn has_normal_measures(&self) -> bool {
        self.measures.iter().any(|m| !m.is_distinct())
    }

    /// Returns whether `other` can be answered by rolling up this
    /// batch's grouping-sets query. Not symmetric: `self` is the
    /// candidate detailed batch.
    #[must_use]
    pub fn can_batch(&self, other: &Batch, config: &EngineConfig) -> bool {
        self.has_overlapping_bit_keys(other)
            && self.constraints_match(other)
            && self.has_same_measure_list(other)
            && !self.has_distinct_count_measure()
            && !other.has_distinct_count_measure()
            && self.has_same_star_and_aggregation(other, config)
            && self.has_same_closure_columns(other)
    }

    /// Rule 1: this batch's columns are a superset of the other's.
    fn has_overlapping_bit_keys(&self, other: &Batch) -> bool {
        self.bit_key().is_superset_of(other.bit_key())
    }

    /// Rule 2 and the distinct-count variants of it.
    fn constraints_match(&self, other: &Batch) -> bool {
        if self.are_both_distinct_count_batches(other) {
            if self.bit_key() == other.bit_key() {
                self.has_same_compound_predicates(other) && self.have_same_values(other)
            } else {
                self.has_same_compound_predicates(other)
                    || (other.batch_key.compound_predicates.is_empty()
                        || StarPredicate::lists_equal(
                            &self.batch_key.compound_predicates,
                            &other.batch_key.compound_predicates,
                        ))
                        && self.have_same_values(other)
            }
        } else {
            self.have_same_values(other)
        }
    }

    fn are_both_distinct_count_batches(&self, other: &Batch) -> bool {
        self.has_distinct_count_measure()
            && !self.has_normal_measures()
            && other.has_distinct_count_measure()
            && !other.has_normal_measures()
    }

    fn has_same_compound_predicates(&self, other: &Batch) -> bool {
        StarPredicate::lists_equal(
            &self.batch_key.compound_predicates,
            &other.batch_key.compound_predicates,
        )
    }

    /// Rule 3: identical measure lists, order-insensitive.
    fn has_same_measure_list(&self, other: &Batch) -> bool {
        self.measures.len() == other.measures.len()
            && other.measures.iter().all(|m| self.measures.contains(m))
    }

    /// Rule 5: same star and same aggregate-table selection (including
    /// the rollup flag).
    fn has_same_star_and_aggregation(&self, other: &Batch, config: &EngineConfig) -> bool {
        if self.star.identity != other.star.identity {
            return false;
        }
        if !config.use_aggregates {
            return true;
        }
        let this_agg = find_agg(&self.star, self.bit_key(), &self.measure_bit_key())
            .map(|(t, rollup)| (t.name.clone(), rollup));
        let other_agg = find_agg(&other.star, other.bit_key(), &other.measure_bit_key())
            .map(|(t, rollup)| (t.name.clone(), rollup));
        this_agg == other_agg
    }

    /// Rule 6: equal closure-column masks. Rolling up across a
    /// parent-child closure level is unsound because the ALL member of
    /// a closure is not the sum of its children.
    fn has_same_closure_columns(&self, other: &Batch) -> bool {
        let closure = &self.star.closure_column_bit_key;
        self.bit_key().and(closure) == other.bit_key().and(closure)
    }

    /// Rule 7 (`haveSameValues`): overlapping columns carry identical
    /// value sets, and columns only this batch constrains carry ALL
    /// values of the column.
    fn have_same_values(&self, other: &Batch) -> bool {
        for (j, column) in self.columns.iter().enumerate() {
            let mut is_common = false;
            for (i, other_column) in other.columns.iter().enumerate() {
                if other_column.bit_position == column.bit_position {
                    if other.value_sets[i] == self.value_sets[j] {
                        is_common = true;
                        break;
                    }
                    return false;
                }
            }
            if !is_common && self.value_sets[j].len() != column.cardinality {
                return false;
            }
        }
        true
    }
}

/// Deterministic batch ordering: column count, then column names, then
/// value-set sizes and contents. Sorting by this comparator is what
/// makes two identical evaluations emit byte-identical SQL.
#[must_use]
pub fn compare_batches(a: &Batch, b: &Batch) -> Ordering {
    a.columns
        .len()
        .cmp(&b.columns.len())
        .then_with(|| {
            for (ca, cb) in a.columns.iter().zip(b.columns.iter()) {
                let ord = ca.name.cmp(&cb.name);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        })
        .then_with(|| {
            for (sa, sb) in a.value_sets.iter().zip(b.value_sets.iter()) {
                let ord = sa
                    .len()
                    .cmp(&sb.len())
                    .then_with(|| sa.iter().cmp(sb.iter()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        })
}

/// A fused set of batches answerable by one grouping-sets query.
#[derive(Debug, Clone)]
pub struct CompositeBatch {
    /// The batch with the most constrained columns.
    pub detailed: Batch,
    /// Batches answerable by rolling up the detailed batch.
    pub summaries: Vec<Batch>,
}

impl CompositeBatch {
    /// Wraps a lone batch.
    #[must_use]
    pub fn new(detailed: Batch) -> Self {
        Self {
            detailed,
            summaries: Vec::new(),
        }
    }

    /// Total cell requests across the composite.
    #[must_use]
    pub fn cell_request_count(&self) -> usize {
        self.detailed.cell_request_count()
            + self
                .summaries
                .iter()
                .map(Batch::cell_request_count)
                .sum::<usize>()
    }
}

/// Fuses compatible batches into composites.
///
/// The input is sorted by [`compare_batches`] first; each batch then
/// joins the first composite it merges with, either as a summary of
/// the composite's detailed batch or by taking over as the detailed
/// batch. The composite list is finally re-sorted by detailed batch,
/// so the emitted SQL order is deterministic.
#[must_use]
pub fn group_batches(mut batches: Vec<Batch>, config: &EngineConfig) -> Vec<CompositeBatch> {
    batches.sort_by(compare_batches);

    let mut composites: Vec<CompositeBatch> = Vec::new();
    'next_batch: for batch in batches {
        for composite in &mut composites {
            if composite.detailed.can_batch(&batch, config) {
                composite.summaries.push(batch);
                continue 'next_batch;
            }
            if batch.can_batch(&composite.detailed, config) {
                let old_detailed = std::mem::replace(&mut composite.detailed, batch);
                composite.summaries.push(old_detailed);
                continue 'next_batch;
            }
        }
        composites.push(CompositeBatch::new(batch));
    }

    for composite in &mut composites {
        composite.summaries.sort_by(compare_batches);
    }
    composites.sort_by(|a, b| compare_batches(&a.detailed, &b.detailed));
    composites
}

/// Splits a batch's measures into separate load invocations as the
/// dialect requires.
///
/// When the dialect cannot express (multiple) distinct counts in one
/// statement, distinct measures sharing one aggregate expression load
/// together and every other expression group loads on its own. When
/// the dialect cannot combine several distinct SQL-expression
/// measures, each subquery-backed distinct measure loads alone.
#[must_use]
pub fn plan_measure_loads(measures: &[Measure], dialect: &Dialect) -> Vec<Vec<Measure>> {
    let mut remaining: Vec<Measure> = measures.to_vec();
    let mut loads: Vec<Vec<Measure>> = Vec::new();

    let distinct_count = remaining.iter().filter(|m| m.is_distinct()).count();
    let too_many_distinct = (distinct_count > 0 && !dialect.allows_count_distinct)
        || (distinct_count > 1 && !dialect.allows_multiple_count_distinct);

    if too_many_distinct {
        // Extract one expression group at a time, in discovery order.
        while let Some(first) = remaining.iter().find(|m| m.is_distinct()).cloned() {
            let expr = first.expression.generic_text().to_string();
            let (group, rest): (Vec<Measure>, Vec<Measure>) = remaining
                .into_iter()
                .partition(|m| m.is_distinct() && m.expression.generic_text() == expr);
            loads.push(group);
            remaining = rest;
        }
    }

    if !dialect.allows_multiple_distinct_sql_measures {
        // Subquery-backed distinct measures load individually.
        let (sql_measures, rest): (Vec<Measure>, Vec<Measure>) =
            remaining.into_iter().partition(|m| {
                m.is_distinct()
                    && matches!(
                        m.expression,
                        lattice_segment::star::MeasureExpression::Sql { subquery: true, .. }
                    )
            });
        for measure in sql_measures {
            loads.push(vec![measure]);
        }
        remaining = rest;
    }

    if !remaining.is_empty() {
        loads.push(remaining);
    }
    loads
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_segment::star::{Aggregator, MeasureExpression, StarIdentity};

    fn sample_star() -> Arc<Star> {
        let mut star = Star::new(StarIdentity::new("Sales", "abc", "Sales", "sales_fact"));
        star.columns.push(StarColumn::new("year", 0, 2));
        star.columns.push(StarColumn::new("quarter", 1, 4));
        star.columns.push(StarColumn::new("state", 2, 3));
        star.measures.push(Measure::new(
            "Unit Sales",
            8,
            Aggregator::Sum,
            "unit_sales",
        ));
        Arc::new(star)
    }

    fn request(star: &Arc<Star>, coords: &[(&str, DataValue)]) -> CellRequest {
        CellRequest::new(
            Arc::clone(star),
            star.measures[0].clone(),
            coords
                .iter()
                .map(|(name, value)| ((*name).to_string(), value.clone()))
                .collect(),
            Vec::new(),
        )
    }

    fn batch_of(star: &Arc<Star>, requests: &[CellRequest]) -> Batch {
        let mut batch = Batch::new(&requests[0]);
        for request in requests {
            batch.add(request);
        }
        batch
    }

    /// Detailed batch: {year, quarter, state}; summary: {year, state};
    /// identical values on shared columns, all quarters constrained.
    fn mergeable_pair(star: &Arc<Star>) -> (Batch, Batch) {
        let detailed = batch_of(
            star,
            &[
                request(
                    star,
                    &[
                        ("year", DataValue::from(1997)),
                        ("quarter", DataValue::from("Q1")),
                        ("state", DataValue::from("CA")),
                    ],
                ),
                request(
                    star,
                    &[
                        ("year", DataValue::from(1997)),
                        ("quarter", DataValue::from("Q2")),
                        ("state", DataValue::from("CA")),
                    ],
                ),
                request(
                    star,
                    &[
                        ("year", DataValue::from(1997)),
                        ("quarter", DataValue::from("Q3")),
                        ("state", DataValue::from("CA")),
                    ],
                ),
                request(
                    star,
                    &[
                        ("year", DataValue::from(1997)),
                        ("quarter", DataValue::from("Q4")),
                        ("state", DataValue::from("CA")),
                    ],
                ),
            ],
        );
        let summary = batch_of(
            star,
            &[request(
                star,
                &[
                    ("year", DataValue::from(1997)),
                    ("state", DataValue::from("CA")),
                ],
            )],
        );
        (detailed, summary)
    }

    #[test]
    fn test_dedup_within_batch() {
        let star = sample_star();
        let combos = [
            (1997i64, "CA"),
            (1997, "OR"),
            (1997, "WA"),
            (1998, "CA"),
            (1998, "OR"),
            (1998, "WA"),
        ];
        let requests: Vec<CellRequest> = (0..600)
            .map(|i| {
                let (year, state) = combos[i % combos.len()];
                request(
                    &star,
                    &[
                        ("year", DataValue::from(year)),
                        ("state", DataValue::from(state)),
                    ],
                )
            })
            .collect();
        let batch = batch_of(&star, &requests);
        assert_eq!(batch.cell_request_count(), 600);
        let predicates = batch.init_predicates();
        assert_eq!(predicates[0].value_count(), Some(2));
        assert_eq!(predicates[1].value_count(), Some(3));
    }

    #[test]
    fn test_can_batch_superset_with_all_values() {
        let star = sample_star();
        let (detailed, summary) = mergeable_pair(&star);
        let config = EngineConfig::default();
        assert!(detailed.can_batch(&summary, &config));
        assert!(!summary.can_batch(&detailed, &config));
    }

    #[test]
    fn test_cannot_batch_partial_extra_column() {
        let star = sample_star();
        let (mut detailed, summary) = mergeable_pair(&star);
        // Remove one quarter: the extra column no longer has all values.
        detailed.value_sets[1].remove(&DataValue::from("Q4"));
        assert!(!detailed.can_batch(&summary, &EngineConfig::default()));
    }

    #[test]
    fn test_cannot_batch_different_values() {
        let star = sample_star();
        let (detailed, mut summary) = mergeable_pair(&star);
        summary.value_sets[0].insert(DataValue::from(1998));
        assert!(!detailed.can_batch(&summary, &EngineConfig::default()));
    }

    #[test]
    fn test_cannot_batch_distinct_count() {
        let star = sample_star();
        let (mut detailed, summary) = mergeable_pair(&star);
        detailed.measures = vec![Measure::new(
            "Customers",
            9,
            Aggregator::DistinctCount,
            "customer_id",
        )];
        assert!(!detailed.can_batch(&summary, &EngineConfig::default()));
    }

    #[test]
    fn test_cannot_batch_across_closure_columns() {
        let mut star = (*sample_star()).clone();
        star.closure_column_bit_key = BitKey::from_positions([1]);
        let star = Arc::new(star);
        let (detailed, summary) = mergeable_pair(&star);
        // Closure masks differ: {1} vs {}.
        assert!(!detailed.can_batch(&summary, &EngineConfig::default()));
    }

    #[test]
    fn test_group_batches_fuses_pair() {
        let star = sample_star();
        let (detailed, summary) = mergeable_pair(&star);
        let composites = group_batches(vec![summary, detailed], &EngineConfig::default());
        assert_eq!(composites.len(), 1);
        assert_eq!(composites[0].detailed.columns().len(), 3);
        assert_eq!(composites[0].summaries.len(), 1);
    }

    #[test]
    fn test_group_batches_keeps_incompatible_apart() {
        let star = sample_star();
        let a = batch_of(
            &star,
            &[request(&star, &[("year", DataValue::from(1997))])],
        );
        let b = batch_of(
            &star,
            &[request(&star, &[("state", DataValue::from("CA"))])],
        );
        let composites = group_batches(vec![a, b], &EngineConfig::default());
        assert_eq!(composites.len(), 2);
        assert!(composites.iter().all(|c| c.summaries.is_empty()));
    }

    #[test]
    fn test_grouping_is_order_deterministic() {
        let star = sample_star();
        let (detailed, summary) = mergeable_pair(&star);
        let config = EngineConfig::default();
        let forward = group_batches(vec![detailed.clone(), summary.clone()], &config);
        let reverse = group_batches(vec![summary, detailed], &config);
        assert_eq!(forward.len(), reverse.len());
        assert_eq!(
            forward[0].detailed.columns().len(),
            reverse[0].detailed.columns().len()
        );
    }

    #[test]
    fn test_plan_measure_loads_splits_distinct() {
        let customers = Measure::new("Customers", 9, Aggregator::DistinctCount, "customer_id");
        let products = Measure::new("Products", 10, Aggregator::DistinctCount, "product_id");
        let sales = Measure::new("Unit Sales", 8, Aggregator::Sum, "unit_sales");
        let dialect = Dialect {
            allows_multiple_count_distinct: false,
            ..Dialect::default()
        };
        let loads = plan_measure_loads(
            &[customers.clone(), products.clone(), sales.clone()],
            &dialect,
        );
        assert_eq!(loads.len(), 3);
        assert_eq!(loads[0], vec![customers]);
        assert_eq!(loads[1], vec![products]);
        assert_eq!(loads[2], vec![sales]);
    }

    #[test]
    fn test_plan_measure_loads_groups_same_expression() {
        let a = Measure::new("Customers A", 9, Aggregator::DistinctCount, "customer_id");
        let b = Measure::new("Customers B", 10, Aggregator::DistinctCount, "customer_id");
        let dialect = Dialect {
            allows_multiple_count_distinct: false,
            ..Dialect::default()
        };
        let loads = plan_measure_loads(&[a.clone(), b.clone()], &dialect);
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0], vec![a, b]);
    }

    #[test]
    fn test_plan_measure_loads_isolates_subqueries() {
        let mut subquery = Measure::new("Promo", 9, Aggregator::DistinctCount, "promo_id");
        subquery.expression = MeasureExpression::Sql {
            text: "(select promo_id from promos)".into(),
            subquery: true,
        };
        let sales = Measure::new("Unit Sales", 8, Aggregator::Sum, "unit_sales");
        let dialect = Dialect {
            allows_multiple_distinct_sql_measures: false,
            ..Dialect::default()
        };
        let loads = plan_measure_loads(&[subquery.clone(), sales.clone()], &dialect);
        assert_eq!(loads.len(), 2);
        assert_eq!(loads[0], vec![subquery]);
        assert_eq!(loads[1], vec![sales]);
    }

    #[test]
    fn test_plan_measure_loads_capable_dialect_keeps_one_load() {
        let customers = Measure::new("Customers", 9, Aggregator::DistinctCount, "customer_id");
        let products = Measure::new("Products", 10, Aggregator::DistinctCount, "product_id");
        let loads = plan_measure_loads(&[customers, products], &Dialect::default());
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].len(), 2);
    }
}
