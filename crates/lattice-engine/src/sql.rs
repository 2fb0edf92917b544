//! Grouping sets, deterministic SQL emission, and the executor
//! interface.
//!
//! The engine emits one SQL statement per load invocation, covering
//! every grouping set of the invocation. Emission is deterministic:
//! columns appear in bit order, IN-list values in sorted order, and
//! grouping sets detailed-first, so two identical evaluations produce
//! byte-identical SQL. Dialect nuances beyond that live behind
//! [`SqlExecutor`].

use lattice_common::error::LatticeResult;
use lattice_common::types::{BitKey, CellValue, DataValue};
use lattice_segment::star::{AggTable, Measure, StarColumn};
use lattice_segment::{ColumnPredicate, Segment, StarPredicate};

/// A suggested column type for the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// A group-by key column.
    Key,
    /// An aggregated measure column.
    Measure,
}

/// One result row of a bulk fact query.
#[derive(Debug, Clone)]
pub struct SqlRow {
    /// Index of the grouping set this row belongs to (0 = detailed).
    pub grouping_set: usize,
    /// Key values aligned to the detailed column list; `None` for
    /// columns rolled away in this row's grouping set.
    pub keys: Vec<Option<DataValue>>,
    /// Measure values aligned to the statement's measure columns.
    pub measures: Vec<CellValue>,
}

/// A streaming cursor over fact query results. Termination is
/// explicit; `close` cancels any in-flight statement.
pub trait RowCursor: Send {
    /// Returns the next row, or `None` at end of results.
    fn next_row(&mut self) -> LatticeResult<Option<SqlRow>>;

    /// Closes the cursor, cancelling the underlying statement.
    fn close(&mut self) {}
}

/// Executes bulk fact queries. Implementations own dialect generation
/// details and driver plumbing; the engine calls them from SQL pool
/// threads only.
pub trait SqlExecutor: Send + Sync {
    /// Executes a statement and returns a row cursor.
    fn execute(&self, sql: &str, column_types: &[ColumnType]) -> LatticeResult<Box<dyn RowCursor>>;
}

/// One grouping set of a load invocation: the segment shells to fill
/// (one per measure), the constrained columns, and their predicates.
#[derive(Debug, Clone)]
pub struct GroupingSet {
    /// Segment shells, one per measure, sharing columns and predicates.
    pub segments: Vec<Segment>,
    /// Constrained columns in ascending bit order.
    pub columns: Vec<StarColumn>,
    /// Per-column predicates, parallel to `columns`.
    pub predicates: Vec<ColumnPredicate>,
    /// Bit key of the constrained columns.
    pub level_bit_key: BitKey,
    /// Bit key of the measures.
    pub measure_bit_key: BitKey,
}

impl GroupingSet {
    /// The measures of this grouping set.
    #[must_use]
    pub fn measures(&self) -> Vec<&Measure> {
        self.segments.iter().map(|s| s.measure()).collect()
    }
}

/// A generated statement plus the row layout the loader needs to
/// interpret results.
#[derive(Debug, Clone)]
pub struct SqlPlan {
    /// The statement text.
    pub sql: String,
    /// Suggested column types, keys first then measures.
    pub column_types: Vec<ColumnType>,
    /// For each measure of the invocation, the index of its measure
    /// column in result rows. Measures sharing one aggregate expression
    /// share one column.
    pub measure_columns: Vec<usize>,
}

/// Renders the aggregate expression of a measure.
fn measure_sql(measure: &Measure) -> String {
    let distinct = if measure.is_distinct() { "distinct " } else { "" };
    format!(
        "{}({}{})",
        measure.aggregator.sql_name(),
        distinct,
        measure.expression.generic_text()
    )
}

/// Renders a column predicate as a WHERE conjunct. `True` renders to
/// `None` (no constraint).
fn column_predicate_sql(column: &str, predicate: &ColumnPredicate) -> Option<String> {
    match predicate.value_list() {
        None => None,
        Some(values) if values.is_empty() => Some("1 = 0".to_string()),
        Some(values) if values.len() == 1 => {
            Some(format!("{} = {}", column, values[0].to_sql_literal()))
        }
        Some(values) => {
            let list: Vec<String> = values.iter().map(|v| v.to_sql_literal()).collect();
            Some(format!("{} in ({})", column, list.join(", ")))
        }
    }
}

/// Renders a compound predicate as a WHERE conjunct.
fn star_predicate_sql(predicate: &StarPredicate) -> String {
    match predicate {
        StarPredicate::Column {
            column, predicate, ..
        } => column_predicate_sql(column, predicate).unwrap_or_else(|| "1 = 1".to_string()),
        StarPredicate::And(children) => {
            let parts: Vec<String> = children.iter().map(star_predicate_sql).collect();
            format!("({})", parts.join(" and "))
        }
        StarPredicate::Or(children) => {
            let parts: Vec<String> = children.iter().map(star_predicate_sql).collect();
            format!("({})", parts.join(" or "))
        }
    }
}

/// Generates the statement for a load invocation.
///
/// `grouping_sets` is detailed-first; all sets share one measure list.
/// When `agg_table` is present the statement reads from the aggregate
/// table instead of the fact table.
#[must_use]
pub fn generate_sql(
    fact_table: &str,
    grouping_sets: &[GroupingSet],
    compound_predicates: &[StarPredicate],
    agg_table: Option<&AggTable>,
) -> SqlPlan {
    let detailed = &grouping_sets[0];
    let measures = detailed.measures();

    let mut select: Vec<String> = detailed
        .columns
        .iter()
        .map(|c| c.expression.clone())
        .collect();
    let mut column_types = vec![ColumnType::Key; select.len()];

    // One measure column per distinct aggregate expression.
    let mut measure_exprs: Vec<String> = Vec::new();
    let mut measure_columns = Vec::with_capacity(measures.len());
    for measure in &measures {
        let expr = measure_sql(measure);
        let index = match measure_exprs.iter().position(|e| e == &expr) {
            Some(index) => index,
            None => {
                measure_exprs.push(expr);
                measure_exprs.len() - 1
            }
        };
        measure_columns.push(index);
    }
    for (i, expr) in measure_exprs.iter().enumerate() {
        select.push(format!("{} as m{}", expr, i));
        column_types.push(ColumnType::Measure);
    }

    let table = agg_table.map_or(fact_table, |t| t.name.as_str());

    let mut conjuncts: Vec<String> = Vec::new();
    for (column, predicate) in detailed.columns.iter().zip(detailed.predicates.iter()) {
        if let Some(sql) = column_predicate_sql(&column.expression, predicate) {
            conjuncts.push(sql);
        }
    }
    for predicate in compound_predicates {
        conjuncts.push(star_predicate_sql(predicate));
    }

    let group_by = if grouping_sets.len() == 1 {
        let columns: Vec<String> = detailed
            .columns
            .iter()
            .map(|c| c.expression.clone())
            .collect();
        format!("group by {}", columns.join(", "))
    } else {
        let sets: Vec<String> = grouping_sets
            .iter()
            .map(|set| {
                let columns: Vec<String> =
                    set.columns.iter().map(|c| c.expression.clone()).collect();
                format!("({})", columns.join(", "))
            })
            .collect();
        format!("group by grouping sets ({})", sets.join(", "))
    };

    let mut sql = format!("select {} from {}", select.join(", "), table);
    if !conjuncts.is_empty() {
        sql.push_str(" where ");
        sql.push_str(&conjuncts.join(" and "));
    }
    if !detailed.columns.is_empty() {
        sql.push(' ');
        sql.push_str(&group_by);
    }

    SqlPlan {
        sql,
        column_types,
        measure_columns,
    }
}
