//! Shared fixtures for engine integration tests: a small retail star,
//! an in-memory fact table with a mock SQL executor that understands
//! the engine's generated statements, and a mock external segment
//! cache.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use lattice_cache::event::{CacheEventKind, ListenerId, ListenerRegistry, SegmentCacheEvent};
use lattice_cache::spi::{SegmentCache, SegmentCacheListener};
use lattice_common::error::{LatticeError, LatticeResult};
use lattice_common::sync::FutureResult;
use lattice_common::types::{CellValue, DataValue};
use lattice_engine::reader::{BatchReader, CellResult};
use lattice_engine::request::CellRequest;
use lattice_engine::sql::{ColumnType, RowCursor, SqlExecutor, SqlRow};
use lattice_segment::star::{Aggregator, Measure, Star, StarColumn, StarIdentity};
use lattice_segment::{SegmentBody, SegmentHeader};

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call from
/// every test; only the first call wins.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Star over a small retail fact table:
/// year(0), quarter(1), state(2), product(3) and measures
/// `Unit Sales`(8, sum), `Customer Count`(9, distinct),
/// `Product Count`(10, distinct).
pub fn retail_star() -> Arc<Star> {
    let mut star = Star::new(StarIdentity::new(
        "Retail",
        "c4f3",
        "Sales",
        "sales_fact",
    ));
    star.columns.push(StarColumn::new("year", 0, 2));
    star.columns.push(StarColumn::new("quarter", 1, 2));
    star.columns.push(StarColumn::new("state", 2, 3));
    star.columns.push(StarColumn::new("product", 3, 50));
    star.measures.push(Measure::new(
        "Unit Sales",
        8,
        Aggregator::Sum,
        "unit_sales",
    ));
    star.measures.push(Measure::new(
        "Customer Count",
        9,
        Aggregator::DistinctCount,
        "customer_id",
    ));
    star.measures.push(Measure::new(
        "Product Count",
        10,
        Aggregator::DistinctCount,
        "product_id",
    ));
    Arc::new(star)
}

/// One fact row per (year, quarter, state, product); unit_sales is 1,
/// so sums equal row counts.
pub fn retail_facts() -> Vec<HashMap<String, DataValue>> {
    let mut rows = Vec::new();
    for year in [1997i64, 1998] {
        for quarter in ["Q1", "Q2"] {
            for state in ["CA", "OR", "WA"] {
                for product in 0..50 {
                    let mut row = HashMap::new();
                    row.insert("year".to_string(), DataValue::from(year));
                    row.insert("quarter".to_string(), DataValue::from(quarter));
                    row.insert("state".to_string(), DataValue::from(state));
                    row.insert(
                        "product".to_string(),
                        DataValue::from(format!("p{:02}", product)),
                    );
                    row.insert("unit_sales".to_string(), DataValue::from(1i64));
                    row.insert(
                        "customer_id".to_string(),
                        DataValue::from(format!("c-{}-{}", year, state)),
                    );
                    row.insert(
                        "product_id".to_string(),
                        DataValue::from(format!("p{:02}", product)),
                    );
                    rows.push(row);
                }
            }
        }
    }
    rows
}

/// Builds a request for one cell.
pub fn cell(
    star: &Arc<Star>,
    measure: &str,
    coordinates: &[(&str, DataValue)],
) -> CellRequest {
    CellRequest::new(
        Arc::clone(star),
        star.measure_by_name(measure).expect("known measure").clone(),
        coordinates
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect(),
        Vec::new(),
    )
}

/// Drives the evaluator loop until every request resolves, loading
/// aggregations whenever the reader lies or the request quantum trips.
pub fn resolve_all(
    reader: &mut BatchReader,
    requests: &[CellRequest],
) -> LatticeResult<Vec<CellValue>> {
    let mut values = vec![None; requests.len()];
    for _round in 0..16 {
        let mut all_resolved = true;
        for (slot, request) in values.iter_mut().zip(requests.iter()) {
            if slot.is_some() {
                continue;
            }
            match reader.get(Some(request.clone())) {
                Ok(CellResult::Value(value)) => *slot = Some(value),
                Ok(CellResult::NotReady) => all_resolved = false,
                Err(LatticeError::RequestQuantumExceeded { .. }) => {
                    all_resolved = false;
                    reader.load_aggregations()?;
                }
                Err(e) => return Err(e),
            }
        }
        if all_resolved {
            return Ok(values.into_iter().map(|v| v.expect("resolved")).collect());
        }
        reader.load_aggregations()?;
    }
    Err(LatticeError::internal("cells did not resolve"))
}

// ---------------------------------------------------------------------
// Mock SQL executor
// ---------------------------------------------------------------------

/// Executes the engine's generated statements against an in-memory
/// fact table and records every statement it sees.
pub struct MockSqlExecutor {
    facts: Vec<HashMap<String, DataValue>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockSqlExecutor {
    pub fn new(facts: Vec<HashMap<String, DataValue>>) -> Self {
        Self {
            facts,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle on the statement log.
    pub fn log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.log)
    }
}

impl SqlExecutor for MockSqlExecutor {
    fn execute(
        &self,
        sql: &str,
        _column_types: &[ColumnType],
    ) -> LatticeResult<Box<dyn RowCursor>> {
        self.log.lock().push(sql.to_string());
        let rows = run_query(&self.facts, sql)?;
        Ok(Box::new(VecCursor {
            rows: rows.into(),
        }))
    }
}

struct VecCursor {
    rows: VecDeque<SqlRow>,
}

impl RowCursor for VecCursor {
    fn next_row(&mut self) -> LatticeResult<Option<SqlRow>> {
        Ok(self.rows.pop_front())
    }
}

#[derive(Debug, Clone)]
struct MeasureItem {
    aggregator: String,
    distinct: bool,
    column: String,
}

fn run_query(
    facts: &[HashMap<String, DataValue>],
    sql: &str,
) -> LatticeResult<Vec<SqlRow>> {
    let bad = |msg: &str| LatticeError::sql(format!("mock cannot parse '{}': {}", sql, msg));

    let rest = sql.strip_prefix("select ").ok_or_else(|| bad("no select"))?;
    let (select_part, rest) = rest.split_once(" from ").ok_or_else(|| bad("no from"))?;

    let (filter_part, group_part) = match rest.split_once(" where ") {
        Some((_table, tail)) => match tail.split_once(" group by ") {
            Some((filter, group)) => (Some(filter), Some(group)),
            None => (Some(tail), None),
        },
        None => match rest.split_once(" group by ") {
            Some((_table, group)) => (None, Some(group)),
            None => (None, None),
        },
    };

    let mut key_columns: Vec<String> = Vec::new();
    let mut measure_items: Vec<MeasureItem> = Vec::new();
    for item in select_part.split(", ") {
        if let Some((expr, _alias)) = item.split_once(" as m") {
            let (aggregator, inner) = expr
                .split_once('(')
                .ok_or_else(|| bad("measure without aggregate"))?;
            let inner = inner.strip_suffix(')').ok_or_else(|| bad("unclosed aggregate"))?;
            let (distinct, column) = match inner.strip_prefix("distinct ") {
                Some(column) => (true, column),
                None => (false, inner),
            };
            measure_items.push(MeasureItem {
                aggregator: aggregator.to_string(),
                distinct,
                column: column.to_string(),
            });
        } else {
            key_columns.push(item.to_string());
        }
    }

    let filtered: Vec<&HashMap<String, DataValue>> = match filter_part {
        None => facts.iter().collect(),
        Some(filter) => {
            let condition = parse_condition(filter)?;
            facts.iter().filter(|row| condition.matches(row)).collect()
        }
    };

    let grouping_sets: Vec<Vec<String>> = match group_part {
        None => vec![Vec::new()],
        Some(group) => {
            if let Some(sets) = group.strip_prefix("grouping sets (") {
                let sets = sets.strip_suffix(')').ok_or_else(|| bad("unclosed sets"))?;
                split_top_level(sets, ", ")
                    .into_iter()
                    .map(|set| {
                        let set = set
                            .strip_prefix('(')
                            .and_then(|s| s.strip_suffix(')'))
                            .unwrap_or(&set);
                        set.split(", ").map(str::to_string).collect()
                    })
                    .collect()
            } else {
                vec![group.split(", ").map(str::to_string).collect()]
            }
        }
    };

    let mut out = Vec::new();
    for (set_index, set_columns) in grouping_sets.iter().enumerate() {
        let mut groups: HashMap<Vec<DataValue>, Vec<&HashMap<String, DataValue>>> = HashMap::new();
        for &row in &filtered {
            let key: Vec<DataValue> = set_columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(DataValue::Null))
                .collect();
            groups.entry(key).or_default().push(row);
        }
        for (key, rows) in groups {
            let keys: Vec<Option<DataValue>> = key_columns
                .iter()
                .map(|column| {
                    set_columns
                        .iter()
                        .position(|c| c == column)
                        .map(|i| key[i].clone())
                })
                .collect();
            let measures: Vec<CellValue> = measure_items
                .iter()
                .map(|item| aggregate(item, &rows))
                .collect();
            out.push(SqlRow {
                grouping_set: set_index,
                keys,
                measures,
            });
        }
    }
    Ok(out)
}

fn aggregate(item: &MeasureItem, rows: &[&HashMap<String, DataValue>]) -> CellValue {
    if item.distinct {
        let distinct: BTreeSet<&DataValue> =
            rows.iter().filter_map(|row| row.get(&item.column)).collect();
        return CellValue::Int(distinct.len() as i64);
    }
    match item.aggregator.as_str() {
        "count" => CellValue::Int(rows.len() as i64),
        _ => {
            // sum of integer fact values
            let total: i64 = rows
                .iter()
                .filter_map(|row| match row.get(&item.column) {
                    Some(DataValue::Int(v)) => Some(*v),
                    _ => None,
                })
                .sum();
            CellValue::Int(total)
        }
    }
}

enum Condition {
    Never,
    Equals(String, DataValue),
    In(String, Vec<DataValue>),
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    fn matches(&self, row: &HashMap<String, DataValue>) -> bool {
        match self {
            Condition::Never => false,
            Condition::Equals(column, value) => row.get(column) == Some(value),
            Condition::In(column, values) => {
                row.get(column).is_some_and(|v| values.contains(v))
            }
            Condition::All(children) => children.iter().all(|c| c.matches(row)),
            Condition::Any(children) => children.iter().any(|c| c.matches(row)),
        }
    }
}

fn parse_condition(text: &str) -> LatticeResult<Condition> {
    let parts = split_top_level(text, " and ");
    if parts.len() > 1 {
        return Ok(Condition::All(
            parts
                .iter()
                .map(|p| parse_condition(p))
                .collect::<LatticeResult<_>>()?,
        ));
    }
    let parts = split_top_level(text, " or ");
    if parts.len() > 1 {
        return Ok(Condition::Any(
            parts
                .iter()
                .map(|p| parse_condition(p))
                .collect::<LatticeResult<_>>()?,
        ));
    }
    let text = text.trim();
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        return parse_condition(inner);
    }
    if text == "1 = 0" {
        return Ok(Condition::Never);
    }
    if text == "1 = 1" {
        return Ok(Condition::All(Vec::new()));
    }
    if let Some((column, value)) = text.split_once(" = ") {
        return Ok(Condition::Equals(column.to_string(), parse_literal(value)?));
    }
    if let Some((column, list)) = text.split_once(" in (") {
        let list = list
            .strip_suffix(')')
            .ok_or_else(|| LatticeError::sql(format!("unclosed in-list: {}", text)))?;
        let values = list
            .split(", ")
            .map(parse_literal)
            .collect::<LatticeResult<_>>()?;
        return Ok(Condition::In(column.to_string(), values));
    }
    Err(LatticeError::sql(format!("mock cannot parse condition '{}'", text)))
}

fn parse_literal(text: &str) -> LatticeResult<DataValue> {
    let text = text.trim();
    if text == "NULL" {
        return Ok(DataValue::Null);
    }
    if let Some(inner) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        return Ok(DataValue::Str(inner.replace("''", "'")));
    }
    text.parse::<i64>()
        .map(DataValue::Int)
        .map_err(|_| LatticeError::sql(format!("bad literal '{}'", text)))
}

/// Splits on a separator, ignoring separators inside parentheses.
fn split_top_level(text: &str, separator: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let sep = separator.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'\'' => {
                // skip quoted literal
                i += 1;
                while i < bytes.len() && bytes[i] != b'\'' {
                    i += 1;
                }
            }
            _ => {
                if depth == 0 && bytes[i..].starts_with(sep) {
                    parts.push(text[start..i].to_string());
                    i += sep.len();
                    start = i;
                    continue;
                }
            }
        }
        i += 1;
    }
    parts.push(text[start..].to_string());
    parts
}

// ---------------------------------------------------------------------
// Mock external segment cache
// ---------------------------------------------------------------------

/// An external cache tier for tests: events announce with
/// `is_local == false`, so the engine folds them into its index.
#[derive(Default)]
pub struct MockExternalCache {
    entries: RwLock<HashMap<SegmentHeader, SegmentBody>>,
    listeners: ListenerRegistry,
}

impl MockExternalCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentCache for MockExternalCache {
    fn contains(&self, header: &SegmentHeader) -> FutureResult<bool> {
        FutureResult::ready(self.entries.read().contains_key(header))
    }

    fn get(&self, header: &SegmentHeader) -> FutureResult<Option<SegmentBody>> {
        FutureResult::ready(self.entries.read().get(header).cloned())
    }

    fn put(&self, header: SegmentHeader, body: SegmentBody) -> FutureResult<bool> {
        self.entries.write().insert(header.clone(), body);
        self.listeners.notify(&SegmentCacheEvent {
            is_local: false,
            source: header,
            kind: CacheEventKind::Created,
        });
        FutureResult::ready(true)
    }

    fn remove(&self, header: &SegmentHeader) -> FutureResult<bool> {
        let removed = self.entries.write().remove(header).is_some();
        if removed {
            self.listeners.notify(&SegmentCacheEvent {
                is_local: false,
                source: header.clone(),
                kind: CacheEventKind::Deleted,
            });
        }
        FutureResult::ready(removed)
    }

    fn segment_headers(&self) -> FutureResult<Vec<SegmentHeader>> {
        FutureResult::ready(self.entries.read().keys().cloned().collect())
    }

    fn add_listener(&self, listener: SegmentCacheListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }

    fn supports_rich_index(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "mock-external"
    }
}
