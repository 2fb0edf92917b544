//! The star model: identity of a fact source and its addressable
//! columns and measures.
//!
//! Everything the cache pipeline needs to know about schema metadata is
//! captured here; MDX evaluation, dimension resolution, and dialect
//! generation stay outside the crate. Columns are addressed by a stable
//! bit position derived from schema column order, which keeps bit keys
//! comparable across runs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use lattice_common::types::BitKey;

/// Identity of a fact source: schema, cube, and fact table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StarIdentity {
    /// Schema name.
    pub schema_name: String,
    /// Checksum of the schema definition, so two servers loading
    /// different revisions of one schema never share segments.
    pub schema_checksum: String,
    /// Cube name.
    pub cube_name: String,
    /// Alias of the fact table.
    pub fact_table_alias: String,
}

impl StarIdentity {
    /// Creates a star identity.
    pub fn new(
        schema_name: impl Into<String>,
        schema_checksum: impl Into<String>,
        cube_name: impl Into<String>,
        fact_table_alias: impl Into<String>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            schema_checksum: schema_checksum.into(),
            cube_name: cube_name.into(),
            fact_table_alias: fact_table_alias.into(),
        }
    }
}

/// One addressable column of a star.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StarColumn {
    /// Column name, unique within the star.
    pub name: String,
    /// SQL expression selecting the column from the fact table.
    pub expression: String,
    /// Stable bit position within the star.
    pub bit_position: usize,
    /// Number of distinct values the column takes in the fact table.
    pub cardinality: usize,
}

impl StarColumn {
    /// Creates a column.
    pub fn new(
        name: impl Into<String>,
        bit_position: usize,
        cardinality: usize,
    ) -> Self {
        let name = name.into();
        Self {
            expression: name.clone(),
            name,
            bit_position,
            cardinality,
        }
    }
}

/// How a measure aggregates fact rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregator {
    /// `SUM(expr)`.
    Sum,
    /// `COUNT(expr)`.
    Count,
    /// `MIN(expr)`.
    Min,
    /// `MAX(expr)`.
    Max,
    /// `COUNT(DISTINCT expr)`.
    DistinctCount,
}

impl Aggregator {
    /// Returns whether this is a distinct aggregation. Distinct
    /// measures cannot be rolled up and disqualify grouping-sets
    /// fusion.
    #[must_use]
    pub fn is_distinct(&self) -> bool {
        matches!(self, Aggregator::DistinctCount)
    }

    /// SQL function name.
    #[must_use]
    pub fn sql_name(&self) -> &'static str {
        match self {
            Aggregator::Sum => "sum",
            Aggregator::Count => "count",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
            Aggregator::DistinctCount => "count",
        }
    }
}

/// The expression a measure aggregates over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasureExpression {
    /// A plain fact-table column.
    Column(String),
    /// A SQL expression. `subquery` marks expressions containing a
    /// subquery, which some dialects cannot combine with other distinct
    /// measures in one statement.
    Sql {
        /// The expression text.
        text: String,
        /// Whether the expression contains a subquery.
        subquery: bool,
    },
}

impl MeasureExpression {
    /// The generic SQL text of the expression, used to group distinct
    /// measures sharing one expression into one load.
    #[must_use]
    pub fn generic_text(&self) -> &str {
        match self {
            MeasureExpression::Column(name) => name,
            MeasureExpression::Sql { text, .. } => text,
        }
    }

    /// Returns whether this is a SQL expression (not a plain column).
    #[must_use]
    pub fn is_sql(&self) -> bool {
        matches!(self, MeasureExpression::Sql { .. })
    }
}

/// A measure of a star: an aggregator applied to an expression, with
/// its own bit position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Measure {
    /// Measure name, unique within the star.
    pub name: String,
    /// Stable bit position within the star.
    pub bit_position: usize,
    /// Aggregation function.
    pub aggregator: Aggregator,
    /// Expression aggregated over.
    pub expression: MeasureExpression,
}

impl Measure {
    /// Creates a measure over a plain column expression.
    pub fn new(
        name: impl Into<String>,
        bit_position: usize,
        aggregator: Aggregator,
        column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            bit_position,
            aggregator,
            expression: MeasureExpression::Column(column.into()),
        }
    }

    /// Returns whether this measure uses a distinct aggregation.
    #[must_use]
    pub fn is_distinct(&self) -> bool {
        self.aggregator.is_distinct()
    }
}

/// Descriptor of a pre-materialised aggregate table attached to a star.
///
/// Only the decision-relevant shape is modelled: which level and
/// measure bits the table carries, which of its measures are distinct,
/// and which foreign keys it still joins through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggTable {
    /// Aggregate table name.
    pub name: String,
    /// Level bits carried by the table.
    pub level_bit_key: BitKey,
    /// Measure bits carried by the table.
    pub measure_bit_key: BitKey,
    /// Subset of `measure_bit_key` that is distinct-count.
    pub distinct_measure_bit_key: BitKey,
    /// Foreign-key bits the table still joins through.
    pub foreign_key_bit_key: BitKey,
    /// For each distinct measure bit, the level bits it can still be
    /// rolled up over.
    pub rollable_level_bit_keys: HashMap<usize, BitKey>,
    /// Approximate row count; tables are tried smallest first.
    pub row_count: u64,
}

impl AggTable {
    /// Returns the union of level and measure bits.
    #[must_use]
    pub fn bit_key(&self) -> BitKey {
        self.level_bit_key.or(&self.measure_bit_key)
    }

    /// Returns whether the table carries every bit of `full_bit_key`.
    #[must_use]
    pub fn super_set_match(&self, full_bit_key: &BitKey) -> bool {
        self.bit_key().is_superset_of(full_bit_key)
    }

    /// Returns whether the table joins through any foreign key.
    #[must_use]
    pub fn has_foreign_keys(&self) -> bool {
        !self.foreign_key_bit_key.is_empty()
    }
}

/// A star: the logical identity of a fact source plus its columns,
/// measures, and cached cardinality hints.
#[derive(Debug, Clone)]
pub struct Star {
    /// Identity of the fact source.
    pub identity: StarIdentity,
    /// Columns, in schema order (bit position == index is typical but
    /// not required).
    pub columns: Vec<StarColumn>,
    /// Measures.
    pub measures: Vec<Measure>,
    /// Bits of columns that belong to parent-child closure tables.
    /// Rolling up across a closure column is unsound.
    pub closure_column_bit_key: BitKey,
    /// Cached child counts per parent member key, when known.
    pub member_child_counts: HashMap<String, usize>,
    /// Cached level cardinalities, when known.
    pub level_cardinalities: HashMap<String, usize>,
    /// Aggregate tables, ordered smallest to largest.
    pub agg_tables: Vec<AggTable>,
}

impl Star {
    /// Creates a star with no columns or measures.
    #[must_use]
    pub fn new(identity: StarIdentity) -> Self {
        Self {
            identity,
            columns: Vec::new(),
            measures: Vec::new(),
            closure_column_bit_key: BitKey::empty(),
            member_child_counts: HashMap::new(),
            level_cardinalities: HashMap::new(),
            agg_tables: Vec::new(),
        }
    }

    /// Looks up a column by bit position.
    #[must_use]
    pub fn column_by_bit(&self, bit_position: usize) -> Option<&StarColumn> {
        self.columns.iter().find(|c| c.bit_position == bit_position)
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&StarColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Looks up a measure by name.
    #[must_use]
    pub fn measure_by_name(&self, name: &str) -> Option<&Measure> {
        self.measures.iter().find(|m| m.name == name)
    }

    /// Returns the cached child count of a parent member, if any.
    #[must_use]
    pub fn child_count(&self, parent_key: &str) -> Option<usize> {
        self.member_child_counts.get(parent_key).copied()
    }

    /// Returns the cached cardinality of a level, if any.
    #[must_use]
    pub fn level_cardinality(&self, level: &str) -> Option<usize> {
        self.level_cardinalities.get(level).copied()
    }
}
