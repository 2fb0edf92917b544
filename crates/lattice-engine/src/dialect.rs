//! Dialect capability flags.
//!
//! SQL dialect generation proper lives behind the `SqlExecutor`; the
//! engine only needs the capability bits that change its plans.

/// Capability flags of the target database dialect.
#[derive(Debug, Clone)]
pub struct Dialect {
    /// Dialect name, for logs.
    pub name: String,
    /// Whether `GROUP BY GROUPING SETS` is available.
    pub supports_grouping_sets: bool,
    /// Whether `COUNT(DISTINCT ...)` is available at all.
    pub allows_count_distinct: bool,
    /// Whether one statement may contain several different
    /// `COUNT(DISTINCT ...)` aggregates.
    pub allows_multiple_count_distinct: bool,
    /// Whether one statement may contain several distinct aggregates
    /// over SQL expressions (as opposed to plain columns).
    pub allows_multiple_distinct_sql_measures: bool,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            name: "generic".to_string(),
            supports_grouping_sets: true,
            allows_count_distinct: true,
            allows_multiple_count_distinct: true,
            allows_multiple_distinct_sql_measures: true,
        }
    }
}

impl Dialect {
    /// A dialect with every capability disabled except plain grouping,
    /// useful in tests.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            name: "minimal".to_string(),
            supports_grouping_sets: false,
            allows_count_distinct: true,
            allows_multiple_count_distinct: false,
            allows_multiple_distinct_sql_measures: false,
        }
    }
}
