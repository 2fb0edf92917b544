//! Engine configuration.
//!
//! All recognised options of the cell-loading engine, with their effects
//! on batching, caching, and SQL generation.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BLOAT_LIMIT, DEFAULT_CACHE_MAX_ELEMENTS, DEFAULT_DENSE_THRESHOLD,
    DEFAULT_MAX_CONSTRAINTS, DEFAULT_REQUEST_QUANTUM, DEFAULT_SQL_POOL_SIZE,
};

/// Configuration for a Lattice engine instance.
///
/// # Example
///
/// ```rust
/// use lattice_common::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert!(config.enable_grouping_sets);
/// assert_eq!(config.max_constraints, 1_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Allow fusing compatible batches into one grouping-sets query.
    pub enable_grouping_sets: bool,

    /// Allow the loader to target pre-materialised aggregate tables.
    pub use_aggregates: bool,

    /// Skip the in-memory cache worker entirely.
    pub disable_caching: bool,

    /// Upper bound on `IN (...)` list length before the constraint is
    /// collapsed to `TRUE`.
    pub max_constraints: usize,

    /// Enable bloat-based constraint elimination before SQL generation.
    pub optimize_predicates: bool,

    /// Emit suggested aggregate-table DDL to the log sink when a batch
    /// loads from the fact table.
    pub generate_aggregate_sql: bool,

    /// Maximum number of entries in the in-memory segment cache.
    pub cache_max_elements: usize,

    /// Number of worker threads executing bulk fact queries.
    pub sql_pool_size: usize,

    /// Number of recorded cell requests after which the reader signals
    /// the evaluator to flush a batch early.
    pub request_quantum: usize,

    /// Density at or above which a segment dataset is stored densely.
    pub dense_threshold: f64,

    /// Running bloat product at or below which constraint elimination
    /// stops.
    pub bloat_limit: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_grouping_sets: true,
            use_aggregates: false,
            disable_caching: false,
            max_constraints: DEFAULT_MAX_CONSTRAINTS,
            optimize_predicates: true,
            generate_aggregate_sql: false,
            cache_max_elements: DEFAULT_CACHE_MAX_ELEMENTS,
            sql_pool_size: DEFAULT_SQL_POOL_SIZE,
            request_quantum: DEFAULT_REQUEST_QUANTUM,
            dense_threshold: DEFAULT_DENSE_THRESHOLD,
            bloat_limit: DEFAULT_BLOAT_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Creates a minimal configuration for testing: a small cache, a
    /// small SQL pool, and a tiny request quantum so tests can trigger
    /// early flushes without recording thousands of requests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            cache_max_elements: 8,
            sql_pool_size: 2,
            request_quantum: 100,
            ..Default::default()
        }
    }

    /// Sets the maximum `IN` list length.
    #[must_use]
    pub fn with_max_constraints(mut self, max_constraints: usize) -> Self {
        self.max_constraints = max_constraints;
        self
    }

    /// Enables or disables grouping-sets fusion.
    #[must_use]
    pub fn with_grouping_sets(mut self, enable: bool) -> Self {
        self.enable_grouping_sets = enable;
        self
    }

    /// Enables or disables predicate optimisation.
    #[must_use]
    pub fn with_optimize_predicates(mut self, enable: bool) -> Self {
        self.optimize_predicates = enable;
        self
    }

    /// Enables or disables aggregate-table targeting.
    #[must_use]
    pub fn with_use_aggregates(mut self, enable: bool) -> Self {
        self.use_aggregates = enable;
        self
    }

    /// Sets the in-memory cache bound.
    #[must_use]
    pub fn with_cache_max_elements(mut self, max_elements: usize) -> Self {
        self.cache_max_elements = max_elements;
        self
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.sql_pool_size == 0 {
            return Err("sql_pool_size must be at least 1".to_string());
        }
        if self.request_quantum == 0 {
            return Err("request_quantum must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.dense_threshold) {
            return Err("dense_threshold must be within [0.0, 1.0]".to_string());
        }
        if !(0.0..=1.0).contains(&self.bloat_limit) {
            return Err("bloat_limit must be within [0.0, 1.0]".to_string());
        }
        if !self.disable_caching && self.cache_max_elements == 0 {
            return Err("cache_max_elements must be at least 1 when caching".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_invalid_pool_size() {
        let config = EngineConfig {
            sql_pool_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_grouping_sets(false)
            .with_max_constraints(50);
        assert!(!config.enable_grouping_sets);
        assert_eq!(config.max_constraints, 50);
    }
}
