//! System-wide constants and limits.

/// Default number of entries the in-memory segment cache may hold.
pub const DEFAULT_CACHE_MAX_ELEMENTS: usize = 100;

/// Default number of worker threads in the SQL executor pool.
pub const DEFAULT_SQL_POOL_SIZE: usize = 10;

/// Number of recorded cell requests after which the batch reader asks the
/// evaluator to flush a batch early.
pub const DEFAULT_REQUEST_QUANTUM: usize = 5_000;

/// Maximum length of a generated `IN (...)` list before the constraint is
/// collapsed to `TRUE`.
pub const DEFAULT_MAX_CONSTRAINTS: usize = 1_000;

/// Density at or above which a segment dataset is stored densely.
pub const DEFAULT_DENSE_THRESHOLD: f64 = 0.5;

/// Running bloat product at or below which remaining constraints are kept.
pub const DEFAULT_BLOAT_LIMIT: f64 = 0.5;

/// Assumed selectivity of a multi-column flush predicate when estimating
/// how many cells a flushed region covers.
pub const MULTI_PREDICATE_SELECTIVITY: f64 = 0.5;
