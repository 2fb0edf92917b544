//! # lattice-engine
//!
//! The batched cell-loading pipeline of the Lattice OLAP engine.
//!
//! The engine turns many per-cell measurement requests into a minimal
//! set of bulk fact-table queries, caches the resulting segments, and
//! services later lookups from cache:
//!
//! 1. The evaluator asks the [`BatchReader`] for each cell; misses are
//!    recorded, not answered.
//! 2. `load_aggregations` submits the misses to the
//!    [`SegmentCacheManager`] as one command. Requests answerable from
//!    the segment index become ready futures; the rest become batches.
//! 3. Compatible batches fuse into grouping-sets queries
//!    ([`batch::group_batches`]); predicates are de-bloated
//!    ([`optimize::optimize_predicates`]).
//! 4. The loader runs the SQL on a fixed worker pool, hydrates one
//!    segment per measure per grouping set, registers them, and
//!    resolves the futures.
//! 5. [`CacheControl::flush`] invalidates regions precisely, tightening
//!    surviving segments instead of dropping them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agg;
pub mod batch;
pub mod dialect;
pub mod engine;
pub mod execution;
pub mod flush;
pub mod loader;
pub mod manager;
pub mod optimize;
pub mod pool;
pub mod reader;
pub mod request;
pub mod sql;

pub use batch::{Batch, CompositeBatch};
pub use dialect::Dialect;
pub use engine::{EngineContext, LatticeEngine};
pub use execution::Execution;
pub use flush::{CacheControl, CacheRegion, FlushResult};
pub use manager::SegmentCacheManager;
pub use reader::{BatchReader, CellResult};
pub use request::{AggregationKey, CellRequest};
pub use sql::{ColumnType, RowCursor, SqlExecutor, SqlRow};
