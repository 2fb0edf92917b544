//! # lattice-segment
//!
//! The segment model for the Lattice OLAP cell engine: immutable
//! multi-axis cell arrays with predicates, axes, and excluded regions.
//!
//! A segment caches the result of one bulk fact query: for each
//! constrained column an axis of sorted keys, and a dense or sparse
//! dataset mapping cell coordinates to measure values. Segments are
//! identified by their [`SegmentHeader`], a serialisable fingerprint
//! that cache tiers exchange without the data.
//!
//! - [`star`]: fact-source identity, columns with stable bit positions,
//!   measures and aggregators
//! - [`predicate`] / [`compound`]: decidable constraints over one column
//!   or over tuples
//! - [`axis`] / [`dataset`]: materialised keys and cell storage
//! - [`header`] / [`body`]: the wire format and its bincode codec
//! - [`builder`]: reconstructing segments from headers and attaching
//!   bodies

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod axis;
pub mod body;
pub mod builder;
pub mod compound;
pub mod dataset;
pub mod header;
pub mod predicate;
pub mod region;
pub mod segment;
pub mod star;

pub use axis::SegmentAxis;
pub use body::{BodyCells, SegmentBody};
pub use compound::StarPredicate;
pub use dataset::SegmentDataset;
pub use header::{ConstrainedColumn, SegmentHeader};
pub use predicate::{ColumnPredicate, MemberPredicate};
pub use region::ExcludedRegion;
pub use segment::{Segment, SegmentWithData};
pub use star::{AggTable, Aggregator, Measure, MeasureExpression, Star, StarColumn, StarIdentity};
