//! Core types for the Lattice engine.
//!
//! This module defines the identifiers and value types shared by the
//! segment model, the cache, and the loading pipeline:
//!
//! - [`BitKey`]: fixed-width set of column bit positions
//! - [`CellKey`]: multi-axis cell coordinate (one ordinal per axis)
//! - [`DataValue`]: a column key value on an axis or in a predicate
//! - [`CellValue`]: a measure value with widening numeric addition

mod bitkey;
mod cell;
mod value;

pub use bitkey::BitKey;
pub use cell::CellKey;
pub use value::{CellValue, DataValue};
