//! # lattice-common
//!
//! Common types, errors, and utilities for the Lattice OLAP cell engine.
//!
//! This crate provides the foundational types and abstractions used across
//! all Lattice components. It includes:
//!
//! - **Types**: Core identifiers (`BitKey`, `CellKey`), coordinate values
//!   (`DataValue`) and measure values (`CellValue`)
//! - **Errors**: Unified error handling with `LatticeError`
//! - **Config**: Engine configuration structures
//! - **Sync**: The `FutureResult` completion handle used between the cache
//!   manager, the SQL pool, and batch readers
//!
//! ## Example
//!
//! ```rust
//! use lattice_common::types::{BitKey, CellKey, DataValue};
//! use lattice_common::error::LatticeResult;
//!
//! fn example() -> LatticeResult<()> {
//!     let mut key = BitKey::with_capacity(8);
//!     key.set(3);
//!     assert!(key.get(3));
//!     let cell = CellKey::new(vec![0, 2]);
//!     assert_eq!(cell.arity(), 2);
//!     let _ = DataValue::from("CA");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constants;
pub mod error;
pub mod sync;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::EngineConfig;
pub use constants::*;
pub use error::{ErrorCode, LatticeError, LatticeResult};
pub use sync::FutureResult;
pub use types::{BitKey, CellKey, CellValue, DataValue};
