//! Error handling for Lattice.
//!
//! This module provides a unified error type and result alias used
//! across all Lattice components.

mod engine;

pub use engine::{ErrorCode, LatticeError};

/// Result type alias for Lattice operations.
pub type LatticeResult<T> = std::result::Result<T, LatticeError>;
