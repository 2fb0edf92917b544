//! # lattice-cache
//!
//! Segment caching for the Lattice OLAP cell engine:
//!
//! - **Segment Index**: in-process lookup of segment headers by
//!   fingerprint prefix, smallest slice first
//! - **`SegmentCache` SPI**: the plug-in contract external caches
//!   implement
//! - **In-memory cache**: the bounded first tier, with uniform-random
//!   eviction
//! - **Cache workers**: a uniform front over all tiers, enforcing the
//!   serialisation round-trip contract on every `put`
//!
//! The index and worker membership are only ever mutated from the cache
//! manager's command thread; this crate supplies the data structures,
//! not the threading.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod event;
pub mod index;
pub mod memory;
pub mod spi;
pub mod worker;

pub use event::{CacheEventKind, ListenerId, ListenerRegistry, SegmentCacheEvent};
pub use index::SegmentIndex;
pub use memory::MemorySegmentCache;
pub use spi::{SegmentCache, SegmentCacheListener};
pub use worker::SegmentCacheWorker;
