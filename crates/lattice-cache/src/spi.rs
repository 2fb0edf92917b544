//! The `SegmentCache` service-provider interface.
//!
//! Implementations may live in this process (the in-memory tier) or
//! behind a network transport. Every operation returns a
//! [`FutureResult`] so a remote implementation can answer
//! asynchronously; in-process implementations complete them eagerly.

use lattice_common::sync::FutureResult;
use lattice_segment::{SegmentBody, SegmentHeader};

pub use crate::event::SegmentCacheListener;
use crate::event::ListenerId;

/// A pluggable segment cache tier.
///
/// Contract: headers and bodies passed to `put` must be serialisable
/// with the wire codec; implementations may reject them. The SPI is
/// assumed thread-safe; callers add no locking on top.
pub trait SegmentCache: Send + Sync {
    /// Returns whether the cache holds a body for the header.
    fn contains(&self, header: &SegmentHeader) -> FutureResult<bool>;

    /// Returns the body for the header, if present.
    fn get(&self, header: &SegmentHeader) -> FutureResult<Option<SegmentBody>>;

    /// Stores a body under a header. Returns false if the
    /// implementation rejected the entry.
    fn put(&self, header: SegmentHeader, body: SegmentBody) -> FutureResult<bool>;

    /// Removes the entry for the header. Returns whether an entry was
    /// removed.
    fn remove(&self, header: &SegmentHeader) -> FutureResult<bool>;

    /// Returns every header the cache currently holds.
    fn segment_headers(&self) -> FutureResult<Vec<SegmentHeader>>;

    /// Registers a listener for create/delete events.
    fn add_listener(&self, listener: SegmentCacheListener) -> ListenerId;

    /// Removes a previously registered listener.
    fn remove_listener(&self, id: ListenerId);

    /// Whether the cache can enumerate headers cheaply. When false, the
    /// index falls back to full enumeration on startup.
    fn supports_rich_index(&self) -> bool;

    /// Releases resources. Idempotent.
    fn shutdown(&self) {}

    /// A short name for logs.
    fn name(&self) -> &'static str {
        "segment-cache"
    }
}
