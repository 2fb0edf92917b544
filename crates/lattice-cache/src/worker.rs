//! Cache workers: a uniform front over one cache tier.
//!
//! A worker wraps a `SegmentCache` implementation, blocks on its
//! futures, and enforces the serialisation round-trip contract on every
//! `put`. That round trip is the mechanism that detects schema drift in
//! a body format before the entry ever leaves the process.

use std::sync::Arc;

use tracing::{debug, warn};

use lattice_common::error::{LatticeError, LatticeResult};
use lattice_segment::body::{decode_body, decode_header, encode_body, encode_header};
use lattice_segment::{SegmentBody, SegmentHeader};

use crate::event::ListenerId;
use crate::spi::{SegmentCache, SegmentCacheListener};

/// A worker wrapping one cache tier.
pub struct SegmentCacheWorker {
    cache: Arc<dyn SegmentCache>,
}

impl SegmentCacheWorker {
    /// Creates a worker over a cache tier.
    #[must_use]
    pub fn new(cache: Arc<dyn SegmentCache>) -> Self {
        Self { cache }
    }

    /// The wrapped tier's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.cache.name()
    }

    /// Returns whether the tier holds a body for the header.
    pub fn contains(&self, header: &SegmentHeader) -> bool {
        match self.cache.contains(header).wait() {
            Ok(present) => present,
            Err(e) => {
                warn!(cache = self.name(), error = %e, "contains failed");
                false
            }
        }
    }

    /// Returns the body for the header, if the tier holds one.
    pub fn get(&self, header: &SegmentHeader) -> LatticeResult<Option<SegmentBody>> {
        self.cache.get(header).wait()
    }

    /// Stores a body, verifying first that both header and body survive
    /// the wire codec. A round-trip failure is fatal for this put and
    /// propagates as `NotSerializable`.
    pub fn put(&self, header: SegmentHeader, body: SegmentBody) -> LatticeResult<bool> {
        let header_bytes = encode_header(&header)?;
        if decode_header(&header_bytes)? != header {
            return Err(LatticeError::NotSerializable {
                what: "header",
                reason: "round trip produced a different header".into(),
            });
        }
        let body_bytes = encode_body(&body)?;
        if decode_body(&body_bytes)? != body {
            return Err(LatticeError::NotSerializable {
                what: "body",
                reason: "round trip produced a different body".into(),
            });
        }
        debug!(cache = self.name(), segment = %header, "storing segment");
        self.cache.put(header, body).wait()
    }

    /// Removes the entry for the header.
    pub fn remove(&self, header: &SegmentHeader) -> LatticeResult<bool> {
        self.cache.remove(header).wait()
    }

    /// Enumerates the headers the tier holds. Tiers without a rich
    /// index enumerate the hard way; either way the caller gets the
    /// full list.
    pub fn segment_headers(&self) -> LatticeResult<Vec<SegmentHeader>> {
        self.cache.segment_headers().wait()
    }

    /// Registers a listener on the tier.
    pub fn add_listener(&self, listener: SegmentCacheListener) -> ListenerId {
        self.cache.add_listener(listener)
    }

    /// Whether the tier can enumerate headers cheaply.
    #[must_use]
    pub fn supports_rich_index(&self) -> bool {
        self.cache.supports_rich_index()
    }

    /// Shuts the tier down. Idempotent.
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}
