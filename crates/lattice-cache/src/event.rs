//! Cache events and listener plumbing.
//!
//! Every `put`, `remove`, and eviction emits a tagged event record to
//! registered listeners. A listener panic is logged and swallowed; the
//! local index stays authoritative.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use lattice_segment::SegmentHeader;

/// What happened to a segment in a cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    /// A segment entry was created.
    Created,
    /// A segment entry was deleted or evicted.
    Deleted,
}

/// A tagged cache event.
#[derive(Debug, Clone)]
pub struct SegmentCacheEvent {
    /// Whether the event originated in this process.
    pub is_local: bool,
    /// Header of the affected segment.
    pub source: SegmentHeader,
    /// What happened.
    pub kind: CacheEventKind,
}

/// Callback invoked for each cache event.
pub type SegmentCacheListener = Arc<dyn Fn(&SegmentCacheEvent) + Send + Sync>;

/// Handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A registry of cache event listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, SegmentCacheListener)>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener and returns its handle.
    pub fn add(&self, listener: SegmentCacheListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Removes a listener by handle.
    pub fn remove(&self, id: ListenerId) {
        self.listeners.write().retain(|(lid, _)| *lid != id);
    }

    /// Delivers an event to every listener. A panicking listener is
    /// logged and skipped.
    pub fn notify(&self, event: &SegmentCacheEvent) {
        let listeners = self.listeners.read().clone();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(listener = id.0, "segment cache listener panicked; event dropped");
            }
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns true if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_common::types::BitKey;
    use lattice_segment::star::StarIdentity;
    use std::sync::atomic::AtomicUsize;

    fn header() -> SegmentHeader {
        SegmentHeader::new(
            StarIdentity::new("Sales", "abc", "Sales", "sales_fact"),
            "Unit Sales",
            BitKey::from_positions([0]),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn test_notify_and_remove() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let id = registry.add(Arc::new(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        }));

        let event = SegmentCacheEvent {
            is_local: true,
            source: header(),
            kind: CacheEventKind::Created,
        };
        registry.notify(&event);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        registry.remove(id);
        registry.notify(&event);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_panicking_listener_is_swallowed() {
        let registry = ListenerRegistry::new();
        registry.add(Arc::new(|_| panic!("listener bug")));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        registry.add(Arc::new(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        }));

        registry.notify(&SegmentCacheEvent {
            is_local: false,
            source: header(),
            kind: CacheEventKind::Deleted,
        });
        // The panic did not prevent delivery to the second listener.
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
