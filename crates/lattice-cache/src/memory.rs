//! The in-memory segment cache tier.
//!
//! A bounded map from header to body. On overflow one resident entry,
//! chosen uniformly at random, is evicted and announced with a
//! `Deleted` event, so the index can drop the header through the usual
//! event path.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use lattice_common::constants::DEFAULT_CACHE_MAX_ELEMENTS;
use lattice_common::sync::FutureResult;
use lattice_segment::{SegmentBody, SegmentHeader};

use crate::event::{CacheEventKind, ListenerId, ListenerRegistry, SegmentCacheEvent};
use crate::spi::{SegmentCache, SegmentCacheListener};

/// The in-memory cache tier.
pub struct MemorySegmentCache {
    entries: RwLock<HashMap<SegmentHeader, SegmentBody>>,
    listeners: ListenerRegistry,
    max_elements: usize,
    rng: Mutex<StdRng>,
}

impl MemorySegmentCache {
    /// Creates a cache bounded at `max_elements` entries.
    #[must_use]
    pub fn new(max_elements: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            listeners: ListenerRegistry::new(),
            max_elements: max_elements.max(1),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Creates a cache with a seeded RNG, for deterministic eviction in
    /// tests.
    #[must_use]
    pub fn with_seed(max_elements: usize, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..Self::new(max_elements)
        }
    }

    /// Current number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the cache holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn emit(&self, header: SegmentHeader, kind: CacheEventKind) {
        self.listeners.notify(&SegmentCacheEvent {
            is_local: true,
            source: header,
            kind,
        });
    }
}

impl Default for MemorySegmentCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_ELEMENTS)
    }
}

impl SegmentCache for MemorySegmentCache {
    fn contains(&self, header: &SegmentHeader) -> FutureResult<bool> {
        FutureResult::ready(self.entries.read().contains_key(header))
    }

    fn get(&self, header: &SegmentHeader) -> FutureResult<Option<SegmentBody>> {
        FutureResult::ready(self.entries.read().get(header).cloned())
    }

    fn put(&self, header: SegmentHeader, body: SegmentBody) -> FutureResult<bool> {
        let evicted = {
            let mut entries = self.entries.write();
            let evicted = if !entries.contains_key(&header) && entries.len() >= self.max_elements {
                // Evict a real entry chosen uniformly at random.
                let victim_index = self.rng.lock().gen_range(0..entries.len());
                let victim = entries
                    .keys()
                    .nth(victim_index)
                    .cloned()
                    .expect("victim index in range");
                entries.remove(&victim);
                Some(victim)
            } else {
                None
            };
            entries.insert(header.clone(), body);
            evicted
        };
        if let Some(victim) = evicted {
            debug!(segment = %victim, "evicting segment from in-memory cache");
            self.emit(victim, CacheEventKind::Deleted);
        }
        self.emit(header, CacheEventKind::Created);
        FutureResult::ready(true)
    }

    fn remove(&self, header: &SegmentHeader) -> FutureResult<bool> {
        let removed = self.entries.write().remove(header).is_some();
        if removed {
            self.emit(header.clone(), CacheEventKind::Deleted);
        }
        FutureResult::ready(removed)
    }

    fn segment_headers(&self) -> FutureResult<Vec<SegmentHeader>> {
        FutureResult::ready(self.entries.read().keys().cloned().collect())
    }

    fn add_listener(&self, listener: SegmentCacheListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }

    fn supports_rich_index(&self) -> bool {
        true
    }

    fn shutdown(&self) {
        self.entries.write().clear();
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
