//! The engine instance: wiring for config, cache tiers, the manager,
//! and the SQL pool.
//!
//! One `LatticeEngine` exists per server instance, constructed
//! explicitly - there are no ambient globals. It owns the cache worker
//! membership, hooks external caches into the manager's command queue,
//! and hands out per-statement batch readers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use lattice_cache::{CacheEventKind, MemorySegmentCache, SegmentCache, SegmentCacheWorker};
use lattice_common::config::EngineConfig;
use lattice_common::error::{LatticeError, LatticeResult};
use lattice_common::sync::FutureResult;
use lattice_segment::star::Star;
use lattice_segment::{SegmentHeader, SegmentWithData};

use crate::dialect::Dialect;
use crate::execution::Execution;
use crate::flush::CacheControl;
use crate::manager::SegmentCacheManager;
use crate::pool::SqlExecutorPool;
use crate::reader::BatchReader;
use crate::sql::SqlExecutor;

/// Shared services of one engine instance.
pub struct EngineContext {
    /// Engine configuration.
    pub config: EngineConfig,
    /// Dialect capability flags.
    pub dialect: Dialect,
    /// The SQL executor, called from pool threads only.
    pub executor: Arc<dyn SqlExecutor>,
    /// The SQL worker pool.
    pub pool: SqlExecutorPool,
    /// The cache manager command thread.
    pub manager: SegmentCacheManager,
    /// Cache workers, in lookup priority order (in-memory first).
    /// Mutated only from the manager thread; read from anywhere.
    pub workers: RwLock<Vec<Arc<SegmentCacheWorker>>>,
    /// Segments currently being loaded, by header. Written only from
    /// the manager thread; batch readers read it to report pending
    /// cells.
    pub loading: RwLock<HashMap<SegmentHeader, FutureResult<SegmentWithData>>>,
}

/// An OLAP cell-resolution engine instance.
pub struct LatticeEngine {
    ctx: Arc<EngineContext>,
}

impl LatticeEngine {
    /// Creates an engine.
    ///
    /// `external_caches` are plug-in tiers consulted after the
    /// in-memory tier; their announcements flow into the segment index
    /// through the manager's command queue.
    pub fn new(
        config: EngineConfig,
        dialect: Dialect,
        executor: Arc<dyn SqlExecutor>,
        external_caches: Vec<Arc<dyn SegmentCache>>,
    ) -> LatticeResult<Self> {
        config
            .validate()
            .map_err(|message| LatticeError::InvalidConfig { message })?;

        let ctx = Arc::new(EngineContext {
            pool: SqlExecutorPool::new(config.sql_pool_size),
            manager: SegmentCacheManager::new(),
            workers: RwLock::new(Vec::new()),
            loading: RwLock::new(HashMap::new()),
            config,
            dialect,
            executor,
        });

        {
            let mut workers = ctx.workers.write();
            if ctx.config.disable_caching {
                info!("in-memory segment cache disabled");
            } else {
                let memory: Arc<dyn SegmentCache> =
                    Arc::new(MemorySegmentCache::new(ctx.config.cache_max_elements));
                Self::hook_listener(&ctx, &memory);
                workers.push(Arc::new(SegmentCacheWorker::new(memory)));
            }
            for cache in external_caches {
                Self::hook_listener(&ctx, &cache);
                workers.push(Arc::new(SegmentCacheWorker::new(cache)));
            }
        }

        let engine = Self { ctx };
        engine.populate_index_from_workers();
        Ok(engine)
    }

    /// Subscribes the manager to a cache tier's events.
    fn hook_listener(ctx: &Arc<EngineContext>, cache: &Arc<dyn SegmentCache>) {
        let weak = Arc::downgrade(ctx);
        cache.add_listener(Arc::new(move |event| {
            let Some(ctx) = weak.upgrade() else {
                return;
            };
            let header = event.source.clone();
            let result = match (event.is_local, event.kind) {
                (false, CacheEventKind::Created) => ctx.manager.enqueue(move |state| {
                    debug!(segment = %header, "external segment created");
                    state.index.register(header);
                }),
                (false, CacheEventKind::Deleted) => ctx.manager.enqueue(move |state| {
                    debug!(segment = %header, "external segment deleted");
                    state.index.unregister(&header);
                }),
                (true, CacheEventKind::Deleted) => {
                    // Local eviction: drop the header unless another
                    // tier still holds the body.
                    let ctx2 = Arc::clone(&ctx);
                    ctx.manager.enqueue(move |state| {
                        let resident = ctx2
                            .workers
                            .read()
                            .iter()
                            .any(|worker| worker.contains(&header));
                        if !resident {
                            state.index.unregister(&header);
                        }
                    })
                }
                (true, CacheEventKind::Created) => Ok(()),
            };
            if let Err(e) = result {
                warn!(error = %e, "dropping cache event");
            }
        }));
    }

    /// Seeds the index with headers already present in the tiers.
    /// Tiers without a rich index are enumerated the slow way; the
    /// resulting registrations are identical.
    fn populate_index_from_workers(&self) {
        let workers = self.ctx.workers.read().clone();
        for worker in workers {
            if !worker.supports_rich_index() {
                debug!(
                    cache = worker.name(),
                    "no rich index; enumerating all headers"
                );
            }
            match worker.segment_headers() {
                Ok(headers) => {
                    if headers.is_empty() {
                        continue;
                    }
                    let _ = self.ctx.manager.enqueue(move |state| {
                        for header in headers {
                            state.index.register(header);
                        }
                    });
                }
                Err(e) => warn!(cache = worker.name(), error = %e, "header enumeration failed"),
            }
        }
    }

    /// Registers a star with the engine.
    pub fn register_star(&self, star: Arc<Star>) -> LatticeResult<()> {
        self.ctx.manager.execute(move |state| {
            state.stars.insert(star.identity.clone(), star);
        })
    }

    /// Creates the batch reader for one statement execution.
    #[must_use]
    pub fn create_reader(&self, execution: Arc<Execution>) -> BatchReader {
        BatchReader::new(Arc::clone(&self.ctx), execution)
    }

    /// Returns the cache control API.
    #[must_use]
    pub fn cache_control(&self) -> CacheControl {
        CacheControl::new(Arc::clone(&self.ctx))
    }

    /// Number of headers currently registered in the segment index.
    pub fn segment_count(&self) -> LatticeResult<usize> {
        self.ctx.manager.execute(|state| state.index.len())
    }

    /// Shuts the engine down: drains the command queue, stops the SQL
    /// pool, and shuts each cache worker down. Idempotent.
    pub fn shutdown(&self) {
        self.ctx.manager.shutdown();
        self.ctx.pool.shutdown();
        for worker in self.ctx.workers.read().iter() {
            worker.shutdown();
        }
        info!("engine stopped");
    }

    pub(crate) fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }
}
