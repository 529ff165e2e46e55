//! Knowledge base loader: lazy, cached, single-flight loading of role
//! indexes, with best-effort background preloading.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::LoaderConfig;
use crate::errors::{RetrievalError, Result};
use crate::loader::cache::{CacheStatistics, LruCache};
use crate::loader::preload::PreloadStrategy;
use crate::loader::stats::{LoadingStats, StatsReport};
use crate::providers::{IndexBuilder, RoleIndex, RoleRegistry};

type LoadOutcome = Result<Arc<dyn RoleIndex>>;
type InflightLoad = Shared<BoxFuture<'static, LoadOutcome>>;

/// Loads role indexes on demand through the LRU cache.
///
/// Concurrent misses for the same role share one in-flight load (success and
/// failure alike); a handle's load/unload lifecycle belongs exclusively to
/// this loader while it sits in the cache.
pub struct KnowledgeBaseLoader {
    shared: Arc<LoaderShared>,
    preload_workers: Arc<Semaphore>,
    preload_tasks: Mutex<Vec<JoinHandle<()>>>,
    drain_timeout: Duration,
}

/// State reachable from spawned load and preload tasks.
struct LoaderShared {
    registry: Arc<dyn RoleRegistry>,
    builder: Arc<dyn IndexBuilder>,
    cache: LruCache<String, Arc<dyn RoleIndex>>,
    stats: LoadingStats,
    preload: PreloadStrategy,
    inflight: Mutex<HashMap<String, InflightLoad>>,
}

impl KnowledgeBaseLoader {
    pub fn new(
        registry: Arc<dyn RoleRegistry>,
        builder: Arc<dyn IndexBuilder>,
        config: LoaderConfig,
    ) -> Result<Self> {
        if config.preload_workers == 0 {
            return Err(RetrievalError::Config(
                "preload_workers must be positive".to_string(),
            ));
        }

        let cache = LruCache::new(config.max_cache_size)?;
        info!(
            max_cache_size = config.max_cache_size,
            preload_workers = config.preload_workers,
            "knowledge base loader initialized"
        );

        Ok(Self {
            shared: Arc::new(LoaderShared {
                registry,
                builder,
                cache,
                stats: LoadingStats::new(),
                preload: PreloadStrategy::new(config.preload),
                inflight: Mutex::new(HashMap::new()),
            }),
            preload_workers: Arc::new(Semaphore::new(config.preload_workers)),
            preload_tasks: Mutex::new(Vec::new()),
            drain_timeout: Duration::from_secs(config.shutdown_drain_secs),
        })
    }

    /// Get a role's index, loading it on a cache miss.
    pub async fn get_index(&self, role_id: &str) -> Result<Arc<dyn RoleIndex>> {
        LoaderShared::get_index(&self.shared, role_id).await
    }

    /// Remove a role's index from the cache and unload it.
    ///
    /// Returns whether an entry was removed; unload errors are logged, not
    /// propagated.
    pub async fn unload_index(&self, role_id: &str) -> bool {
        match self.shared.cache.remove(&role_id.to_string()) {
            Some(handle) => {
                if let Err(e) = handle.unload().await {
                    warn!(role_id, error = %e, "index unload reported an error");
                } else {
                    info!(role_id, "unloaded role index");
                }
                true
            }
            None => false,
        }
    }

    /// Schedule preloading for the highest-scored enabled roles.
    ///
    /// Loads run on the bounded preload pool; this returns without waiting
    /// for them, and their failures are logged and swallowed.
    pub async fn preload_indices(&self) {
        let enabled_roles = self.shared.registry.get_enabled_roles().await;
        let to_preload = self.shared.preload.decide_preload_roles(&enabled_roles);
        info!(count = to_preload.len(), "scheduling index preload");

        let mut tasks = self.preload_tasks.lock().unwrap();
        tasks.retain(|task| !task.is_finished());

        for role in to_preload {
            let shared = Arc::clone(&self.shared);
            let workers = Arc::clone(&self.preload_workers);
            tasks.push(tokio::spawn(async move {
                let _permit = match workers.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                match LoaderShared::get_index(&shared, &role.id).await {
                    Ok(_) => debug!(role_id = %role.id, "preloaded role index"),
                    Err(e) => warn!(role_id = %role.id, error = %e, "preload failed"),
                }
            }));
        }
    }

    /// Re-run preload scheduling against current usage statistics.
    pub async fn refresh_preload(&self) {
        self.preload_indices().await;
    }

    /// Drain in-flight preload tasks within the configured window, abort the
    /// rest, and unload every cached index.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut pending = self.preload_tasks.lock().unwrap();
            pending.drain(..).collect()
        };

        if !tasks.is_empty() {
            let aborts: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();
            let drain = futures_util::future::join_all(tasks);
            if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
                warn!("preload drain window elapsed, aborting remaining tasks");
                for handle in aborts {
                    handle.abort();
                }
            }
        }

        for (role_id, handle) in self.shared.cache.clear() {
            if let Err(e) = handle.unload().await {
                warn!(role_id, error = %e, "failed to unload index during shutdown");
            }
        }

        info!("knowledge base loader shut down");
    }

    /// Record one use of a role for preload ranking.
    pub fn record_usage(&self, role_id: &str) {
        self.shared.preload.record_usage(role_id);
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.shared.cache.statistics()
    }

    pub fn loading_statistics(&self) -> StatsReport {
        self.shared.stats.generate_report()
    }

    pub fn loading_stats(&self) -> &LoadingStats {
        &self.shared.stats
    }

    pub fn preload_strategy(&self) -> &PreloadStrategy {
        &self.shared.preload
    }
}

impl LoaderShared {
    async fn get_index(shared: &Arc<Self>, role_id: &str) -> LoadOutcome {
        if role_id.is_empty() {
            return Err(RetrievalError::RoleNotFound {
                role_id: String::new(),
            });
        }

        // Fast path: already resident
        if let Some(handle) = shared.cache.get(&role_id.to_string()) {
            shared.stats.record_cache_hit(role_id);
            shared.preload.record_usage(role_id);
            debug!(role_id, "index cache hit");
            return Ok(handle);
        }

        // Miss: join the in-flight load for this role, or start one
        let flight = {
            let mut inflight = shared.inflight.lock().unwrap();
            match inflight.get(role_id) {
                Some(flight) => flight.clone(),
                None => {
                    let flight = Self::load_role(Arc::clone(shared), role_id.to_string())
                        .boxed()
                        .shared();
                    inflight.insert(role_id.to_string(), flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// The single shared load for one role; every concurrent miss awaits
    /// this same future.
    async fn load_role(shared: Arc<Self>, role_id: String) -> LoadOutcome {
        info!(role_id, "loading role index");
        let started = Instant::now();

        let outcome = match shared.build_and_load(&role_id).await {
            Ok(handle) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let put = shared.cache.put(role_id.clone(), Arc::clone(&handle));

                if let Some((evicted_id, evicted)) = put.evicted {
                    tokio::spawn(async move {
                        if let Err(e) = evicted.unload().await {
                            warn!(role_id = %evicted_id, error = %e, "failed to unload evicted index");
                        } else {
                            debug!(role_id = %evicted_id, "unloaded evicted index");
                        }
                    });
                }
                if let Some(previous) = put.previous {
                    // Single-flight keeps this from happening for the same
                    // role; release the handle anyway if it does.
                    tokio::spawn(async move {
                        let _ = previous.unload().await;
                    });
                }

                shared.stats.record_load(&role_id, elapsed_ms);
                shared.preload.record_usage(&role_id);
                info!(role_id, elapsed_ms, "role index loaded");
                Ok(handle)
            }
            Err(e) => {
                shared.stats.record_load_failure(&role_id, &e.to_string());
                error!(role_id, error = %e, "role index load failed");
                Err(e)
            }
        };

        shared.inflight.lock().unwrap().remove(&role_id);
        outcome
    }

    async fn build_and_load(&self, role_id: &str) -> LoadOutcome {
        let role = self.registry.get_role(role_id).await.ok_or_else(|| {
            RetrievalError::RoleNotFound {
                role_id: role_id.to_string(),
            }
        })?;

        let handle = self
            .builder
            .get_or_create_index(&role)
            .await
            .map_err(|e| RetrievalError::LoadFailure {
                role_id: role_id.to_string(),
                reason: e.to_string(),
            })?;

        handle
            .load()
            .await
            .map_err(|e| RetrievalError::LoadFailure {
                role_id: role_id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(handle)
    }
}
