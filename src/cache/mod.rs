use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OnceCell, OwnedRwLockReadGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::archive::{Archive, ContainerDecoder, ZipDecoder};
use crate::config::CacheConfig;
use crate::error::{ArchiveError, Result};
use crate::providers::{self, ContainerProvider};
use crate::vfs::{DocumentId, mime};

type Registry = Mutex<LruCache<String, Arc<Loader>>>;

/// Bounded registry of open archives, keyed by container id.
///
/// Archives are opened lazily on the first [`ArchiveHandle::get`] and closed
/// when they fall out of the LRU window, when the provider signals that the
/// container changed, or on [`close_archive`](ArchiveCache::close_archive).
/// Closing waits for every outstanding handle on that archive to be released.
pub struct ArchiveCache {
    /// LRU registry mapping container ids to loaders
    loaders: Arc<Registry>,
    provider: Arc<dyn ContainerProvider>,
    decoder: Arc<dyn ContainerDecoder>,
    config: Arc<CacheConfig>,
    closed: Arc<AtomicBool>,
}

/// One registry slot: the archive for a container, built on demand
struct Loader {
    container_id: String,
    slot: Arc<RwLock<Slot>>,
    /// Cancelled once the loader leaves the registry
    retired: CancellationToken,
}

struct Slot {
    archive: OnceCell<Arc<Archive>>,
    evicted: bool,
}

impl Loader {
    fn new(container_id: &str) -> Self {
        Loader {
            container_id: container_id.to_string(),
            slot: Arc::new(RwLock::new(Slot {
                archive: OnceCell::new(),
                evicted: false,
            })),
            retired: CancellationToken::new(),
        }
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.retired.cancel();
    }
}

/// Shared access to one cached archive.
///
/// While a handle is alive the archive cannot be closed; drop it (or pass
/// it to [`ArchiveCache::release`]) when done.
pub struct ArchiveHandle {
    cache: ArchiveCache,
    loader: Arc<Loader>,
    slot: OwnedRwLockReadGuard<Slot>,
}

impl ArchiveHandle {
    pub fn container_id(&self) -> &str {
        &self.loader.container_id
    }

    /// The archive, opening the container if this is the first access.
    ///
    /// Concurrent callers share one construction. A failed construction is
    /// not remembered, so the next call tries again.
    pub async fn get(&self) -> Result<Arc<Archive>> {
        self.slot
            .archive
            .get_or_try_init(|| self.cache.load(&self.loader))
            .await
            .cloned()
    }
}

impl ArchiveCache {
    /// Create a cache for zip-family containers served by `provider`
    pub fn new(provider: Arc<dyn ContainerProvider>, config: CacheConfig) -> Self {
        Self::with_decoder(provider, Arc::new(ZipDecoder::default()), config)
    }

    pub fn with_decoder(
        provider: Arc<dyn ContainerProvider>,
        decoder: Arc<dyn ContainerDecoder>,
        config: CacheConfig,
    ) -> Self {
        let config = config.normalized();
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        ArchiveCache {
            loaders: Arc::new(Mutex::new(LruCache::new(capacity))),
            provider,
            decoder,
            config: Arc::new(config),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a handle on the archive serving `id`, registering it if needed.
    ///
    /// Only registers the container; nothing is opened until
    /// [`ArchiveHandle::get`].
    pub async fn obtain(&self, id: &DocumentId) -> Result<ArchiveHandle> {
        loop {
            let loader = self.loader_for(&id.container_id)?;
            let slot = Arc::clone(&loader.slot).read_owned().await;
            if slot.evicted {
                // Lost a race with eviction; the registry holds a fresh loader now
                trace!(container = %id.container_id, "loader evicted while waiting");
                continue;
            }
            return Ok(ArchiveHandle {
                cache: self.clone(),
                loader,
                slot,
            });
        }
    }

    /// Give back a handle obtained from [`obtain`](ArchiveCache::obtain)
    pub fn release(&self, handle: ArchiveHandle) {
        trace!(container = %handle.container_id(), "releasing archive");
        drop(handle);
    }

    /// Close one container's archive.
    ///
    /// Returns immediately; the archive is closed once its outstanding handles
    /// are released. `None` if the container was not cached.
    pub fn close_archive(&self, container_id: &str) -> Option<JoinHandle<()>> {
        let loader = self.lock().pop(container_id)?;
        info!(container = %container_id, "closing archive");
        Some(retire(loader))
    }

    /// Close every cached archive and refuse further lookups
    pub fn close(&self) -> JoinHandle<()> {
        self.closed.store(true, Ordering::Release);

        let retiring: Vec<_> = {
            let mut loaders = self.lock();
            std::iter::from_fn(|| loaders.pop_lru())
                .map(|(_, loader)| retire(loader))
                .collect()
        };
        info!(archives = retiring.len(), "closing archive cache");

        tokio::spawn(async move {
            for result in futures::future::join_all(retiring).await {
                if let Err(err) = result {
                    warn!(error = %err, "archive close task failed");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, container_id: &str) -> bool {
        self.lock().contains(container_id)
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<Loader>>> {
        self.loaders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn loader_for(&self, container_id: &str) -> Result<Arc<Loader>> {
        let mut loaders = self.lock();
        // Checked under the lock so nothing slips in after `close` drained it
        if self.closed.load(Ordering::Acquire) {
            return Err(ArchiveError::illegal_state("archive cache is closed"));
        }

        if let Some(loader) = loaders.get(container_id) {
            trace!(container = %container_id, "cache hit");
            return Ok(Arc::clone(loader));
        }

        debug!(container = %container_id, "cache miss");
        let loader = Arc::new(Loader::new(container_id));
        if let Some((evicted_id, evicted)) =
            loaders.push(container_id.to_string(), Arc::clone(&loader))
        {
            debug!(container = %evicted_id, "evicting least recently used archive");
            retire(evicted);
        }
        Ok(loader)
    }

    async fn load(&self, loader: &Arc<Loader>) -> Result<Arc<Archive>> {
        let container_id = loader.container_id.clone();
        let metadata = self.provider.query_metadata(&container_id).await?;
        if !mime::is_supported_container(&metadata.mime_type) {
            return Err(ArchiveError::invalid_argument(format!(
                "unsupported container type {} for {container_id}",
                metadata.mime_type
            )));
        }

        let source = providers::resolve_source(&*self.provider, &container_id, &metadata).await?;
        let decoder = Arc::clone(&self.decoder);
        let config = Arc::clone(&self.config);
        let archive = tokio::task::spawn_blocking(move || {
            let container = decoder.open(&container_id, source)?;
            Archive::new(container_id, container, &config)
        })
        .await?
        .inspect_err(|err| {
            warn!(container = %loader.container_id, error = %err, "failed to open archive");
        })?;

        if let Some(signal) = metadata.change_signal {
            self.watch(loader, signal);
        }
        Ok(Arc::new(archive))
    }

    /// Drop the loader from the registry when its container changes
    fn watch(&self, loader: &Arc<Loader>, signal: CancellationToken) {
        let loaders = Arc::downgrade(&self.loaders);
        let weak = Arc::downgrade(loader);
        let retired = loader.retired.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = retired.cancelled() => {}
                _ = signal.cancelled() => {
                    if let (Some(loaders), Some(loader)) = (loaders.upgrade(), weak.upgrade()) {
                        invalidate(&loaders, &loader);
                    }
                }
            }
        });
    }
}

impl Clone for ArchiveCache {
    fn clone(&self) -> Self {
        ArchiveCache {
            loaders: Arc::clone(&self.loaders),
            provider: Arc::clone(&self.provider),
            decoder: Arc::clone(&self.decoder),
            config: Arc::clone(&self.config),
            closed: Arc::clone(&self.closed),
        }
    }
}

/// Remove `loader` from the registry, unless the registry already moved on
/// to a newer loader for the same container
fn invalidate(loaders: &Registry, loader: &Arc<Loader>) -> Option<JoinHandle<()>> {
    let mut registry = loaders.lock().unwrap_or_else(PoisonError::into_inner);
    let current = registry.peek(loader.container_id.as_str())?;
    if !Arc::ptr_eq(current, loader) {
        debug!(container = %loader.container_id, "ignoring stale change notification");
        return None;
    }
    let loader = registry.pop(loader.container_id.as_str())?;
    drop(registry);

    info!(container = %loader.container_id, "container changed, invalidating archive");
    Some(retire(loader))
}

/// Close a loader that already left the registry, once its readers are gone
fn retire(loader: Arc<Loader>) -> JoinHandle<()> {
    loader.retired.cancel();
    tokio::spawn(async move {
        let mut slot = loader.slot.write().await;
        slot.evicted = true;
        if let Some(archive) = slot.archive.take() {
            archive.close();
        }
        debug!(container = %loader.container_id, "archive retired");
    })
}
