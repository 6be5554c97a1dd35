use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ContainerMetadata, ContainerProvider};
use crate::error::{ArchiveError, Result};
use crate::vfs::mime;

/// Change signals tracked at once before the oldest are let go
const DEFAULT_TRACKED_CONTAINERS: usize = 1024;

/// Serves containers stored under a local directory.
///
/// Container ids are paths relative to the root, e.g. `photos/2019.zip`.
pub struct FsProvider {
    root: PathBuf,
    /// Hide local paths so every container goes through a snapshot
    streaming: bool,
    signals: Mutex<LruCache<String, CancellationToken>>,
}

impl FsProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsProvider {
            root: root.into(),
            streaming: false,
            signals: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_TRACKED_CONTAINERS).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Track change signals for at most `limit` containers.
    ///
    /// A signal pushed out of the window fires, so whoever still watches
    /// it reloads the container instead of missing a later change.
    pub fn with_tracked_containers(self, limit: usize) -> Self {
        let limit = NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN);
        FsProvider {
            signals: Mutex::new(LruCache::new(limit)),
            ..self
        }
    }

    /// A provider that only hands out byte streams, never local paths
    pub fn streaming(root: impl Into<PathBuf>) -> Self {
        FsProvider {
            streaming: true,
            ..Self::new(root)
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Tell listeners the container changed. Returns whether anyone was
    /// watching it.
    pub fn notify_changed(&self, container_id: &str) -> bool {
        let signal = self.signals().pop(container_id);
        match signal {
            Some(signal) => {
                debug!(container = %container_id, "container changed");
                signal.cancel();
                true
            }
            None => false,
        }
    }

    fn signals(&self) -> MutexGuard<'_, LruCache<String, CancellationToken>> {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn change_signal(&self, container_id: &str) -> CancellationToken {
        let mut signals = self.signals();
        if let Some(signal) = signals.get(container_id) {
            return signal.clone();
        }

        let signal = CancellationToken::new();
        if let Some((dropped, old)) = signals.push(container_id.to_string(), signal.clone()) {
            debug!(container = %dropped, "no longer tracking container changes");
            old.cancel();
        }
        signal
    }

    fn resolve(&self, container_id: &str) -> Result<PathBuf> {
        let relative = Path::new(container_id);
        let contained = !container_id.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !contained {
            return Err(ArchiveError::not_found(format!(
                "container {container_id:?} is outside {}",
                self.root.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ContainerProvider for FsProvider {
    fn name(&self) -> &str {
        "fs"
    }

    async fn query_metadata(&self, container_id: &str) -> Result<ContainerMetadata> {
        let path = self.resolve(container_id)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            ArchiveError::not_found(format!("cannot read {}: {e}", path.display()))
        })?;
        if !metadata.is_file() {
            return Err(ArchiveError::not_found(format!(
                "{} is not a file",
                path.display()
            )));
        }

        Ok(ContainerMetadata {
            mime_type: mime::from_name(container_id).to_string(),
            local_path: (!self.streaming).then_some(path),
            change_signal: Some(self.change_signal(container_id)),
        })
    }

    async fn open_for_reading(
        &self,
        container_id: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let path = self.resolve(container_id)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            ArchiveError::not_found(format!("cannot open {}: {e}", path.display()))
        })?;
        Ok(Box::new(file))
    }
}
