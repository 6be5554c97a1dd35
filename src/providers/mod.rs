mod fs;

pub use fs::FsProvider;

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::archive::ContainerSource;
use crate::error::Result;

/// What the enclosing provider knows about one container
#[derive(Debug, Clone)]
pub struct ContainerMetadata {
    pub mime_type: String,
    /// Local file holding the container, when there is one
    pub local_path: Option<PathBuf>,
    /// Fires when the container changes; cached views of it become stale
    pub change_signal: Option<CancellationToken>,
}

/// Source of containers: the enclosing document provider.
///
/// Lookups that can't find the container, or can't read its metadata,
/// fail with [`ArchiveError::NotFound`](crate::error::ArchiveError::NotFound).
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    async fn query_metadata(&self, container_id: &str) -> Result<ContainerMetadata>;

    /// Forward-only byte stream of the container, used when it has no local path
    async fn open_for_reading(
        &self,
        container_id: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Find a random-access source for a container, copying it to temporary
/// storage when the provider can only stream it.
pub async fn resolve_source(
    provider: &dyn ContainerProvider,
    container_id: &str,
    metadata: &ContainerMetadata,
) -> Result<ContainerSource> {
    match &metadata.local_path {
        Some(path) => Ok(ContainerSource::Path(path.clone())),
        None => {
            let reader = provider.open_for_reading(container_id).await?;
            snapshot(reader).await
        }
    }
}

/// Copy a forward-only stream into a temporary file
pub async fn snapshot(mut reader: impl AsyncRead + Unpin) -> Result<ContainerSource> {
    let temp = tokio::task::spawn_blocking(tempfile::NamedTempFile::new).await??;
    let (file, path) = temp.into_parts();

    let mut out = tokio::fs::File::from_std(file);
    let copied = tokio::io::copy(&mut reader, &mut out).await?;
    out.flush().await?;
    debug!(bytes = copied, path = %path.display(), "snapshotted container");

    Ok(ContainerSource::Snapshot {
        file: out.into_std().await,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn test_snapshot_copies_stream() {
        let data: &[u8] = b"streamed container bytes";
        let source = snapshot(data).await.unwrap();

        let ContainerSource::Snapshot { path, .. } = source else {
            panic!("expected snapshot");
        };
        let mut copied = Vec::new();
        std::fs::File::open(&path).unwrap().read_to_end(&mut copied).unwrap();
        assert_eq!(copied, data);

        let kept = path.to_path_buf();
        drop(path);
        assert!(!kept.exists());
    }
}
