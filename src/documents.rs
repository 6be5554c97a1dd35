//! Caller-facing document operations.
//!
//! Every operation takes an encoded document id (`<container><delim><path>`),
//! resolves the owning archive through the [`ArchiveCache`], and holds the
//! archive's handle only for as long as the call runs. Content streams
//! outlive the call; they keep the container open on their own.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::archive::{Archive, Column, Rows, SortOrder, ThumbnailContent};
use crate::cache::{ArchiveCache, ArchiveHandle};
use crate::error::Result;
use crate::stream::ContentStream;
use crate::vfs::DocumentId;

pub struct ArchiveDocuments {
    cache: ArchiveCache,
    delimiter: char,
}

impl ArchiveDocuments {
    pub fn new(cache: ArchiveCache) -> Self {
        let delimiter = cache.config().delimiter;
        ArchiveDocuments { cache, delimiter }
    }

    pub fn cache(&self) -> &ArchiveCache {
        &self.cache
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn decode(&self, document_id: &str) -> DocumentId {
        DocumentId::decode(document_id, self.delimiter)
    }

    /// List the children of a directory document (or of a container root)
    pub async fn list_children(
        &self,
        document_id: &str,
        projection: Option<&[Column]>,
        sort: Option<SortOrder>,
    ) -> Result<Rows> {
        let id = self.decode(document_id);
        let (_handle, archive) = self.archive(&id).await?;

        let mut rows = archive.list_children(&id)?;
        if let Some(sort) = sort {
            sort.apply(&mut rows);
        }
        Ok(Rows::new(rows, projection))
    }

    pub async fn get_type(&self, document_id: &str) -> Result<&'static str> {
        let id = self.decode(document_id);
        let (_handle, archive) = self.archive(&id).await?;
        archive.mime_type(&id)
    }

    /// Whether `document_id` lies below `parent_id`.
    ///
    /// Documents from different containers are never related.
    pub async fn is_child_document(&self, parent_id: &str, document_id: &str) -> Result<bool> {
        let parent = self.decode(parent_id);
        let id = self.decode(document_id);
        if parent.container_id != id.container_id {
            return Ok(false);
        }

        let (_handle, archive) = self.archive(&id).await?;
        archive.is_descendant(&parent, &id)
    }

    /// One row describing the document itself
    pub async fn query_document(
        &self,
        document_id: &str,
        projection: Option<&[Column]>,
    ) -> Result<Rows> {
        let id = self.decode(document_id);
        let (_handle, archive) = self.archive(&id).await?;
        Ok(Rows::new(vec![archive.stat(&id)?], projection))
    }

    pub async fn open_document(
        &self,
        document_id: &str,
        mode: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<ContentStream> {
        let id = self.decode(document_id);
        let (_handle, archive) = self.archive(&id).await?;
        archive.open_content(&id, mode, cancel)
    }

    pub async fn open_document_thumbnail(
        &self,
        document_id: &str,
        size_hint: Option<(u32, u32)>,
        cancel: Option<CancellationToken>,
    ) -> Result<ThumbnailContent> {
        let id = self.decode(document_id);
        let (_handle, archive) = self.archive(&id).await?;
        archive.open_thumbnail(&id, size_hint, cancel).await
    }

    pub fn close_archive(&self, container_id: &str) -> Option<JoinHandle<()>> {
        self.cache.close_archive(container_id)
    }

    pub fn close(&self) -> JoinHandle<()> {
        self.cache.close()
    }

    // The handle must stay alive for as long as the archive is used
    async fn archive(&self, id: &DocumentId) -> Result<(ArchiveHandle, Arc<Archive>)> {
        debug!(container = %id.container_id, path = ?id.path, "resolving document");
        let handle = self.cache.obtain(id).await?;
        let archive = handle.get().await?;
        Ok((handle, archive))
    }
}
