pub mod row;
pub mod thumbnail;
pub mod zip;

pub use row::{Column, DocumentFlags, DocumentRow, Rows, SortOrder};
pub use thumbnail::ThumbnailHint;
pub use self::zip::{ZipContainer, ZipDecoder};

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::TempPath;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::error::{ArchiveError, Result};
use crate::stream::{self, ContentStream, StreamOptions};
use crate::vfs::{DocumentId, Entry, EntryTree, ROOT, display_name, id, mime};

/// An opened compressed container: its entry list plus a way to decompress
/// any one entry.
///
/// Implementations must allow several entries to be read at the same time
/// from different threads.
pub trait Container: Send + Sync {
    /// Every entry stored in the container, in container order
    fn entries(&self) -> Result<Vec<Entry>>;

    /// Open `name` for reading and hand the decompressing reader to `read`.
    /// The reader is released as soon as `read` returns.
    fn with_entry_reader(
        &self,
        name: &str,
        read: &mut dyn FnMut(&mut dyn Read) -> io::Result<()>,
    ) -> io::Result<()>;
}

/// Where a container's bytes can be read with random access
#[derive(Debug)]
pub enum ContainerSource {
    /// A file the provider already has on local storage
    Path(PathBuf),
    /// A private copy of a forward-only stream, deleted once dropped
    Snapshot { file: File, path: TempPath },
}

/// Turns container bytes into a [`Container`]
pub trait ContainerDecoder: Send + Sync {
    fn open(&self, container_id: &str, source: ContainerSource) -> Result<Arc<dyn Container>>;
}

/// Content handed out by [`Archive::open_thumbnail`]
pub struct ThumbnailContent {
    /// The full decompressed entry
    pub content: ContentStream,
    /// Start of the thumbnail (or of the full image) within `content`
    pub offset: u64,
    pub length: u64,
    /// Clockwise rotation in degrees, only reported alongside a thumbnail
    pub orientation: Option<u16>,
}

/// One opened container exposed as a document tree.
///
/// Queries are answered from the immutable [`EntryTree`]; content is
/// streamed by extraction tasks that each keep their own reference to the
/// container, so [`close`](Archive::close) never cuts a running stream short.
pub struct Archive {
    container_id: String,
    delimiter: char,
    root: Entry,
    tree: EntryTree,
    container: Mutex<Option<Arc<dyn Container>>>,
    workers: Arc<Semaphore>,
    options: StreamOptions,
}

impl Archive {
    /// Read the container's entries and build the document tree
    pub fn new(
        container_id: impl Into<String>,
        container: Arc<dyn Container>,
        config: &CacheConfig,
    ) -> Result<Self> {
        let container_id = container_id.into();
        let tree = EntryTree::build(container.entries()?)?;

        info!(
            container = %container_id,
            entries = tree.len(),
            synthesized = tree.synthesized(),
            "opened archive"
        );

        Ok(Archive {
            container_id,
            delimiter: config.delimiter,
            root: Entry::directory(ROOT, None),
            tree,
            container: Mutex::new(Some(container)),
            workers: Arc::new(Semaphore::new(config.workers_per_archive)),
            options: StreamOptions {
                chunk_size: config.chunk_size,
                pipe_depth: config.pipe_depth,
            },
        })
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn tree(&self) -> &EntryTree {
        &self.tree
    }

    /// Rows for the direct children of a directory (the root by default)
    pub fn list_children(&self, id: &DocumentId) -> Result<Vec<DocumentRow>> {
        self.check_container(id)?;
        let path = Self::path_of(id);

        match self.tree.children(path) {
            Some(children) => Ok(children.iter().map(|entry| self.row(entry)).collect()),
            // A directory the container stores explicitly but leaves empty
            None if self.tree.entry(path).is_some_and(|e| e.is_dir) => Ok(Vec::new()),
            None => Err(ArchiveError::not_found(format!(
                "no directory {path:?} in {}",
                self.container_id
            ))),
        }
    }

    pub fn stat(&self, id: &DocumentId) -> Result<DocumentRow> {
        self.check_container(id)?;
        Ok(self.row(self.entry(id)?))
    }

    pub fn mime_type(&self, id: &DocumentId) -> Result<&'static str> {
        self.check_container(id)?;
        Ok(Self::mime_of(self.entry(id)?))
    }

    /// Whether `id` lies strictly below `parent`.
    ///
    /// Everything in the container descends from its root; nothing descends
    /// from itself or from a file.
    pub fn is_descendant(&self, parent: &DocumentId, id: &DocumentId) -> Result<bool> {
        self.check_container(parent)?;
        self.check_container(id)?;

        let child_path = Self::path_of(id);
        let Some(child) = self.tree.entry(child_path) else {
            return Ok(false);
        };

        let parent_path = Self::path_of(parent);
        if parent_path == ROOT {
            return Ok(child.name != ROOT);
        }
        let Some(parent) = self.tree.entry(parent_path) else {
            return Ok(false);
        };
        if !parent.is_dir {
            return Ok(false);
        }

        Ok(child.name.len() > parent.name.len() && child.name.starts_with(parent.name.as_str()))
    }

    /// Start streaming an entry's decompressed bytes.
    ///
    /// Returns as soon as the pipe exists; decompression runs on one of this
    /// archive's workers. Only read-only access (`"r"`) is supported.
    pub fn open_content(
        &self,
        id: &DocumentId,
        mode: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<ContentStream> {
        self.check_container(id)?;
        if mode != "r" {
            return Err(ArchiveError::invalid_argument(format!(
                "unsupported mode {mode:?}, archives are read-only"
            )));
        }
        let entry = self.file_entry(id)?;
        let container = self.live_container()?;

        debug!(container = %self.container_id, entry = %entry.name, "opening content");
        Ok(stream::spawn_extraction(
            container,
            entry.name.clone(),
            Arc::clone(&self.workers),
            self.options,
            cancel.unwrap_or_default(),
        ))
    }

    /// Open an image entry, pointing at its embedded EXIF thumbnail if any.
    ///
    /// A missing or unreadable thumbnail is not an error: the range then
    /// covers the whole image and no orientation is reported.
    pub async fn open_thumbnail(
        &self,
        id: &DocumentId,
        size_hint: Option<(u32, u32)>,
        cancel: Option<CancellationToken>,
    ) -> Result<ThumbnailContent> {
        self.check_container(id)?;
        let entry = self.file_entry(id)?;
        if !mime::is_image(Self::mime_of(entry)) {
            return Err(ArchiveError::invalid_argument(format!(
                "{} is not an image",
                entry.name
            )));
        }
        let container = self.live_container()?;
        let cancel = cancel.unwrap_or_default();

        let hint = {
            let container = Arc::clone(&container);
            let name = entry.name.clone();
            let workers = Arc::clone(&self.workers);
            let cancel = cancel.clone();
            async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    permit = workers.acquire_owned() => permit.ok()?,
                };
                let scan = tokio::task::spawn_blocking(move || {
                    thumbnail::scan_entry(&*container, &name, &cancel)
                });
                scan.await
                    .ok()?
                    .inspect_err(|err| debug!(error = %err, "thumbnail scan failed"))
                    .ok()?
            }
            .await
        };

        debug!(
            entry = %entry.name,
            ?size_hint,
            found = hint.is_some(),
            "thumbnail lookup"
        );

        let content = stream::spawn_extraction(
            container,
            entry.name.clone(),
            Arc::clone(&self.workers),
            self.options,
            cancel,
        );

        Ok(match hint {
            Some(hint) => ThumbnailContent {
                content,
                offset: hint.offset,
                length: hint.length,
                orientation: hint.orientation,
            },
            None => ThumbnailContent {
                content,
                offset: 0,
                length: entry.size,
                orientation: None,
            },
        })
    }

    /// Release the container handle.
    ///
    /// Returns immediately. The handle is dropped on a blocking worker, and
    /// extraction tasks already running keep their own reference.
    pub fn close(&self) {
        let Some(container) = self.lock_container().take() else {
            return;
        };
        debug!(container = %self.container_id, "closing archive");
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(container));
            }
            Err(_) => drop(container),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock_container().is_none()
    }

    fn lock_container(&self) -> MutexGuard<'_, Option<Arc<dyn Container>>> {
        self.container.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_container(&self) -> Result<Arc<dyn Container>> {
        self.lock_container().clone().ok_or_else(|| {
            ArchiveError::not_found(format!("archive {} is already closed", self.container_id))
        })
    }

    fn check_container(&self, id: &DocumentId) -> Result<()> {
        if id.container_id != self.container_id {
            return Err(ArchiveError::invalid_argument(format!(
                "document {:?} does not belong to {}",
                id.encode(self.delimiter),
                self.container_id
            )));
        }
        Ok(())
    }

    fn path_of(id: &DocumentId) -> &str {
        id.path.as_deref().unwrap_or(ROOT)
    }

    fn entry(&self, id: &DocumentId) -> Result<&Entry> {
        let path = Self::path_of(id);
        if path == ROOT {
            return Ok(self.tree.entry(ROOT).unwrap_or(&self.root));
        }
        self.tree.entry(path).ok_or_else(|| {
            ArchiveError::not_found(format!("no entry {path:?} in {}", self.container_id))
        })
    }

    fn file_entry(&self, id: &DocumentId) -> Result<&Entry> {
        let entry = self.entry(id)?;
        if entry.is_dir {
            return Err(ArchiveError::invalid_argument(format!(
                "{} is a directory",
                entry.name
            )));
        }
        Ok(entry)
    }

    fn mime_of(entry: &Entry) -> &'static str {
        if entry.is_dir {
            mime::DIRECTORY_MIME
        } else {
            mime::from_name(&entry.name)
        }
    }

    fn row(&self, entry: &Entry) -> DocumentRow {
        let mime_type = Self::mime_of(entry);
        let (document_id, display) = if entry.name == ROOT {
            (
                id::encode(&self.container_id, None, self.delimiter),
                display_name(&self.container_id).to_string(),
            )
        } else {
            (
                id::encode(&self.container_id, Some(&entry.name), self.delimiter),
                entry.display_name().to_string(),
            )
        };

        let mut flags = DocumentFlags::empty();
        if mime::is_image(mime_type) {
            flags |= DocumentFlags::SUPPORTS_THUMBNAIL;
        }

        DocumentRow {
            document_id,
            display_name: display,
            mime_type,
            size: if entry.is_dir { 0 } else { entry.size },
            last_modified: entry.modified,
            flags,
        }
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        self.close();
    }
}
