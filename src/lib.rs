//! Browse compressed containers as a tree of documents.
//!
//! An [`ArchiveDocuments`] front end resolves composite document ids
//! (`photos.zip#2019/beach.jpg`) through a bounded [`ArchiveCache`] of open
//! archives, answers listing and stat queries from an in-memory entry tree,
//! and streams entry content through a bounded pipe fed by a background
//! decompression task.

pub mod archive;
pub mod cache;
pub mod cli;
pub mod config;
pub mod documents;
pub mod error;
pub mod providers;
pub mod stream;
pub mod vfs;

pub use archive::{Archive, Column, DocumentRow, Rows, SortOrder, ThumbnailContent};
pub use cache::{ArchiveCache, ArchiveHandle};
pub use config::CacheConfig;
pub use documents::ArchiveDocuments;
pub use error::{ArchiveError, ErrorKind, Result};
pub use providers::{ContainerMetadata, ContainerProvider, FsProvider};
pub use stream::ContentStream;
pub use vfs::DocumentId;
