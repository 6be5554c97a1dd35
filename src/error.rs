//! Error taxonomy shared by every layer of the crate.

use std::io;

/// Coarse classification of an [`ArchiveError`], for callers that branch on
/// the kind of failure rather than its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    CorruptContainer,
    IllegalState,
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Unknown container, unknown path, or an archive that was already closed
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Duplicate entry paths or an entry whose name disagrees with its type
    #[error("corrupt container: {0}")]
    CorruptContainer(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ArchiveError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        ArchiveError::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ArchiveError::InvalidArgument(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        ArchiveError::CorruptContainer(msg.into())
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        ArchiveError::IllegalState(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::NotFound(_) => ErrorKind::NotFound,
            ArchiveError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ArchiveError::CorruptContainer(_) => ErrorKind::CorruptContainer,
            ArchiveError::IllegalState(_) => ErrorKind::IllegalState,
            ArchiveError::Io(_) => ErrorKind::Io,
            // A container the zip decoder rejects is not a valid container,
            // except when the rejection came from the byte source itself.
            ArchiveError::Zip(zip::result::ZipError::Io(_)) => ErrorKind::Io,
            ArchiveError::Zip(zip::result::ZipError::FileNotFound) => ErrorKind::NotFound,
            ArchiveError::Zip(_) => ErrorKind::CorruptContainer,
        }
    }
}

impl From<tokio::task::JoinError> for ArchiveError {
    fn from(err: tokio::task::JoinError) -> Self {
        ArchiveError::IllegalState(format!("background task failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
