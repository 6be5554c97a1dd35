use std::collections::HashMap;

/// Path of the synthetic root directory of every container
pub const ROOT: &str = "/";

/// One record read from a container.
///
/// `name` is the full slash-separated path inside the container; directories
/// (and only directories) carry a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    /// Uncompressed size in bytes; always zero for directories
    pub size: u64,
    /// Last modification time in milliseconds since the Unix epoch
    pub modified: Option<i64>,
    pub is_dir: bool,
}

impl Entry {
    pub fn file(name: impl Into<String>, size: u64, modified: Option<i64>) -> Self {
        Entry {
            name: name.into(),
            size,
            modified,
            is_dir: false,
        }
    }

    pub fn directory(name: impl Into<String>, modified: Option<i64>) -> Self {
        Entry {
            name: name.into(),
            size: 0,
            modified,
            is_dir: true,
        }
    }

    /// Last path segment, without the trailing slash of a directory
    pub fn display_name(&self) -> &str {
        display_name(&self.name)
    }

    pub fn parent_path(&self) -> &str {
        parent_path(&self.name)
    }
}

/// Full path → entry, directory keys carrying their trailing slash
pub type EntryIndex = HashMap<String, Entry>;

/// Directory path (including [`ROOT`]) → its direct children, in build order
pub type ChildrenIndex = HashMap<String, Vec<Entry>>;

/// Directory containing `path`, with its trailing slash, or [`ROOT`].
///
/// ```
/// use zipdocs::vfs::parent_path;
/// assert_eq!(parent_path("a/b/c.txt"), "a/b/");
/// assert_eq!(parent_path("a/b/"), "a/");
/// assert_eq!(parent_path("top.txt"), "/");
/// ```
pub fn parent_path(path: &str) -> &str {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[..=pos],
        None => ROOT,
    }
}

pub fn display_name(path: &str) -> &str {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}
