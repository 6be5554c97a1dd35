use tracing::warn;

use crate::vfs::DEFAULT_DELIMITER;

/// Default number of open archives kept by the cache
pub const DEFAULT_CAPACITY: usize = 8;

/// Default size of one chunk handed through an extraction pipe (64KB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of chunks buffered in a pipe before the producer blocks
pub const DEFAULT_PIPE_DEPTH: usize = 4;

/// Default number of concurrent extraction workers per open archive
pub const DEFAULT_WORKERS_PER_ARCHIVE: usize = 2;

/// Tuning knobs for the archive cache and its extractors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of open archives before the least recently used is evicted
    pub capacity: usize,
    /// Bytes per chunk written to a content pipe
    pub chunk_size: usize,
    /// Chunks buffered per pipe
    pub pipe_depth: usize,
    /// Extraction tasks allowed to run at once for one archive
    pub workers_per_archive: usize,
    /// Separator between container id and path in a document id
    pub delimiter: char,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: DEFAULT_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pipe_depth: DEFAULT_PIPE_DEPTH,
            workers_per_archive: DEFAULT_WORKERS_PER_ARCHIVE,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl CacheConfig {
    /// Build a configuration from `ZIPDOCS_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key/value source.
    ///
    /// Missing keys keep their defaults; values that don't parse are logged
    /// and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: usize| match lookup(key) {
            Some(raw) => raw.trim().parse::<usize>().unwrap_or_else(|_| {
                warn!(key, value = %raw, "ignoring unparseable setting");
                fallback
            }),
            None => fallback,
        };

        CacheConfig {
            capacity: read("ZIPDOCS_CACHE_CAPACITY", defaults.capacity),
            chunk_size: read("ZIPDOCS_CHUNK_SIZE", defaults.chunk_size),
            pipe_depth: read("ZIPDOCS_PIPE_DEPTH", defaults.pipe_depth),
            workers_per_archive: read("ZIPDOCS_WORKERS", defaults.workers_per_archive),
            delimiter: defaults.delimiter,
        }
        .normalized()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self.normalized()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self.normalized()
    }

    pub fn with_pipe_depth(mut self, pipe_depth: usize) -> Self {
        self.pipe_depth = pipe_depth;
        self.normalized()
    }

    pub fn with_workers_per_archive(mut self, workers: usize) -> Self {
        self.workers_per_archive = workers;
        self.normalized()
    }

    /// The delimiter must never occur inside a container id.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    // Zero would mean "no archives", "empty chunks" or "no workers"; clamp to 1.
    pub(crate) fn normalized(mut self) -> Self {
        self.capacity = self.capacity.max(1);
        self.chunk_size = self.chunk_size.max(1);
        self.pipe_depth = self.pipe_depth.max(1);
        self.workers_per_archive = self.workers_per_archive.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity, 8);
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.delimiter, '#');
    }

    #[test]
    fn test_from_lookup_overrides_and_ignores_garbage() {
        let vars: HashMap<&str, &str> = [
            ("ZIPDOCS_CACHE_CAPACITY", "3"),
            ("ZIPDOCS_CHUNK_SIZE", "not-a-number"),
            ("ZIPDOCS_WORKERS", " 5 "),
        ]
        .into_iter()
        .collect();

        let config = CacheConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.capacity, 3);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.pipe_depth, DEFAULT_PIPE_DEPTH);
        assert_eq!(config.workers_per_archive, 5);
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let config = CacheConfig::default()
            .with_capacity(0)
            .with_chunk_size(0)
            .with_pipe_depth(0)
            .with_workers_per_archive(0);
        assert_eq!(config.capacity, 1);
        assert_eq!(config.chunk_size, 1);
        assert_eq!(config.pipe_depth, 1);
        assert_eq!(config.workers_per_archive, 1);
    }
}
