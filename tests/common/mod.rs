//! Shared fixtures: real zip files written into a temporary directory.

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use zipdocs::{ArchiveCache, ArchiveDocuments, CacheConfig, FsProvider};

pub fn write_zip(path: &Path, files: &[(&str, &[u8])], dirs: &[&str]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for dir in dirs {
        writer.add_directory(*dir, options).unwrap();
    }
    for (name, data) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Bytes that don't compress down to nothing, so extraction takes many chunks
pub fn noisy_bytes(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x1234_5678;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

pub struct Fixture {
    pub dir: TempDir,
    pub provider: Arc<FsProvider>,
    pub documents: ArchiveDocuments,
}

impl Fixture {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_provider(config, |root| FsProvider::new(root))
    }

    pub fn streaming(config: CacheConfig) -> Self {
        Self::with_provider(config, |root| FsProvider::streaming(root))
    }

    fn with_provider(config: CacheConfig, make: fn(std::path::PathBuf) -> FsProvider) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(make(dir.path().to_path_buf()));
        let documents = ArchiveDocuments::new(ArchiveCache::new(provider.clone(), config));
        Fixture {
            dir,
            provider,
            documents,
        }
    }

    pub fn zip(&self, name: &str, files: &[(&str, &[u8])], dirs: &[&str]) {
        write_zip(&self.dir.path().join(name), files, dirs);
    }

    /// Write a zip that stores `entry` twice, the way a sloppy archiver would
    pub fn zip_with_duplicate(&self, name: &str, entry: &str) {
        let path = self.dir.path().join(name);
        let placeholder = "#".repeat(entry.len());
        write_zip(&path, &[(entry, b"first"), (&placeholder, b"second")], &[]);

        let mut bytes = std::fs::read(&path).unwrap();
        let hits: Vec<_> = memchr::memmem::find_iter(&bytes, placeholder.as_bytes()).collect();
        assert_eq!(hits.len(), 2, "local and central header");
        for at in hits {
            bytes[at..at + entry.len()].copy_from_slice(entry.as_bytes());
        }
        std::fs::write(&path, bytes).unwrap();
    }

    pub fn file(&self, name: &str, data: &[u8]) {
        std::fs::write(self.dir.path().join(name), data).unwrap();
    }

    pub fn cache(&self) -> &ArchiveCache {
        self.documents.cache()
    }
}

/// Poll `check` until it holds, failing the test after about two seconds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}
