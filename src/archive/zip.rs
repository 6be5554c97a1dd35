use chrono::NaiveDate;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

use super::{Container, ContainerDecoder, ContainerSource};
use crate::error::{ArchiveError, Result};
use crate::vfs::Entry;

/// Maximum allowed decompressed size of one entry (1GB) to refuse zip bombs
pub const MAX_DECOMPRESSED_SIZE: u64 = 1024 * 1024 * 1024;

/// Maximum compression ratio allowed (1000:1) to detect zip bombs
pub const MAX_COMPRESSION_RATIO: u64 = 1000;

const EOCD_SIGNATURE: &[u8] = b"PK\x05\x06";
const EOCD_LEN: usize = 22;
const ZIP64_LOCATOR_SIGNATURE: &[u8] = b"PK\x06\x07";
const ZIP64_LOCATOR_LEN: u64 = 20;
const ZIP64_EOCD_SIGNATURE: &[u8] = b"PK\x06\x06";

/// Opens zip-family containers with the `zip` crate
#[derive(Debug, Clone, Copy)]
pub struct ZipDecoder {
    pub max_entry_size: u64,
    pub max_compression_ratio: u64,
}

impl Default for ZipDecoder {
    fn default() -> Self {
        ZipDecoder {
            max_entry_size: MAX_DECOMPRESSED_SIZE,
            max_compression_ratio: MAX_COMPRESSION_RATIO,
        }
    }
}

impl ContainerDecoder for ZipDecoder {
    fn open(&self, container_id: &str, source: ContainerSource) -> Result<Arc<dyn Container>> {
        let (file, snapshot) = match source {
            ContainerSource::Path(path) => {
                let file = File::open(&path).map_err(|e| match e.kind() {
                    io::ErrorKind::NotFound => ArchiveError::not_found(format!(
                        "container file {} is missing",
                        path.display()
                    )),
                    _ => ArchiveError::Io(e),
                })?;
                (file, None)
            }
            ContainerSource::Snapshot { file, path } => (file, Some(path)),
        };

        let len = file.metadata()?.len();
        let reader = SharedFile {
            backing: Arc::new(Backing {
                file,
                len,
                _snapshot: snapshot,
            }),
            pos: 0,
        };
        let archive = ZipArchive::new(reader.clone())?;
        let declared = declared_entries(&reader.backing)?;
        debug!(
            container = %container_id,
            bytes = len,
            entries = archive.len(),
            "read zip central directory"
        );

        // The zip crate keys entries by name, so repeated names collapse into
        // one. The record count in the trailer still sees every copy.
        if let Some(declared) = declared.filter(|&n| n > archive.len() as u64) {
            return Err(ArchiveError::corrupt(format!(
                "{container_id} has duplicate entry names: {declared} records, {} distinct names",
                archive.len()
            )));
        }

        Ok(Arc::new(ZipContainer {
            archive,
            limits: *self,
        }))
    }
}

/// A zip container backed by one shared file handle.
///
/// Each read works on its own clone of the parsed archive, with its own
/// position in the file, so entries can be decompressed concurrently.
pub struct ZipContainer {
    archive: ZipArchive<SharedFile>,
    limits: ZipDecoder,
}

impl Container for ZipContainer {
    fn entries(&self) -> Result<Vec<Entry>> {
        let mut archive = self.archive.clone();
        let mut entries = Vec::with_capacity(archive.len());

        for index in 0..archive.len() {
            let file = archive.by_index_raw(index)?;
            let is_dir = file.is_dir();
            entries.push(Entry {
                name: file.name().to_string(),
                size: if is_dir { 0 } else { file.size() },
                modified: file.last_modified().and_then(dos_time_millis),
                is_dir,
            });
        }

        Ok(entries)
    }

    fn with_entry_reader(
        &self,
        name: &str,
        read: &mut dyn FnMut(&mut dyn Read) -> io::Result<()>,
    ) -> io::Result<()> {
        let mut archive = self.archive.clone();
        let mut file = archive.by_name(name).map_err(zip_io_error)?;

        if file.size() > self.limits.max_entry_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "entry too large to extract safely: {} bytes exceeds {} byte limit",
                    file.size(),
                    self.limits.max_entry_size
                ),
            ));
        }
        let compressed = file.compressed_size();
        if compressed > 0 && file.size() / compressed > self.limits.max_compression_ratio {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "suspicious compression ratio ({:.0}:1), entry may be a zip bomb",
                    file.size() as f64 / compressed as f64
                ),
            ));
        }

        // Headers can lie about the size; never inflate past the limit.
        let mut limited = (&mut file).take(self.limits.max_entry_size);
        read(&mut limited)
    }
}

fn zip_io_error(err: ZipError) -> io::Error {
    match err {
        ZipError::Io(e) => e,
        ZipError::FileNotFound => io::Error::new(io::ErrorKind::NotFound, "entry not found"),
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

/// Number of central directory records declared by the end-of-central-directory
/// trailer (or its zip64 counterpart). `None` when no trailer can be found.
fn declared_entries(backing: &Backing) -> io::Result<Option<u64>> {
    let tail_len = backing.len.min((EOCD_LEN + u16::MAX as usize) as u64);
    let tail_start = backing.len - tail_len;
    let mut tail = vec![0u8; tail_len as usize];
    read_exact_at(&backing.file, &mut tail, tail_start)?;

    // The comment may itself contain the signature; the real record is the
    // last one whose comment fits in the file.
    let eocd = memchr::memmem::rfind_iter(&tail, EOCD_SIGNATURE).find(|&pos| {
        tail.len() - pos >= EOCD_LEN
            && pos + EOCD_LEN + usize::from(le_u16(&tail, pos + 20)) <= tail.len()
    });
    let Some(eocd) = eocd else {
        return Ok(None);
    };

    let total = le_u16(&tail, eocd + 10);
    if total != u16::MAX {
        return Ok(Some(total.into()));
    }

    let Some(locator_at) = (tail_start + eocd as u64).checked_sub(ZIP64_LOCATOR_LEN) else {
        return Ok(None);
    };
    let mut locator = [0u8; ZIP64_LOCATOR_LEN as usize];
    read_exact_at(&backing.file, &mut locator, locator_at)?;
    if !locator.starts_with(ZIP64_LOCATOR_SIGNATURE) {
        return Ok(None);
    }

    let record_at = le_u64(&locator, 8);
    let mut record = [0u8; 40];
    if record_at.saturating_add(record.len() as u64) > backing.len {
        return Ok(None);
    }
    read_exact_at(&backing.file, &mut record, record_at)?;
    if !record.starts_with(ZIP64_EOCD_SIGNATURE) {
        return Ok(None);
    }
    Ok(Some(le_u64(&record, 32)))
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// MS-DOS timestamps carry no zone; they are read as UTC.
fn dos_time_millis(time: zip::DateTime) -> Option<i64> {
    NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())?
        .and_hms_opt(time.hour().into(), time.minute().into(), time.second().into())
        .map(|dt| dt.and_utc().timestamp_millis())
}

#[derive(Debug)]
struct Backing {
    file: File,
    len: u64,
    /// Keeps a snapshot alive until the last reader is gone
    _snapshot: Option<TempPath>,
}

/// Cloneable positioned reader over a shared file.
///
/// Clones share the handle but not the cursor: every read is a positional
/// read, so concurrent readers never disturb each other.
#[derive(Debug, Clone)]
struct SharedFile {
    backing: Arc<Backing>,
    pos: u64,
}

impl Read for SharedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.backing.len {
            return Ok(0);
        }
        let n = read_at(&self.backing.file, buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SharedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) => self.backing.len.checked_add_signed(offset),
            SeekFrom::Current(offset) => self.pos.checked_add_signed(offset),
        };

        match target {
            Some(target) => {
                self.pos = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match read_at(file, buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
