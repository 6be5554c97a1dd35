//! Embedded EXIF thumbnail lookup.
//!
//! Everything here is best effort: a missing, truncated or unparseable EXIF
//! block just means "no thumbnail", and the caller falls back to the full
//! image content.

use exif::{In, Reader, Tag};
use std::io::{self, Cursor, Read};
use tokio_util::sync::CancellationToken;

use super::Container;
use crate::stream::pipe::cancelled_error;

/// Upper bound on the bytes decompressed while looking for a thumbnail (32MB)
const MAX_SCAN_BYTES: u64 = 32 * 1024 * 1024;

const SCAN_CHUNK: usize = 64 * 1024;

/// Where an embedded thumbnail sits inside an entry's decompressed bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailHint {
    pub offset: u64,
    pub length: u64,
    /// Clockwise rotation in degrees needed to display the image upright
    pub orientation: Option<u16>,
}

/// Decompress the head of `name` and look for an embedded thumbnail.
///
/// Stops with `ConnectionAborted` as soon as `cancel` fires.
pub fn scan_entry(
    container: &dyn Container,
    name: &str,
    cancel: &CancellationToken,
) -> io::Result<Option<ThumbnailHint>> {
    let mut data = Vec::new();
    container.with_entry_reader(name, &mut |reader: &mut dyn Read| {
        let mut head = reader.take(MAX_SCAN_BYTES);
        let mut chunk = vec![0u8; SCAN_CHUNK];
        loop {
            if cancel.is_cancelled() {
                return Err(cancelled_error());
            }
            match head.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => data.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    })?;
    Ok(scan(&data))
}

/// Find the EXIF thumbnail of an image held in memory
pub fn scan(data: &[u8]) -> Option<ThumbnailHint> {
    let exif = Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()?;

    let offset = exif
        .get_field(Tag::JPEGInterchangeFormat, In::THUMBNAIL)?
        .value
        .get_uint(0)? as u64;
    let length = exif
        .get_field(Tag::JPEGInterchangeFormatLength, In::THUMBNAIL)?
        .value
        .get_uint(0)? as u64;
    if length == 0 {
        return None;
    }

    // Thumbnail offsets are relative to the TIFF header, so locate the raw
    // EXIF block inside the image to translate them.
    let tiff_start = memchr::memmem::find(data, exif.buf())? as u64;
    let start = tiff_start.checked_add(offset)?;
    let end = start.checked_add(length)?;
    if end > data.len() as u64 {
        return None;
    }

    let orientation = exif
        .get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .and_then(orientation_degrees);

    Some(ThumbnailHint {
        offset: start,
        length,
        orientation,
    })
}

fn orientation_degrees(tag: u32) -> Option<u16> {
    match tag {
        6 => Some(90),
        3 => Some(180),
        8 => Some(270),
        _ => None,
    }
}
