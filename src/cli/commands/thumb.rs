use anyhow::{Context, Result};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::cat::cancel_on_ctrl_c;
use crate::documents::ArchiveDocuments;

pub async fn run(
    documents: &ArchiveDocuments,
    document: &str,
    output: Option<&Path>,
    size_hint: Option<(u32, u32)>,
) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let thumb = documents
        .open_document_thumbnail(document, size_hint, Some(cancel.clone()))
        .await
        .with_context(|| format!("cannot open thumbnail of {document}"))?;

    eprintln!(
        "range {}+{}{}",
        thumb.offset,
        thumb.length,
        thumb
            .orientation
            .map(|degrees| format!(", rotate {degrees}°"))
            .unwrap_or_default()
    );

    let written = match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("cannot create {}", path.display()))?;
            copy_range(thumb.content, thumb.offset, thumb.length, &mut file).await?
        }
        None => {
            let mut stdout = tokio::io::stdout();
            copy_range(thumb.content, thumb.offset, thumb.length, &mut stdout).await?
        }
    };
    cancel.cancel();

    if written < thumb.length {
        anyhow::bail!("content ended after {written} of {} bytes", thumb.length);
    }
    Ok(())
}

/// Copy `length` bytes starting at `offset` of `content` into `out`
async fn copy_range(
    mut content: impl AsyncRead + Unpin,
    offset: u64,
    length: u64,
    out: &mut (impl AsyncWrite + Unpin),
) -> Result<u64> {
    let skipped = tokio::io::copy(&mut (&mut content).take(offset), &mut tokio::io::sink())
        .await
        .context("reading image content failed")?;
    if skipped < offset {
        return Ok(0);
    }
    let written = tokio::io::copy(&mut content.take(length), out)
        .await
        .context("reading image content failed")?;
    out.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_range() {
        let data: &[u8] = b"0123456789";
        let mut out = Vec::new();
        assert_eq!(copy_range(data, 3, 4, &mut out).await.unwrap(), 4);
        assert_eq!(out, b"3456");

        let mut out = Vec::new();
        assert_eq!(copy_range(data, 8, 4, &mut out).await.unwrap(), 2);
        assert_eq!(out, b"89");

        let mut out = Vec::new();
        assert_eq!(copy_range(data, 20, 4, &mut out).await.unwrap(), 0);
        assert!(out.is_empty());
    }
}
