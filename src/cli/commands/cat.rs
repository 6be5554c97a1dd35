use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::documents::ArchiveDocuments;

pub async fn run(documents: &ArchiveDocuments, document: &str) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let mut content = documents
        .open_document(document, "r", Some(cancel.clone()))
        .await
        .with_context(|| format!("cannot open {document}"))?;

    let mut stdout = tokio::io::stdout();
    let copied = tokio::io::copy(&mut content, &mut stdout)
        .await
        .with_context(|| format!("reading {document} failed"))?;
    stdout.flush().await?;
    cancel.cancel();

    debug!(bytes = copied, "cat finished");
    Ok(())
}

/// A token cancelled when the user hits Ctrl-C
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::signal::ctrl_c() => token.cancel(),
        }
    });
    cancel
}
