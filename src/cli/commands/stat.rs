use anyhow::{Context, Result};
use colored::*;

use crate::cli::output::{format_modified, format_size, print_line};
use crate::documents::ArchiveDocuments;

pub async fn run(documents: &ArchiveDocuments, document: &str, json: bool) -> Result<()> {
    let rows = documents
        .query_document(document, None)
        .await
        .with_context(|| format!("cannot stat {document}"))?;

    if json {
        print_line!("{}", serde_json::to_string_pretty(&rows.to_json())?);
        return Ok(());
    }

    for row in &rows {
        print_line!("{:>10}: {}", "Document".bold(), row.document_id);
        print_line!("{:>10}: {}", "Name".bold(), row.display_name);
        print_line!("{:>10}: {}", "Type".bold(), row.mime_type);
        print_line!("{:>10}: {} ({} bytes)", "Size".bold(), format_size(row.size), row.size);
        print_line!("{:>10}: {}", "Modified".bold(), format_modified(row.last_modified));
        print_line!(
            "{:>10}: {}",
            "Thumbnail".bold(),
            if row.supports_thumbnail() { "yes" } else { "no" }
        );
    }
    Ok(())
}
