use anyhow::{Context, Result};
use colored::*;

use crate::archive::{DocumentRow, SortOrder};
use crate::cli::output::{format_modified, format_size, print_line};
use crate::documents::ArchiveDocuments;
use crate::vfs::mime;

pub async fn run(
    documents: &ArchiveDocuments,
    document: &str,
    json: bool,
    sort: Option<SortOrder>,
) -> Result<()> {
    let rows = documents
        .list_children(document, None, sort)
        .await
        .with_context(|| format!("cannot list {document}"))?;

    if json {
        print_line!("{}", serde_json::to_string_pretty(&rows.to_json())?);
        return Ok(());
    }

    print_line!("{:<50} {:>12} MODIFIED", "NAME", "SIZE");
    print_line!("{}", "-".repeat(80));
    for row in &rows {
        print_line!(
            "{:<50} {:>12} {}",
            display(row),
            if is_dir(row) { "-".to_string() } else { format_size(row.size) },
            format_modified(row.last_modified)
        );
    }
    Ok(())
}

fn is_dir(row: &DocumentRow) -> bool {
    row.mime_type == mime::DIRECTORY_MIME
}

fn display(row: &DocumentRow) -> ColoredString {
    if is_dir(row) {
        format!("{}/", row.display_name).blue().bold()
    } else if row.supports_thumbnail() {
        row.display_name.magenta()
    } else {
        row.display_name.normal()
    }
}
