use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::ArchiveError;

bitflags::bitflags! {
    /// Capabilities advertised for a document
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DocumentFlags: u32 {
        const SUPPORTS_THUMBNAIL = 1 << 0;
    }
}

/// Columns a caller can project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    DocumentId,
    DisplayName,
    MimeType,
    Size,
    LastModified,
    Flags,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::DocumentId,
        Column::DisplayName,
        Column::MimeType,
        Column::Size,
        Column::LastModified,
        Column::Flags,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::DocumentId => "document_id",
            Column::DisplayName => "display_name",
            Column::MimeType => "mime_type",
            Column::Size => "size",
            Column::LastModified => "last_modified",
            Column::Flags => "flags",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Column::ALL
            .into_iter()
            .find(|column| column.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ArchiveError::invalid_argument(format!("unknown column {s:?}")))
    }
}

/// Metadata of one document, as returned by listing and stat queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRow {
    pub document_id: String,
    pub display_name: String,
    pub mime_type: &'static str,
    pub size: u64,
    pub last_modified: Option<i64>,
    pub flags: DocumentFlags,
}

impl DocumentRow {
    pub fn supports_thumbnail(&self) -> bool {
        self.flags.contains(DocumentFlags::SUPPORTS_THUMBNAIL)
    }

    pub fn value(&self, column: Column) -> Value {
        match column {
            Column::DocumentId => Value::from(self.document_id.as_str()),
            Column::DisplayName => Value::from(self.display_name.as_str()),
            Column::MimeType => Value::from(self.mime_type),
            Column::Size => Value::from(self.size),
            Column::LastModified => self.last_modified.map_or(Value::Null, Value::from),
            Column::Flags => Value::from(self.flags.bits()),
        }
    }

    pub fn project(&self, columns: &[Column]) -> Map<String, Value> {
        columns
            .iter()
            .map(|column| (column.name().to_string(), self.value(*column)))
            .collect()
    }

    fn compare(&self, other: &Self, column: Column) -> Ordering {
        match column {
            Column::DocumentId => self.document_id.cmp(&other.document_id),
            Column::DisplayName => self.display_name.cmp(&other.display_name),
            Column::MimeType => self.mime_type.cmp(other.mime_type),
            Column::Size => self.size.cmp(&other.size),
            Column::LastModified => self.last_modified.cmp(&other.last_modified),
            Column::Flags => self.flags.bits().cmp(&other.flags.bits()),
        }
    }
}

/// Ordering applied to listed rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub column: Column,
    pub descending: bool,
}

impl SortOrder {
    pub fn ascending(column: Column) -> Self {
        SortOrder {
            column,
            descending: false,
        }
    }

    pub fn descending(column: Column) -> Self {
        SortOrder {
            column,
            descending: true,
        }
    }

    /// Stable sort, so rows that compare equal keep container order
    pub fn apply(&self, rows: &mut [DocumentRow]) {
        rows.sort_by(|a, b| {
            let ord = a.compare(b, self.column);
            if self.descending { ord.reverse() } else { ord }
        });
    }
}

impl FromStr for SortOrder {
    type Err = ArchiveError;

    /// Parses `column`, `column asc` or `column desc` (also `column:desc`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(|c: char| c == ':' || c.is_whitespace()).filter(|p| !p.is_empty());
        let column: Column = parts
            .next()
            .ok_or_else(|| ArchiveError::invalid_argument("empty sort order"))?
            .parse()?;
        let descending = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => {
                return Err(ArchiveError::invalid_argument(format!(
                    "unknown sort direction {other:?}"
                )));
            }
        };
        Ok(SortOrder { column, descending })
    }
}

/// Rows together with the columns the caller asked for
#[derive(Debug, Clone)]
pub struct Rows {
    columns: Vec<Column>,
    rows: Vec<DocumentRow>,
}

impl Rows {
    pub fn new(rows: Vec<DocumentRow>, projection: Option<&[Column]>) -> Self {
        Rows {
            columns: projection.map_or_else(|| Column::ALL.to_vec(), <[Column]>::to_vec),
            rows,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DocumentRow> {
        self.rows.iter()
    }

    pub fn first(&self) -> Option<&DocumentRow> {
        self.rows.first()
    }

    pub fn into_inner(self) -> Vec<DocumentRow> {
        self.rows
    }

    /// Projected rows as JSON objects
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| Value::Object(row.project(&self.columns)))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Rows {
    type Item = &'a DocumentRow;
    type IntoIter = std::slice::Iter<'a, DocumentRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, size: u64) -> DocumentRow {
        DocumentRow {
            document_id: format!("c.zip#{name}"),
            display_name: name.to_string(),
            mime_type: "text/plain",
            size,
            last_modified: None,
            flags: DocumentFlags::empty(),
        }
    }

    #[test]
    fn test_projection_keeps_requested_columns_only() {
        let projected = row("a.txt", 5).project(&[Column::DisplayName, Column::Size]);
        assert_eq!(projected.len(), 2);
        assert_eq!(projected["display_name"], "a.txt");
        assert_eq!(projected["size"], 5);
    }

    #[test]
    fn test_last_modified_null_when_unknown() {
        assert_eq!(row("a", 1).value(Column::LastModified), Value::Null);
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(
            "size desc".parse::<SortOrder>().unwrap(),
            SortOrder::descending(Column::Size)
        );
        assert_eq!(
            "display_name".parse::<SortOrder>().unwrap(),
            SortOrder::ascending(Column::DisplayName)
        );
        assert_eq!(
            "SIZE:asc".parse::<SortOrder>().unwrap(),
            SortOrder::ascending(Column::Size)
        );
        assert!("bogus".parse::<SortOrder>().is_err());
        assert!("size sideways".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_sort_is_stable() {
        let mut rows = vec![row("b", 2), row("a", 1), row("c", 2)];
        SortOrder::descending(Column::Size).apply(&mut rows);
        let names: Vec<_> = rows.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_rows_to_json_uses_projection() {
        let rows = Rows::new(vec![row("a", 1)], Some(&[Column::DocumentId]));
        assert_eq!(rows.to_json(), serde_json::json!([{ "document_id": "c.zip#a" }]));
    }
}
