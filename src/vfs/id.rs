/// Delimiter used when none is configured
pub const DEFAULT_DELIMITER: char = '#';

/// Composite identifier of a document: the container it lives in plus an
/// optional path inside that container.
///
/// A `None` path addresses the container's root document. The delimiter must
/// not occur inside container ids; callers that pick one that does get
/// undefined splitting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    pub container_id: String,
    pub path: Option<String>,
}

impl DocumentId {
    pub fn new(container_id: impl Into<String>, path: Option<String>) -> Self {
        DocumentId {
            container_id: container_id.into(),
            path,
        }
    }

    /// The root document of a container
    pub fn root(container_id: impl Into<String>) -> Self {
        Self::new(container_id, None)
    }

    /// Split on the first delimiter. Never fails.
    pub fn decode(id: &str, delimiter: char) -> Self {
        match id.split_once(delimiter) {
            Some((container_id, path)) => Self::new(container_id, Some(path.to_string())),
            None => Self::root(id),
        }
    }

    pub fn encode(&self, delimiter: char) -> String {
        encode(&self.container_id, self.path.as_deref(), delimiter)
    }

    /// Identifier of another entry in the same container
    pub fn sibling(&self, path: &str) -> Self {
        Self::new(self.container_id.clone(), Some(path.to_string()))
    }

    pub fn is_root(&self) -> bool {
        self.path.is_none()
    }
}

pub fn decode(id: &str, delimiter: char) -> DocumentId {
    DocumentId::decode(id, delimiter)
}

pub fn encode(container_id: &str, path: Option<&str>, delimiter: char) -> String {
    match path {
        Some(path) => {
            let mut id = String::with_capacity(container_id.len() + path.len() + 1);
            id.push_str(container_id);
            id.push(delimiter);
            id.push_str(path);
            id
        }
        None => container_id.to_string(),
    }
}
