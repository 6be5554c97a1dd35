pub mod id;
pub mod mime;
pub mod node;
pub mod tree;

pub use id::{DEFAULT_DELIMITER, DocumentId};
pub use node::{ChildrenIndex, Entry, EntryIndex, ROOT, display_name, parent_path};
pub use tree::EntryTree;
