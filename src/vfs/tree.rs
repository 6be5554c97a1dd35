use tracing::debug;

use super::node::{ChildrenIndex, Entry, EntryIndex, ROOT};
use crate::error::{ArchiveError, Result};

/// Hierarchical view over the flat entry list of one container.
///
/// Containers don't have to store an entry for every directory, so the
/// builder synthesizes any ancestor that is only implied by a deeper path.
/// Both indices are immutable once built.
#[derive(Debug, Clone)]
pub struct EntryTree {
    entries: EntryIndex,
    children: ChildrenIndex,
    synthesized: usize,
}

impl EntryTree {
    pub fn build(entries: Vec<Entry>) -> Result<Self> {
        let mut index = EntryIndex::with_capacity(entries.len());
        for entry in &entries {
            if entry.name.is_empty() {
                return Err(ArchiveError::corrupt("entry with an empty name"));
            }
            if entry.is_dir != entry.name.ends_with('/') {
                return Err(ArchiveError::corrupt(format!(
                    "entry {:?} is {} but its name says otherwise",
                    entry.name,
                    if entry.is_dir { "a directory" } else { "a file" }
                )));
            }
            if index.insert(entry.name.clone(), entry.clone()).is_some() {
                return Err(ArchiveError::corrupt(format!(
                    "duplicate entry {:?}",
                    entry.name
                )));
            }
        }

        let mut children = ChildrenIndex::new();
        children.insert(ROOT.to_string(), Vec::new());

        // Reversed so that popping visits entries in container order
        let mut stack: Vec<Entry> = entries
            .into_iter()
            .rev()
            .filter(|entry| entry.name != ROOT)
            .collect();
        let mut synthesized = 0;

        while let Some(entry) = stack.pop() {
            let parent = entry.parent_path().to_string();

            if let Some(siblings) = children.get_mut(&parent) {
                siblings.push(entry);
                continue;
            }

            if !index.contains_key(&parent) {
                // Ancestor only implied by this path. Its own parent is
                // resolved when it comes off the stack.
                let dir = Entry::directory(parent.clone(), entry.modified);
                index.insert(parent.clone(), dir.clone());
                stack.push(dir);
                synthesized += 1;
            }
            children.insert(parent, vec![entry]);
        }

        debug!(
            entries = index.len(),
            directories = children.len(),
            synthesized,
            "built entry tree"
        );

        Ok(EntryTree {
            entries: index,
            children,
            synthesized,
        })
    }

    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    /// Direct children of the directory at `path`, if it has any
    pub fn children(&self, path: &str) -> Option<&[Entry]> {
        self.children.get(path).map(Vec::as_slice)
    }

    pub fn entries(&self) -> &EntryIndex {
        &self.entries
    }

    /// Number of directories created because the container omitted them
    pub fn synthesized(&self) -> usize {
        self.synthesized
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn names(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_synthesizes_missing_ancestors() {
        let tree = EntryTree::build(vec![Entry::file("a/b/c.txt", 3, Some(42))]).unwrap();

        assert_eq!(tree.synthesized(), 2);
        assert_eq!(names(tree.children(ROOT).unwrap()), vec!["a/"]);
        assert_eq!(names(tree.children("a/").unwrap()), vec!["a/b/"]);
        assert_eq!(names(tree.children("a/b/").unwrap()), vec!["a/b/c.txt"]);

        let a = tree.entry("a/").unwrap();
        assert!(a.is_dir);
        assert_eq!(a.size, 0);
        assert_eq!(a.modified, Some(42));
    }

    #[test]
    fn test_synthesized_directory_listed_once() {
        let tree = EntryTree::build(vec![
            Entry::file("a/b/c.txt", 1, None),
            Entry::file("a/b/d.txt", 1, None),
            Entry::file("a/e.txt", 1, None),
        ])
        .unwrap();

        assert_eq!(tree.synthesized(), 2);
        assert_eq!(names(tree.children(ROOT).unwrap()), vec!["a/"]);
        assert_eq!(names(tree.children("a/").unwrap()), vec!["a/b/", "a/e.txt"]);
        assert_eq!(
            names(tree.children("a/b/").unwrap()),
            vec!["a/b/c.txt", "a/b/d.txt"]
        );
    }

    #[test]
    fn test_explicit_directories_are_not_synthesized() {
        let tree = EntryTree::build(vec![
            Entry::file("x/y.png", 500, Some(7)),
            Entry::directory("x/", Some(1)),
        ])
        .unwrap();

        assert_eq!(tree.synthesized(), 0);
        assert_eq!(tree.entry("x/").unwrap().modified, Some(1));
        assert_eq!(names(tree.children(ROOT).unwrap()), vec!["x/"]);
        assert_eq!(names(tree.children("x/").unwrap()), vec!["x/y.png"]);
    }

    #[test]
    fn test_preserves_container_order() {
        let tree = EntryTree::build(vec![
            Entry::file("z.txt", 1, None),
            Entry::file("a.txt", 1, None),
            Entry::file("m.txt", 1, None),
        ])
        .unwrap();

        assert_eq!(
            names(tree.children(ROOT).unwrap()),
            vec!["z.txt", "a.txt", "m.txt"]
        );
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = EntryTree::build(vec![
            Entry::file("dup.txt", 1, None),
            Entry::file("dup.txt", 2, None),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptContainer);
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_type_mismatch() {
        let file_with_slash = Entry {
            name: "oops/".to_string(),
            size: 1,
            modified: None,
            is_dir: false,
        };
        let err = EntryTree::build(vec![file_with_slash]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptContainer);

        let dir_without_slash = Entry {
            name: "oops".to_string(),
            size: 0,
            modified: None,
            is_dir: true,
        };
        let err = EntryTree::build(vec![dir_without_slash]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptContainer);
    }

    #[test]
    fn test_empty_real_directory_has_no_children_list() {
        let tree = EntryTree::build(vec![Entry::directory("empty/", None)]).unwrap();
        assert!(tree.entry("empty/").is_some());
        assert!(tree.children("empty/").is_none());
        assert_eq!(names(tree.children(ROOT).unwrap()), vec!["empty/"]);
    }

    #[test]
    fn test_deep_nesting_does_not_recurse() {
        let depth = 1_000;
        let path = format!("{}leaf.txt", "d/".repeat(depth));
        let tree = EntryTree::build(vec![Entry::file(path, 1, None)]).unwrap();
        assert_eq!(tree.synthesized(), depth);
        assert_eq!(tree.len(), depth + 1);
    }

    #[test]
    fn test_every_entry_has_complete_ancestor_chain() {
        let tree = EntryTree::build(vec![
            Entry::file("p/q/r/s.txt", 1, None),
            Entry::directory("p/q/", None),
            Entry::file("t/u.txt", 1, None),
        ])
        .unwrap();

        for name in tree.entries().keys() {
            let mut path = name.as_str();
            while path != ROOT {
                let parent = crate::vfs::parent_path(path);
                let siblings = tree.children(parent).expect("parent has children");
                assert!(siblings.iter().any(|e| e.name == path), "{path} missing");
                path = parent;
            }
        }
    }
}
