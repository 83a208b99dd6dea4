//! Generated artifact tree: relative path -> rendered file.

use botforge_core::FileKind;
use std::collections::btree_map::{self, BTreeMap};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedFile {
    pub kind: FileKind,
    /// Template wiring key (or packaging source) the file came from.
    pub wiring: String,
    pub content: Vec<u8>,
}

impl GeneratedFile {
    pub fn new(kind: FileKind, wiring: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self { kind, wiring: wiring.into(), content: content.into() }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// Ordered so that writing and listing are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArtifactTree {
    files: BTreeMap<String, GeneratedFile>,
}

impl ArtifactTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file; returns the file back if the path is already taken.
    pub fn insert(&mut self, path: impl Into<String>, file: GeneratedFile) -> Result<(), GeneratedFile> {
        match self.files.entry(path.into()) {
            btree_map::Entry::Occupied(_) => Err(file),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(file);
                Ok(())
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&GeneratedFile> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GeneratedFile)> {
        self.files.iter().map(|(p, f)| (p.as_str(), f))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(GeneratedFile::size).sum()
    }

    /// Expected `(path, size)` pairs, used to verify what landed on disk.
    pub fn manifest(&self) -> BTreeMap<String, u64> {
        self.files.iter().map(|(p, f)| (p.clone(), f.size())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_duplicates() {
        let mut tree = ArtifactTree::new();
        tree.insert("a.py", GeneratedFile::new(FileKind::Source, "app", "x")).unwrap();
        let back = tree.insert("a.py", GeneratedFile::new(FileKind::Source, "app", "y")).unwrap_err();
        assert_eq!(back.content, b"y");
        assert_eq!(tree.get("a.py").unwrap().content, b"x");
    }

    #[test]
    fn paths_are_sorted() {
        let mut tree = ArtifactTree::new();
        for p in ["z.md", "a.py", "docs/api.md"] {
            tree.insert(p, GeneratedFile::new(FileKind::Doc, "x", "1")).unwrap();
        }
        assert_eq!(tree.paths().collect::<Vec<_>>(), vec!["a.py", "docs/api.md", "z.md"]);
        assert_eq!(tree.total_bytes(), 3);
    }
}
