//! The per-vault entry tree: the authoritative, persisted hierarchy of
//! `FSEntry` records independent of the backing storage provider. The FS
//! Index (`vaulthalla_index`) is a process-local fuse-path→inode cache
//! that consults this tree on a miss; this tree is what gets written
//! through to disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use vaulthalla_common::{Error, Result, VaultPath};

/// Per-kind fields for an entry, mirroring the File/Directory split in
/// the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EntryKind {
    Directory {
        file_count: u32,
        subdirectory_count: u32,
    },
    File {
        mime_type: Option<String>,
        content_hash: Option<String>,
        encryption_iv: String,
        encrypted_with_key_version: u32,
    },
}

impl EntryKind {
    pub fn is_file(&self) -> bool {
        matches!(self, EntryKind::File { .. })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, EntryKind::Directory { .. })
    }
}

/// One node in the tree: a directory or a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryNode {
    pub id: String,
    pub name: String,
    /// Stable opaque per-node backing-path segment (§4.1 aliasing).
    pub base32_alias: String,
    pub size_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub kind: EntryKind,
    pub children: HashMap<String, EntryNode>,
}

impl EntryNode {
    pub fn new_file(name: impl Into<String>, base32_alias: impl Into<String>, size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            base32_alias: base32_alias.into(),
            size_bytes: Some(size_bytes),
            created_at: now,
            modified_at: now,
            kind: EntryKind::File {
                mime_type: None,
                content_hash: None,
                encryption_iv: String::new(),
                encrypted_with_key_version: 0,
            },
            children: HashMap::new(),
        }
    }

    pub fn new_directory(name: impl Into<String>, base32_alias: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            base32_alias: base32_alias.into(),
            size_bytes: None,
            created_at: now,
            modified_at: now,
            kind: EntryKind::Directory { file_count: 0, subdirectory_count: 0 },
            children: HashMap::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }

    pub fn get_child(&self, name: &str) -> Option<&EntryNode> {
        self.children.get(name)
    }

    pub fn get_child_mut(&mut self, name: &str) -> Option<&mut EntryNode> {
        self.children.get_mut(name)
    }

    pub fn add_child(&mut self, node: EntryNode) -> Result<()> {
        if self.is_file() {
            return Err(Error::Usage("cannot add child to a file".to_string()));
        }
        let name = node.name.clone();
        if self.children.contains_key(&name) {
            return Err(Error::AlreadyExists(format!("child '{name}' already exists")));
        }
        let is_dir = node.is_directory();
        self.children.insert(name, node);
        self.bump_counts(is_dir, 1);
        self.modified_at = Utc::now();
        Ok(())
    }

    pub fn remove_child(&mut self, name: &str) -> Result<EntryNode> {
        let removed = self
            .children
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("child '{name}' not found")))?;
        self.bump_counts(removed.is_directory(), -1);
        self.modified_at = Utc::now();
        Ok(removed)
    }

    fn bump_counts(&mut self, is_dir: bool, delta: i32) {
        if let EntryKind::Directory { file_count, subdirectory_count } = &mut self.kind {
            if is_dir {
                *subdirectory_count = (*subdirectory_count as i32 + delta).max(0) as u32;
            } else {
                *file_count = (*file_count as i32 + delta).max(0) as u32;
            }
        }
    }

    pub fn list_children(&self) -> Vec<String> {
        self.children.keys().cloned().collect()
    }
}

/// The per-vault entry hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryTree {
    root: EntryNode,
}

impl EntryTree {
    pub fn new() -> Self {
        Self { root: EntryNode::new_directory("/", "root") }
    }

    pub fn root(&self) -> &EntryNode {
        &self.root
    }

    pub fn get_node(&self, path: &VaultPath) -> Result<&EntryNode> {
        if path.is_root() {
            return Ok(&self.root);
        }
        let mut current = &self.root;
        for component in path.components() {
            current = current
                .get_child(component)
                .ok_or_else(|| Error::NotFound(format!("path not found: {path}")))?;
        }
        Ok(current)
    }

    pub fn get_node_mut(&mut self, path: &VaultPath) -> Result<&mut EntryNode> {
        if path.is_root() {
            return Ok(&mut self.root);
        }
        let mut current = &mut self.root;
        for component in path.components().to_vec() {
            current = current
                .get_child_mut(&component)
                .ok_or_else(|| Error::NotFound(format!("path not found: {path}")))?;
        }
        Ok(current)
    }

    fn get_parent_mut(&mut self, path: &VaultPath) -> Result<&mut EntryNode> {
        match path.parent() {
            Some(parent_path) => self.get_node_mut(&parent_path),
            None => Err(Error::Usage("root has no parent".to_string())),
        }
    }

    pub fn exists(&self, path: &VaultPath) -> bool {
        self.get_node(path).is_ok()
    }

    /// The chain of `base32_alias` segments from the top-level component of
    /// `path` down to its leaf, one per directory level, mirroring the
    /// backing-path aliasing a path resolver would apply.
    pub fn alias_chain(&self, path: &VaultPath) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        let mut current = &self.root;
        for component in path.components() {
            current = current
                .get_child(component)
                .ok_or_else(|| Error::NotFound(format!("path not found: {path}")))?;
            chain.push(current.base32_alias.clone());
        }
        Ok(chain)
    }

    pub fn insert_file(&mut self, path: &VaultPath, base32_alias: impl Into<String>, size_bytes: u64) -> Result<()> {
        let name = path.name().ok_or_else(|| Error::Usage("cannot create file at root".to_string()))?;
        let parent = self.get_parent_mut(path)?;
        parent.add_child(EntryNode::new_file(name, base32_alias, size_bytes))
    }

    pub fn insert_directory(&mut self, path: &VaultPath, base32_alias: impl Into<String>) -> Result<()> {
        let name = path.name().ok_or_else(|| Error::Usage("cannot create directory at root".to_string()))?;
        let parent = self.get_parent_mut(path)?;
        parent.add_child(EntryNode::new_directory(name, base32_alias))
    }

    pub fn remove(&mut self, path: &VaultPath) -> Result<EntryNode> {
        let name = path.name().ok_or_else(|| Error::Usage("cannot remove root".to_string()))?;
        let parent = self.get_parent_mut(path)?;
        parent.remove_child(name)
    }

    /// Moves the subtree at `from` to `to` without re-reading it through
    /// the backing store. The caller is responsible for renaming the
    /// backing alias directory/file to match (a single `rename(2)`-shaped
    /// op) and, for directories, the stated §9 open question about
    /// rewriting every descendant's `path` is covered by this move being
    /// structural: children keep their relative position in the map, so
    /// no per-descendant walk is needed here.
    pub fn rename(&mut self, from: &VaultPath, to: &VaultPath) -> Result<()> {
        if self.exists(to) {
            return Err(Error::AlreadyExists(format!("destination already exists: {to}")));
        }
        let mut node = self.remove(from)?;
        let new_name = to.name().ok_or_else(|| Error::Usage("cannot rename to root".to_string()))?;
        node.name = new_name.to_string();
        node.modified_at = Utc::now();
        let parent = self.get_parent_mut(to)?;
        parent.add_child(node)
    }

    pub fn list(&self, path: &VaultPath) -> Result<Vec<&EntryNode>> {
        let node = self.get_node(path)?;
        if !node.is_directory() {
            return Err(Error::Usage("not a directory".to_string()));
        }
        Ok(node.children.values().collect())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn total_size(&self) -> u64 {
        Self::total_size_recursive(&self.root)
    }

    /// Every file path in the tree, depth-first. Used by bulk operations
    /// (key rotation) that must visit every file regardless of directory
    /// shape.
    pub fn all_file_paths(&self) -> Vec<VaultPath> {
        let mut out = Vec::new();
        Self::collect_files(&self.root, &VaultPath::root(), &mut out);
        out
    }

    fn collect_files(node: &EntryNode, prefix: &VaultPath, out: &mut Vec<VaultPath>) {
        for child in node.children.values() {
            let Ok(path) = prefix.join(&child.name) else { continue };
            if child.is_file() {
                out.push(path.clone());
            } else {
                Self::collect_files(child, &path, out);
            }
        }
    }

    fn total_size_recursive(node: &EntryNode) -> u64 {
        node.children
            .values()
            .map(|child| {
                if child.is_file() {
                    child.size_bytes.unwrap_or(0)
                } else {
                    Self::total_size_recursive(child)
                }
            })
            .sum()
    }
}

impl Default for EntryTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_creation_starts_with_empty_root_directory() {
        let tree = EntryTree::new();
        assert!(tree.root().is_directory());
    }

    #[test]
    fn insert_and_navigate_to_file() {
        let mut tree = EntryTree::new();
        let path = VaultPath::parse("/test.txt").unwrap();
        tree.insert_file(&path, "alias1", 100).unwrap();

        let node = tree.get_node(&path).unwrap();
        assert!(node.is_file());
        assert_eq!(node.size_bytes, Some(100));
    }

    #[test]
    fn directory_counts_track_children() {
        let mut tree = EntryTree::new();
        tree.insert_directory(&VaultPath::parse("/dir").unwrap(), "d1").unwrap();
        tree.insert_file(&VaultPath::parse("/dir/a").unwrap(), "a1", 1).unwrap();
        tree.insert_directory(&VaultPath::parse("/dir/sub").unwrap(), "s1").unwrap();

        let dir = tree.get_node(&VaultPath::parse("/dir").unwrap()).unwrap();
        match dir.kind {
            EntryKind::Directory { file_count, subdirectory_count } => {
                assert_eq!(file_count, 1);
                assert_eq!(subdirectory_count, 1);
            }
            _ => panic!("expected directory"),
        }
    }

    #[test]
    fn rename_preserves_identity_and_moves_subtree() {
        let mut tree = EntryTree::new();
        tree.insert_directory(&VaultPath::parse("/a").unwrap(), "d1").unwrap();
        tree.insert_file(&VaultPath::parse("/a/foo").unwrap(), "f1", 10).unwrap();

        tree.rename(&VaultPath::parse("/a/foo").unwrap(), &VaultPath::parse("/a/bar").unwrap()).unwrap();

        assert!(!tree.exists(&VaultPath::parse("/a/foo").unwrap()));
        let renamed = tree.get_node(&VaultPath::parse("/a/bar").unwrap()).unwrap();
        assert_eq!(renamed.base32_alias, "f1");
    }

    #[test]
    fn remove_drops_node_and_updates_parent_counts() {
        let mut tree = EntryTree::new();
        let path = VaultPath::parse("/file.txt").unwrap();
        tree.insert_file(&path, "e", 100).unwrap();
        assert!(tree.exists(&path));

        tree.remove(&path).unwrap();
        assert!(!tree.exists(&path));
    }

    #[test]
    fn alias_chain_collects_one_segment_per_level() {
        let mut tree = EntryTree::new();
        tree.insert_directory(&VaultPath::parse("/dir").unwrap(), "d-alias").unwrap();
        tree.insert_file(&VaultPath::parse("/dir/f").unwrap(), "f-alias", 1).unwrap();

        let chain = tree.alias_chain(&VaultPath::parse("/dir/f").unwrap()).unwrap();
        assert_eq!(chain, vec!["d-alias".to_string(), "f-alias".to_string()]);
    }

    #[test]
    fn tree_roundtrips_through_json() {
        let mut tree = EntryTree::new();
        tree.insert_directory(&VaultPath::parse("/dir").unwrap(), "d").unwrap();
        tree.insert_file(&VaultPath::parse("/dir/f").unwrap(), "e", 10).unwrap();

        let json = tree.to_json().unwrap();
        let restored = EntryTree::from_json(&json).unwrap();

        assert!(restored.exists(&VaultPath::parse("/dir/f").unwrap()));
    }
}
