//! FS Index / Cache: the authoritative process-local map of filesystem
//! identity for a mounted vault.
//!
//! Tracks the cached entry for every looked-up path, the inode bijection,
//! in-flight renames, and open-handle refcounts. This is the single writer
//! for path<->inode state; the FUSE bridge and admin handlers only read
//! snapshots or issue mutations that pass through here.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::trace;

/// Root inode, reserved by the FUSE protocol itself.
pub const FUSE_ROOT_ID: u64 = 1;

/// Directory- or file-specific attributes of an [`FSEntry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    Directory {
        file_count: u64,
        subdirectory_count: u64,
    },
    File {
        mime_type: Option<String>,
        content_hash: Option<String>,
        encryption_iv: String,
        encrypted_with_key_version: u32,
    },
}

/// A node in a vault's tree, as cached by the FS Index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FSEntry {
    pub id: String,
    pub vault_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    /// Stable opaque backing-path segment for this node.
    pub base32_alias: String,
    pub size_bytes: u64,
    pub mode: u32,
    pub owner_uid: u32,
    pub group_gid: u32,
    pub inode: u64,
    /// Vault-relative path (wire identity).
    pub path: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub modified_at: chrono::DateTime<chrono::Utc>,
    pub kind: NodeKind,
}

impl FSEntry {
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, FSEntry>,
    path_to_inode: HashMap<String, u64>,
    inode_table: HashMap<u64, String>,
    pending_renames: HashMap<u64, (String, String)>,
    open_handle_counts: HashMap<u64, u64>,
    /// Inodes whose path was evicted while handles were still open; freed
    /// once the refcount drains to zero.
    pending_eviction: HashSet<u64>,
    next_inode: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            next_inode: FUSE_ROOT_ID + 1,
            ..Default::default()
        }
    }
}

/// Process-local filesystem identity index for one vault.
pub struct FsIndex {
    inner: RwLock<Inner>,
}

impl Default for FsIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FsIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
        }
    }

    /// Cache-only lookup; a miss must be resolved by the Storage Engine
    /// against the persistent entry store, not by this index.
    pub async fn get_entry(&self, fuse_path: &str) -> Option<FSEntry> {
        self.inner.read().await.entries.get(fuse_path).cloned()
    }

    pub async fn cache_entry(&self, entry: FSEntry) {
        let mut inner = self.inner.write().await;
        inner.entries.insert(entry.path.clone(), entry);
    }

    /// Drops the cached entry for `fuse_path`. If the path's inode has no
    /// open handles, the inode is freed immediately; otherwise it is kept
    /// reserved until the refcount drains via [`FsIndex::decrement_handle`].
    pub async fn evict_path(&self, fuse_path: &str) {
        let mut inner = self.inner.write().await;
        inner.entries.remove(fuse_path);
        let Some(&ino) = inner.path_to_inode.get(fuse_path) else {
            return;
        };
        let open = inner.open_handle_counts.get(&ino).copied().unwrap_or(0);
        if open == 0 {
            inner.path_to_inode.remove(fuse_path);
            inner.inode_table.remove(&ino);
            inner.open_handle_counts.remove(&ino);
        } else {
            inner.pending_eviction.insert(ino);
        }
    }

    /// Monotonically increasing; returns the same value on repeated calls
    /// until the path is evicted AND its refcount has drained.
    pub async fn assign_inode(&self, fuse_path: &str) -> u64 {
        let mut inner = self.inner.write().await;
        if let Some(&ino) = inner.path_to_inode.get(fuse_path) {
            return ino;
        }
        let ino = inner.next_inode;
        inner.next_inode += 1;
        inner.path_to_inode.insert(fuse_path.to_string(), ino);
        inner.inode_table.insert(ino, fuse_path.to_string());
        trace!(ino, fuse_path, "assigned inode");
        ino
    }

    pub async fn resolve_inode(&self, ino: u64) -> Option<String> {
        self.inner.read().await.inode_table.get(&ino).cloned()
    }

    pub async fn set_pending_rename(&self, ino: u64, old_fuse_path: String, new_fuse_path: String) {
        self.inner
            .write()
            .await
            .pending_renames
            .insert(ino, (old_fuse_path, new_fuse_path));
    }

    /// Consumed by `release`.
    pub async fn take_pending_rename(&self, ino: u64) -> Option<(String, String)> {
        self.inner.write().await.pending_renames.remove(&ino)
    }

    /// Incremented on lookup/create/open.
    pub async fn increment_handle(&self, ino: u64) -> u64 {
        let mut inner = self.inner.write().await;
        let count = inner.open_handle_counts.entry(ino).or_insert(0);
        *count += 1;
        *count
    }

    /// Decremented on `forget` by exactly the count the kernel reports.
    /// Finalizes a pending eviction once the refcount reaches zero.
    pub async fn decrement_handle(&self, ino: u64, by: u64) -> u64 {
        let mut inner = self.inner.write().await;
        let remaining = {
            let count = inner.open_handle_counts.entry(ino).or_insert(0);
            *count = count.saturating_sub(by);
            *count
        };
        if remaining == 0 && inner.pending_eviction.remove(&ino) {
            if let Some(path) = inner.inode_table.remove(&ino) {
                inner.path_to_inode.remove(&path);
            }
            inner.open_handle_counts.remove(&ino);
        }
        remaining
    }

    pub async fn handle_count(&self, ino: u64) -> u64 {
        self.inner
            .read()
            .await
            .open_handle_counts
            .get(&ino)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(path: &str, inode: u64) -> FSEntry {
        let now = chrono::Utc::now();
        FSEntry {
            id: "e1".into(),
            vault_id: "v1".into(),
            parent_id: None,
            name: path.trim_start_matches('/').to_string(),
            base32_alias: "AAAA".into(),
            size_bytes: 0,
            mode: 0o644,
            owner_uid: 1000,
            group_gid: 1000,
            inode,
            path: path.to_string(),
            created_at: now,
            modified_at: now,
            kind: NodeKind::Directory {
                file_count: 0,
                subdirectory_count: 0,
            },
        }
    }

    #[tokio::test]
    async fn assign_inode_is_stable_across_calls() {
        let index = FsIndex::new();
        let a = index.assign_inode("/docs").await;
        let b = index.assign_inode("/docs").await;
        assert_eq!(a, b);
        assert!(a >= FUSE_ROOT_ID + 1);
    }

    #[tokio::test]
    async fn distinct_paths_never_share_an_inode() {
        let index = FsIndex::new();
        let a = index.assign_inode("/docs").await;
        let b = index.assign_inode("/photos").await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn evict_with_no_open_handles_frees_inode_immediately() {
        let index = FsIndex::new();
        let ino = index.assign_inode("/docs").await;
        index.cache_entry(sample_entry("/docs", ino)).await;
        index.evict_path("/docs").await;

        assert!(index.get_entry("/docs").await.is_none());
        assert!(index.resolve_inode(ino).await.is_none());

        let reassigned = index.assign_inode("/docs").await;
        assert_ne!(reassigned, ino, "freed inode must not silently alias old state");
    }

    #[tokio::test]
    async fn evict_with_open_handles_defers_inode_reuse_until_forget_drains() {
        let index = FsIndex::new();
        let ino = index.assign_inode("/docs").await;
        index.increment_handle(ino).await;
        index.increment_handle(ino).await;

        index.evict_path("/docs").await;
        // Inode still resolvable: handles are still open.
        assert_eq!(index.resolve_inode(ino).await, Some("/docs".to_string()));

        index.decrement_handle(ino, 1).await;
        assert_eq!(index.resolve_inode(ino).await, Some("/docs".to_string()));

        index.decrement_handle(ino, 1).await;
        assert!(index.resolve_inode(ino).await.is_none());
    }

    #[tokio::test]
    async fn pending_rename_is_set_once_and_consumed_once() {
        let index = FsIndex::new();
        let ino = index.assign_inode("/docs").await;
        index
            .set_pending_rename(ino, "/docs".to_string(), "/documents".to_string())
            .await;
        let taken = index.take_pending_rename(ino).await;
        assert_eq!(taken, Some(("/docs".to_string(), "/documents".to_string())));
        assert_eq!(index.take_pending_rename(ino).await, None);
    }
}
