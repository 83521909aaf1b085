//! FUSE bridge: translates `fuser::Filesystem` callbacks into
//! `StorageEngine` calls on an unlocked vault session.
//!
//! Scoped to the operations the bridge contract names: `getattr`,
//! `lookup`, `readdir`, `create`, `open`, `read`, `write`, `mkdir`,
//! `rename`, `release`, `forget`, `flush`, `access`. Deletion and other
//! `fuser::Filesystem` methods fall back to the trait's default (ENOSYS)
//! until the contract grows to cover them.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tracing::debug;

use vaulthalla_common::VaultPath;
use vaulthalla_vault::engine::StorageEngine;
use vaulthalla_vault::tree::EntryNode;
use vaulthalla_vault::VaultSession;

/// fuse-path -> inode bookkeeping. The authoritative hierarchy lives in
/// the session's `EntryTree`; this is just the process-local numbering
/// `fuser` requires.
struct InodeMap {
    path_to_inode: HashMap<String, u64>,
    inode_to_path: HashMap<u64, String>,
    next_inode: u64,
}

impl InodeMap {
    fn new() -> Self {
        let mut map = Self { path_to_inode: HashMap::new(), inode_to_path: HashMap::new(), next_inode: 2 };
        map.path_to_inode.insert("/".to_string(), 1);
        map.inode_to_path.insert(1, "/".to_string());
        map
    }

    fn get_or_create_inode(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.path_to_inode.get(path) {
            return ino;
        }
        let ino = self.next_inode;
        self.next_inode += 1;
        self.path_to_inode.insert(path.to_string(), ino);
        self.inode_to_path.insert(ino, path.to_string());
        ino
    }

    fn get_path(&self, inode: u64) -> Option<&str> {
        self.inode_to_path.get(&inode).map(|s| s.as_str())
    }
}

/// A file opened for read or write. Content is pulled (and pushed back)
/// in full rather than streamed, mirroring `StorageEngine`'s whole-file
/// `read_file`/`write_file` contract.
struct OpenFile {
    path: String,
    buffer: Vec<u8>,
    dirty: bool,
}

pub struct VaultFilesystem {
    session: Arc<VaultSession>,
    runtime: Handle,
    inodes: Arc<RwLock<InodeMap>>,
    open_files: Arc<RwLock<HashMap<u64, OpenFile>>>,
    next_fh: Arc<RwLock<u64>>,
    ttl: Duration,
}

fn errno(err: &vaulthalla_common::Error) -> i32 {
    use vaulthalla_common::Error::*;
    match err {
        NotFound(_) => libc::ENOENT,
        AlreadyExists(_) | Conflict(_) => libc::EEXIST,
        Permission(_) => libc::EACCES,
        Usage(_) => libc::EINVAL,
        Capacity(_) => libc::ENOSPC,
        Integrity(_) | Transport(_) | Fatal(_) => libc::EIO,
    }
}

fn join_fuse_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn node_attr(ino: u64, node: &EntryNode) -> FileAttr {
    let is_dir = node.is_directory();
    let size = node.size_bytes.unwrap_or(0);
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(node.modified_at.timestamp().max(0) as u64);
    FileAttr {
        ino,
        size,
        blocks: (size + 511) / 512,
        atime: mtime,
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind: if is_dir { FileType::Directory } else { FileType::RegularFile },
        perm: if is_dir { 0o755 } else { 0o644 },
        nlink: if is_dir { 2 } else { 1 },
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

impl VaultFilesystem {
    pub fn new(session: Arc<VaultSession>, runtime: Handle) -> Self {
        Self {
            session,
            runtime,
            inodes: Arc::new(RwLock::new(InodeMap::new())),
            open_files: Arc::new(RwLock::new(HashMap::new())),
            next_fh: Arc::new(RwLock::new(1)),
            ttl: Duration::from_secs(1),
        }
    }

}

impl Filesystem for VaultFilesystem {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name_str) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        debug!(parent, name = name_str, "lookup");

        let session = self.session.clone();
        let inodes = self.inodes.clone();
        let ttl = self.ttl;

        self.runtime.block_on(async move {
            let parent_path = {
                let map = inodes.read().await;
                match map.get_path(parent) {
                    Some(p) => p.to_string(),
                    None => return reply.error(libc::ENOENT),
                }
            };
            let child_fuse_path = join_fuse_path(&parent_path, name_str);
            let Ok(path) = VaultPath::parse(&child_fuse_path) else {
                return reply.error(libc::ENOENT);
            };

            let tree = session.tree().read().await;
            match tree.get_node(&path) {
                Ok(node) => {
                    let mut map = inodes.write().await;
                    let ino = map.get_or_create_inode(&child_fuse_path);
                    reply.entry(&ttl, &node_attr(ino, node), 0);
                }
                Err(err) => reply.error(errno(&err)),
            }
        });
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let session = self.session.clone();
        let inodes = self.inodes.clone();
        let ttl = self.ttl;

        self.runtime.block_on(async move {
            let Some(fuse_path) = inodes.read().await.get_path(ino).map(str::to_string) else {
                return reply.error(libc::ENOENT);
            };
            let Ok(path) = VaultPath::parse(&fuse_path) else {
                return reply.error(libc::ENOENT);
            };
            let tree = session.tree().read().await;
            match tree.get_node(&path) {
                Ok(node) => reply.attr(&ttl, &node_attr(ino, node)),
                Err(err) => reply.error(errno(&err)),
            }
        });
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let session = self.session.clone();
        let inodes = self.inodes.clone();

        self.runtime.block_on(async move {
            let Some(fuse_path) = inodes.read().await.get_path(ino).map(str::to_string) else {
                return reply.error(libc::ENOENT);
            };
            let Ok(path) = VaultPath::parse(&fuse_path) else {
                return reply.error(libc::ENOENT);
            };
            let tree = session.tree().read().await;
            let children = match tree.list(&path) {
                Ok(children) => children,
                Err(err) => return reply.error(errno(&err)),
            };

            let mut entries: Vec<(u64, FileType, String)> = vec![
                (ino, FileType::Directory, ".".to_string()),
                (ino, FileType::Directory, "..".to_string()),
            ];
            let mut map = inodes.write().await;
            for child in children {
                let child_fuse_path = join_fuse_path(&fuse_path, &child.name);
                let child_ino = map.get_or_create_inode(&child_fuse_path);
                let kind = if child.is_directory() { FileType::Directory } else { FileType::RegularFile };
                entries.push((child_ino, kind, child.name.clone()));
            }

            for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
                if reply.add(ino, (i + 1) as i64, kind, name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn mkdir(&mut self, _req: &Request, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        let Some(name_str) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let session = self.session.clone();
        let inodes = self.inodes.clone();
        let ttl = self.ttl;

        self.runtime.block_on(async move {
            let Some(parent_path) = inodes.read().await.get_path(parent).map(str::to_string) else {
                return reply.error(libc::ENOENT);
            };
            let child_fuse_path = join_fuse_path(&parent_path, name_str);
            let Ok(path) = VaultPath::parse(&child_fuse_path) else {
                return reply.error(libc::EINVAL);
            };
            let Ok(engine) = StorageEngine::new(&session) else {
                return reply.error(libc::EIO);
            };
            if let Err(err) = engine.mkdir(&path).await {
                return reply.error(errno(&err));
            }
            let tree = session.tree().read().await;
            match tree.get_node(&path) {
                Ok(node) => {
                    let ino = inodes.write().await.get_or_create_inode(&child_fuse_path);
                    reply.entry(&ttl, &node_attr(ino, node), 0);
                }
                Err(err) => reply.error(errno(&err)),
            }
        });
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name_str) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let session = self.session.clone();
        let inodes = self.inodes.clone();
        let open_files = self.open_files.clone();
        let next_fh = self.next_fh.clone();
        let ttl = self.ttl;

        self.runtime.block_on(async move {
            let Some(parent_path) = inodes.read().await.get_path(parent).map(str::to_string) else {
                return reply.error(libc::ENOENT);
            };
            let child_fuse_path = join_fuse_path(&parent_path, name_str);
            let Ok(path) = VaultPath::parse(&child_fuse_path) else {
                return reply.error(libc::EINVAL);
            };
            let Ok(engine) = StorageEngine::new(&session) else {
                return reply.error(libc::EIO);
            };
            if let Err(err) = engine.create_file(&path, &[]).await {
                return reply.error(errno(&err));
            }

            let ino = inodes.write().await.get_or_create_inode(&child_fuse_path);
            let fh = {
                let mut next = next_fh.write().await;
                let fh = *next;
                *next += 1;
                fh
            };
            open_files.write().await.insert(fh, OpenFile { path: child_fuse_path, buffer: Vec::new(), dirty: false });

            let tree = session.tree().read().await;
            match tree.get_node(&path) {
                Ok(node) => reply.created(&ttl, &node_attr(ino, node), 0, fh, 0),
                Err(err) => reply.error(errno(&err)),
            }
        });
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let session = self.session.clone();
        let inodes = self.inodes.clone();
        let open_files = self.open_files.clone();
        let next_fh = self.next_fh.clone();

        self.runtime.block_on(async move {
            let Some(fuse_path) = inodes.read().await.get_path(ino).map(str::to_string) else {
                return reply.error(libc::ENOENT);
            };
            let Ok(path) = VaultPath::parse(&fuse_path) else {
                return reply.error(libc::ENOENT);
            };
            let Ok(engine) = StorageEngine::new(&session) else {
                return reply.error(libc::EIO);
            };
            let buffer = match engine.read_file(&path).await {
                Ok(content) => content,
                Err(err) => return reply.error(errno(&err)),
            };

            let fh = {
                let mut next = next_fh.write().await;
                let fh = *next;
                *next += 1;
                fh
            };
            open_files.write().await.insert(fh, OpenFile { path: fuse_path, buffer, dirty: false });
            reply.opened(fh, 0);
        });
    }

    fn read(&mut self, _req: &Request, _ino: u64, fh: u64, offset: i64, size: u32, _flags: i32, _lock: Option<u64>, reply: ReplyData) {
        let open_files = self.open_files.clone();

        self.runtime.block_on(async move {
            let files = open_files.read().await;
            let Some(file) = files.get(&fh) else {
                return reply.error(libc::EBADF);
            };
            let start = offset.max(0) as usize;
            if start >= file.buffer.len() {
                return reply.data(&[]);
            }
            let end = (start + size as usize).min(file.buffer.len());
            reply.data(&file.buffer[start..end]);
        });
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let open_files = self.open_files.clone();
        let data = data.to_vec();

        self.runtime.block_on(async move {
            let mut files = open_files.write().await;
            let Some(file) = files.get_mut(&fh) else {
                return reply.error(libc::EBADF);
            };
            let start = offset.max(0) as usize;
            if file.buffer.len() < start + data.len() {
                file.buffer.resize(start + data.len(), 0);
            }
            file.buffer[start..start + data.len()].copy_from_slice(&data);
            file.dirty = true;
            reply.written(data.len() as u32);
        });
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let session = self.session.clone();
        let open_files = self.open_files.clone();

        self.runtime.block_on(async move {
            let (path, buffer, dirty) = {
                let mut files = open_files.write().await;
                let Some(file) = files.get_mut(&fh) else {
                    return reply.error(libc::EBADF);
                };
                let dirty = file.dirty;
                file.dirty = false;
                (file.path.clone(), file.buffer.clone(), dirty)
            };
            if !dirty {
                return reply.ok();
            }
            let Ok(vault_path) = VaultPath::parse(&path) else {
                return reply.error(libc::EINVAL);
            };
            let Ok(engine) = StorageEngine::new(&session) else {
                return reply.error(libc::EIO);
            };
            match engine.write_file(&vault_path, &buffer).await {
                Ok(()) => reply.ok(),
                Err(err) => reply.error(errno(&err)),
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let session = self.session.clone();
        let open_files = self.open_files.clone();

        self.runtime.block_on(async move {
            let removed = open_files.write().await.remove(&fh);
            if let Some(file) = removed {
                if file.dirty {
                    if let Ok(vault_path) = VaultPath::parse(&file.path) {
                        if let Ok(engine) = StorageEngine::new(&session) {
                            let _ = engine.write_file(&vault_path, &file.buffer).await;
                        }
                    }
                }
            }
            reply.ok();
        });
    }

    fn forget(&mut self, _req: &Request, _ino: u64, _nlookup: u64) {}

    fn access(&mut self, _req: &Request, ino: u64, _mask: i32, reply: ReplyEmpty) {
        let session = self.session.clone();
        let inodes = self.inodes.clone();

        self.runtime.block_on(async move {
            let Some(fuse_path) = inodes.read().await.get_path(ino).map(str::to_string) else {
                return reply.error(libc::ENOENT);
            };
            let Ok(path) = VaultPath::parse(&fuse_path) else {
                return reply.error(libc::ENOENT);
            };
            let tree = session.tree().read().await;
            match tree.get_node(&path) {
                Ok(_) => reply.ok(),
                Err(err) => reply.error(errno(&err)),
            }
        });
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(name_str), Some(newname_str)) = (name.to_str(), newname.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        let session = self.session.clone();
        let inodes = self.inodes.clone();

        self.runtime.block_on(async move {
            let (parent_path, newparent_path) = {
                let map = inodes.read().await;
                match (map.get_path(parent), map.get_path(newparent)) {
                    (Some(p), Some(np)) => (p.to_string(), np.to_string()),
                    _ => return reply.error(libc::ENOENT),
                }
            };
            let from_fuse = join_fuse_path(&parent_path, name_str);
            let to_fuse = join_fuse_path(&newparent_path, newname_str);
            let (Ok(from), Ok(to)) = (VaultPath::parse(&from_fuse), VaultPath::parse(&to_fuse)) else {
                return reply.error(libc::EINVAL);
            };
            let Ok(engine) = StorageEngine::new(&session) else {
                return reply.error(libc::EIO);
            };
            match engine.rename(&from, &to).await {
                Ok(()) => reply.ok(),
                Err(err) => reply.error(errno(&err)),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_fuse_path_handles_root_and_nested_parents() {
        assert_eq!(join_fuse_path("/", "a"), "/a");
        assert_eq!(join_fuse_path("/a", "b"), "/a/b");
    }

    #[test]
    fn errno_maps_not_found_to_enoent() {
        assert_eq!(errno(&vaulthalla_common::Error::NotFound("x".into())), libc::ENOENT);
        assert_eq!(errno(&vaulthalla_common::Error::Capacity("x".into())), libc::ENOSPC);
    }

    #[test]
    fn inode_map_assigns_stable_ids_per_path() {
        let mut map = InodeMap::new();
        let a = map.get_or_create_inode("/a");
        let a_again = map.get_or_create_inode("/a");
        assert_eq!(a, a_again);
        assert_eq!(map.get_path(1), Some("/"));
    }
}
