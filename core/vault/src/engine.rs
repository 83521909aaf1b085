//! Storage Engine: the per-vault façade composing the entry tree, the
//! session's encryption manager, and a storage provider into the vault's
//! public file and directory operations.
//!
//! Grounded on the encrypt-then-write-then-index-then-persist sequencing of
//! the vault's original file operations, generalized to alias-addressed
//! backing paths and per-file `(iv, key_version)` instead of a single
//! session-wide key and encrypted-name addressing.

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use vaulthalla_common::{Error, Result, VaultPath};
use vaulthalla_crypto::MasterKey;
use vaulthalla_path::generate_alias;

use crate::config::DATA_DIRNAME;
use crate::mime;
use crate::session::VaultSession;
use crate::tree::EntryKind;

/// Per-vault file and directory operations.
pub struct StorageEngine<'a> {
    session: &'a VaultSession,
    cloud: Option<CloudExtension>,
}

impl<'a> StorageEngine<'a> {
    /// Build an engine for a local-only vault.
    pub fn new(session: &'a VaultSession) -> Result<Self> {
        if !session.is_active() {
            return Err(Error::Permission("session is not active".to_string()));
        }
        Ok(Self { session, cloud: None })
    }

    /// Build an engine with the cloud extension composed onto it, for a
    /// vault whose `vault_type` is `S3`.
    pub fn with_cloud_extension(session: &'a VaultSession, cloud: CloudExtension) -> Result<Self> {
        let mut engine = Self::new(session)?;
        engine.cloud = Some(cloud);
        Ok(engine)
    }

    pub fn cloud(&self) -> Option<&CloudExtension> {
        self.cloud.as_ref()
    }

    /// Composed backing-storage path for an existing entry: `d/<alias>/.../<alias>`.
    async fn backing_path(&self, path: &VaultPath) -> Result<VaultPath> {
        let chain = self.session.tree().read().await.alias_chain(path)?;
        let mut backing = VaultPath::parse(DATA_DIRNAME)?;
        for alias in &chain {
            backing = backing.join(alias)?;
        }
        Ok(backing)
    }

    /// Create every missing directory component of `path`, bottom-up, each
    /// receiving a freshly generated alias.
    pub async fn mkdir(&self, path: &VaultPath) -> Result<()> {
        let mut ancestors = Vec::new();
        let mut current = Some(path.clone());
        while let Some(p) = current {
            if p.is_root() {
                break;
            }
            ancestors.push(p.clone());
            current = p.parent();
        }
        ancestors.reverse();

        for dir in ancestors {
            let exists = { self.session.tree().read().await.exists(&dir) };
            if exists {
                continue;
            }
            let alias = generate_alias();
            {
                let mut tree = self.session.tree().write().await;
                tree.insert_directory(&dir, alias)?;
            }
            let backing = self.backing_path(&dir).await?;
            self.session.provider().create_dir(&backing).await?;
            debug!(path = %dir, "directory created");
        }

        self.session.save_tree().await?;
        Ok(())
    }

    /// Encrypt `content`, write it to the backing store, and insert a File
    /// entry recording its MIME type, content hash, and `(iv, key_version)`.
    pub async fn create_file(&self, path: &VaultPath, content: &[u8]) -> Result<()> {
        if self.session.tree().read().await.exists(path) {
            return Err(Error::AlreadyExists(format!("{path} already exists")));
        }

        let alias = generate_alias();
        let envelope = self.session.encrypt(content).await?;
        let content_hash = hex::encode(Sha256::digest(content));
        let mime_type = mime::sniff(content).to_string();

        {
            let mut tree = self.session.tree().write().await;
            tree.insert_file(path, alias.clone(), content.len() as u64)?;
            if let EntryKind::File {
                mime_type: mt,
                content_hash: ch,
                encryption_iv,
                encrypted_with_key_version,
            } = &mut tree.get_node_mut(path)?.kind
            {
                *mt = Some(mime_type);
                *ch = Some(content_hash);
                *encryption_iv = envelope.iv_b64.clone();
                *encrypted_with_key_version = envelope.key_version;
            }
        }

        let backing = self.backing_path(path).await?;
        self.session.provider().upload(&backing, envelope.ciphertext).await?;
        self.session.save_tree().await?;

        info!(path = %path, size = content.len(), "file created");
        Ok(())
    }

    /// Decrypt and return a file's plaintext content.
    pub async fn read_file(&self, path: &VaultPath) -> Result<Vec<u8>> {
        let (iv_b64, key_version) = {
            let tree = self.session.tree().read().await;
            let node = tree.get_node(path)?;
            match &node.kind {
                EntryKind::File { encryption_iv, encrypted_with_key_version, .. } => {
                    (encryption_iv.clone(), *encrypted_with_key_version)
                }
                EntryKind::Directory { .. } => return Err(Error::Usage(format!("{path} is a directory"))),
            }
        };

        let backing = self.backing_path(path).await?;
        let ciphertext = self.session.provider().download(&backing).await?;
        self.session.decrypt(&ciphertext, &iv_b64, key_version).await
    }

    /// Re-encrypt `content` under the vault's current key version and
    /// overwrite the file's backing object and entry. Finalization step for
    /// a write; the open-handle/offset bookkeeping belongs to the FUSE
    /// bridge layer, not here.
    pub async fn write_file(&self, path: &VaultPath, content: &[u8]) -> Result<()> {
        {
            let tree = self.session.tree().read().await;
            if !tree.get_node(path)?.is_file() {
                return Err(Error::Usage(format!("{path} is not a file")));
            }
        }

        let envelope = self.session.encrypt(content).await?;
        let content_hash = hex::encode(Sha256::digest(content));
        let mime_type = mime::sniff(content).to_string();

        {
            let mut tree = self.session.tree().write().await;
            let node = tree.get_node_mut(path)?;
            node.size_bytes = Some(content.len() as u64);
            node.modified_at = chrono::Utc::now();
            if let EntryKind::File {
                mime_type: mt,
                content_hash: ch,
                encryption_iv,
                encrypted_with_key_version,
            } = &mut node.kind
            {
                *mt = Some(mime_type);
                *ch = Some(content_hash);
                *encryption_iv = envelope.iv_b64.clone();
                *encrypted_with_key_version = envelope.key_version;
            }
        }

        let backing = self.backing_path(path).await?;
        self.session.provider().upload(&backing, envelope.ciphertext).await?;
        self.session.save_tree().await?;

        info!(path = %path, size = content.len(), "file written");
        Ok(())
    }

    /// Delete a file, or an empty directory.
    pub async fn remove(&self, path: &VaultPath) -> Result<()> {
        let backing = self.backing_path(path).await?;
        let is_dir = {
            let tree = self.session.tree().read().await;
            let node = tree.get_node(path)?;
            if node.is_directory() && !node.list_children().is_empty() {
                return Err(Error::Usage("directory not empty".to_string()));
            }
            node.is_directory()
        };

        if is_dir {
            self.session.provider().delete_dir(&backing).await?;
        } else {
            self.session.provider().delete(&backing).await?;
        }

        {
            let mut tree = self.session.tree().write().await;
            tree.remove(path)?;
        }
        self.session.save_tree().await?;

        info!(path = %path, "removed");
        Ok(())
    }

    /// Rename/move a file or an empty-path-preserving directory. The
    /// backing rename touches only the renamed entry's own alias segment;
    /// its ancestors' aliases (and thus its parent path in the backing
    /// store) may change, but the alias itself never does.
    pub async fn rename(&self, from: &VaultPath, to: &VaultPath) -> Result<()> {
        let old_backing = self.backing_path(from).await?;
        {
            let mut tree = self.session.tree().write().await;
            tree.rename(from, to)?;
        }
        let new_backing = self.backing_path(to).await?;
        self.session.provider().rename(&old_backing, &new_backing).await?;
        self.session.save_tree().await?;

        info!(from = %from, to = %to, "renamed");
        Ok(())
    }

    /// Copy a file under a new path and a fresh alias, re-encrypted under
    /// the vault's current key version. Directory copy is not supported:
    /// rewriting every descendant's path and alias chain in one transaction
    /// is an open question upstream, not yet specified deterministically.
    pub async fn copy(&self, from: &VaultPath, to: &VaultPath) -> Result<()> {
        let is_file = { self.session.tree().read().await.get_node(from)?.is_file() };
        if !is_file {
            return Err(Error::Usage("directory copy is not supported".to_string()));
        }
        let content = self.read_file(from).await?;
        self.create_file(to, &content).await
    }

    /// `vault.quota − (backingSize + cacheSize) − MIN_FREE_SPACE`, the
    /// engine's view of `cacheSize` being always 0 (no file cache layer is
    /// implemented in this crate).
    pub async fn free_space(&self) -> u64 {
        let backing_size = self.session.tree().read().await.total_size();
        self.session.vault().free_space(backing_size, 0)
    }

    /// Generate a fresh key version and re-envelope every file still
    /// encrypted under an older one. Returns the number of files rotated.
    pub async fn rotate_keys(&self) -> Result<usize> {
        self.session.add_key(MasterKey::generate()).await?;
        let current_version = self.session.current_key_version().await?;

        let paths = self.session.tree().read().await.all_file_paths();
        let mut rotated = 0;

        for path in paths {
            let (old_version, iv) = {
                let tree = self.session.tree().read().await;
                match &tree.get_node(&path)?.kind {
                    EntryKind::File { encrypted_with_key_version, encryption_iv, .. } => {
                        (*encrypted_with_key_version, encryption_iv.clone())
                    }
                    EntryKind::Directory { .. } => continue,
                }
            };
            if old_version == current_version {
                continue;
            }

            let backing = self.backing_path(&path).await?;
            let old_ciphertext = self.session.provider().download(&backing).await?;
            let envelope = self.session.rotate_envelope(&old_ciphertext, old_version).await?;

            {
                let mut tree = self.session.tree().write().await;
                if let EntryKind::File { encryption_iv, encrypted_with_key_version, .. } =
                    &mut tree.get_node_mut(&path)?.kind
                {
                    *encryption_iv = envelope.iv_b64.clone();
                    *encrypted_with_key_version = envelope.key_version;
                }
            }
            self.session.provider().upload(&backing, envelope.ciphertext).await?;
            let _ = iv;
            rotated += 1;
        }

        self.session.save_tree().await?;
        info!(rotated, current_version, "key rotation complete");
        Ok(rotated)
    }
}

/// S3 mirroring behavior composed onto the base engine for `vault.type ==
/// S3` vaults. Owns the wire client directly rather than the generic
/// [`vaulthalla_storage::StorageProvider`] trait object: multipart and
/// metadata self-copy are S3-specific and not part of that trait's surface.
pub struct CloudExtension {
    client: vaulthalla_storage::S3Client,
    /// Parts above this size are split for multipart upload.
    multipart_threshold: u64,
}

impl CloudExtension {
    const DEFAULT_MULTIPART_THRESHOLD: u64 = 5 * 1024 * 1024;

    pub fn new(client: vaulthalla_storage::S3Client) -> Self {
        Self { client, multipart_threshold: Self::DEFAULT_MULTIPART_THRESHOLD }
    }

    pub fn client(&self) -> &vaulthalla_storage::S3Client {
        &self.client
    }

    /// Upload `ciphertext` for vault-relative `path`, selecting whole-object
    /// PUT below the multipart threshold. Afterward, stamps `content_hash`
    /// and, if encrypted, the `vh-*` encryption metadata onto the object via
    /// self-copy.
    pub async fn upload_file(
        &self,
        path: &VaultPath,
        ciphertext: Vec<u8>,
        content_hash: &str,
        iv_b64: &str,
        key_version: u32,
    ) -> Result<()> {
        let key = path.to_string_path();
        let key = key.trim_start_matches('/');

        if (ciphertext.len() as u64) < self.multipart_threshold {
            self.client.put_object(key, ciphertext).await?;
        } else {
            self.upload_multipart(key, ciphertext).await?;
        }

        self.client.set_object_vault_metadata(key, content_hash, iv_b64, key_version).await?;
        Ok(())
    }

    async fn upload_multipart(&self, key: &str, ciphertext: Vec<u8>) -> Result<()> {
        const PART_SIZE: usize = 8 * 1024 * 1024;

        let upload_id = self.client.initiate_multipart(key).await?;
        let mut parts = Vec::new();

        let result: Result<()> = async {
            for (i, chunk) in ciphertext.chunks(PART_SIZE).enumerate() {
                let part_number = (i + 1) as u32;
                let etag = self.client.upload_part(key, &upload_id, part_number, chunk.to_vec()).await?;
                parts.push(vaulthalla_storage::CompletedPart { part_number, etag });
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.client.complete_multipart(key, &upload_id, &parts).await?;
                Ok(())
            }
            Err(err) => {
                let _ = self.client.abort_multipart(key, &upload_id).await;
                Err(err)
            }
        }
    }

    /// Download and return `(ciphertext, content_hash, encrypted, iv_b64, key_version)`
    /// metadata for a vault-relative path.
    pub async fn download_file(&self, path: &VaultPath) -> Result<CloudObject> {
        let key = path.to_string_path();
        let key = key.trim_start_matches('/');

        let headers = self
            .client
            .head_object(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("object not found: {key}")))?;
        let ciphertext = self.client.get_object(key).await?;

        let content_hash = headers.get("x-amz-meta-content-hash").cloned();
        let encrypted = headers
            .get("x-amz-meta-vh-encrypted")
            .map(|v| v == "true")
            .unwrap_or(false);
        let iv_b64 = headers.get("x-amz-meta-vh-iv").cloned();
        let key_version = headers
            .get("x-amz-meta-vh-key-version")
            .and_then(|v| v.parse::<u32>().ok());

        Ok(CloudObject { ciphertext, content_hash, encrypted, iv_b64, key_version })
    }
}

/// A downloaded object together with the user metadata the engine wrote
/// alongside it.
pub struct CloudObject {
    pub ciphertext: Vec<u8>,
    pub content_hash: Option<String>,
    pub encrypted: bool,
    pub iv_b64: Option<String>,
    pub key_version: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vaulthalla_common::VaultId;
    use vaulthalla_crypto::KdfParams;
    use vaulthalla_storage::MemoryProvider;

    use crate::config::VaultConfig;
    use crate::vault::Vault;

    async fn test_session() -> VaultSession {
        let password = b"test-password";
        let config = VaultConfig::new(password, KdfParams::moderate()).unwrap();
        let provider = Arc::new(MemoryProvider::new());
        let vault = Vault::new(VaultId::new("v1").unwrap(), "owner", "v1", "/mnt/v1");
        VaultSession::unlock(vault, config, password, provider).unwrap()
    }

    #[tokio::test]
    async fn create_and_read_file_round_trips_plaintext() {
        let session = test_session().await;
        let engine = StorageEngine::new(&session).unwrap();

        let path = VaultPath::parse("/report.pdf").unwrap();
        engine.create_file(&path, b"%PDF-1.4 fake pdf body").await.unwrap();

        let content = engine.read_file(&path).await.unwrap();
        assert_eq!(content, b"%PDF-1.4 fake pdf body");
    }

    #[tokio::test]
    async fn create_file_infers_mime_and_hash() {
        let session = test_session().await;
        let engine = StorageEngine::new(&session).unwrap();

        let path = VaultPath::parse("/a.png").unwrap();
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        png.extend_from_slice(&[0; 16]);
        engine.create_file(&path, &png).await.unwrap();

        let tree = session.tree().read().await;
        let node = tree.get_node(&path).unwrap();
        match &node.kind {
            EntryKind::File { mime_type, content_hash, .. } => {
                assert_eq!(mime_type.as_deref(), Some("image/png"));
                assert_eq!(content_hash.as_deref(), Some(hex::encode(Sha256::digest(&png)).as_str()));
            }
            _ => panic!("expected file"),
        }
    }

    #[tokio::test]
    async fn mkdir_creates_missing_ancestors() {
        let session = test_session().await;
        let engine = StorageEngine::new(&session).unwrap();

        engine.mkdir(&VaultPath::parse("/a/b/c").unwrap()).await.unwrap();

        let tree = session.tree().read().await;
        assert!(tree.exists(&VaultPath::parse("/a").unwrap()));
        assert!(tree.exists(&VaultPath::parse("/a/b").unwrap()));
        assert!(tree.exists(&VaultPath::parse("/a/b/c").unwrap()));
    }

    #[tokio::test]
    async fn write_file_updates_content_and_hash() {
        let session = test_session().await;
        let engine = StorageEngine::new(&session).unwrap();

        let path = VaultPath::parse("/note.txt").unwrap();
        engine.create_file(&path, b"first").await.unwrap();
        engine.write_file(&path, b"second version").await.unwrap();

        assert_eq!(engine.read_file(&path).await.unwrap(), b"second version");
    }

    #[tokio::test]
    async fn remove_rejects_nonempty_directory() {
        let session = test_session().await;
        let engine = StorageEngine::new(&session).unwrap();

        engine.mkdir(&VaultPath::parse("/dir").unwrap()).await.unwrap();
        engine.create_file(&VaultPath::parse("/dir/f").unwrap(), b"x").await.unwrap();

        let err = engine.remove(&VaultPath::parse("/dir").unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[tokio::test]
    async fn rename_moves_file_and_preserves_content() {
        let session = test_session().await;
        let engine = StorageEngine::new(&session).unwrap();

        engine.mkdir(&VaultPath::parse("/a").unwrap()).await.unwrap();
        engine.create_file(&VaultPath::parse("/a/foo").unwrap(), b"payload").await.unwrap();

        engine
            .rename(&VaultPath::parse("/a/foo").unwrap(), &VaultPath::parse("/a/bar").unwrap())
            .await
            .unwrap();

        assert!(!session.tree().read().await.exists(&VaultPath::parse("/a/foo").unwrap()));
        let content = engine.read_file(&VaultPath::parse("/a/bar").unwrap()).await.unwrap();
        assert_eq!(content, b"payload");
    }

    #[tokio::test]
    async fn copy_duplicates_file_under_new_path() {
        let session = test_session().await;
        let engine = StorageEngine::new(&session).unwrap();

        engine.create_file(&VaultPath::parse("/src").unwrap(), b"dup me").await.unwrap();
        engine
            .copy(&VaultPath::parse("/src").unwrap(), &VaultPath::parse("/dst").unwrap())
            .await
            .unwrap();

        assert_eq!(engine.read_file(&VaultPath::parse("/dst").unwrap()).await.unwrap(), b"dup me");
        assert_eq!(engine.read_file(&VaultPath::parse("/src").unwrap()).await.unwrap(), b"dup me");
    }

    #[tokio::test]
    async fn free_space_reflects_backing_usage() {
        let session = test_session().await;
        let engine = StorageEngine::new(&session).unwrap();
        let before = engine.free_space().await;

        engine.create_file(&VaultPath::parse("/f").unwrap(), &[0u8; 1024]).await.unwrap();
        let after = engine.free_space().await;

        assert!(after < before);
    }

    #[tokio::test]
    async fn rotate_keys_re_envelopes_every_file() {
        let session = test_session().await;
        let engine = StorageEngine::new(&session).unwrap();

        engine.create_file(&VaultPath::parse("/x").unwrap(), b"one").await.unwrap();
        engine.create_file(&VaultPath::parse("/y").unwrap(), b"two").await.unwrap();

        let rotated = engine.rotate_keys().await.unwrap();
        assert_eq!(rotated, 2);

        let new_version = session.current_key_version().await.unwrap();
        let tree = session.tree().read().await;
        for name in ["x", "y"] {
            let node = tree.get_node(&VaultPath::parse(&format!("/{name}")).unwrap()).unwrap();
            match &node.kind {
                EntryKind::File { encrypted_with_key_version, .. } => {
                    assert_eq!(*encrypted_with_key_version, new_version);
                }
                _ => panic!("expected file"),
            }
        }
        drop(tree);

        assert_eq!(engine.read_file(&VaultPath::parse("/x").unwrap()).await.unwrap(), b"one");
        assert_eq!(engine.read_file(&VaultPath::parse("/y").unwrap()).await.unwrap(), b"two");
    }
}
