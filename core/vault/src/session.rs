//! Vault session management.
//!
//! Sessions hold the vault's versioned key material in memory and provide
//! access to vault operations. Keys are automatically zeroized when the
//! session is dropped or locked.

use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use vaulthalla_common::{Error, Result, VaultId};
use vaulthalla_crypto::{derive_key, EncryptionEnvelope, MasterKey, VaultEncryptionManager};
use vaulthalla_storage::StorageProvider;

use crate::config::VaultConfig;
use crate::tree::EntryTree;
use crate::vault::Vault;

/// Session handle for tracking active sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// State of the vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Locked,
}

/// Active vault session.
///
/// Holds the versioned key material via a `VaultEncryptionManager` and
/// provides access to vault operations. Key material is zeroized when the
/// session is dropped or locked.
pub struct VaultSession {
    handle: SessionHandle,
    vault: Vault,
    config: VaultConfig,
    encryption: RwLock<Option<VaultEncryptionManager>>,
    provider: Arc<dyn StorageProvider>,
    tree: Arc<RwLock<EntryTree>>,
    state: SessionState,
}

impl std::fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSession")
            .field("handle", &self.handle)
            .field("vault", &self.vault)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl VaultSession {
    /// Unlock a vault with its password, deriving the version-1 key and
    /// starting an empty entry tree (the caller loads a persisted one
    /// via [`VaultSession::load_tree`] afterward, if one exists).
    ///
    /// # Errors
    /// - Incompatible vault version
    /// - Wrong password
    /// - KDF failure
    pub fn unlock(vault: Vault, config: VaultConfig, password: &[u8], provider: Arc<dyn StorageProvider>) -> Result<Self> {
        if !config.version.is_compatible() {
            return Err(Error::Usage(format!("incompatible vault version: {:?}", config.version)));
        }
        if !config.verify_password(password)? {
            return Err(Error::Permission("invalid password".to_string()));
        }

        let master_key = derive_key(password, &config.salt, &config.kdf_params)?;
        let encryption = VaultEncryptionManager::new(master_key);

        Ok(Self {
            handle: SessionHandle::new(),
            vault,
            config,
            encryption: RwLock::new(Some(encryption)),
            provider,
            tree: Arc::new(RwLock::new(EntryTree::new())),
            state: SessionState::Active,
        })
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn vault_id(&self) -> &VaultId {
        &self.vault.id
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn provider(&self) -> Arc<dyn StorageProvider> {
        self.provider.clone()
    }

    pub fn tree(&self) -> &Arc<RwLock<EntryTree>> {
        &self.tree
    }

    /// Replace the in-memory tree, e.g. after loading a persisted copy.
    pub async fn load_tree(&self, tree: EntryTree) {
        *self.tree.write().await = tree;
    }

    /// Serialize the current tree to the metadata store.
    pub async fn save_tree(&self) -> Result<()> {
        use crate::config::{META_DIRNAME, TREE_FILENAME};
        use vaulthalla_common::VaultPath;

        let json = self.tree.read().await.to_json()?;
        let path = VaultPath::parse(META_DIRNAME)?.join(TREE_FILENAME)?;
        self.provider.upload(&path, json.into_bytes()).await?;
        Ok(())
    }

    fn check_active(&self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Locked => Err(Error::Permission("session is locked".to_string())),
        }
    }

    /// Encrypt under the vault's current key version.
    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptionEnvelope> {
        self.check_active()?;
        let guard = self.encryption.read().await;
        let manager = guard
            .as_ref()
            .ok_or_else(|| Error::Fatal("encryption manager missing on an active session".to_string()))?;
        manager.encrypt(plaintext)
    }

    /// Decrypt a payload encrypted under `key_version`.
    pub async fn decrypt(&self, payload: &[u8], iv_b64: &str, key_version: u32) -> Result<Vec<u8>> {
        self.check_active()?;
        let guard = self.encryption.read().await;
        let manager = guard
            .as_ref()
            .ok_or_else(|| Error::Fatal("encryption manager missing on an active session".to_string()))?;
        manager.decrypt(payload, iv_b64, key_version)
    }

    /// Register a newly generated key as the vault's next version. Returns
    /// the assigned version number.
    pub async fn add_key(&self, key: MasterKey) -> Result<u32> {
        self.check_active()?;
        let mut guard = self.encryption.write().await;
        let manager = guard
            .as_mut()
            .ok_or_else(|| Error::Fatal("encryption manager missing on an active session".to_string()))?;
        Ok(manager.add_key(key))
    }

    /// Re-envelope a payload encrypted under `old_version` under the vault's
    /// current key version.
    pub async fn rotate_envelope(&self, payload: &[u8], old_version: u32) -> Result<EncryptionEnvelope> {
        self.check_active()?;
        let guard = self.encryption.read().await;
        let manager = guard
            .as_ref()
            .ok_or_else(|| Error::Fatal("encryption manager missing on an active session".to_string()))?;
        manager.rotate_decrypt_encrypt(payload, old_version)
    }

    /// The key version new writes are encrypted under.
    pub async fn current_key_version(&self) -> Result<u32> {
        self.check_active()?;
        let guard = self.encryption.read().await;
        let manager = guard
            .as_ref()
            .ok_or_else(|| Error::Fatal("encryption manager missing on an active session".to_string()))?;
        Ok(manager.current_version())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Lock the session, clearing all key material from memory.
    pub fn lock(&mut self) {
        self.encryption.get_mut().take();
        self.state = SessionState::Locked;
    }

    /// Relock the vault with a new password, re-deriving the version-1
    /// key. Existing higher key versions from prior rotations are lost —
    /// callers that have rotated keys should add them again via
    /// [`VaultSession::add_key`] after this call.
    pub fn change_password(&mut self, old_password: &[u8], new_password: &[u8]) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(Error::Permission("session is locked".to_string()));
        }
        if !self.config.verify_password(old_password)? {
            return Err(Error::Permission("invalid old password".to_string()));
        }

        let new_config = VaultConfig::new(new_password, self.config.kdf_params.clone())?;
        let new_master_key = derive_key(new_password, &new_config.salt, &new_config.kdf_params)?;

        self.config = new_config;
        *self.encryption.get_mut() = Some(VaultEncryptionManager::new(new_master_key));
        Ok(())
    }
}

impl Drop for VaultSession {
    fn drop(&mut self) {
        self.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaulthalla_crypto::KdfParams;
    use vaulthalla_storage::MemoryProvider;

    fn test_vault() -> Vault {
        Vault::new(VaultId::new("test").unwrap(), "owner", "test vault", "/mnt/test")
    }

    fn create_test_session() -> (VaultSession, VaultConfig) {
        let password = b"test-password";
        let config = VaultConfig::new(password, KdfParams::moderate()).unwrap();
        let provider = Arc::new(MemoryProvider::new());
        let session = VaultSession::unlock(test_vault(), config.clone(), password, provider).unwrap();
        (session, config)
    }

    #[tokio::test]
    async fn session_creation_derives_active_key_material() {
        let (session, _) = create_test_session();
        assert!(session.is_active());
        assert!(session.current_key_version().await.is_ok());
    }

    #[tokio::test]
    async fn lock_clears_key_material() {
        let (mut session, _) = create_test_session();
        session.lock();

        assert!(!session.is_active());
        assert_eq!(session.state(), SessionState::Locked);
        assert!(session.current_key_version().await.is_err());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let password = b"correct";
        let config = VaultConfig::new(password, KdfParams::moderate()).unwrap();
        let provider = Arc::new(MemoryProvider::new());

        let result = VaultSession::unlock(test_vault(), config, b"wrong", provider);
        assert!(result.is_err());
    }

    #[test]
    fn change_password_rotates_verification_and_key() {
        let (mut session, _) = create_test_session();
        session.change_password(b"test-password", b"new-password").unwrap();

        assert!(session.config().verify_password(b"new-password").unwrap());
        assert!(!session.config().verify_password(b"test-password").unwrap());
    }
}
