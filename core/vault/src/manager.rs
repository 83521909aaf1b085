//! Vault manager for creating and opening vaults.
//!
//! This is the lifecycle layer above a [`VaultSession`]: it resolves a
//! storage provider, bootstraps or loads a vault's crypto config and entry
//! tree, and hands back an unlocked session. Callers build a
//! [`crate::engine::StorageEngine`] on top of the returned session to run
//! file operations.

use std::sync::Arc;

use vaulthalla_common::{Error, Result, VaultId, VaultPath};
use vaulthalla_crypto::KdfParams;
use vaulthalla_storage::{create_default_registry, ProviderRegistry, StorageProvider};

use crate::config::{VaultConfig, CONFIG_FILENAME, DATA_DIRNAME, META_DIRNAME, TREE_FILENAME};
use crate::session::VaultSession;
use crate::tree::EntryTree;
use crate::vault::Vault;

/// Vault manager for creating and opening vaults.
pub struct VaultManager {
    registry: ProviderRegistry,
}

impl VaultManager {
    /// Create a new vault manager with default providers.
    pub fn new() -> Self {
        Self {
            registry: create_default_registry(),
        }
    }

    /// Create with a custom registry.
    pub fn with_registry(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.registry
    }

    /// Create a new vault: bootstrap its crypto config, lay out the
    /// backing/metadata directories, persist an empty entry tree, and
    /// return an active session.
    ///
    /// # Preconditions
    /// - `provider_type` must be registered
    /// - `provider_config` must be valid for that provider
    ///
    /// # Errors
    /// - Provider not found or misconfigured
    /// - Storage access failure
    pub async fn create_vault(
        &self,
        vault: Vault,
        password: &[u8],
        provider_type: &str,
        provider_config: serde_json::Value,
        kdf_params: KdfParams,
    ) -> Result<VaultSession> {
        let provider = self.registry.resolve(provider_type, provider_config)?;

        let config = VaultConfig::new(password, kdf_params)?;
        self.initialize_vault_structure(&provider, &config).await?;

        let session = VaultSession::unlock(vault, config, password, provider)?;
        session.save_tree().await?;
        Ok(session)
    }

    /// Lay out a fresh vault's backing/metadata directories and persist
    /// its crypto config.
    async fn initialize_vault_structure(
        &self,
        provider: &Arc<dyn StorageProvider>,
        config: &VaultConfig,
    ) -> Result<()> {
        let data_path = VaultPath::parse(DATA_DIRNAME)?;
        if !provider.exists(&data_path).await? {
            provider.create_dir(&data_path).await?;
        }

        let meta_path = VaultPath::parse(META_DIRNAME)?;
        if !provider.exists(&meta_path).await? {
            provider.create_dir(&meta_path).await?;
        }

        let config_path = VaultPath::parse(CONFIG_FILENAME)?;
        provider.upload(&config_path, config.to_bytes()?).await?;

        Ok(())
    }

    /// Open an existing vault: load its crypto config and entry tree and
    /// return an active session.
    ///
    /// # Preconditions
    /// - A vault must already exist at the resolved provider location
    /// - `password` must be correct
    ///
    /// # Errors
    /// - Vault not found
    /// - Invalid password
    /// - Incompatible version
    pub async fn open_vault(
        &self,
        vault: Vault,
        provider_type: &str,
        provider_config: serde_json::Value,
        password: &[u8],
    ) -> Result<VaultSession> {
        let provider = self.registry.resolve(provider_type, provider_config)?;

        let config_path = VaultPath::parse(CONFIG_FILENAME)?;
        if !provider.exists(&config_path).await? {
            return Err(Error::NotFound("vault configuration not found".to_string()));
        }
        let config_bytes = provider.download(&config_path).await?;
        let config = VaultConfig::from_bytes(&config_bytes)?;

        let session = VaultSession::unlock(vault, config, password, provider)?;

        let tree_path = VaultPath::parse(META_DIRNAME)?.join(TREE_FILENAME)?;
        if session.provider().exists(&tree_path).await? {
            let tree_bytes = session.provider().download(&tree_path).await?;
            let tree = EntryTree::from_json(&String::from_utf8_lossy(&tree_bytes))?;
            session.load_tree(tree).await;
        }

        Ok(session)
    }

    /// Check whether a vault's config file exists at the resolved
    /// provider location, without unlocking it.
    pub async fn vault_exists(&self, provider_type: &str, provider_config: serde_json::Value) -> Result<bool> {
        let provider = self.registry.resolve(provider_type, provider_config)?;
        let config_path = VaultPath::parse(CONFIG_FILENAME)?;
        provider.exists(&config_path).await
    }
}

impl Default for VaultManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault(name: &str) -> Vault {
        Vault::new(VaultId::new(name).unwrap(), "owner", name, format!("/mnt/{name}"))
    }

    #[tokio::test]
    async fn create_vault_persists_config_and_tree() {
        let manager = VaultManager::new();
        let password = b"secure-password";

        let session = manager
            .create_vault(test_vault("v1"), password, "memory", serde_json::Value::Null, KdfParams::moderate())
            .await
            .unwrap();

        assert!(session.is_active());
        assert_eq!(session.vault_id().as_str(), "v1");

        let config_path = VaultPath::parse(CONFIG_FILENAME).unwrap();
        assert!(session.provider().exists(&config_path).await.unwrap());
    }

    #[tokio::test]
    async fn open_vault_restores_session_against_same_provider() {
        let manager = VaultManager::new();
        let password = b"secure-password";

        let session = manager
            .create_vault(test_vault("v2"), password, "memory", serde_json::Value::Null, KdfParams::moderate())
            .await
            .unwrap();
        let provider = session.provider();
        drop(session);

        // Re-resolve through a registry backed by the provider we just
        // populated: the memory provider type mints a fresh instance per
        // resolve, so exercise open_vault's load path directly against it.
        let config_path = VaultPath::parse(CONFIG_FILENAME).unwrap();
        let config_bytes = provider.download(&config_path).await.unwrap();
        let config = VaultConfig::from_bytes(&config_bytes).unwrap();
        let reopened = VaultSession::unlock(test_vault("v2"), config, password, provider).unwrap();

        assert!(reopened.is_active());
        assert_eq!(reopened.vault_id().as_str(), "v2");
    }

    #[tokio::test]
    async fn vault_exists_false_for_fresh_provider() {
        let manager = VaultManager::new();
        let exists = manager.vault_exists("memory", serde_json::Value::Null).await.unwrap();
        assert!(!exists);
    }
}
