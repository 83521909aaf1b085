//! Stored object-store credentials an owner attaches to a vault through
//! `VaultType::S3 { api_key_id, .. }`.
//!
//! Secrets are sealed at rest under a single Argon2id-derived keyring key,
//! bootstrapped the same way `VaultConfig` bootstraps a vault's key (a
//! salt + KDF params + a key-verification envelope), persisted as one JSON
//! file rewritten atomically, mirroring `vaulthalla_sync::catalog::JsonFileCatalog`.

use std::collections::HashMap;
use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use vaulthalla_common::{Error, Result};
use vaulthalla_crypto::{aead, decrypt, derive_key, encrypt, KdfParams, MasterKey, Salt};

const KEYRING_VERIFICATION_PLAINTEXT: &[u8] = b"VAULTHALLA_KEYRING_V1";

/// A stored object-store credential. The secret is ciphertext-only at
/// rest; `ApiKeyStore::reveal` is the only way back to plaintext, and only
/// while the keyring is unlocked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub owner_id: String,
    pub provider: String,
    pub access_key: String,
    /// `IV(12) || CIPHERTEXT || TAG(16)`.
    pub encrypted_secret: Vec<u8>,
    /// Base64 cache of the leading 12 bytes of `encrypted_secret`, matching
    /// `vaulthalla_crypto::EncryptionEnvelope::iv_b64`'s convention.
    pub iv: String,
    pub region: String,
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyringBootstrap {
    salt: Salt,
    kdf_params: KdfParams,
    verification: Vec<u8>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyringState {
    bootstrap: Option<KeyringBootstrap>,
    keys: HashMap<String, ApiKey>,
}

/// JSON-file-backed keyring of `ApiKey` records, unlocked by a single
/// passphrase for the lifetime of one `ApiKeyStore`.
pub struct ApiKeyStore {
    path: PathBuf,
    master_key: MasterKey,
    state: Mutex<KeyringState>,
}

impl ApiKeyStore {
    /// Open the keyring at `path`, bootstrapping it under `passphrase` on
    /// first use, or verifying `passphrase` against the existing bootstrap
    /// envelope.
    pub async fn open(path: impl Into<PathBuf>, passphrase: &[u8]) -> Result<Self> {
        let path = path.into();
        let mut state: KeyringState = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let bytes = tokio::fs::read(&path).await?;
            serde_json::from_slice(&bytes)?
        } else {
            KeyringState::default()
        };

        let master_key = match &state.bootstrap {
            Some(bootstrap) => {
                let key = derive_key(passphrase, &bootstrap.salt, &bootstrap.kdf_params)?;
                match decrypt(key.as_bytes(), &bootstrap.verification) {
                    Ok(plaintext) if plaintext == KEYRING_VERIFICATION_PLAINTEXT => key,
                    _ => return Err(Error::Permission("wrong keyring passphrase".to_string())),
                }
            }
            None => {
                let salt = Salt::generate();
                let kdf_params = KdfParams::moderate();
                let key = derive_key(passphrase, &salt, &kdf_params)?;
                let verification = encrypt(key.as_bytes(), KEYRING_VERIFICATION_PLAINTEXT)?;
                state.bootstrap = Some(KeyringBootstrap { salt, kdf_params, verification });
                key
            }
        };

        let store = Self { path, master_key, state: Mutex::new(state) };
        store.persist().await?;
        Ok(store)
    }

    async fn persist(&self) -> Result<()> {
        let bytes = {
            let state = self.state.lock().await;
            serde_json::to_vec_pretty(&*state)?
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Seal `secret` and store a new record under `id`.
    #[allow(clippy::too_many_arguments)]
    pub async fn add(
        &self,
        id: impl Into<String>,
        owner_id: impl Into<String>,
        provider: impl Into<String>,
        access_key: impl Into<String>,
        secret: &str,
        region: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<ApiKey> {
        let id = id.into();
        let encrypted_secret = encrypt(self.master_key.as_bytes(), secret.as_bytes())?;
        let iv = STANDARD.encode(&encrypted_secret[..aead::IV_SIZE]);
        let record = ApiKey {
            id: id.clone(),
            owner_id: owner_id.into(),
            provider: provider.into(),
            access_key: access_key.into(),
            encrypted_secret,
            iv,
            region: region.into(),
            endpoint: endpoint.into(),
            created_at: Utc::now(),
        };

        {
            let mut state = self.state.lock().await;
            if state.keys.contains_key(&id) {
                return Err(Error::AlreadyExists(format!("api key {id}")));
            }
            state.keys.insert(id.clone(), record.clone());
        }
        self.persist().await?;
        Ok(record)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.keys.remove(id).ok_or_else(|| Error::NotFound(format!("api key {id}")))?;
        }
        self.persist().await
    }

    pub async fn list(&self) -> Vec<ApiKey> {
        self.state.lock().await.keys.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Result<ApiKey> {
        self.state
            .lock()
            .await
            .keys
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("api key {id}")))
    }

    /// Decrypt `key`'s secret back to plaintext. Callers must not persist
    /// the result.
    pub fn reveal(&self, key: &ApiKey) -> Result<String> {
        let plaintext = decrypt(self.master_key.as_bytes(), &key.encrypted_secret)?;
        String::from_utf8(plaintext).map_err(|e| Error::Integrity(format!("secret is not valid utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_reveal_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyring.json");
        let store = ApiKeyStore::open(&path, b"keyring-pass").await.unwrap();

        let record = store
            .add("k1", "alice", "s3", "AKIAEXAMPLE", "shh-its-a-secret", "us-east-1", "https://s3.example.com")
            .await
            .unwrap();

        assert_eq!(store.reveal(&record).unwrap(), "shh-its-a-secret");
        assert!(store.get("k1").await.is_ok());
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(dir.path().join("keyring.json"), b"pass").await.unwrap();
        store.add("k1", "alice", "s3", "AKIA", "secret", "us-east-1", "ep").await.unwrap();
        let err = store.add("k1", "alice", "s3", "AKIA2", "secret2", "us-east-1", "ep").await;
        assert!(matches!(err, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn reopening_with_wrong_passphrase_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyring.json");
        {
            let store = ApiKeyStore::open(&path, b"right-pass").await.unwrap();
            store.add("k1", "alice", "s3", "AKIA", "secret", "us-east-1", "ep").await.unwrap();
        }

        let reopened = ApiKeyStore::open(&path, b"wrong-pass").await;
        assert!(matches!(reopened, Err(Error::Permission(_))));
    }

    #[tokio::test]
    async fn remove_then_get_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::open(dir.path().join("keyring.json"), b"pass").await.unwrap();
        store.add("k1", "alice", "s3", "AKIA", "secret", "us-east-1", "ep").await.unwrap();
        store.remove("k1").await.unwrap();
        assert!(matches!(store.get("k1").await, Err(Error::NotFound(_))));
    }
}
