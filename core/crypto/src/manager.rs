//! Per-vault envelope encryption manager with versioned keys.
//!
//! A vault accumulates key versions over its lifetime as rotation
//! campaigns complete; old versions are kept only long enough to decrypt
//! files a rotation pass hasn't reached yet.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use vaulthalla_common::{Error, Result};

use crate::aead;
use crate::keys::MasterKey;

/// File-level encryption metadata produced by [`VaultEncryptionManager::encrypt`]
/// and required by [`VaultEncryptionManager::decrypt`].
#[derive(Debug, Clone)]
pub struct EncryptionEnvelope {
    pub ciphertext: Vec<u8>,
    pub iv_b64: String,
    pub key_version: u32,
}

/// Holds every key version a vault has ever used, keyed by version number.
/// The highest version is always the one new writes encrypt under.
pub struct VaultEncryptionManager {
    keys: HashMap<u32, MasterKey>,
    current_version: u32,
}

impl VaultEncryptionManager {
    /// Build a manager with a single, freshly-unlocked key as version 1.
    pub fn new(initial_key: MasterKey) -> Self {
        let mut keys = HashMap::new();
        keys.insert(1, initial_key);
        Self {
            keys,
            current_version: 1,
        }
    }

    /// Reconstruct a manager from a vault's full key history, e.g. after
    /// unlocking a vault that has already been rotated.
    pub fn from_versions(keys: HashMap<u32, MasterKey>, current_version: u32) -> Result<Self> {
        if !keys.contains_key(&current_version) {
            return Err(Error::NotFound(format!(
                "key version {current_version} not present in supplied key set"
            )));
        }
        Ok(Self { keys, current_version })
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    /// Register a newly generated key as the next version, making it the
    /// version new writes use. Returns the assigned version number.
    pub fn add_key(&mut self, key: MasterKey) -> u32 {
        self.current_version += 1;
        self.keys.insert(self.current_version, key);
        self.current_version
    }

    fn key_for(&self, version: u32) -> Result<&MasterKey> {
        self.keys
            .get(&version)
            .ok_or_else(|| Error::NotFound(format!("unknown key version {version}")))
    }

    /// Encrypt under the current key version. Ciphertext layout is
    /// `IV(12) || CIPHERTEXT || TAG(16)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptionEnvelope> {
        let key = self.key_for(self.current_version)?;
        let payload = aead::encrypt(key.as_bytes(), plaintext)?;
        let iv_b64 = STANDARD.encode(&payload[..aead::IV_SIZE]);
        Ok(EncryptionEnvelope {
            ciphertext: payload,
            iv_b64,
            key_version: self.current_version,
        })
    }

    /// Decrypt a payload encrypted under `key_version`. `iv_b64` is
    /// accepted for API symmetry with [`VaultEncryptionManager::encrypt`]
    /// but is not separately needed: the payload already carries its IV.
    pub fn decrypt(&self, payload: &[u8], _iv_b64: &str, key_version: u32) -> Result<Vec<u8>> {
        let key = self.key_for(key_version)?;
        aead::decrypt(key.as_bytes(), payload)
    }

    /// Atomically re-envelope a payload under the current key version.
    /// Idempotent at the call site: the Storage Engine skips files whose
    /// `encrypted_with_key_version` already equals `current_version`.
    pub fn rotate_decrypt_encrypt(&self, payload: &[u8], old_version: u32) -> Result<EncryptionEnvelope> {
        let plaintext = {
            let key = self.key_for(old_version)?;
            aead::decrypt(key.as_bytes(), payload)?
        };
        self.encrypt(&plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> MasterKey {
        MasterKey::from_bytes([byte; crate::keys::KEY_LENGTH])
    }

    #[test]
    fn encrypts_under_current_version_and_decrypts_back() {
        let mgr = VaultEncryptionManager::new(key(1));
        let env = mgr.encrypt(b"plaintext").unwrap();
        assert_eq!(env.key_version, 1);

        let plaintext = mgr.decrypt(&env.ciphertext, &env.iv_b64, env.key_version).unwrap();
        assert_eq!(plaintext, b"plaintext");
    }

    #[test]
    fn decrypt_with_unknown_version_fails() {
        let mgr = VaultEncryptionManager::new(key(1));
        let env = mgr.encrypt(b"plaintext").unwrap();
        assert!(mgr.decrypt(&env.ciphertext, &env.iv_b64, 99).is_err());
    }

    #[test]
    fn rotation_reencrypts_under_new_current_version() {
        let mut mgr = VaultEncryptionManager::new(key(1));
        let old_env = mgr.encrypt(b"rotate me").unwrap();

        let new_version = mgr.add_key(key(2));
        assert_eq!(new_version, 2);

        let rotated = mgr.rotate_decrypt_encrypt(&old_env.ciphertext, old_env.key_version).unwrap();
        assert_eq!(rotated.key_version, 2);

        let plaintext = mgr.decrypt(&rotated.ciphertext, &rotated.iv_b64, rotated.key_version).unwrap();
        assert_eq!(plaintext, b"rotate me");
    }

    #[test]
    fn old_version_still_decryptable_after_rotation() {
        let mut mgr = VaultEncryptionManager::new(key(1));
        let old_env = mgr.encrypt(b"still here").unwrap();
        mgr.add_key(key(2));

        let plaintext = mgr.decrypt(&old_env.ciphertext, &old_env.iv_b64, old_env.key_version).unwrap();
        assert_eq!(plaintext, b"still here");
    }
}
