//! Per-vault crypto bootstrap: the password-derived key-verification
//! envelope stored alongside a vault so a later `unlock` can check a
//! candidate password without ever storing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vaulthalla_common::Result;
use vaulthalla_crypto::{decrypt, derive_key, encrypt, KdfParams, Salt};

const KEY_VERIFICATION_PLAINTEXT: &[u8] = b"VAULTHALLA_KEY_VERIFICATION_V1";

/// Vault format version, for migration support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultVersion {
    pub major: u32,
    pub minor: u32,
}

impl VaultVersion {
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    pub fn is_compatible(&self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl Default for VaultVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Crypto bootstrap for a vault's initial (version-1) key. Stored at the
/// vault root; later key versions from `rotateKeys` are recorded by the
/// session's `VaultEncryptionManager`, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub version: VaultVersion,
    pub salt: Salt,
    pub kdf_params: KdfParams,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub key_verification: Vec<u8>,
}

impl VaultConfig {
    /// Derive a fresh version-1 key from `password` and record its
    /// verification envelope.
    pub fn new(password: &[u8], kdf_params: KdfParams) -> Result<Self> {
        let salt = Salt::generate();
        let master_key = derive_key(password, &salt, &kdf_params)?;
        let key_verification = encrypt(master_key.as_bytes(), KEY_VERIFICATION_PLAINTEXT)?;
        let now = Utc::now();

        Ok(Self {
            version: VaultVersion::CURRENT,
            salt,
            kdf_params,
            created_at: now,
            modified_at: now,
            key_verification,
        })
    }

    /// `Ok(true)` iff `password` derives the key that opens the
    /// verification envelope. `Ok(false)` (not `Err`) on a wrong password.
    pub fn verify_password(&self, password: &[u8]) -> Result<bool> {
        let master_key = derive_key(password, &self.salt, &self.kdf_params)?;
        match decrypt(master_key.as_bytes(), &self.key_verification) {
            Ok(plaintext) => Ok(plaintext == KEY_VERIFICATION_PLAINTEXT),
            Err(_) => Ok(false),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Configuration file name in vault root.
pub const CONFIG_FILENAME: &str = "vault.config";

/// Backing data directory name (ciphertext) in vault root.
pub const DATA_DIRNAME: &str = "d";

/// Metadata directory name in vault root.
pub const META_DIRNAME: &str = "m";

/// Entry-tree state filename in the metadata directory.
pub const TREE_FILENAME: &str = "tree.json";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_version_compatibility() {
        let current = VaultVersion::CURRENT;
        assert!(current.is_compatible());
        assert!(!VaultVersion { major: 2, minor: 0 }.is_compatible());
    }

    #[test]
    fn config_verifies_correct_password_and_rejects_wrong_one() {
        let password = b"secure-password";
        let config = VaultConfig::new(password, KdfParams::moderate()).unwrap();

        assert!(config.verify_password(password).unwrap());
        assert!(!config.verify_password(b"wrong-password").unwrap());
    }

    #[test]
    fn config_roundtrips_through_bytes() {
        let config = VaultConfig::new(b"test", KdfParams::moderate()).unwrap();
        let bytes = config.to_bytes().unwrap();
        let restored = VaultConfig::from_bytes(&bytes).unwrap();

        assert_eq!(restored.version, config.version);
        assert!(restored.verify_password(b"test").unwrap());
    }
}
