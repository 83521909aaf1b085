//! The `Vault` entity: a named, quota-bounded collection of filesystem
//! entries with a single encryption manager.

use serde::{Deserialize, Serialize};

use vaulthalla_common::VaultId;

/// Minimum free space the engine always reserves, regardless of quota.
pub const MIN_FREE_SPACE: u64 = 64 * 1024 * 1024;

/// Vault backing kind. Re-expressed as a tagged variant rather than class
/// inheritance with downcasts — dispatch on type happens by matching, not
/// by probing a base pointer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum VaultType {
    Local,
    S3 { api_key_id: String, bucket: String },
}

impl VaultType {
    pub fn is_cloud(&self) -> bool {
        matches!(self, VaultType::S3 { .. })
    }
}

/// A vault: the unit of isolation. Owns exactly one `SyncPolicy` and
/// exactly one `VaultEncryptionManager` (held by the session that unlocks
/// it, not here — this struct is the inert record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    pub id: VaultId,
    pub owner_id: String,
    pub name: String,
    /// Absolute fuse path this vault is mounted at.
    pub mount_point: String,
    /// Quota in bytes; 0 means unlimited.
    pub quota: u64,
    pub vault_type: VaultType,
    pub is_active: bool,
}

impl Vault {
    pub fn new(id: VaultId, owner_id: impl Into<String>, name: impl Into<String>, mount_point: impl Into<String>) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
            name: name.into(),
            mount_point: mount_point.into(),
            quota: 0,
            vault_type: VaultType::Local,
            is_active: true,
        }
    }

    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_type(mut self, vault_type: VaultType) -> Self {
        self.vault_type = vault_type;
        self
    }

    /// `quota − (backing_size + cache_size) − MIN_FREE_SPACE`, clamped at
    /// 0 when unlimited or when the subtraction would go negative.
    pub fn free_space(&self, backing_size: u64, cache_size: u64) -> u64 {
        if self.quota == 0 {
            return u64::MAX - MIN_FREE_SPACE;
        }
        self.quota
            .saturating_sub(backing_size)
            .saturating_sub(cache_size)
            .saturating_sub(MIN_FREE_SPACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> Vault {
        Vault::new(VaultId::new("v1").unwrap(), "owner", "my vault", "/mnt/v1").with_quota(1_000_000)
    }

    #[test]
    fn free_space_subtracts_usage_and_reserve() {
        let v = vault();
        assert_eq!(v.free_space(100_000, 0), 1_000_000 - 100_000 - MIN_FREE_SPACE);
    }

    #[test]
    fn free_space_clamps_at_zero_when_over_quota() {
        let v = vault();
        assert_eq!(v.free_space(2_000_000, 0), 0);
    }

    #[test]
    fn unlimited_quota_is_effectively_unbounded() {
        let v = vault().with_quota(0);
        assert!(v.free_space(1_000_000_000, 0) > 0);
    }

    #[test]
    fn s3_vault_type_reports_cloud() {
        let v = vault().with_type(VaultType::S3 { api_key_id: "k".into(), bucket: "b".into() });
        assert!(v.vault_type.is_cloud());
        assert!(!VaultType::Local.is_cloud());
    }
}
