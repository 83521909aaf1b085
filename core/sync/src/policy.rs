//! Sync policy: how often a vault syncs, and how it resolves conflicts.
//!
//! A [`Vault`] owns exactly one [`SyncPolicy`]. `Local` vaults only ever
//! reconcile the backing store against the FS index (no remote side, so no
//! strategy choice); `Remote` vaults pick a [`Strategy`] that the
//! [`crate::plan`] decision table dispatches on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use vaulthalla_vault::Vault;

/// How a cloud-backed vault treats the remote copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Remote is a pass-through cache; local writes always win.
    Cache,
    /// Bidirectional reconciliation; newest side wins, ties raise a conflict.
    Sync,
    /// Remote is authoritative; local deviates only per `conflict_policy`.
    Mirror,
}

/// Conflict resolution for a `Local` vault (no remote side, only concurrent
/// local writers via the FS index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalConflictPolicy {
    Overwrite,
    KeepBoth,
    Ask,
}

/// Conflict resolution for a `Remote` vault, consulted whenever the
/// decision table in [`crate::plan`] lands on an ambiguous cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteConflictPolicy {
    KeepLocal,
    KeepRemote,
    KeepNewest,
    Ask,
}

/// A vault's sync policy: either purely local reconciliation, or a
/// strategy-driven remote sync. Mirrors the `VaultType::Local | S3{..}`
/// tagged-enum convention already used by [`vaulthalla_vault::VaultType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncPolicy {
    Local {
        interval: Duration,
        enabled: bool,
        conflict_policy: LocalConflictPolicy,
        last_sync_at: Option<DateTime<Utc>>,
        last_success_at: Option<DateTime<Utc>>,
    },
    Remote {
        interval: Duration,
        enabled: bool,
        strategy: Strategy,
        conflict_policy: RemoteConflictPolicy,
        last_sync_at: Option<DateTime<Utc>>,
        last_success_at: Option<DateTime<Utc>>,
    },
}

impl SyncPolicy {
    pub fn interval(&self) -> Duration {
        match self {
            SyncPolicy::Local { interval, .. } | SyncPolicy::Remote { interval, .. } => *interval,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            SyncPolicy::Local { enabled, .. } | SyncPolicy::Remote { enabled, .. } => *enabled,
        }
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SyncPolicy::Local { last_sync_at, .. } | SyncPolicy::Remote { last_sync_at, .. } => *last_sync_at,
        }
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SyncPolicy::Local { last_success_at, .. } | SyncPolicy::Remote { last_success_at, .. } => {
                *last_success_at
            }
        }
    }

    pub fn record_run(&mut self, at: DateTime<Utc>, succeeded: bool) {
        match self {
            SyncPolicy::Local { last_sync_at, last_success_at, .. }
            | SyncPolicy::Remote { last_sync_at, last_success_at, .. } => {
                *last_sync_at = Some(at);
                if succeeded {
                    *last_success_at = Some(at);
                }
            }
        }
    }

    /// Deterministic digest of the fields that affect sync decisions. A
    /// change invalidates any resume-from-checkpoint state a running task
    /// might be holding.
    pub fn config_hash(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            SyncPolicy::Local { interval, enabled, conflict_policy, .. } => {
                hasher.update(b"local");
                hasher.update(interval.as_secs().to_le_bytes());
                hasher.update([*enabled as u8]);
                hasher.update(format!("{conflict_policy:?}").as_bytes());
            }
            SyncPolicy::Remote { interval, enabled, strategy, conflict_policy, .. } => {
                hasher.update(b"remote");
                hasher.update(interval.as_secs().to_le_bytes());
                hasher.update([*enabled as u8]);
                hasher.update(format!("{strategy:?}").as_bytes());
                hasher.update(format!("{conflict_policy:?}").as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Whether this policy governs a remote (cloud-backed) vault, per
    /// [`vaulthalla_vault::VaultType`].
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncPolicy::Remote { .. })
    }

    /// Build the default policy for a freshly registered vault, dispatching
    /// on its storage type.
    pub fn default_for(vault: &Vault) -> Self {
        if vault.vault_type.is_cloud() {
            SyncPolicy::Remote {
                interval: Duration::from_secs(300),
                enabled: true,
                strategy: Strategy::Sync,
                conflict_policy: RemoteConflictPolicy::KeepNewest,
                last_sync_at: None,
                last_success_at: None,
            }
        } else {
            SyncPolicy::Local {
                interval: Duration::from_secs(60),
                enabled: true,
                conflict_policy: LocalConflictPolicy::KeepBoth,
                last_sync_at: None,
                last_success_at: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_hash_changes_with_strategy() {
        let a = SyncPolicy::Remote {
            interval: Duration::from_secs(60),
            enabled: true,
            strategy: Strategy::Cache,
            conflict_policy: RemoteConflictPolicy::KeepNewest,
            last_sync_at: None,
            last_success_at: None,
        };
        let mut b = a.clone();
        if let SyncPolicy::Remote { strategy, .. } = &mut b {
            *strategy = Strategy::Mirror;
        }
        assert_ne!(a.config_hash(), b.config_hash());
    }

    #[test]
    fn config_hash_ignores_last_run_timestamps() {
        let mut a = SyncPolicy::Local {
            interval: Duration::from_secs(60),
            enabled: true,
            conflict_policy: LocalConflictPolicy::Overwrite,
            last_sync_at: None,
            last_success_at: None,
        };
        let before = a.config_hash();
        a.record_run(Utc::now(), true);
        assert_eq!(before, a.config_hash());
    }

    #[test]
    fn record_run_only_updates_success_on_success() {
        let mut policy = SyncPolicy::Local {
            interval: Duration::from_secs(60),
            enabled: true,
            conflict_policy: LocalConflictPolicy::Overwrite,
            last_sync_at: None,
            last_success_at: None,
        };
        let at = Utc::now();
        policy.record_run(at, false);
        assert_eq!(policy.last_sync_at(), Some(at));
        assert_eq!(policy.last_success_at(), None);
    }
}
