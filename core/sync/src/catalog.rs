//! The vault catalog: where the controller finds which vaults exist, what
//! their policy is, and where it persists the `SyncEvent`/`Throughput`/
//! `Conflict` rows a run produces.
//!
//! Resolves the "Catalog/DB stand-in" design question: no SQL layer, a
//! trait with an in-memory implementation (tests, the fuse daemon's
//! embedded mode) and a JSON-file implementation (the core daemon), mirroring
//! how `vault::manager::VaultManager` persists `EntryTree` as a JSON file
//! next to the vault rather than reaching for a database.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vaulthalla_common::{Error, Result, VaultId};
use vaulthalla_vault::Vault;

use crate::event::{Conflict, SyncEvent, Throughput};
use crate::policy::SyncPolicy;

/// What the controller needs to know about one registered vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultRecord {
    pub vault: Vault,
    pub policy: SyncPolicy,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn list_vaults(&self) -> Result<Vec<VaultRecord>>;
    async fn get_vault(&self, vault_id: &VaultId) -> Result<VaultRecord>;
    /// Register a new vault, or replace an existing record with the same id.
    async fn put_vault(&self, vault: Vault, policy: SyncPolicy) -> Result<()>;
    /// Drop a vault record. Does not touch its backing storage.
    async fn remove_vault(&self, vault_id: &VaultId) -> Result<()>;
    async fn put_policy(&self, vault_id: &VaultId, policy: SyncPolicy) -> Result<()>;
    async fn put_sync_event(&self, event: SyncEvent) -> Result<u64>;
    async fn update_sync_event(&self, event: SyncEvent) -> Result<()>;
    async fn put_throughput(&self, rows: Vec<Throughput>) -> Result<()>;
    async fn put_conflict(&self, conflict: Conflict) -> Result<u64>;
    async fn latest_event(&self, vault_id: &VaultId) -> Result<Option<SyncEvent>>;
    /// Sync events older than `older_than_days`, for the janitor's
    /// retention sweep.
    async fn prune_events(&self, older_than_days: i64) -> Result<u64>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogState {
    vaults: HashMap<String, VaultRecord>,
    events: HashMap<u64, SyncEvent>,
    throughput: Vec<Throughput>,
    conflicts: HashMap<u64, Conflict>,
    next_event_id: u64,
    next_conflict_id: u64,
}

/// In-memory catalog. Used by tests and as the fuse daemon's embedded,
/// process-local view.
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self { state: Mutex::new(CatalogState::default()) }
    }

    pub fn register(&self, vault: Vault, policy: SyncPolicy) {
        let mut state = self.state.lock().unwrap();
        state.vaults.insert(vault.id.as_str().to_string(), VaultRecord { vault, policy });
    }

    pub fn deregister(&self, vault_id: &VaultId) {
        self.state.lock().unwrap().vaults.remove(vault_id.as_str());
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn list_vaults(&self) -> Result<Vec<VaultRecord>> {
        Ok(self.state.lock().unwrap().vaults.values().cloned().collect())
    }

    async fn get_vault(&self, vault_id: &VaultId) -> Result<VaultRecord> {
        self.state
            .lock()
            .unwrap()
            .vaults
            .get(vault_id.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("vault {vault_id}")))
    }

    async fn put_vault(&self, vault: Vault, policy: SyncPolicy) -> Result<()> {
        self.register(vault, policy);
        Ok(())
    }

    async fn remove_vault(&self, vault_id: &VaultId) -> Result<()> {
        self.deregister(vault_id);
        Ok(())
    }

    async fn put_policy(&self, vault_id: &VaultId, policy: SyncPolicy) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .vaults
            .get_mut(vault_id.as_str())
            .ok_or_else(|| Error::NotFound(format!("vault {vault_id}")))?;
        record.policy = policy;
        Ok(())
    }

    async fn put_sync_event(&self, mut event: SyncEvent) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.next_event_id += 1;
        event.id = state.next_event_id;
        let id = event.id;
        state.events.insert(id, event);
        Ok(id)
    }

    async fn update_sync_event(&self, event: SyncEvent) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.events.contains_key(&event.id) {
            return Err(Error::NotFound(format!("sync event {}", event.id)));
        }
        state.events.insert(event.id, event);
        Ok(())
    }

    async fn put_throughput(&self, rows: Vec<Throughput>) -> Result<()> {
        self.state.lock().unwrap().throughput.extend(rows);
        Ok(())
    }

    async fn put_conflict(&self, mut conflict: Conflict) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.next_conflict_id += 1;
        conflict.id = state.next_conflict_id;
        let id = conflict.id;
        state.conflicts.insert(id, conflict);
        Ok(id)
    }

    async fn latest_event(&self, vault_id: &VaultId) -> Result<Option<SyncEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .values()
            .filter(|e| e.vault_id == *vault_id)
            .max_by_key(|e| e.timestamp_begin)
            .cloned())
    }

    async fn prune_events(&self, older_than_days: i64) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let cutoff = chrono::Utc::now() - chrono::Duration::days(older_than_days);
        let before = state.events.len();
        state.events.retain(|_, e| e.timestamp_begin >= cutoff);
        Ok((before - state.events.len()) as u64)
    }
}

/// JSON-file-backed catalog: one file holding the full `CatalogState`,
/// rewritten atomically on every mutation. Adequate for a single-daemon
/// process; a real multi-writer deployment would need real locking, but
/// only one `SyncController` per daemon ever touches this file.
pub struct JsonFileCatalog {
    path: PathBuf,
    state: Mutex<CatalogState>,
}

impl JsonFileCatalog {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let bytes = tokio::fs::read(&path).await?;
            serde_json::from_slice(&bytes)?
        } else {
            CatalogState::default()
        };
        Ok(Self { path, state: Mutex::new(state) })
    }

    async fn persist(&self) -> Result<()> {
        let bytes = {
            let state = self.state.lock().unwrap();
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
}

#[async_trait]
impl Catalog for JsonFileCatalog {
    async fn list_vaults(&self) -> Result<Vec<VaultRecord>> {
        Ok(self.state.lock().unwrap().vaults.values().cloned().collect())
    }

    async fn get_vault(&self, vault_id: &VaultId) -> Result<VaultRecord> {
        self.state
            .lock()
            .unwrap()
            .vaults
            .get(vault_id.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("vault {vault_id}")))
    }

    async fn put_vault(&self, vault: Vault, policy: SyncPolicy) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.vaults.insert(vault.id.as_str().to_string(), VaultRecord { vault, policy });
        }
        self.persist().await
    }

    async fn remove_vault(&self, vault_id: &VaultId) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.vaults.remove(vault_id.as_str());
        }
        self.persist().await
    }

    async fn put_policy(&self, vault_id: &VaultId, policy: SyncPolicy) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            let record = state
                .vaults
                .get_mut(vault_id.as_str())
                .ok_or_else(|| Error::NotFound(format!("vault {vault_id}")))?;
            record.policy = policy;
        }
        self.persist().await
    }

    async fn put_sync_event(&self, mut event: SyncEvent) -> Result<u64> {
        let id = {
            let mut state = self.state.lock().unwrap();
            state.next_event_id += 1;
            event.id = state.next_event_id;
            let id = event.id;
            state.events.insert(id, event);
            id
        };
        self.persist().await?;
        Ok(id)
    }

    async fn update_sync_event(&self, event: SyncEvent) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.events.contains_key(&event.id) {
                return Err(Error::NotFound(format!("sync event {}", event.id)));
            }
            state.events.insert(event.id, event);
        }
        self.persist().await
    }

    async fn put_throughput(&self, rows: Vec<Throughput>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.throughput.extend(rows);
        }
        self.persist().await
    }

    async fn put_conflict(&self, mut conflict: Conflict) -> Result<u64> {
        let id = {
            let mut state = self.state.lock().unwrap();
            state.next_conflict_id += 1;
            conflict.id = state.next_conflict_id;
            let id = conflict.id;
            state.conflicts.insert(id, conflict);
            id
        };
        self.persist().await?;
        Ok(id)
    }

    async fn latest_event(&self, vault_id: &VaultId) -> Result<Option<SyncEvent>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .values()
            .filter(|e| e.vault_id == *vault_id)
            .max_by_key(|e| e.timestamp_begin)
            .cloned())
    }

    async fn prune_events(&self, older_than_days: i64) -> Result<u64> {
        let removed = {
            let mut state = self.state.lock().unwrap();
            let cutoff = chrono::Utc::now() - chrono::Duration::days(older_than_days);
            let before = state.events.len();
            state.events.retain(|_, e| e.timestamp_begin >= cutoff);
            (before - state.events.len()) as u64
        };
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Trigger;
    use vaulthalla_vault::VaultType;

    fn vault(id: &str) -> Vault {
        Vault::new(VaultId::new(id).unwrap(), "owner", id, format!("/mnt/{id}"))
    }

    #[tokio::test]
    async fn in_memory_catalog_round_trips_an_event() {
        let catalog = InMemoryCatalog::new();
        let v = vault("v1");
        catalog.register(v.clone(), SyncPolicy::default_for(&v));

        let event = SyncEvent::start(0, v.id.clone(), Trigger::Scheduled, "hash".into());
        let id = catalog.put_sync_event(event).await.unwrap();

        let latest = catalog.latest_event(&v.id).await.unwrap().unwrap();
        assert_eq!(latest.id, id);
    }

    #[tokio::test]
    async fn json_file_catalog_persists_an_event_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let v = vault("v1").with_type(VaultType::Local);

        {
            let catalog = JsonFileCatalog::open(&path).await.unwrap();
            catalog.state.lock().unwrap().vaults.insert(
                v.id.as_str().to_string(),
                VaultRecord { vault: v.clone(), policy: SyncPolicy::default_for(&v) },
            );
            catalog.persist().await.unwrap();
            let event = SyncEvent::start(0, v.id.clone(), Trigger::Scheduled, "hash".into());
            catalog.put_sync_event(event).await.unwrap();
        }

        let reopened = JsonFileCatalog::open(&path).await.unwrap();
        assert_eq!(reopened.list_vaults().await.unwrap().len(), 1);
        assert!(reopened.latest_event(&v.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn get_vault_not_registered_is_not_found() {
        let catalog = InMemoryCatalog::new();
        let err = catalog.get_vault(&VaultId::new("missing").unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn prune_events_removes_only_older_rows() {
        let catalog = InMemoryCatalog::new();
        let v = vault("v1");
        catalog.register(v.clone(), SyncPolicy::default_for(&v));

        let mut old = SyncEvent::start(0, v.id.clone(), Trigger::Scheduled, "hash".into());
        old.timestamp_begin = chrono::Utc::now() - chrono::Duration::days(40);
        catalog.put_sync_event(old).await.unwrap();

        let fresh = SyncEvent::start(0, v.id.clone(), Trigger::Scheduled, "hash".into());
        catalog.put_sync_event(fresh).await.unwrap();

        let removed = catalog.prune_events(30).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(catalog.state.lock().unwrap().events.len(), 1);
    }
}
