//! Tracks the vault sessions a running daemon currently has unlocked.
//!
//! Both the control socket and the FUSE bridge need to turn a `VaultId`
//! into a live `StorageEngine`; this is the process-local map that holds
//! the unlocked `VaultSession`s behind it, grounded on how
//! `vault::session::VaultSession` is held by reference everywhere else in
//! this workspace rather than re-opened per call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use vaulthalla_common::{Error, Result, VaultId};
use vaulthalla_vault::VaultSession;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<VaultId, Arc<VaultSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    pub async fn insert(&self, session: Arc<VaultSession>) {
        self.sessions.write().await.insert(session.vault_id().clone(), session);
    }

    pub async fn get(&self, vault_id: &VaultId) -> Result<Arc<VaultSession>> {
        self.sessions
            .read()
            .await
            .get(vault_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no open session for vault {vault_id}")))
    }

    pub async fn remove(&self, vault_id: &VaultId) -> Option<Arc<VaultSession>> {
        self.sessions.write().await.remove(vault_id)
    }

    pub async fn ids(&self) -> Vec<VaultId> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaulthalla_crypto::KdfParams;
    use vaulthalla_vault::{Vault, VaultManager};

    async fn open_session(id: &str) -> Arc<VaultSession> {
        let manager = VaultManager::new();
        let vault = Vault::new(VaultId::new(id).unwrap(), "owner", id, format!("/mnt/{id}"));
        let session = manager
            .create_vault(vault, b"password", "memory", serde_json::Value::Null, KdfParams::moderate())
            .await
            .unwrap();
        Arc::new(session)
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let registry = SessionRegistry::new();
        let session = open_session("v1").await;
        registry.insert(session.clone()).await;

        let fetched = registry.get(session.vault_id()).await.unwrap();
        assert_eq!(fetched.vault_id(), session.vault_id());
    }

    #[tokio::test]
    async fn get_unknown_vault_is_not_found() {
        let registry = SessionRegistry::new();
        let err = registry.get(&VaultId::new("missing").unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_drops_the_session() {
        let registry = SessionRegistry::new();
        let session = open_session("v1").await;
        registry.insert(session.clone()).await;

        assert!(registry.remove(session.vault_id()).await.is_some());
        assert!(registry.get(session.vault_id()).await.is_err());
    }
}
