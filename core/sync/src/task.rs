//! `SyncTask`: one vault's run through `plan -> execute -> finalize`.
//!
//! Generalizes the shape of the teacher's `engine::SyncEngine` (which also
//! split "figure out what to do" from "do it") onto the spec's strategy x
//! conflict-policy table, `SyncEvent` lifecycle, and cooperative
//! cancellation via a polled atomic flag rather than a future that's
//! simply dropped — dropping a half-finished upload would leave backing
//! storage in an unknown state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use vaulthalla_common::{Error, Result, VaultId, VaultPath};
use vaulthalla_storage::provider::StorageProvider;
use vaulthalla_vault::Vault;

use crate::catalog::Catalog;
use crate::event::{ArtifactSide, Conflict, ConflictArtifact, ConflictResolutionKind, ConflictType};
use crate::event::{SyncEvent, Throughput, ThroughputMetric, Trigger};
use crate::plan::{self, Action, ActionType, FileState};
use crate::policy::SyncPolicy;
use crate::retry::{RetryConfig, RetryExecutor};

/// Cooperative cancellation flag shared between a running task and
/// whoever (the controller's `interrupt_task`, or the task's own
/// `MAX_TASK_DURATION` watchdog) wants to stop it. Checked at every action
/// boundary, never at a finer grain than one `Action`.
#[derive(Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Raised internally when [`InterruptFlag::is_set`] is observed mid-run;
/// caught at the task's top level and turned into a `Cancelled` event
/// rather than propagated as a task failure.
struct Interrupted;

/// A single vault's outcome for one run: the finalized event plus its
/// throughput rows and any conflicts raised.
pub struct TaskOutcome {
    pub event: SyncEvent,
    pub throughput: Vec<Throughput>,
    pub conflicts: Vec<Conflict>,
}

pub struct SyncTask {
    pub vault: Vault,
    pub policy: SyncPolicy,
    local: Arc<dyn StorageProvider>,
    remote: Option<Arc<dyn StorageProvider>>,
    interrupt: InterruptFlag,
    retry: RetryExecutor,
}

impl SyncTask {
    pub fn new(vault: Vault, policy: SyncPolicy, local: Arc<dyn StorageProvider>, remote: Option<Arc<dyn StorageProvider>>) -> Self {
        Self { vault, policy, local, remote, interrupt: InterruptFlag::new(), retry: RetryExecutor::new(RetryConfig::sync_task_default()) }
    }

    pub fn interrupt_handle(&self) -> InterruptFlag {
        self.interrupt.clone()
    }

    /// Replace this task's interrupt flag with one the caller already
    /// holds a handle to (the controller's per-vault `TaskHandle`), so
    /// `interrupt_task`/`run_now` can cancel a specific run without the
    /// task storing any reference back to the controller.
    pub fn set_interrupt(&mut self, flag: InterruptFlag) {
        self.interrupt = flag;
    }

    fn check_interrupt(&self) -> std::result::Result<(), Interrupted> {
        if self.interrupt.is_set() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// `start -> bind SyncEvent(RUNNING) -> plan -> execute -> finalize`,
    /// with `interrupt` -> `Cancelled` and `throw` -> `Error` branches.
    pub async fn run(&self, vault_id: VaultId, trigger: Trigger, catalog: &dyn Catalog) -> Result<TaskOutcome> {
        let config_hash = self.policy.config_hash();
        let mut event = SyncEvent::start(0, vault_id.clone(), trigger, config_hash);
        let event_id = catalog.put_sync_event(event.clone()).await?;
        event.id = event_id;

        let outcome = match self.try_run(&mut event).await {
            Ok((throughput, conflicts)) => {
                event.parse_current_status(Utc::now());
                TaskOutcome { event, throughput, conflicts }
            }
            Err(Interrupted) => {
                event.cancel(Utc::now());
                TaskOutcome { event, throughput: Vec::new(), conflicts: Vec::new() }
            }
        };

        catalog.update_sync_event(outcome.event.clone()).await?;
        if !outcome.throughput.is_empty() {
            catalog.put_throughput(outcome.throughput.clone()).await?;
        }
        for conflict in &outcome.conflicts {
            catalog.put_conflict(conflict.clone()).await?;
        }

        Ok(outcome)
    }

    async fn try_run(
        &self,
        event: &mut SyncEvent,
    ) -> std::result::Result<(Vec<Throughput>, Vec<Conflict>), Interrupted> {
        self.check_interrupt()?;

        let actions = match (&self.policy, &self.remote) {
            (SyncPolicy::Remote { strategy, conflict_policy, .. }, Some(remote)) => {
                let local_map = Self::provider_file_states(&*self.local).await;
                let remote_map = Self::provider_file_states(&**remote).await;
                plan::plan_remote(&local_map, &remote_map, *strategy, *conflict_policy)
            }
            // A `Local` vault has no remote side to reconcile against; its
            // consistency is enforced by the FS index, not a sync run.
            _ => Vec::new(),
        };

        let required = plan::planned_download_bytes(&actions);
        if required > self.vault.free_space(0, 0) {
            event.fail("Insufficient Disk Space", "preflight free-space gate", Utc::now());
            return Ok((Vec::new(), Vec::new()));
        }

        self.execute(event, actions).await
    }

    async fn execute(
        &self,
        event: &mut SyncEvent,
        actions: Vec<Action>,
    ) -> std::result::Result<(Vec<Throughput>, Vec<Conflict>), Interrupted> {
        let mut throughput: HashMap<ThroughputMetric, Throughput> = HashMap::new();
        let mut conflicts = Vec::new();
        let mut last_persisted_heartbeat = event.heartbeat_at;

        for action in &actions {
            self.check_interrupt()?;

            event.num_ops_total += 1;
            let result = self.execute_action(action).await;

            match result {
                Ok(Some((metric, bytes))) => {
                    throughput.entry(metric).or_insert_with(|| Throughput::zero(event.id, metric)).record(bytes);
                    match metric {
                        ThroughputMetric::Upload => event.bytes_up += bytes,
                        ThroughputMetric::Download => event.bytes_down += bytes,
                        _ => {}
                    }
                }
                Ok(None) => {}
                Err(Error::Transport(msg)) => {
                    warn!("action on {} failed after retries: {msg}", action.vault_rel_path);
                    event.num_failed_ops += 1;
                    event.error_message.get_or_insert(msg);
                }
                Err(Error::Integrity(msg)) => {
                    debug!("integrity error on {}: {msg}", action.vault_rel_path);
                    let mut conflict = self.conflict_for(event.id, action);
                    conflict.conflict_type = ConflictType::Encryption;
                    conflict.reasons.push(msg);
                    conflicts.push(conflict);
                    event.num_conflicts += 1;
                }
                Err(other) => {
                    event.error_message = Some(other.to_string());
                }
            }

            if action.action_type == ActionType::CreateConflict {
                conflicts.push(self.conflict_for(event.id, action));
                event.num_conflicts += 1;
            }

            let now = Utc::now();
            event.beat(now);
            if event.heartbeat_due(last_persisted_heartbeat, now) {
                last_persisted_heartbeat = now;
            }
        }

        if let Some(remote) = &self.remote {
            let local_map = Self::provider_file_states(&*self.local).await;
            let remote_map = Self::provider_file_states(&**remote).await;
            let local_hash = Self::state_hash(&local_map);
            let remote_hash = Self::state_hash(&remote_map);
            let plan_was_noop_only = actions.iter().all(|a| a.action_type == ActionType::NoOp);
            event.local_state_hash = Some(local_hash.clone());
            event.remote_state_hash = Some(remote_hash.clone());
            event.divergence_detected = local_hash != remote_hash && plan_was_noop_only;
        }

        Ok((throughput.into_values().collect(), conflicts))
    }

    fn conflict_for(&self, event_id: u64, action: &Action) -> Conflict {
        let now = Utc::now();
        let artifact = |side: ArtifactSide, state: &Option<FileState>| ConflictArtifact {
            side,
            size_bytes: state.as_ref().map(|s| s.size).unwrap_or(0),
            mime_type: None,
            content_hash: state.as_ref().and_then(|s| s.content_hash.clone()),
            encryption_iv: None,
            key_version: None,
            last_modified: state.as_ref().map(|s| s.last_modified).unwrap_or(now),
            local_backing_path: None,
        };
        Conflict {
            id: 0,
            event_id,
            file_id: action.vault_rel_path.to_string_path(),
            conflict_type: ConflictType::Mismatch,
            resolution: ConflictResolutionKind::Unresolved,
            reasons: vec!["timestamps equal, content hashes differ".to_string()],
            local: artifact(ArtifactSide::Local, &action.local),
            upstream: artifact(ArtifactSide::Remote, &action.remote),
        }
    }

    async fn execute_action(&self, action: &Action) -> Result<Option<(ThroughputMetric, u64)>> {
        let Some(remote) = self.remote.as_ref() else {
            return Ok(None);
        };

        match action.action_type {
            ActionType::NoOp | ActionType::CreateConflict => Ok(None),
            ActionType::Upload => {
                let bytes = action.local.as_ref().map(|l| l.size).unwrap_or(0);
                let path = action.vault_rel_path.clone();
                let data = self.retry.execute(|| async { self.local.download(&path).await }).await?;
                self.retry.execute(|| async { remote.upload(&path, data.clone()).await }).await?;
                Ok(Some((ThroughputMetric::Upload, bytes)))
            }
            ActionType::Download => {
                let bytes = action.remote.as_ref().map(|r| r.size).unwrap_or(0);
                let path = action.vault_rel_path.clone();
                let data = self.retry.execute(|| async { remote.download(&path).await }).await?;
                self.retry.execute(|| async { self.local.upload(&path, data.clone()).await }).await?;
                Ok(Some((ThroughputMetric::Download, bytes)))
            }
            ActionType::DeleteLocal => {
                let path = action.vault_rel_path.clone();
                self.retry.execute(|| async { self.local.delete(&path).await }).await?;
                Ok(Some((ThroughputMetric::Delete, 0)))
            }
            ActionType::DeleteRemote => {
                let path = action.vault_rel_path.clone();
                self.retry.execute(|| async { remote.delete(&path).await }).await?;
                Ok(Some((ThroughputMetric::Delete, 0)))
            }
        }
    }

    /// Stable digest over sorted `(path, size, content_hash)` triples, for
    /// `divergence_detected` and cross-run comparison.
    fn state_hash(states: &HashMap<VaultPath, FileState>) -> String {
        use sha2::{Digest, Sha256};
        let mut entries: Vec<_> = states
            .iter()
            .map(|(p, s)| (p.to_string_path(), s.size, s.content_hash.clone().unwrap_or_default()))
            .collect();
        entries.sort();
        let mut hasher = Sha256::new();
        for (path, size, hash) in entries {
            hasher.update(path.as_bytes());
            hasher.update(size.to_le_bytes());
            hasher.update(hash.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    async fn provider_file_states(provider: &dyn StorageProvider) -> HashMap<VaultPath, FileState> {
        let mut states = HashMap::new();
        let entries = match provider.list(&VaultPath::root()).await {
            Ok(entries) => entries,
            Err(err) => {
                debug!("listing provider {} failed: {err}", provider.name());
                return states;
            }
        };
        for meta in entries {
            if meta.is_directory {
                continue;
            }
            if let Ok(path) = VaultPath::parse(&format!("/{}", meta.name)) {
                states.insert(
                    path,
                    FileState {
                        size: meta.size.unwrap_or(0),
                        content_hash: meta.etag.clone(),
                        last_modified: meta.modified,
                    },
                );
            }
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use vaulthalla_storage::local::LocalProvider;
    use vaulthalla_vault::VaultType;

    fn vault() -> Vault {
        Vault::new(VaultId::new("v1").unwrap(), "owner", "v1", "/mnt/v1").with_type(VaultType::Local).with_quota(0)
    }

    #[tokio::test]
    async fn local_only_vault_produces_a_success_event_with_no_ops() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(LocalProvider::new(dir.path()).unwrap());
        let v = vault();
        let policy = SyncPolicy::default_for(&v);
        let task = SyncTask::new(v.clone(), policy, provider, None);
        let catalog = InMemoryCatalog::new();

        let outcome = task.run(v.id.clone(), Trigger::Scheduled, &catalog).await.unwrap();
        assert_eq!(outcome.event.num_ops_total, 0);
    }

    #[tokio::test]
    async fn interrupt_flag_cancels_a_pending_run() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(LocalProvider::new(dir.path()).unwrap());
        let v = vault();
        let policy = SyncPolicy::default_for(&v);
        let task = SyncTask::new(v.clone(), policy, provider, None);
        task.interrupt_handle().trigger();
        let catalog = InMemoryCatalog::new();

        let outcome = task.run(v.id.clone(), Trigger::Scheduled, &catalog).await.unwrap();
        assert!(matches!(outcome.event.status, crate::event::SyncStatus::Cancelled));
    }

    #[tokio::test]
    async fn remote_upload_moves_local_only_files_to_the_remote_provider() {
        let local_dir = tempfile::tempdir().unwrap();
        let remote_dir = tempfile::tempdir().unwrap();
        let local = Arc::new(LocalProvider::new(local_dir.path()).unwrap());
        let remote = Arc::new(LocalProvider::new(remote_dir.path()).unwrap());

        local.upload(&VaultPath::parse("/a.txt").unwrap(), b"hello".to_vec()).await.unwrap();

        let mut v = vault();
        v.vault_type = VaultType::S3 { api_key_id: "k".into(), bucket: "b".into() };
        let policy = SyncPolicy::default_for(&v);
        let task = SyncTask::new(v.clone(), policy, local, Some(remote.clone()));
        let catalog = InMemoryCatalog::new();

        let outcome = task.run(v.id.clone(), Trigger::Scheduled, &catalog).await.unwrap();
        assert_eq!(outcome.event.num_ops_total, 1);
        assert!(remote.exists(&VaultPath::parse("/a.txt").unwrap()).await.unwrap());
    }
}
