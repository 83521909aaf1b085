//! Planning: comparing a vault's local entries against its remote listing
//! and deciding what each path needs, before anything touches the network.
//!
//! Kept pure on purpose (no `StorageProvider` calls here) so the decision
//! table is unit-testable without a fake transport, and so a `SyncTask`'s
//! preflight free-space check can sum up planned downloads before
//! committing to execute any of them. Generalizes the teacher's
//! `conflict::ConflictResolver`, which resolved one path's etag mismatch at
//! a time, into the full strategy x conflict-policy table over a whole
//! vault's file set.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use vaulthalla_common::VaultPath;

use crate::policy::{LocalConflictPolicy, RemoteConflictPolicy, Strategy};

/// One side's view of a file, as seen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub size: u64,
    pub content_hash: Option<String>,
    pub last_modified: DateTime<Utc>,
}

/// What a planned action does to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    NoOp,
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    CreateConflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub action_type: ActionType,
    pub vault_rel_path: VaultPath,
    pub local: Option<FileState>,
    pub remote: Option<FileState>,
}

/// Which side of a `Remote` decision won, so the conflict record (when one
/// is raised) can name a resolution even for an auto-resolved ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    LocalOnly,
    RemoteOnly,
    BothEqualHash,
    BothRemoteNewer,
    BothLocalNewer,
    BothTimestampsEqualHashesDiffer,
}

fn classify(local: Option<&FileState>, remote: Option<&FileState>) -> Presence {
    match (local, remote) {
        (Some(_), None) => Presence::LocalOnly,
        (None, Some(_)) => Presence::RemoteOnly,
        (Some(l), Some(r)) => {
            if let (Some(lh), Some(rh)) = (&l.content_hash, &r.content_hash) {
                if lh == rh {
                    return Presence::BothEqualHash;
                }
            }
            if l.last_modified == r.last_modified {
                Presence::BothTimestampsEqualHashesDiffer
            } else if r.last_modified > l.last_modified {
                Presence::BothRemoteNewer
            } else {
                Presence::BothLocalNewer
            }
        }
        (None, None) => Presence::BothEqualHash,
    }
}

/// The decision table from the spec: rows are file-state classification,
/// columns are strategy (and, for `Mirror`, the configured conflict
/// policy). `ask` forces `CreateConflict` on every ambiguous cell
/// regardless of which column would otherwise apply.
fn decide(presence: Presence, strategy: Strategy, conflict_policy: RemoteConflictPolicy) -> ActionType {
    use ActionType::*;
    use Presence::*;
    use RemoteConflictPolicy as C;
    use Strategy::*;

    if conflict_policy == C::Ask && matches!(presence, BothTimestampsEqualHashesDiffer) {
        return CreateConflict;
    }

    match (presence, strategy) {
        (LocalOnly, Cache | Sync) => Upload,
        (LocalOnly, Mirror) => match conflict_policy {
            C::KeepRemote => DeleteLocal,
            _ => Upload,
        },
        (RemoteOnly, Cache | Sync) => Download,
        (RemoteOnly, Mirror) => match conflict_policy {
            C::KeepLocal => DeleteRemote,
            _ => Download,
        },
        (BothEqualHash, _) => NoOp,
        (BothRemoteNewer, Cache | Sync) => Download,
        (BothRemoteNewer, Mirror) => match conflict_policy {
            C::KeepLocal => Upload,
            _ => Download,
        },
        (BothLocalNewer, Cache) => NoOp,
        (BothLocalNewer, Sync) => Upload,
        (BothLocalNewer, Mirror) => match conflict_policy {
            C::KeepRemote => Download,
            _ => Upload,
        },
        (BothTimestampsEqualHashesDiffer, Cache | Sync) => CreateConflict,
        (BothTimestampsEqualHashesDiffer, Mirror) => match conflict_policy {
            C::KeepLocal => Upload,
            C::KeepRemote => Download,
            _ => CreateConflict,
        },
    }
}

/// Plan a `Remote` vault's sync against its strategy and conflict policy.
pub fn plan_remote(
    local_map: &HashMap<VaultPath, FileState>,
    remote_map: &HashMap<VaultPath, FileState>,
    strategy: Strategy,
    conflict_policy: RemoteConflictPolicy,
) -> Vec<Action> {
    let mut paths: Vec<&VaultPath> = local_map.keys().chain(remote_map.keys()).collect();
    paths.sort_by_key(|p| p.to_string_path());
    paths.dedup();

    paths
        .into_iter()
        .map(|path| {
            let local = local_map.get(path).cloned();
            let remote = remote_map.get(path).cloned();
            let presence = classify(local.as_ref(), remote.as_ref());
            let action_type = decide(presence, strategy, conflict_policy);
            Action { action_type, vault_rel_path: path.clone(), local, remote }
        })
        .collect()
}

/// Plan a `Local` vault's reconciliation: only concurrent local writers via
/// the FS index can disagree (there is no remote side), so the table
/// collapses to "both sides present with different content" under the
/// local conflict policy.
pub fn plan_local(
    primary: &HashMap<VaultPath, FileState>,
    shadow: &HashMap<VaultPath, FileState>,
    conflict_policy: LocalConflictPolicy,
) -> Vec<Action> {
    let mut paths: Vec<&VaultPath> = primary.keys().chain(shadow.keys()).collect();
    paths.sort_by_key(|p| p.to_string_path());
    paths.dedup();

    paths
        .into_iter()
        .map(|path| {
            let local = primary.get(path).cloned();
            let remote = shadow.get(path).cloned();
            let action_type = match (&local, &remote) {
                (Some(_), None) | (None, Some(_)) | (None, None) => ActionType::NoOp,
                (Some(l), Some(r)) if l.content_hash == r.content_hash => ActionType::NoOp,
                (Some(_), Some(_)) => match conflict_policy {
                    LocalConflictPolicy::Overwrite => ActionType::Upload,
                    LocalConflictPolicy::KeepBoth => ActionType::Upload,
                    LocalConflictPolicy::Ask => ActionType::CreateConflict,
                },
            };
            Action { action_type, vault_rel_path: path.clone(), local, remote }
        })
        .collect()
}

/// Sum of planned download sizes, for the preflight free-space gate.
pub fn planned_download_bytes(actions: &[Action]) -> u64 {
    actions
        .iter()
        .filter(|a| a.action_type == ActionType::Download)
        .filter_map(|a| a.remote.as_ref().map(|r| r.size))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(size: u64, hash: &str, modified: DateTime<Utc>) -> FileState {
        FileState { size, content_hash: Some(hash.to_string()), last_modified: modified }
    }

    fn path(s: &str) -> VaultPath {
        VaultPath::parse(s).unwrap()
    }

    #[test]
    fn cache_strategy_uploads_local_only_and_downloads_remote_only() {
        let now = Utc::now();
        let mut local = HashMap::new();
        local.insert(path("/a"), state(1, "h1", now));
        let mut remote = HashMap::new();
        remote.insert(path("/b"), state(1, "h2", now));

        let actions = plan_remote(&local, &remote, Strategy::Cache, RemoteConflictPolicy::KeepNewest);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action_type, ActionType::Upload);
        assert_eq!(actions[1].action_type, ActionType::Download);
    }

    #[test]
    fn cache_strategy_is_noop_when_local_is_newer() {
        let now = Utc::now();
        let mut local = HashMap::new();
        local.insert(path("/a"), state(1, "h1", now + chrono::Duration::seconds(10)));
        let mut remote = HashMap::new();
        remote.insert(path("/a"), state(1, "h2", now));

        let actions = plan_remote(&local, &remote, Strategy::Cache, RemoteConflictPolicy::KeepNewest);
        assert_eq!(actions[0].action_type, ActionType::NoOp);
    }

    #[test]
    fn sync_strategy_uploads_when_local_is_newer() {
        let now = Utc::now();
        let mut local = HashMap::new();
        local.insert(path("/a"), state(1, "h1", now + chrono::Duration::seconds(10)));
        let mut remote = HashMap::new();
        remote.insert(path("/a"), state(1, "h2", now));

        let actions = plan_remote(&local, &remote, Strategy::Sync, RemoteConflictPolicy::KeepNewest);
        assert_eq!(actions[0].action_type, ActionType::Upload);
    }

    #[test]
    fn mirror_keep_remote_deletes_local_only_files() {
        let now = Utc::now();
        let mut local = HashMap::new();
        local.insert(path("/a"), state(1, "h1", now));
        let remote = HashMap::new();

        let actions = plan_remote(&local, &remote, Strategy::Mirror, RemoteConflictPolicy::KeepRemote);
        assert_eq!(actions[0].action_type, ActionType::DeleteLocal);
    }

    #[test]
    fn mirror_keep_local_deletes_remote_only_files() {
        let now = Utc::now();
        let local = HashMap::new();
        let mut remote = HashMap::new();
        remote.insert(path("/a"), state(1, "h1", now));

        let actions = plan_remote(&local, &remote, Strategy::Mirror, RemoteConflictPolicy::KeepLocal);
        assert_eq!(actions[0].action_type, ActionType::DeleteRemote);
    }

    #[test]
    fn equal_timestamps_differing_hashes_raise_a_conflict_under_sync() {
        let now = Utc::now();
        let mut local = HashMap::new();
        local.insert(path("/a"), state(1, "h1", now));
        let mut remote = HashMap::new();
        remote.insert(path("/a"), state(1, "h2", now));

        let actions = plan_remote(&local, &remote, Strategy::Sync, RemoteConflictPolicy::KeepNewest);
        assert_eq!(actions[0].action_type, ActionType::CreateConflict);
    }

    #[test]
    fn ask_policy_forces_conflict_even_when_strategy_would_resolve() {
        let now = Utc::now();
        let mut local = HashMap::new();
        local.insert(path("/a"), state(1, "h1", now));
        let mut remote = HashMap::new();
        remote.insert(path("/a"), state(1, "h2", now));

        let actions = plan_remote(&local, &remote, Strategy::Mirror, RemoteConflictPolicy::Ask);
        assert_eq!(actions[0].action_type, ActionType::CreateConflict);
    }

    #[test]
    fn matching_hashes_are_always_noop_regardless_of_strategy() {
        let now = Utc::now();
        let mut local = HashMap::new();
        local.insert(path("/a"), state(1, "h1", now));
        let mut remote = HashMap::new();
        remote.insert(path("/a"), state(1, "h1", now + chrono::Duration::seconds(500)));

        for strategy in [Strategy::Cache, Strategy::Sync, Strategy::Mirror] {
            let actions = plan_remote(&local, &remote, strategy, RemoteConflictPolicy::KeepNewest);
            assert_eq!(actions[0].action_type, ActionType::NoOp);
        }
    }

    #[test]
    fn planned_download_bytes_sums_only_downloads() {
        let now = Utc::now();
        let actions = vec![
            Action { action_type: ActionType::Download, vault_rel_path: path("/a"), local: None, remote: Some(state(100, "h", now)) },
            Action { action_type: ActionType::Upload, vault_rel_path: path("/b"), local: Some(state(999, "h", now)), remote: None },
        ];
        assert_eq!(planned_download_bytes(&actions), 100);
    }

    #[test]
    fn local_policy_ask_raises_conflict_on_divergent_writers() {
        let now = Utc::now();
        let mut primary = HashMap::new();
        primary.insert(path("/a"), state(1, "h1", now));
        let mut shadow = HashMap::new();
        shadow.insert(path("/a"), state(1, "h2", now));

        let actions = plan_local(&primary, &shadow, LocalConflictPolicy::Ask);
        assert_eq!(actions[0].action_type, ActionType::CreateConflict);
    }
}
