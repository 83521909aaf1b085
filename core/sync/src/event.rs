//! The per-run record a `SyncTask` produces: `SyncEvent`, its `Throughput`
//! rows, and any `Conflict` rows raised while planning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vaulthalla_common::VaultId;

/// Terminal (and non-terminal) states a `SyncEvent` can be in.
///
/// `Stalled` is never written by the task itself — it is inferred by a
/// reader when `now - heartbeat_at >= STALL_AFTER` and the run hasn't
/// reached a terminal state. See [`SyncEvent::observed_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
    /// Only ever produced by [`SyncEvent::observed_status`]; never written
    /// to `SyncEvent::status` itself.
    Stalled,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Success | SyncStatus::Error | SyncStatus::Cancelled)
    }
}

/// What caused this run to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    Scheduled,
    RunNow,
    Startup,
}

/// A sync worker's heartbeat older than this, on a run that hasn't reached
/// a terminal state, is reported STALLED by observers.
pub const STALL_AFTER: chrono::Duration = chrono::Duration::seconds(90);

/// Heartbeat persistence is rate-limited to at most once per this interval,
/// so a task with many small actions doesn't hammer the catalog.
pub const HEARTBEAT_MIN_INTERVAL: chrono::Duration = chrono::Duration::seconds(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: u64,
    pub vault_id: VaultId,
    pub run_uuid: Uuid,
    pub timestamp_begin: DateTime<Utc>,
    pub timestamp_end: Option<DateTime<Utc>>,
    pub heartbeat_at: DateTime<Utc>,
    pub status: SyncStatus,
    pub trigger: Trigger,
    pub retry_attempt: u32,
    pub stall_reason: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub num_ops_total: u64,
    pub num_failed_ops: u64,
    pub num_conflicts: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub divergence_detected: bool,
    pub local_state_hash: Option<String>,
    pub remote_state_hash: Option<String>,
    pub config_hash: String,
}

impl SyncEvent {
    pub fn start(id: u64, vault_id: VaultId, trigger: Trigger, config_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            vault_id,
            run_uuid: Uuid::new_v4(),
            timestamp_begin: now,
            timestamp_end: None,
            heartbeat_at: now,
            status: SyncStatus::Running,
            trigger,
            retry_attempt: 0,
            stall_reason: None,
            error_code: None,
            error_message: None,
            num_ops_total: 0,
            num_failed_ops: 0,
            num_conflicts: 0,
            bytes_up: 0,
            bytes_down: 0,
            divergence_detected: false,
            local_state_hash: None,
            remote_state_hash: None,
            config_hash,
        }
    }

    /// Beats the heartbeat unconditionally; callers decide whether to
    /// persist based on [`Self::heartbeat_due`].
    pub fn beat(&mut self, at: DateTime<Utc>) {
        self.heartbeat_at = at;
    }

    pub fn heartbeat_due(&self, last_persisted: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - last_persisted >= HEARTBEAT_MIN_INTERVAL
    }

    /// `parseCurrentStatus` from the spec: terminal-state preservation,
    /// then explicit error, then the failed-ops rule, then the stall
    /// check, defaulting to SUCCESS.
    pub fn parse_current_status(&mut self, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        if self.error_message.is_some() {
            self.status = SyncStatus::Error;
        } else if self.num_failed_ops > 0 {
            self.status = SyncStatus::Error;
            self.error_code.get_or_insert_with(|| "PartialFailure".to_string());
        } else if now - self.heartbeat_at >= STALL_AFTER {
            self.stall_reason = Some("heartbeat exceeded stall threshold".to_string());
            return;
        } else {
            self.status = SyncStatus::Success;
        }
        self.timestamp_end = Some(now);
    }

    /// What an external observer sees right now: the persisted status, or
    /// `Stalled` if inferred — without mutating the event.
    pub fn observed_status(&self, now: DateTime<Utc>) -> SyncStatus {
        if !self.status.is_terminal() && now - self.heartbeat_at >= STALL_AFTER {
            return SyncStatus::Stalled;
        }
        self.status
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = SyncStatus::Cancelled;
        self.timestamp_end = Some(now);
    }

    pub fn fail(&mut self, code: impl Into<String>, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = SyncStatus::Error;
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
        self.timestamp_end = Some(now);
    }
}

/// Per-action-type byte/count tallies for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThroughputMetric {
    Rename,
    Copy,
    Delete,
    Upload,
    Download,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Throughput {
    pub event_id: u64,
    pub metric: ThroughputMetric,
    pub count: u64,
    pub bytes: u64,
}

impl Throughput {
    pub fn zero(event_id: u64, metric: ThroughputMetric) -> Self {
        Self { event_id, metric, count: 0, bytes: 0 }
    }

    pub fn record(&mut self, bytes: u64) {
        self.count += 1;
        self.bytes += bytes;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictType {
    Mismatch,
    Encryption,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolutionKind {
    Unresolved,
    KeptLocal,
    KeptRemote,
    KeptBoth,
    Overwritten,
    FixedRemoteEncryption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactSide {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictArtifact {
    pub side: ArtifactSide,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    pub content_hash: Option<String>,
    pub encryption_iv: Option<String>,
    pub key_version: Option<u32>,
    pub last_modified: DateTime<Utc>,
    pub local_backing_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: u64,
    pub event_id: u64,
    pub file_id: String,
    pub conflict_type: ConflictType,
    pub resolution: ConflictResolutionKind,
    pub reasons: Vec<String>,
    pub local: ConflictArtifact,
    pub upstream: ConflictArtifact,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> SyncEvent {
        SyncEvent::start(1, VaultId::new("v1").unwrap(), Trigger::Scheduled, "hash".into())
    }

    #[test]
    fn parse_current_status_defaults_to_success() {
        let mut e = event();
        let now = e.timestamp_begin;
        e.parse_current_status(now);
        assert_eq!(e.status, SyncStatus::Success);
        assert!(e.timestamp_end.is_some());
    }

    #[test]
    fn parse_current_status_preserves_terminal_state() {
        let mut e = event();
        let now = e.timestamp_begin;
        e.cancel(now);
        e.num_failed_ops = 5;
        e.parse_current_status(now);
        assert_eq!(e.status, SyncStatus::Cancelled);
    }

    #[test]
    fn parse_current_status_failed_ops_wins_over_default_success() {
        let mut e = event();
        let now = e.timestamp_begin;
        e.num_failed_ops = 1;
        e.parse_current_status(now);
        assert_eq!(e.status, SyncStatus::Error);
    }

    #[test]
    fn stale_heartbeat_is_observed_as_stalled_without_mutating_status() {
        let mut e = event();
        let now = e.timestamp_begin;
        e.parse_current_status(now + STALL_AFTER + chrono::Duration::seconds(1));
        assert_eq!(e.status, SyncStatus::Running);
        assert!(e.stall_reason.is_some());
        assert_eq!(e.observed_status(now + STALL_AFTER + chrono::Duration::seconds(1)), SyncStatus::Stalled);
    }

    #[test]
    fn heartbeat_persistence_is_rate_limited() {
        let e = event();
        let last = e.timestamp_begin;
        assert!(!e.heartbeat_due(last, last + chrono::Duration::seconds(5)));
        assert!(e.heartbeat_due(last, last + chrono::Duration::seconds(11)));
    }
}
