//! Vaulthalla Sync Engine
//!
//! Drives each vault's reconciliation against its remote (for cloud-backed
//! vaults) or its FS index (for local ones):
//! - [`controller`] — the per-daemon scheduler: a min-heap over `next_run`,
//!   `run_now`/`interrupt_task`, and a refresh loop that tracks vault
//!   registration changes.
//! - [`task`] — one vault's run: plan, execute, finalize, with cooperative
//!   cancellation and heartbeat-based stall detection.
//! - [`plan`] — the pure strategy x conflict-policy decision table.
//! - [`policy`] — `SyncPolicy` and its `Local`/`Remote` variants.
//! - [`event`] — the persisted `SyncEvent`/`Throughput`/`Conflict` rows a
//!   run produces.
//! - [`catalog`] — where vault records and run history are stored.
//! - [`retry`] — retry strategy with exponential backoff for transient
//!   errors.

pub mod catalog;
pub mod controller;
pub mod event;
pub mod plan;
pub mod policy;
pub mod retry;
pub mod task;

pub use catalog::{Catalog, InMemoryCatalog, JsonFileCatalog, VaultRecord};
pub use controller::{ProviderResolver, SyncController, MAX_TASK_DURATION, REFRESH_INTERVAL};
pub use event::{
    ArtifactSide, Conflict, ConflictArtifact, ConflictResolutionKind, ConflictType, SyncEvent, SyncStatus,
    Throughput, ThroughputMetric, Trigger,
};
pub use plan::{plan_local, plan_remote, Action, ActionType, FileState};
pub use policy::{LocalConflictPolicy, RemoteConflictPolicy, Strategy, SyncPolicy};
pub use retry::{retry, retry_with_config, RetryConfig, RetryExecutor};
pub use task::{InterruptFlag, SyncTask, TaskOutcome};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_exports_are_accessible() {
        let _retry_config = RetryConfig::default();
        let _sync_default = RetryConfig::sync_task_default();
        let _catalog = InMemoryCatalog::new();
    }
}
