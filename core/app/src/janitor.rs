//! Sync-event retention sweep, driven by `services.db_sweeper` in the
//! daemon config contract (`vaulthalla_common::config::DbSweeperConfig`).
//!
//! Grounded on the same interval-tick `tokio::select!` shape the sync
//! controller's own driver loop uses, scaled down to one job with no
//! scheduling beyond "every N minutes".

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use vaulthalla_sync::Catalog;

/// How far back `prune_events` reaches on each sweep.
const EVENT_RETENTION_DAYS: i64 = 30;

pub struct Janitor {
    catalog: Arc<dyn Catalog>,
    interval: Duration,
}

impl Janitor {
    pub fn new(catalog: Arc<dyn Catalog>, interval: Duration) -> Self {
        Self { catalog, interval }
    }

    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                _ = ticker.tick() => {
                    match self.catalog.prune_events(EVENT_RETENTION_DAYS).await {
                        Ok(removed) if removed > 0 => info!("janitor: pruned {removed} sync events older than {EVENT_RETENTION_DAYS}d"),
                        Ok(_) => {}
                        Err(err) => warn!("janitor: prune_events failed: {err}"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaulthalla_sync::{InMemoryCatalog, SyncEvent, Trigger};
    use vaulthalla_common::VaultId;

    #[tokio::test]
    async fn one_sweep_prunes_stale_events() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let vault_id = VaultId::new("v1").unwrap();
        let mut old = SyncEvent::start(0, vault_id.clone(), Trigger::Scheduled, "hash".into());
        old.timestamp_begin = chrono::Utc::now() - chrono::Duration::days(EVENT_RETENTION_DAYS + 10);
        catalog.put_sync_event(old).await.unwrap();

        let janitor = Janitor::new(catalog.clone(), Duration::from_millis(10));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            janitor.run(async { let _ = rx.await; }).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(());
        handle.await.unwrap();

        assert!(catalog.latest_event(&vault_id).await.unwrap().is_none());
    }
}
