//! Top-level daemon wiring: config in, a running control socket + sync
//! controller + janitor out. This is what `tools/cli`'s `daemon start`
//! subcommand drives in-process — there is no separate daemon binary in
//! this workspace, so "starting the daemon" means running `Daemon::run`
//! to completion on the CLI's own tokio runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use vaulthalla_common::{Config, Error, Result};
use vaulthalla_storage::{LocalProvider, S3Credentials, S3Provider, StorageProvider};
use vaulthalla_sync::{Catalog, JsonFileCatalog, ProviderResolver, SyncController};
use vaulthalla_vault::{ApiKeyStore, Vault, VaultType};

use crate::control::ControlServer;
use crate::janitor::Janitor;
use crate::registry::SessionRegistry;

/// Builds the local/remote `StorageProvider` pair a vault's sync task
/// needs from its `VaultType`, the one piece of provider construction the
/// daemon — not the generic sync crate — is positioned to know how to do.
///
/// `ProviderResolver::resolve` is sync, so S3 credentials are snapshotted
/// once at construction time rather than looked up live against the
/// `ApiKeyStore` — a new or rotated key only takes effect on the next
/// `Daemon::bootstrap`.
struct VaultTypeResolver {
    backing_root: std::path::PathBuf,
    s3_credentials: HashMap<String, (String, String, String, String)>,
}

impl VaultTypeResolver {
    async fn new(backing_root: std::path::PathBuf, keyring: Option<&ApiKeyStore>) -> Result<Self> {
        let mut s3_credentials = HashMap::new();
        if let Some(keyring) = keyring {
            for key in keyring.list().await {
                let secret = keyring.reveal(&key)?;
                s3_credentials.insert(key.id, (key.access_key, secret, key.region, key.endpoint));
            }
        }
        Ok(Self { backing_root, s3_credentials })
    }
}

impl ProviderResolver for VaultTypeResolver {
    fn resolve(&self, vault: &Vault) -> Result<(Arc<dyn StorageProvider>, Option<Arc<dyn StorageProvider>>)> {
        let local: Arc<dyn StorageProvider> = Arc::new(LocalProvider::new(self.backing_root.join(vault.id.as_str()))?);
        match &vault.vault_type {
            VaultType::Local => Ok((local, None)),
            VaultType::S3 { api_key_id, bucket } => {
                let (access_key, secret_key, region, endpoint) = self
                    .s3_credentials
                    .get(api_key_id)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("api key {api_key_id}")))?;
                let credentials = S3Credentials {
                    access_key,
                    secret_key: secret_key.into(),
                    region,
                    endpoint,
                    bucket: bucket.clone(),
                };
                let remote: Arc<dyn StorageProvider> = Arc::new(S3Provider::new(credentials));
                Ok((local, Some(remote)))
            }
        }
    }
}

pub struct Daemon {
    config: Config,
    catalog: Arc<dyn Catalog>,
    controller: Arc<SyncController>,
    sessions: Arc<SessionRegistry>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Resolves once `rx` carries `true` — immediately if it already does,
/// so a shutdown requested before `run` starts listening is never missed
/// (the gap a plain `Notify` would drop).
async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    let _ = rx.changed().await;
}

impl Daemon {
    /// Bring up a daemon against `config`'s on-disk catalog file, wiring a
    /// provider resolver that dispatches on each vault's `VaultType`.
    /// `keyring` supplies S3 credentials for cloud-backed vaults; pass
    /// `None` if every registered vault is `VaultType::Local`.
    pub async fn bootstrap(
        config: Config,
        catalog_path: impl Into<std::path::PathBuf>,
        keyring: Option<&ApiKeyStore>,
    ) -> Result<Self> {
        let catalog: Arc<dyn Catalog> = Arc::new(JsonFileCatalog::open(catalog_path).await?);
        let resolver = Arc::new(VaultTypeResolver::new(config.fuse.backing_path.clone(), keyring).await?);
        let controller = Arc::new(SyncController::new(catalog.clone(), resolver));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self { config, catalog, controller, sessions: Arc::new(SessionRegistry::new()), shutdown_tx, shutdown_rx })
    }

    /// Test/embedded-mode constructor: an in-memory catalog and a
    /// caller-supplied resolver (e.g. one that only ever hands out
    /// `MemoryProvider`s), skipping any filesystem access.
    pub fn with_catalog_and_resolver(
        config: Config,
        catalog: Arc<dyn Catalog>,
        resolver: Arc<dyn ProviderResolver>,
    ) -> Self {
        let controller = Arc::new(SyncController::new(catalog.clone(), resolver));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self { config, catalog, controller, sessions: Arc::new(SessionRegistry::new()), shutdown_tx, shutdown_rx }
    }

    pub fn controller(&self) -> Arc<SyncController> {
        self.controller.clone()
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }

    pub fn catalog(&self) -> Arc<dyn Catalog> {
        self.catalog.clone()
    }

    /// Signal `run` to stop. Safe to call before `run` or concurrently.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Runs the sync controller, control socket, and janitor concurrently
    /// until `request_shutdown` is called. Returns once all three have
    /// unwound.
    pub async fn run(&self) -> Result<()> {
        let control = ControlServer::bind(&self.config.server.uds_socket).await?;
        info!("control socket listening on {:?}", control.socket_path());

        let sweep_interval =
            Duration::from_secs(u64::from(self.config.services.db_sweeper.sweep_interval_minutes) * 60);
        let janitor = Janitor::new(self.catalog.clone(), sweep_interval.max(Duration::from_secs(1)));

        let controller_task = {
            let controller = self.controller.clone();
            tokio::spawn(async move { controller.run().await })
        };

        tokio::join!(
            control.serve(
                self.controller.clone(),
                self.sessions.clone(),
                self.shutdown_tx.clone(),
                wait_for_shutdown(self.shutdown_rx.clone()),
            ),
            janitor.run(wait_for_shutdown(self.shutdown_rx.clone())),
        );

        self.controller.shutdown().await;
        let _ = controller_task.await;
        info!("daemon stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaulthalla_sync::InMemoryCatalog;
    use vaulthalla_storage::MemoryProvider;

    struct MemoryResolver;
    impl ProviderResolver for MemoryResolver {
        fn resolve(&self, _vault: &Vault) -> Result<(Arc<dyn StorageProvider>, Option<Arc<dyn StorageProvider>>)> {
            Ok((Arc::new(MemoryProvider::new()), None))
        }
    }

    fn test_config(socket: std::path::PathBuf) -> Config {
        serde_yaml::from_str(&format!(
            r#"
server:
  uds_socket: {socket:?}
fuse:
  root_mount_path: /tmp/vaulthalla-mnt
  backing_path: /tmp/vaulthalla-backing
caching:
  thumbnails:
    sizes: [64]
  http:
    enabled: false
    max_preview_size_bytes: 0
services:
  db_sweeper:
    sweep_interval_minutes: 1
logging:
  log_rotation_days: 7
  audit_log_rotation_days: 30
  levels:
    console_log_level: info
"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn run_binds_the_control_socket_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vaulthalla.sock");
        let config = test_config(socket.clone());

        let daemon = Daemon::with_catalog_and_resolver(
            config,
            Arc::new(InMemoryCatalog::new()),
            Arc::new(MemoryResolver),
        );

        let handle = {
            let shutdown_tx = daemon.shutdown_tx.clone();
            let config_socket = socket.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                assert!(config_socket.exists());
                let _ = shutdown_tx.send(true);
            })
        };

        daemon.run().await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn resolver_resolves_s3_credentials_from_keyring() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = ApiKeyStore::open(dir.path().join("keyring.json"), b"pass").await.unwrap();
        keyring
            .add("k1", "alice", "s3", "AKIAEXAMPLE", "shh-secret", "us-east-1", "https://s3.example.com")
            .await
            .unwrap();

        let resolver = VaultTypeResolver::new(dir.path().join("backing"), Some(&keyring)).await.unwrap();
        let vault = Vault::new(
            vaulthalla_common::VaultId::new("v1").unwrap(),
            "alice",
            "v1",
            "/mnt/v1",
        )
        .with_type(VaultType::S3 { api_key_id: "k1".to_string(), bucket: "my-bucket".to_string() });

        let (_local, remote) = resolver.resolve(&vault).unwrap();
        assert!(remote.is_some());
    }

    #[tokio::test]
    async fn resolver_errors_on_unknown_api_key() {
        let resolver = VaultTypeResolver::new(std::path::PathBuf::from("/tmp"), None).await.unwrap();
        let vault = Vault::new(vaulthalla_common::VaultId::new("v1").unwrap(), "alice", "v1", "/mnt/v1")
            .with_type(VaultType::S3 { api_key_id: "missing".to_string(), bucket: "b".to_string() });

        assert!(matches!(resolver.resolve(&vault), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn shutdown_requested_before_run_is_not_missed() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("vaulthalla.sock");
        let config = test_config(socket);

        let daemon = Daemon::with_catalog_and_resolver(
            config,
            Arc::new(InMemoryCatalog::new()),
            Arc::new(MemoryResolver),
        );
        daemon.request_shutdown();

        tokio::time::timeout(Duration::from_secs(2), daemon.run())
            .await
            .expect("run must return promptly when shutdown was requested before it started")
            .unwrap();
    }
}
