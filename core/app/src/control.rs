//! Control socket: a UDS listener speaking newline-delimited JSON, grounded
//! on the teacher corpus' `oxcrypt::ipc` daemon-socket pattern (bind, accept
//! loop, one JSON line in, one JSON line out) but moved onto `tokio::net`
//! since every other daemon-side piece of this workspace is async, and
//! extended from a single `get_stats`/`ping` pair to the full command set
//! this daemon's control plane exposes.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{error, warn};

use vaulthalla_common::{Error, Result, VaultId, VaultPath};
use vaulthalla_sync::SyncController;
use vaulthalla_vault::engine::StorageEngine;

use crate::registry::SessionRegistry;

/// The envelope every control-socket request arrives in. Field names match
/// the wire protocol exactly (`vaultId`, `fsEntryId`, `newPath`), not Rust
/// convention.
#[derive(Debug, Deserialize)]
struct ControlRequest {
    op: String,
    #[serde(rename = "vaultId")]
    vault_id: Option<u64>,
    #[serde(rename = "fsEntryId")]
    fs_entry_id: Option<u64>,
    path: Option<String>,
    from: Option<String>,
    to: Option<String>,
    #[serde(rename = "newPath")]
    #[allow(dead_code)]
    new_path: Option<String>,
    #[allow(dead_code)]
    uid: Option<u32>,
    #[allow(dead_code)]
    gid: Option<u32>,
    #[allow(dead_code)]
    mode: Option<u32>,
    size: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ControlResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

impl ControlResponse {
    fn ok(result: Option<Value>) -> Self {
        Self { status: "ok", error: None, result }
    }

    fn err(message: impl Into<String>) -> Self {
        Self { status: "error", error: Some(message.into()), result: None }
    }
}

impl From<Error> for ControlResponse {
    fn from(err: Error) -> Self {
        Self::err(err.to_string())
    }
}

/// Wire vault ids are decimal `u32`s; the domain `VaultId` is an opaque
/// string everywhere else in this workspace. There is no registry mapping
/// one to the other (none is specified), so the control socket treats the
/// decimal string form of the wire id as the `VaultId` itself — a vault
/// registered as catalog/session key `"7"` is addressed on the wire as
/// `vaultId: 7`.
fn wire_vault_id(raw: u64) -> Result<VaultId> {
    VaultId::new(raw.to_string())
}

pub struct ControlServer {
    listener: UnixListener,
    socket_path: std::path::PathBuf,
}

impl ControlServer {
    pub async fn bind(socket_path: impl AsRef<Path>) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let _ = tokio::fs::remove_file(&socket_path).await;
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let listener = UnixListener::bind(&socket_path)?;
        Ok(Self { listener, socket_path })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept and serve connections until `shutdown` resolves. `shutdown_tx`
    /// is the daemon's own shutdown switch — a connected client's
    /// `{"op":"shutdown"}` request (what `daemon stop` sends) flips it,
    /// which is what makes `shutdown` itself eventually resolve.
    pub async fn serve(
        &self,
        controller: Arc<SyncController>,
        sessions: Arc<SessionRegistry>,
        shutdown_tx: watch::Sender<bool>,
        shutdown: impl std::future::Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let controller = controller.clone();
                            let sessions = sessions.clone();
                            let shutdown_tx = shutdown_tx.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_connection(stream, controller, sessions, shutdown_tx).await {
                                    error!("control socket connection error: {err}");
                                }
                            });
                        }
                        Err(err) => error!("control socket accept failed: {err}"),
                    }
                }
            }
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn handle_connection(
    stream: UnixStream,
    controller: Arc<SyncController>,
    sessions: Arc<SessionRegistry>,
    shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => dispatch(request, &controller, &sessions, &shutdown_tx).await,
            Err(err) => ControlResponse::err(format!("malformed request: {err}")),
        };
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        write_half.write_all(out.as_bytes()).await?;
    }
    Ok(())
}

async fn dispatch(
    req: ControlRequest,
    controller: &SyncController,
    sessions: &SessionRegistry,
    shutdown_tx: &watch::Sender<bool>,
) -> ControlResponse {
    match req.op.as_str() {
        "ping" => ControlResponse::ok(Some(Value::Bool(true))),
        "shutdown" => {
            let _ = shutdown_tx.send(true);
            ControlResponse::ok(None)
        }
        "sync" => match req.vault_id.map(wire_vault_id) {
            Some(Ok(vault_id)) => {
                controller.run_now(vault_id).await;
                ControlResponse::ok(None)
            }
            Some(Err(err)) => err.into(),
            None => ControlResponse::err("sync requires vaultId"),
        },
        "register" => handle_register(req, sessions).await,
        "rename" => handle_rename(req, sessions).await,
        "create" | "touch" => mutate(req, sessions, |engine, path| Box::pin(async move {
            engine.create_file(&path, &[]).await
        })).await,
        "mkdir" => mutate(req, sessions, |engine, path| Box::pin(async move {
            engine.mkdir(&path).await
        })).await,
        "delete" | "rmdir" => mutate(req, sessions, |engine, path| Box::pin(async move {
            engine.remove(&path).await
        })).await,
        "truncate" => handle_truncate(req, sessions).await,
        "exists" => handle_exists(req, sessions).await,
        "stat" => handle_stat(req, sessions).await,
        "listdir" => handle_listdir(req, sessions).await,
        "chmod" | "chown" | "flush" | "read" | "write" => {
            // The legacy envelope carries no byte payload and no mode/owner
            // fields on the `EntryTree` to apply these against; acknowledge
            // without touching vault state.
            ControlResponse::ok(None)
        }
        other => {
            warn!("control socket: unknown op {other:?}");
            ControlResponse::ok(None)
        }
    }
}

async fn session_and_path(
    req: &ControlRequest,
    sessions: &SessionRegistry,
) -> std::result::Result<(Arc<vaulthalla_vault::VaultSession>, VaultPath), ControlResponse> {
    let vault_id = match req.vault_id.map(wire_vault_id) {
        Some(Ok(id)) => id,
        Some(Err(err)) => return Err(err.into()),
        None => return Err(ControlResponse::err(format!("{} requires vaultId", req.op))),
    };
    let path = match req.path.as_deref().map(VaultPath::parse) {
        Some(Ok(p)) => p,
        Some(Err(err)) => return Err(err.into()),
        None => return Err(ControlResponse::err(format!("{} requires path", req.op))),
    };
    let session = sessions.get(&vault_id).await.map_err(ControlResponse::from)?;
    Ok((session, path))
}

async fn mutate(
    req: ControlRequest,
    sessions: &SessionRegistry,
    f: impl for<'a> Fn(
        &'a StorageEngine<'a>,
        VaultPath,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>,
) -> ControlResponse {
    let (session, path) = match session_and_path(&req, sessions).await {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let engine = match StorageEngine::new(&session) {
        Ok(engine) => engine,
        Err(err) => return err.into(),
    };
    match f(&engine, path).await {
        Ok(()) => ControlResponse::ok(None),
        Err(err) => err.into(),
    }
}

async fn handle_truncate(req: ControlRequest, sessions: &SessionRegistry) -> ControlResponse {
    let size = req.size.unwrap_or(0) as usize;
    let (session, path) = match session_and_path(&req, sessions).await {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let engine = match StorageEngine::new(&session) {
        Ok(engine) => engine,
        Err(err) => return err.into(),
    };
    let mut content = match engine.read_file(&path).await {
        Ok(bytes) => bytes,
        Err(err) => return err.into(),
    };
    content.resize(size, 0);
    match engine.write_file(&path, &content).await {
        Ok(()) => ControlResponse::ok(None),
        Err(err) => err.into(),
    }
}

async fn handle_exists(req: ControlRequest, sessions: &SessionRegistry) -> ControlResponse {
    let (session, path) = match session_and_path(&req, sessions).await {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let exists = session.tree().read().await.exists(&path);
    ControlResponse::ok(Some(Value::Bool(exists)))
}

async fn handle_stat(req: ControlRequest, sessions: &SessionRegistry) -> ControlResponse {
    let (session, path) = match session_and_path(&req, sessions).await {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let tree = session.tree().read().await;
    match tree.get_node(&path) {
        Ok(node) => ControlResponse::ok(Some(serde_json::json!({
            "name": node.name,
            "isDirectory": node.is_directory(),
            "sizeBytes": node.size_bytes,
            "modifiedAt": node.modified_at,
        }))),
        Err(err) => err.into(),
    }
}

async fn handle_listdir(req: ControlRequest, sessions: &SessionRegistry) -> ControlResponse {
    let (session, path) = match session_and_path(&req, sessions).await {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };
    let tree = session.tree().read().await;
    match tree.list(&path) {
        Ok(children) => {
            let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
            ControlResponse::ok(Some(serde_json::json!(names)))
        }
        Err(err) => err.into(),
    }
}

/// `register`: announce a newly-created entry to the FUSE side. There is
/// no separate fsEntryId-keyed cache in this workspace — the session's
/// `EntryTree` is already the authoritative index and is updated in the
/// same call that created the entry — so this reloads the persisted tree
/// from the provider, which is the one real effect an external "an entry
/// with this id now exists" announcement should have.
async fn handle_register(req: ControlRequest, sessions: &SessionRegistry) -> ControlResponse {
    let vault_id = match req.vault_id.map(wire_vault_id) {
        Some(Ok(id)) => id,
        Some(Err(err)) => return err.into(),
        None => return ControlResponse::err("register requires vaultId"),
    };
    if req.fs_entry_id.is_none() {
        return ControlResponse::err("register requires fsEntryId");
    }
    let session = match sessions.get(&vault_id).await {
        Ok(session) => session,
        Err(err) => return err.into(),
    };
    match reload_tree(&session).await {
        Ok(()) => ControlResponse::ok(None),
        Err(err) => err.into(),
    }
}

async fn reload_tree(session: &vaulthalla_vault::VaultSession) -> Result<()> {
    use vaulthalla_vault::config::{META_DIRNAME, TREE_FILENAME};
    let tree_path = VaultPath::parse(META_DIRNAME)?.join(TREE_FILENAME)?;
    if !session.provider().exists(&tree_path).await? {
        return Ok(());
    }
    let bytes = session.provider().download(&tree_path).await?;
    let tree = vaulthalla_vault::EntryTree::from_json(&String::from_utf8_lossy(&bytes))?;
    session.load_tree(tree).await;
    Ok(())
}

async fn handle_rename(req: ControlRequest, sessions: &SessionRegistry) -> ControlResponse {
    let vault_id = match req.vault_id.map(wire_vault_id) {
        Some(Ok(id)) => id,
        Some(Err(err)) => return err.into(),
        None => return ControlResponse::err("rename requires vaultId"),
    };
    let (from, to) = match (req.from.as_deref(), req.to.as_deref()) {
        (Some(from), Some(to)) => (from, to),
        _ => return ControlResponse::err("rename requires from and to"),
    };
    let (Ok(from), Ok(to)) = (VaultPath::parse(from), VaultPath::parse(to)) else {
        return ControlResponse::err("rename: invalid path");
    };
    let session = match sessions.get(&vault_id).await {
        Ok(session) => session,
        Err(err) => return err.into(),
    };
    let engine = match StorageEngine::new(&session) {
        Ok(engine) => engine,
        Err(err) => return err.into(),
    };
    match engine.rename(&from, &to).await {
        Ok(()) => ControlResponse::ok(None),
        Err(Error::NotFound(_)) => ControlResponse::ok(None),
        Err(err) => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaulthalla_crypto::KdfParams;
    use vaulthalla_sync::InMemoryCatalog;
    use vaulthalla_vault::{Vault, VaultManager};

    struct NoopResolver;
    impl vaulthalla_sync::ProviderResolver for NoopResolver {
        fn resolve(
            &self,
            _vault: &Vault,
        ) -> Result<(Arc<dyn vaulthalla_storage::StorageProvider>, Option<Arc<dyn vaulthalla_storage::StorageProvider>>)>
        {
            Ok((Arc::new(vaulthalla_storage::MemoryProvider::new()), None))
        }
    }

    fn req(op: &str) -> ControlRequest {
        ControlRequest {
            op: op.to_string(),
            vault_id: None,
            fs_entry_id: None,
            path: None,
            from: None,
            to: None,
            new_path: None,
            uid: None,
            gid: None,
            mode: None,
            size: None,
        }
    }

    async fn setup() -> (Arc<SyncController>, Arc<SessionRegistry>, VaultId, watch::Sender<bool>) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let controller = Arc::new(SyncController::new(catalog.clone(), Arc::new(NoopResolver)));
        let sessions = Arc::new(SessionRegistry::new());

        let manager = VaultManager::new();
        let vault = Vault::new(VaultId::new("1").unwrap(), "owner", "v1", "/mnt/v1");
        catalog.register(vault.clone(), vaulthalla_sync::SyncPolicy::default_for(&vault));
        let session = manager
            .create_vault(vault.clone(), b"password", "memory", serde_json::Value::Null, KdfParams::moderate())
            .await
            .unwrap();
        sessions.insert(Arc::new(session)).await;

        let (shutdown_tx, _rx) = watch::channel(false);
        (controller, sessions, vault.id, shutdown_tx)
    }

    #[tokio::test]
    async fn ping_always_succeeds() {
        let (controller, sessions, _, shutdown_tx) = setup().await;
        let resp = dispatch(req("ping"), &controller, &sessions, &shutdown_tx).await;
        assert_eq!(resp.status, "ok");
    }

    #[tokio::test]
    async fn shutdown_flips_the_switch() {
        let (controller, sessions, _, shutdown_tx) = setup().await;
        let mut rx = shutdown_tx.subscribe();
        assert!(!*rx.borrow());

        let resp = dispatch(req("shutdown"), &controller, &sessions, &shutdown_tx).await;
        assert_eq!(resp.status, "ok");
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn create_then_exists_round_trips() {
        let (controller, sessions, vault_id, shutdown_tx) = setup().await;
        let wire_id: u64 = vault_id.as_str().parse().unwrap();

        let mut create = req("create");
        create.vault_id = Some(wire_id);
        create.path = Some("/hello.txt".into());
        let resp = dispatch(create, &controller, &sessions, &shutdown_tx).await;
        assert_eq!(resp.status, "ok", "{resp:?}");

        let mut exists = req("exists");
        exists.vault_id = Some(wire_id);
        exists.path = Some("/hello.txt".into());
        let resp = dispatch(exists, &controller, &sessions, &shutdown_tx).await;
        assert_eq!(resp.result, Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn sync_without_vault_id_is_usage_error() {
        let (controller, sessions, _, shutdown_tx) = setup().await;
        let resp = dispatch(req("sync"), &controller, &sessions, &shutdown_tx).await;
        assert_eq!(resp.status, "error");
    }

    #[tokio::test]
    async fn unknown_op_is_a_silent_ok_noop() {
        let (controller, sessions, _, shutdown_tx) = setup().await;
        let resp = dispatch(req("frobnicate"), &controller, &sessions, &shutdown_tx).await;
        assert_eq!(resp.status, "ok");
    }
}
