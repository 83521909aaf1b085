//! Vaulthalla CLI - command line interface for the vault daemon.
//!
//! `daemon start` runs a `vaulthalla_app::Daemon` to completion on this
//! process's own tokio runtime (there is no separate daemon binary in this
//! workspace). `daemon stop`/`daemon status`, and every `vault`/`apikey`
//! op that needs a live daemon, connect to its control socket as an
//! ordinary client. `vault add`/`remove`/`list` and the `apikey` ops touch
//! the on-disk catalog/keyring directly, since they are administrative and
//! don't need the daemon running.

use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vaulthalla_app::Daemon;
use vaulthalla_common::{Config, Error, ExitCode, Result, VaultId};
use vaulthalla_crypto::KdfParams;
use vaulthalla_sync::{Catalog, JsonFileCatalog, SyncPolicy};
use vaulthalla_vault::{ApiKeyStore, Vault, VaultManager, VaultType};

#[derive(Parser)]
#[command(name = "vaulthalla")]
#[command(about = "Vaulthalla - encrypted vault daemon management")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Daemon configuration file (YAML).
    #[arg(long, default_value = "/etc/vaulthalla/config.yaml", global = true)]
    config: PathBuf,

    /// Vault catalog file. Shared between the daemon and this CLI.
    #[arg(long, default_value = "/var/lib/vaulthalla/catalog.json", global = true)]
    catalog: PathBuf,

    /// S3 credential keyring file.
    #[arg(long, default_value = "/var/lib/vaulthalla/keyring.json", global = true)]
    keyring: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Daemon lifecycle.
    Daemon {
        #[command(subcommand)]
        action: DaemonCommands,
    },
    /// Vault lifecycle and sync.
    Vault {
        #[command(subcommand)]
        action: VaultCommands,
    },
    /// Role operations. RBAC evaluation is out of scope for this engine;
    /// see `DESIGN.md`.
    Role {
        #[command(subcommand)]
        action: RoleCommands,
    },
    /// User operations. User management is out of scope for this engine.
    User {
        #[command(subcommand)]
        action: UserCommands,
    },
    /// Object-store API key management.
    Apikey {
        #[command(subcommand)]
        action: ApikeyCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the daemon and block until shutdown.
    Start,
    /// Ask a running daemon to shut down.
    Stop,
    /// Report whether a daemon is listening on the control socket.
    Status,
}

#[derive(Subcommand)]
enum VaultCommands {
    /// Register and bootstrap a new vault.
    Add {
        /// Vault id (also its catalog key).
        id: String,
        /// Display name.
        #[arg(long)]
        name: String,
        /// Owner id.
        #[arg(long)]
        owner: String,
        /// Fuse mount point.
        #[arg(long)]
        mount_point: String,
        /// Quota in bytes. 0 means unlimited.
        #[arg(long, default_value_t = 0)]
        quota: u64,
        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(long, default_value = "moderate")]
        strength: String,
        /// Back this vault with an S3-compatible bucket instead of local storage.
        #[arg(long)]
        s3_bucket: Option<String>,
        /// API key id to use for the S3 bucket. Required with `--s3-bucket`.
        #[arg(long)]
        api_key_id: Option<String>,
    },
    /// Drop a vault's catalog record. Leaves backing storage untouched.
    Remove {
        id: String,
    },
    /// List registered vaults.
    List,
    /// Ask a running daemon to run a vault's sync task now.
    Sync {
        id: String,
    },
}

#[derive(Subcommand)]
enum RoleCommands {
    List,
    Grant { role: String, user: String },
    Revoke { role: String, user: String },
}

#[derive(Subcommand)]
enum UserCommands {
    List,
    Add { id: String },
    Remove { id: String },
}

#[derive(Subcommand)]
enum ApikeyCommands {
    /// Store a new object-store credential.
    Add {
        id: String,
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "s3")]
        provider: String,
        #[arg(long)]
        access_key: String,
        #[arg(long, default_value = "us-east-1")]
        region: String,
        #[arg(long)]
        endpoint: String,
    },
    Remove {
        id: String,
    },
    List,
}

#[tokio::main]
async fn main() -> ProcessExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).with_target(false).compact().finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let result = run(cli).await;
    match result {
        Ok(()) => ProcessExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ProcessExitCode::from(ExitCode::from(&err) as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Daemon { action } => match action {
            DaemonCommands::Start => cmd_daemon_start(&cli.config, &cli.catalog, &cli.keyring).await,
            DaemonCommands::Stop => cmd_daemon_stop(&cli.config).await,
            DaemonCommands::Status => cmd_daemon_status(&cli.config).await,
        },
        Commands::Vault { action } => match action {
            VaultCommands::Add { id, name, owner, mount_point, quota, strength, s3_bucket, api_key_id } => {
                cmd_vault_add(&cli.catalog, &cli.keyring, id, name, owner, mount_point, quota, &strength, s3_bucket, api_key_id)
                    .await
            }
            VaultCommands::Remove { id } => cmd_vault_remove(&cli.catalog, &id).await,
            VaultCommands::List => cmd_vault_list(&cli.catalog).await,
            VaultCommands::Sync { id } => cmd_vault_sync(&cli.config, &cli.catalog, &id).await,
        },
        Commands::Role { action } => match action {
            RoleCommands::List => {
                println!("(no roles: RBAC evaluation is out of scope for this engine)");
                Ok(())
            }
            RoleCommands::Grant { .. } | RoleCommands::Revoke { .. } => Err(Error::Usage(
                "role management is out of scope for this engine; use the external admin surface".to_string(),
            )),
        },
        Commands::User { action } => match action {
            UserCommands::List => {
                println!("(no users: user management is out of scope for this engine)");
                Ok(())
            }
            UserCommands::Add { .. } | UserCommands::Remove { .. } => Err(Error::Usage(
                "user management is out of scope for this engine; use the external admin surface".to_string(),
            )),
        },
        Commands::Apikey { action } => match action {
            ApikeyCommands::Add { id, owner, provider, access_key, region, endpoint } => {
                cmd_apikey_add(&cli.keyring, id, owner, provider, access_key, region, endpoint).await
            }
            ApikeyCommands::Remove { id } => cmd_apikey_remove(&cli.keyring, &id).await,
            ApikeyCommands::List => cmd_apikey_list(&cli.keyring).await,
        },
    }
}

fn prompt_password(prompt: &str) -> Result<Vec<u8>> {
    let password = rpassword::prompt_password(prompt).map_err(|e| Error::Usage(format!("failed to read password: {e}")))?;
    Ok(password.into_bytes())
}

async fn load_config(path: &PathBuf) -> Result<Config> {
    let contents = tokio::fs::read_to_string(path).await?;
    Config::from_yaml_str(&contents)
}

async fn cmd_daemon_start(config_path: &PathBuf, catalog_path: &PathBuf, keyring_path: &PathBuf) -> Result<()> {
    let config = load_config(config_path).await?;

    let keyring_passphrase = std::env::var("VAULTHALLA_KEYRING_PASSPHRASE").ok();
    let keyring = if tokio::fs::try_exists(keyring_path).await.unwrap_or(false) {
        let passphrase = match keyring_passphrase {
            Some(p) => p.into_bytes(),
            None => prompt_password("Keyring passphrase: ")?,
        };
        Some(ApiKeyStore::open(keyring_path, &passphrase).await?)
    } else {
        None
    };

    let daemon = Daemon::bootstrap(config, catalog_path, keyring.as_ref()).await?;
    info!("starting vaulthalla daemon");
    daemon.run().await
}

async fn control_request(config_path: &PathBuf, request: Value) -> Result<Value> {
    let config = load_config(config_path).await?;
    let stream = UnixStream::connect(&config.server.uds_socket)
        .await
        .map_err(|e| Error::Transport(format!("connecting to {:?}: {e}", config.server.uds_socket)))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = serde_json::to_string(&request)?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;

    let mut response = String::new();
    reader.read_line(&mut response).await?;
    if response.is_empty() {
        return Err(Error::Transport("daemon closed the connection without responding".to_string()));
    }
    let response: Value = serde_json::from_str(&response)?;
    match response.get("status").and_then(Value::as_str) {
        Some("ok") => Ok(response.get("result").cloned().unwrap_or(Value::Null)),
        _ => {
            let message = response.get("error").and_then(Value::as_str).unwrap_or("unknown daemon error");
            Err(Error::Transport(message.to_string()))
        }
    }
}

async fn cmd_daemon_stop(config_path: &PathBuf) -> Result<()> {
    control_request(config_path, json!({"op": "shutdown"})).await?;
    println!("shutdown requested");
    Ok(())
}

async fn cmd_daemon_status(config_path: &PathBuf) -> Result<()> {
    match control_request(config_path, json!({"op": "ping"})).await {
        Ok(_) => {
            println!("running");
            Ok(())
        }
        Err(_) => {
            println!("not running");
            Err(Error::NotFound("daemon is not running".to_string()))
        }
    }
}

fn parse_kdf_strength(strength: &str) -> Result<KdfParams> {
    match strength {
        "interactive" => Ok(KdfParams::interactive()),
        "moderate" => Ok(KdfParams::moderate()),
        "sensitive" => Ok(KdfParams::sensitive()),
        other => Err(Error::Usage(format!("invalid KDF strength '{other}'; use interactive, moderate, or sensitive"))),
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_vault_add(
    catalog_path: &PathBuf,
    keyring_path: &PathBuf,
    id: String,
    name: String,
    owner: String,
    mount_point: String,
    quota: u64,
    strength: &str,
    s3_bucket: Option<String>,
    api_key_id: Option<String>,
) -> Result<()> {
    let vault_id = VaultId::new(id)?;
    let kdf_params = parse_kdf_strength(strength)?;

    let (vault_type, provider_type, provider_config) = match (s3_bucket, api_key_id) {
        (Some(bucket), Some(api_key_id)) => {
            let keyring_passphrase = prompt_password("Keyring passphrase: ")?;
            let keyring = ApiKeyStore::open(keyring_path, &keyring_passphrase).await?;
            let key = keyring.get(&api_key_id).await?;
            let secret = keyring.reveal(&key)?;
            let config = json!({
                "access_key": key.access_key,
                "secret_key": secret,
                "region": key.region,
                "endpoint": key.endpoint,
                "bucket": bucket,
            });
            (VaultType::S3 { api_key_id, bucket }, "s3", config)
        }
        (None, None) => {
            let backing_root = PathBuf::from("/var/lib/vaulthalla/vaults").join(vault_id.as_str());
            let config = json!({ "root": backing_root.to_string_lossy() });
            (VaultType::Local, "local", config)
        }
        _ => return Err(Error::Usage("--s3-bucket and --api-key-id must be given together".to_string())),
    };

    let vault = Vault::new(vault_id.clone(), owner, name, mount_point).with_quota(quota).with_type(vault_type);

    let password = prompt_password("Vault password: ")?;
    let confirm = prompt_password("Confirm vault password: ")?;
    if password != confirm {
        return Err(Error::Usage("passwords did not match".to_string()));
    }

    let manager = VaultManager::new();
    manager.create_vault(vault.clone(), &password, provider_type, provider_config, kdf_params).await?;

    let catalog = JsonFileCatalog::open(catalog_path).await?;
    let policy = SyncPolicy::default_for(&vault);
    catalog.put_vault(vault, policy).await?;

    println!("vault {} created", vault_id);
    Ok(())
}

async fn cmd_vault_remove(catalog_path: &PathBuf, id: &str) -> Result<()> {
    let vault_id = VaultId::new(id.to_string())?;
    let catalog = JsonFileCatalog::open(catalog_path).await?;
    catalog.get_vault(&vault_id).await?;
    catalog.remove_vault(&vault_id).await?;
    println!("vault {vault_id} removed from the catalog (backing storage untouched)");
    Ok(())
}

async fn cmd_vault_list(catalog_path: &PathBuf) -> Result<()> {
    let catalog = JsonFileCatalog::open(catalog_path).await?;
    let vaults = catalog.list_vaults().await?;
    if vaults.is_empty() {
        println!("no vaults registered");
        return Ok(());
    }
    for record in vaults {
        let kind = match &record.vault.vault_type {
            VaultType::Local => "local".to_string(),
            VaultType::S3 { bucket, .. } => format!("s3:{bucket}"),
        };
        println!(
            "{}\t{}\towner={}\ttype={}\tquota={}\tactive={}",
            record.vault.id, record.vault.name, record.vault.owner_id, kind, record.vault.quota, record.vault.is_active
        );
    }
    Ok(())
}

async fn cmd_vault_sync(config_path: &PathBuf, catalog_path: &PathBuf, id: &str) -> Result<()> {
    let vault_id = VaultId::new(id.to_string())?;
    let catalog = JsonFileCatalog::open(catalog_path).await?;
    catalog.get_vault(&vault_id).await?;

    let wire_id: u64 = vault_id
        .as_str()
        .parse()
        .map_err(|_| Error::Usage(format!("vault id {vault_id} is not a valid wire id (expected a decimal integer)")))?;
    control_request(config_path, json!({"op": "sync", "vaultId": wire_id})).await?;
    println!("sync requested for vault {vault_id}");
    Ok(())
}

async fn open_keyring(path: &PathBuf) -> Result<ApiKeyStore> {
    let passphrase = match std::env::var("VAULTHALLA_KEYRING_PASSPHRASE") {
        Ok(p) => p.into_bytes(),
        Err(_) => prompt_password("Keyring passphrase: ")?,
    };
    ApiKeyStore::open(path, &passphrase).await
}

async fn cmd_apikey_add(
    keyring_path: &PathBuf,
    id: String,
    owner: String,
    provider: String,
    access_key: String,
    region: String,
    endpoint: String,
) -> Result<()> {
    let keyring = open_keyring(keyring_path).await?;
    let secret = prompt_password("Secret access key: ")?;
    let secret = String::from_utf8(secret).map_err(|e| Error::Usage(format!("secret is not valid utf-8: {e}")))?;
    keyring.add(id.clone(), owner, provider, access_key, &secret, region, endpoint).await?;
    println!("api key {id} stored");
    Ok(())
}

async fn cmd_apikey_remove(keyring_path: &PathBuf, id: &str) -> Result<()> {
    let keyring = open_keyring(keyring_path).await?;
    keyring.remove(id).await?;
    println!("api key {id} removed");
    Ok(())
}

async fn cmd_apikey_list(keyring_path: &PathBuf) -> Result<()> {
    let keyring = open_keyring(keyring_path).await?;
    let keys = keyring.list().await;
    if keys.is_empty() {
        println!("no api keys stored");
        return Ok(());
    }
    for key in keys {
        println!("{}\towner={}\tprovider={}\taccess_key={}\tregion={}\tendpoint={}", key.id, key.owner_id, key.provider, key.access_key, key.region, key.endpoint);
    }
    Ok(())
}
