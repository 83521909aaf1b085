//! Vault engine for Vaulthalla.
//!
//! This module provides:
//! - Vault creation and lifecycle management
//! - Encrypted file and directory operations
//! - Metadata management and persistence
//! - Session handling with secure key management
//!
//! # Architecture
//! The vault module sits between the user interface and storage providers,
//! handling all encryption/decryption operations transparently.

pub mod apikey;
pub mod config;
pub mod engine;
pub mod manager;
pub mod mime;
pub mod session;
pub mod tree;
pub mod vault;

pub use apikey::{ApiKey, ApiKeyStore};
pub use config::{VaultConfig, VaultVersion};
pub use engine::{CloudExtension, CloudObject, StorageEngine};
pub use manager::VaultManager;
pub use session::{SessionHandle, VaultSession};
pub use tree::{EntryKind, EntryNode, EntryTree};
pub use vault::{Vault, VaultType, MIN_FREE_SPACE};
