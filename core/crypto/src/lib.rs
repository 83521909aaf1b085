//! Cryptographic primitives for Vaulthalla.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using AES-256-GCM
//! - Per-vault versioned key management with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod manager;

pub use aead::{decrypt, encrypt};
pub use kdf::{derive_key, KdfParams};
pub use keys::{DirectoryKey, FileKey, MasterKey, Salt};
pub use manager::{EncryptionEnvelope, VaultEncryptionManager};
