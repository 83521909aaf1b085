//! Storage provider abstraction for Vaulthalla.
//!
//! This module provides a trait-based interface for different storage backends
//! (S3-compatible object storage, local filesystem, in-memory for tests) and
//! a provider registry for dynamic provider resolution.
//!
//! # Design Principles
//! - Provider isolation: No provider-specific logic in vault or crypto modules
//! - Async operations: All I/O operations are async
//! - Streaming support: Large files are handled via streams
//! - Unified error semantics: Consistent error types across providers

pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod s3;

pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use provider::{ConflictResolution, Metadata, StorageProvider};
pub use registry::{create_default_registry, ProviderFactory, ProviderRegistry};
pub use s3::{CompletedPart, S3Client, S3Credentials, S3Provider};
