//! S3-compatible object storage: request signing and the wire client.

pub mod client;
pub mod provider;
pub mod sigv4;

pub use client::{CompletedPart, S3Client, S3Credentials, S3Object};
pub use provider::S3Provider;
