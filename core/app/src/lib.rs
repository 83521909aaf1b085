//! Daemon wiring for Vaulthalla: the control socket, the sync-event
//! janitor, and the `Daemon` struct that brings both up alongside a
//! [`vaulthalla_sync::SyncController`].
//!
//! There is no separate daemon binary in this workspace — `tools/cli`'s
//! `daemon start` subcommand depends on this crate as a library and calls
//! [`Daemon::run`] directly on its own runtime.

pub mod control;
pub mod daemon;
pub mod janitor;
pub mod registry;

pub use daemon::Daemon;
pub use registry::SessionRegistry;
