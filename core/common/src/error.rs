//! Error taxonomy shared across every Vaulthalla crate.
//!
//! The variants below are the eight error kinds a single run can surface,
//! not a type per failing function. Each carries enough context to log and
//! to decide retry/escalation without downcasting.

use thiserror::Error;

/// Top-level error type for Vaulthalla operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request or missing required field. Never retried.
    #[error("usage error: {0}")]
    Usage(String),

    /// Unknown vault, file, inode, or key version.
    #[error("not found: {0}")]
    NotFound(String),

    /// RBAC denial or other access refusal. Never retried.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Resource already exists where a create was expected.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Detected during sync; materialized as a Conflict row, does not fail the run.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient network, I/O, or transport failure. Retried with backoff.
    #[error("transport error: {0}")]
    Transport(String),

    /// AEAD tag mismatch, size mismatch, or missing required metadata. Not retried.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Insufficient free space for the planned operation.
    #[error("capacity error: {0}")]
    Capacity(String),

    /// Unrecoverable: bug, corrupted index, or similar. Propagated to the controller.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => Error::AlreadyExists(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Error::Permission(err.to_string()),
            _ => Error::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Usage(format!("serialization error: {err}"))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Usage(format!("config parse error: {err}"))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

/// CLI process exit codes, per the control-socket/CLI contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Usage = 1,
    NotFound = 2,
    Permission = 3,
    Transport = 4,
    Configuration = 5,
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Usage(_) => ExitCode::Usage,
            Error::NotFound(_) => ExitCode::NotFound,
            Error::Permission(_) => ExitCode::Permission,
            Error::Transport(_) | Error::Fatal(_) => ExitCode::Transport,
            Error::AlreadyExists(_) | Error::Conflict(_) | Error::Integrity(_) | Error::Capacity(_) => {
                ExitCode::Usage
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn exit_code_mapping() {
        assert_eq!(ExitCode::from(&Error::Usage("x".into())), ExitCode::Usage);
        assert_eq!(ExitCode::from(&Error::NotFound("x".into())), ExitCode::NotFound);
        assert_eq!(ExitCode::from(&Error::Permission("x".into())), ExitCode::Permission);
        assert_eq!(ExitCode::from(&Error::Transport("x".into())), ExitCode::Transport);
    }
}
