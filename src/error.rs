//! Boot-time error taxonomy.
//!
//! Every failure the supervisor can observe funnels into [`BootError`].
//! All of them are fatal for the boot sequence: the caller logs the error
//! and restarts the device. Failures inside spawned tasks never reach
//! this type; tasks report those through [`crate::status`].

use core::fmt;

use crate::supervisor::ports::{ConnectivityError, SpawnError};

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors reported by a [`ConfigStore`](crate::supervisor::ports::ConfigStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// No configuration record has been written yet.
    NotFound,
    /// The partition or record was written by an incompatible layout.
    VersionMismatch,
    /// The record exists but does not decode or fails validation.
    Corrupted,
    /// The flash driver returned an unexpected error code.
    Io(i32),
}

impl StoreError {
    /// Whether one erase-and-reread cycle may clear this error.
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::NotFound | Self::VersionMismatch | Self::Corrupted)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no stored configuration"),
            Self::VersionMismatch => write!(f, "storage version mismatch"),
            Self::Corrupted => write!(f, "stored configuration corrupted"),
            Self::Io(code) => write!(f, "flash I/O error {code}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level boot error
// ---------------------------------------------------------------------------

/// A fatal failure of the boot sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootError {
    /// Configuration unreadable, possibly after one erase-and-retry cycle.
    Storage(StoreError),
    /// The link never reached `Up`, and degraded boot is not configured.
    NetworkBringUp(NetworkFailure),
    /// The scheduler refused a task.
    Spawn(SpawnError),
}

/// Why network bring-up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    /// The collaborator rejected the connect request outright.
    Rejected(ConnectivityError),
    /// No `Up` transition within the configured bound.
    Timeout { waited_ms: u32 },
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(e) => write!(f, "connect rejected: {e}"),
            Self::Timeout { waited_ms } => write!(f, "link not up after {waited_ms} ms"),
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::NetworkBringUp(e) => write!(f, "network bring-up: {e}"),
            Self::Spawn(e) => write!(f, "spawn: {e}"),
        }
    }
}

impl std::error::Error for BootError {}

impl From<StoreError> for BootError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e)
    }
}

impl From<NetworkFailure> for BootError {
    fn from(e: NetworkFailure) -> Self {
        Self::NetworkBringUp(e)
    }
}

impl From<SpawnError> for BootError {
    fn from(e: SpawnError) -> Self {
        Self::Spawn(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_not_recoverable() {
        assert!(StoreError::NotFound.is_recoverable());
        assert!(StoreError::VersionMismatch.is_recoverable());
        assert!(StoreError::Corrupted.is_recoverable());
        assert!(!StoreError::Io(-1).is_recoverable());
    }

    #[test]
    fn display_names_the_subsystem() {
        let e = BootError::from(NetworkFailure::Timeout { waited_ms: 500 });
        assert_eq!(e.to_string(), "network bring-up: link not up after 500 ms");
        let e = BootError::from(StoreError::NotFound);
        assert_eq!(e.to_string(), "storage: no stored configuration");
    }
}
