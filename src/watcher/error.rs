//! Error types for the watch-tree engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::store::WatchHandle;

/// Structural failures that leave the engine unusable.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to open kernel event channel: {source}")]
    ChannelInit {
        #[source]
        source: io::Error,
    },

    #[error("kernel event channel failed: {source}")]
    Channel {
        #[source]
        source: io::Error,
    },

    #[error("watch table full (capacity {capacity})")]
    StoreFull { capacity: usize },

    #[error("watch table collision on handle {handle}: new {path:?}, existing {existing:?}")]
    StoreCollision {
        handle: WatchHandle,
        path: PathBuf,
        existing: PathBuf,
    },

    #[error("failed to build engine: {reason}")]
    InitFailed { reason: String },
}

/// Outcome of walking one path, from mildest to fatal.
///
/// A walk that returns `Ignored` was skipped silently; siblings continue.
/// `Transient` abandons the current subtree only. `Fatal` unwinds the
/// whole operation and is surfaced to the controlling process.
#[derive(Error, Debug)]
pub enum WalkError {
    /// Ignored by rule, unreadable, or vanished between scan and open.
    #[error("path not watchable")]
    Ignored,

    /// Registration failed for this path; others may still succeed.
    #[error("transient watch failure: {source}")]
    Transient {
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Fatal(#[from] WatchError),
}

/// Outcome of a single kernel registration attempt.
#[derive(Error, Debug)]
pub enum RegisterError {
    /// Per-path refusal: missing, permission denied, or quota exhausted.
    #[error("cannot watch {path:?}: {source}")]
    Denied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The event channel itself is broken.
    #[error("kernel event channel failed: {source}")]
    Channel {
        #[source]
        source: io::Error,
    },
}

impl From<RegisterError> for WalkError {
    fn from(e: RegisterError) -> Self {
        match e {
            RegisterError::Denied { source, .. } => WalkError::Transient { source },
            RegisterError::Channel { source } => WalkError::Fatal(WatchError::Channel { source }),
        }
    }
}
