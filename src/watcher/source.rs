//! The adapter contract both kernel backends implement.

use std::os::unix::io::AsRawFd;
use std::path::Path;

use super::error::{RegisterError, WatchError};
use super::event::RawEvent;
use super::store::WatchHandle;

/// Fallback registration ceiling on platforms without a tunable quota.
pub const DEFAULT_MAX_WATCHES: usize = 1_000_000;

/// Uniform operation set over the two kernel event models.
///
/// The walker and dispatcher never branch on platform; everything
/// model-specific lives behind this trait. The `AsRawFd` supertrait
/// exposes the channel descriptor so the caller can multiplex it
/// against the command stream.
pub trait EventSource: AsRawFd {
    /// Whether child files must be registered individually. True on the
    /// vnode model, where a directory watch says nothing about the files
    /// inside it; false on the inode model, where the directory's own
    /// watch reports child events.
    const WATCHES_LEAF_FILES: bool;

    /// Open the kernel event channel. `max_override`, when set, caps the
    /// number of live registrations below the platform quota.
    fn init(max_override: Option<usize>) -> Result<Self, WatchError>
    where
        Self: Sized;

    /// Maximum permissible live registrations.
    fn max_watches(&self) -> usize;

    /// One-way flag: a registration was refused for quota reasons, so
    /// the watch list is incomplete and the caller may fall back to
    /// polling.
    fn limit_reached(&self) -> bool;

    /// Ask the kernel to watch `path` for content change, metadata
    /// change, child creation and deletion, self-deletion, and moves.
    fn register(&mut self, path: &Path, is_dir: bool) -> Result<WatchHandle, RegisterError>;

    /// Drop one registration. Failures are logged, never propagated;
    /// the handle is dead to the engine either way.
    fn unregister(&mut self, handle: WatchHandle);

    /// Drain whatever the kernel has ready, in kernel order, without
    /// blocking. Call after the channel descriptor polls readable; an
    /// empty batch just means another consumer got there first.
    fn poll(&mut self) -> Result<Vec<RawEvent>, WatchError>;
}
