//! Normalized event vocabulary shared by both kernel backends.

use std::ffi::OsString;

use bitflags::bitflags;

use super::store::WatchHandle;

bitflags! {
    /// Normalized change bits handed to the registered callback.
    ///
    /// Backends translate their native masks into these bits; nothing
    /// downstream of the adapter sees a kernel-specific flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChangeMask: u32 {
        /// A path appeared under a watched directory.
        const CREATED = 1 << 0;
        /// A named child was deleted or moved away.
        const REMOVED = 1 << 1;
        /// File or directory content changed.
        const CONTENT = 1 << 2;
        /// Metadata changed; contents untouched.
        const METADATA = 1 << 3;
        /// The watched object itself was deleted, renamed away, or revoked.
        const GONE = 1 << 4;
    }
}

/// One kernel notification, translated into the engine's vocabulary.
///
/// `ChildCreated`, `ChildRemoved`, and `ChildChanged` only occur on the
/// inode-event model, where the kernel names the affected child. The
/// vnode-event model reports everything against the watched object itself.
#[derive(Debug, PartialEq, Eq)]
pub enum RawEvent {
    /// A child appeared inside a watched directory.
    ChildCreated {
        parent: WatchHandle,
        name: OsString,
        is_dir: bool,
    },

    /// A named child was deleted or moved out of a watched directory.
    ChildRemoved { parent: WatchHandle, name: OsString },

    /// A named child changed in place; no structural handling needed.
    ChildChanged {
        parent: WatchHandle,
        name: OsString,
        mask: ChangeMask,
    },

    /// The watched object changed but the kernel did not name a child.
    /// On a directory this triggers a rescan for new entries.
    SelfChanged { handle: WatchHandle },

    /// The watched object was deleted, renamed away, or revoked.
    SelfGone { handle: WatchHandle },

    /// Metadata change on the watched object itself.
    AttrChanged { handle: WatchHandle },

    /// The kernel queue overflowed; events may have been lost.
    Overflow,
}
