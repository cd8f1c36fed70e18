//! The watch-tree engine: a live mirror of directory hierarchies in
//! kernel watch registrations.
//!
//! # Architecture
//!
//! ```text
//! WatchEngine
//!   - One EventSource (inotify on Linux, kqueue on the BSD family)
//!   - WatchTree: handle-keyed node store + root registry + walker
//!   - Dispatches normalized events, announces changes to a ChangeHandler
//!         |
//!    +--------------+----------------+
//!    |              |                |
//! InotifySource  KqueueSource   ChangeHandler impl
//! (inode model)  (vnode model)  (record formatting)
//! ```
//!
//! The two kernel models differ sharply: the inode model names changed
//! children and watches whole directories, the vnode model watches one
//! open descriptor per object and infers structure by rescanning. The
//! [`EventSource`] trait confines those differences to the backends;
//! walker and dispatcher are model-agnostic.

mod engine;
mod error;
mod event;
mod handler;
mod source;
mod store;
mod tree;

#[cfg(target_os = "linux")]
mod inotify;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;

pub use engine::{WatchEngine, WatchEngineBuilder};
pub use error::{RegisterError, WalkError, WatchError};
pub use event::{ChangeMask, RawEvent};
pub use handler::ChangeHandler;
pub use source::{EventSource, DEFAULT_MAX_WATCHES};
pub use store::{WatchHandle, WatchNode, WatchStore};
pub use tree::{IgnoreList, Root, WatchTree};

#[cfg(target_os = "linux")]
pub use inotify::InotifySource;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::KqueueSource;

/// The platform's event source.
#[cfg(target_os = "linux")]
pub type DefaultSource = InotifySource;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub type DefaultSource = KqueueSource;
