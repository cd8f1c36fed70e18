//! Inode-event backend over the Linux inotify channel.
//!
//! One channel descriptor carries events for every registration. The
//! kernel names affected children and flags directories, so only
//! directories (and flat file roots) are registered; leaf files ride on
//! their parent's watch.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use tracing::{debug, warn};

use super::error::{RegisterError, WatchError};
use super::event::{ChangeMask, RawEvent};
use super::source::{EventSource, DEFAULT_MAX_WATCHES};
use super::store::WatchHandle;

/// Administrator-tunable registration quota.
const MAX_USER_WATCHES: &str = "/proc/sys/fs/inotify/max_user_watches";

fn watch_mask() -> WatchMask {
    WatchMask::MODIFY
        | WatchMask::ATTRIB
        | WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::DELETE_SELF
        | WatchMask::MOVE_SELF
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
}

pub struct InotifySource {
    inotify: Inotify,
    /// Numeric handle back to the crate's descriptor type, needed to
    /// unregister. Entries disappear when the kernel reports IGNORED.
    wds: HashMap<i32, WatchDescriptor>,
    max_watches: usize,
    limit_reached: bool,
    buffer: [u8; 4096],
}

impl InotifySource {
    fn read_quota() -> usize {
        match fs::read_to_string(MAX_USER_WATCHES) {
            Ok(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!("[inotify] unparsable {MAX_USER_WATCHES}, assuming {DEFAULT_MAX_WATCHES}");
                    DEFAULT_MAX_WATCHES
                }
            },
            Err(e) => {
                warn!("[inotify] cannot read {MAX_USER_WATCHES}: {e}, assuming {DEFAULT_MAX_WATCHES}");
                DEFAULT_MAX_WATCHES
            }
        }
    }
}

impl AsRawFd for InotifySource {
    fn as_raw_fd(&self) -> RawFd {
        self.inotify.as_raw_fd()
    }
}

impl EventSource for InotifySource {
    const WATCHES_LEAF_FILES: bool = false;

    fn init(max_override: Option<usize>) -> Result<Self, WatchError> {
        let inotify =
            Inotify::init().map_err(|source| WatchError::ChannelInit { source })?;

        let quota = Self::read_quota();
        let max_watches = match max_override {
            Some(n) if n > 0 => n.min(quota),
            _ => quota,
        };
        debug!("[inotify] channel fd {}, max watches {max_watches}", inotify.as_raw_fd());

        Ok(Self {
            inotify,
            wds: HashMap::new(),
            max_watches,
            limit_reached: false,
            buffer: [0u8; 4096],
        })
    }

    fn max_watches(&self) -> usize {
        self.max_watches
    }

    fn limit_reached(&self) -> bool {
        self.limit_reached
    }

    fn register(&mut self, path: &Path, _is_dir: bool) -> Result<WatchHandle, RegisterError> {
        if self.wds.len() >= self.max_watches {
            self.limit_reached = true;
            return Err(RegisterError::Denied {
                path: path.to_path_buf(),
                source: io::Error::from_raw_os_error(libc::ENOSPC),
            });
        }

        match self.inotify.watches().add(path, watch_mask()) {
            Ok(wd) => {
                let id = wd.get_watch_descriptor_id();
                debug!("[inotify] watching {}: {id}", path.display());
                self.wds.insert(id, wd);
                Ok(WatchHandle::new(id))
            }
            Err(source) => {
                match source.raw_os_error() {
                    Some(libc::ENOSPC) => {
                        warn!("[inotify] watch quota exhausted at {}", path.display());
                        self.limit_reached = true;
                    }
                    Some(libc::EBADF) | Some(libc::EINVAL) => {
                        return Err(RegisterError::Channel { source });
                    }
                    _ => {}
                }
                Err(RegisterError::Denied {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }

    fn unregister(&mut self, handle: WatchHandle) {
        let Some(wd) = self.wds.remove(&handle.raw()) else {
            // Already dropped by the kernel (IGNORED after deletion).
            return;
        };
        if let Err(e) = self.inotify.watches().remove(wd) {
            warn!("[inotify] rm_watch {handle}: {e}");
        }
    }

    fn poll(&mut self) -> Result<Vec<RawEvent>, WatchError> {
        let mut out = Vec::new();

        loop {
            let events = match self.inotify.read_events(&mut self.buffer) {
                Ok(events) => events,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(WatchError::Channel { source }),
            };

            for event in events {
                let id = event.wd.get_watch_descriptor_id();
                let handle = WatchHandle::new(id);

                if event.mask.contains(EventMask::Q_OVERFLOW) {
                    out.push(RawEvent::Overflow);
                    continue;
                }
                if event.mask.contains(EventMask::IGNORED) {
                    // The kernel retired this watch on its own; keep the
                    // bookkeeping in step and let the engine learn about
                    // the removal from the structural events.
                    self.wds.remove(&id);
                    continue;
                }

                match event.name {
                    Some(name) => {
                        let name = name.to_os_string();
                        let is_dir = event.mask.contains(EventMask::ISDIR);
                        if event
                            .mask
                            .intersects(EventMask::CREATE | EventMask::MOVED_TO)
                        {
                            out.push(RawEvent::ChildCreated {
                                parent: handle,
                                name,
                                is_dir,
                            });
                        } else if event
                            .mask
                            .intersects(EventMask::DELETE | EventMask::MOVED_FROM)
                        {
                            out.push(RawEvent::ChildRemoved {
                                parent: handle,
                                name,
                            });
                        } else if event.mask.contains(EventMask::MODIFY) {
                            out.push(RawEvent::ChildChanged {
                                parent: handle,
                                name,
                                mask: ChangeMask::CONTENT,
                            });
                        } else if event.mask.contains(EventMask::ATTRIB) {
                            out.push(RawEvent::ChildChanged {
                                parent: handle,
                                name,
                                mask: ChangeMask::METADATA,
                            });
                        }
                    }
                    None => {
                        if event
                            .mask
                            .intersects(EventMask::DELETE_SELF | EventMask::MOVE_SELF)
                        {
                            out.push(RawEvent::SelfGone { handle });
                        } else if event.mask.contains(EventMask::MODIFY) {
                            out.push(RawEvent::SelfChanged { handle });
                        } else if event.mask.contains(EventMask::ATTRIB) {
                            out.push(RawEvent::AttrChanged { handle });
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}
