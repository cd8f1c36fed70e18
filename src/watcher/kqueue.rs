//! Vnode-event backend over kqueue for the BSD family and macOS.
//!
//! Every watched object needs its own open descriptor, files included:
//! a directory's vnode filter fires when an entry is added or removed
//! but never names the entry, so child file modifications are only
//! visible through the child's own registration and structural changes
//! are recovered by rescanning the directory.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use nix::sys::event::{EventFilter, EventFlag, FilterFlag, KEvent, Kqueue};
use tracing::{debug, warn};

use super::error::{RegisterError, WatchError};
use super::event::RawEvent;
use super::source::{EventSource, DEFAULT_MAX_WATCHES};
use super::store::WatchHandle;

const EVENT_BATCH: usize = 2048;

fn vnode_fflags() -> FilterFlag {
    FilterFlag::NOTE_DELETE
        | FilterFlag::NOTE_WRITE
        | FilterFlag::NOTE_RENAME
        | FilterFlag::NOTE_EXTEND
        | FilterFlag::NOTE_ATTRIB
        | FilterFlag::NOTE_REVOKE
}

fn zero_timeout() -> libc::timespec {
    libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    }
}

fn placeholder_event() -> KEvent {
    KEvent::new(
        0,
        EventFilter::EVFILT_VNODE,
        EventFlag::empty(),
        FilterFlag::empty(),
        0,
        0,
    )
}

pub struct KqueueSource {
    queue: Kqueue,
    /// Open descriptors backing the registrations. Dropping the `File`
    /// closes the descriptor, which is why removal happens only after
    /// the filter has been deleted.
    files: HashMap<i32, File>,
    max_watches: usize,
    limit_reached: bool,
}

impl AsRawFd for KqueueSource {
    fn as_raw_fd(&self) -> RawFd {
        self.queue.as_fd().as_raw_fd()
    }
}

impl EventSource for KqueueSource {
    const WATCHES_LEAF_FILES: bool = true;

    fn init(max_override: Option<usize>) -> Result<Self, WatchError> {
        let queue = Kqueue::new().map_err(|e| WatchError::ChannelInit { source: e.into() })?;

        let max_watches = match max_override {
            Some(n) if n > 0 => n.min(DEFAULT_MAX_WATCHES),
            _ => DEFAULT_MAX_WATCHES,
        };
        debug!(
            "[kqueue] channel fd {}, max watches {max_watches}",
            queue.as_fd().as_raw_fd()
        );

        Ok(Self {
            queue,
            files: HashMap::new(),
            max_watches,
            limit_reached: false,
        })
    }

    fn max_watches(&self) -> usize {
        self.max_watches
    }

    fn limit_reached(&self) -> bool {
        self.limit_reached
    }

    fn register(&mut self, path: &Path, _is_dir: bool) -> Result<WatchHandle, RegisterError> {
        if self.files.len() >= self.max_watches {
            self.limit_reached = true;
            return Err(RegisterError::Denied {
                path: path.to_path_buf(),
                source: io::Error::from_raw_os_error(libc::EMFILE),
            });
        }

        let file = match File::open(path) {
            Ok(file) => file,
            Err(source) => {
                if matches!(source.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE)) {
                    warn!("[kqueue] descriptor quota exhausted at {}", path.display());
                    self.limit_reached = true;
                }
                return Err(RegisterError::Denied {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let fd = file.as_raw_fd();

        let changelist = [KEvent::new(
            fd as usize,
            EventFilter::EVFILT_VNODE,
            EventFlag::EV_ADD | EventFlag::EV_ENABLE | EventFlag::EV_CLEAR,
            vnode_fflags(),
            0,
            0,
        )];
        let mut scratch: [KEvent; 0] = [];
        if let Err(e) = self
            .queue
            .kevent(&changelist, &mut scratch, Some(zero_timeout()))
        {
            // The filter could not be installed on a healthy descriptor,
            // so the channel itself is suspect.
            return Err(RegisterError::Channel { source: e.into() });
        }

        debug!("[kqueue] watching {}: {fd}", path.display());
        self.files.insert(fd, file);
        Ok(WatchHandle::new(fd))
    }

    fn unregister(&mut self, handle: WatchHandle) {
        let Some(file) = self.files.remove(&handle.raw()) else {
            return;
        };

        let changelist = [KEvent::new(
            handle.raw() as usize,
            EventFilter::EVFILT_VNODE,
            EventFlag::EV_DELETE,
            vnode_fflags(),
            0,
            0,
        )];
        let mut scratch: [KEvent; 0] = [];
        if let Err(e) = self
            .queue
            .kevent(&changelist, &mut scratch, Some(zero_timeout()))
        {
            warn!("[kqueue] remove filter {handle}: {e}");
        }
        drop(file);
    }

    fn poll(&mut self) -> Result<Vec<RawEvent>, WatchError> {
        let mut out = Vec::new();
        let mut eventlist = vec![placeholder_event(); EVENT_BATCH];

        loop {
            let count = match self.queue.kevent(&[], &mut eventlist, Some(zero_timeout())) {
                Ok(count) => count,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(WatchError::Channel { source: e.into() }),
            };
            if count == 0 {
                break;
            }

            for event in &eventlist[..count] {
                if event.flags().contains(EventFlag::EV_ERROR) {
                    return Err(WatchError::Channel {
                        source: io::Error::from_raw_os_error(event.data() as i32),
                    });
                }

                let handle = WatchHandle::new(event.ident() as i32);
                let fflags = event.fflags();

                // A single kevent can carry several bits; the most severe
                // condition wins so one write stays one logical event.
                if fflags.intersects(
                    FilterFlag::NOTE_DELETE | FilterFlag::NOTE_RENAME | FilterFlag::NOTE_REVOKE,
                ) {
                    out.push(RawEvent::SelfGone { handle });
                } else if fflags.intersects(
                    FilterFlag::NOTE_WRITE | FilterFlag::NOTE_EXTEND | FilterFlag::NOTE_LINK,
                ) {
                    out.push(RawEvent::SelfChanged { handle });
                } else if fflags.contains(FilterFlag::NOTE_ATTRIB) {
                    out.push(RawEvent::AttrChanged { handle });
                }
            }

            if count < EVENT_BATCH {
                break;
            }
        }

        Ok(out)
    }
}
