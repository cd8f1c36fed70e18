//! The engine: one event source, one mirror tree, one change handler.
//!
//! Owns everything the dispatcher touches and exposes the operations
//! the controlling process drives: `watch`, `unwatch`, and `pump` for
//! draining one kernel batch. Single-threaded by construction; no
//! operation yields internally.

use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use tracing::{debug, warn};

use super::error::{WalkError, WatchError};
use super::event::{ChangeMask, RawEvent};
use super::handler::ChangeHandler;
use super::source::EventSource;
use super::store::WatchHandle;
use super::tree::{IgnoreList, WatchTree};

pub struct WatchEngine<S: EventSource> {
    source: S,
    tree: WatchTree,
    handler: Box<dyn ChangeHandler>,
    /// Configured rules appended to every root's ignore list.
    global_rules: Vec<String>,
    limit_notified: bool,
}

impl<S: EventSource> WatchEngine<S> {
    /// Create a builder for configuring the engine.
    pub fn builder() -> WatchEngineBuilder {
        WatchEngineBuilder::new()
    }

    /// Start watching a root. Returns the root's handle, which is the
    /// token `unwatch` takes later.
    pub fn watch(&mut self, root: &Path, mut rules: Vec<String>) -> Result<WatchHandle, WalkError> {
        rules.extend(self.global_rules.iter().cloned());
        let ignores = IgnoreList::new(rules);
        let result = self
            .tree
            .watch(&mut self.source, root, ignores, self.handler.as_mut());
        self.announce_limit();
        result
    }

    /// Stop watching a previously returned handle. Returns false when
    /// the handle is no longer live.
    pub fn unwatch(&mut self, handle: WatchHandle) -> bool {
        self.tree.unwatch(&mut self.source, handle)
    }

    /// Live registrations currently held.
    pub fn watch_count(&self) -> usize {
        self.tree.watch_count()
    }

    /// Normalized path behind a live handle.
    pub fn path_of(&self, handle: WatchHandle) -> Option<&Path> {
        self.tree.node(handle).map(|node| node.name.as_path())
    }

    /// Whether the kernel has refused a registration for quota reasons.
    pub fn limit_reached(&self) -> bool {
        self.source.limit_reached()
    }

    /// The kernel channel descriptor, for multiplexing against the
    /// command stream.
    pub fn raw_fd(&self) -> RawFd {
        self.source.as_raw_fd()
    }

    /// Drain one batch from the kernel and dispatch it in arrival order.
    /// Call when the channel descriptor polls readable; an empty batch
    /// is fine.
    pub fn pump(&mut self) -> Result<(), WatchError> {
        let batch = self.source.poll()?;
        for event in batch {
            self.dispatch(event)?;
        }
        self.announce_limit();
        Ok(())
    }

    fn dispatch(&mut self, event: RawEvent) -> Result<(), WatchError> {
        debug!("[engine] event: {event:?}");
        match event {
            RawEvent::Overflow => {
                warn!("[engine] kernel event queue overflowed");
                self.handler
                    .message("kernel event queue overflowed; changes may have been lost");
            }

            RawEvent::SelfChanged { handle } => {
                // An unknown handle means the watch was already torn
                // down; the event raced the removal and is stale.
                let Some(node) = self.tree.node(handle) else {
                    return Ok(());
                };
                let path = node.name.clone();
                let parent = node.parent;
                let is_dir = node.is_dir;
                if is_dir {
                    self.rescan(handle, &path, parent)?;
                }
                self.handler.changed(&path, ChangeMask::CONTENT);
            }

            RawEvent::ChildCreated {
                parent,
                name,
                is_dir,
            } => {
                let Some(node) = self.tree.node(parent) else {
                    return Ok(());
                };
                let child_path = node.name.join(&name);
                if is_dir {
                    // The walk announces every node it registers, so the
                    // record for this directory (and any children racing
                    // in under it) is emitted exactly once.
                    let ignores = self.tree.resolve_ignores(parent);
                    match self.tree.walk(
                        &mut self.source,
                        &child_path,
                        Some(parent),
                        &ignores,
                        true,
                        self.handler.as_mut(),
                    ) {
                        Ok(_) | Err(WalkError::Ignored) => {}
                        Err(WalkError::Transient { source }) => {
                            warn!(
                                "[engine] cannot watch new {}: {source}",
                                child_path.display()
                            );
                        }
                        Err(WalkError::Fatal(e)) => return Err(e),
                    }
                } else {
                    // Leaf files carry no registration of their own on
                    // this model; announce through the callback.
                    self.handler.changed(&child_path, ChangeMask::CREATED);
                }
            }

            RawEvent::ChildRemoved { parent, name } => {
                let Some(node) = self.tree.node(parent) else {
                    return Ok(());
                };
                let child_path = node.name.join(&name);
                let victim = node.child_handles().find(|h| {
                    self.tree
                        .node(*h)
                        .map(|kid| kid.name == child_path)
                        .unwrap_or(false)
                });
                if let Some(kid) = victim {
                    self.tree.remove_watch(&mut self.source, kid, true);
                }
                self.handler.changed(&child_path, ChangeMask::REMOVED);
            }

            RawEvent::ChildChanged { parent, name, mask } => {
                let Some(node) = self.tree.node(parent) else {
                    return Ok(());
                };
                let child_path = node.name.join(&name);
                self.handler.changed(&child_path, mask);
            }

            RawEvent::SelfGone { handle } => {
                let Some(node) = self.tree.node(handle) else {
                    return Ok(());
                };
                let path = node.name.clone();
                self.tree.remove_watch(&mut self.source, handle, true);
                self.handler.changed(&path, ChangeMask::GONE);
            }

            RawEvent::AttrChanged { handle } => {
                let Some(node) = self.tree.node(handle) else {
                    return Ok(());
                };
                let path = node.name.clone();
                self.handler.changed(&path, ChangeMask::METADATA);
            }
        }
        Ok(())
    }

    /// Rescan a directory whose contents changed without a named child:
    /// new entries get registered and announced, known ones are deduped.
    fn rescan(
        &mut self,
        handle: WatchHandle,
        path: &Path,
        parent: Option<WatchHandle>,
    ) -> Result<(), WatchError> {
        let ignores = self.tree.resolve_ignores(handle);
        match self.tree.walk(
            &mut self.source,
            path,
            parent,
            &ignores,
            true,
            self.handler.as_mut(),
        ) {
            Ok(_) | Err(WalkError::Ignored) => Ok(()),
            Err(WalkError::Transient { source }) => {
                // The watch list under this directory is now incomplete;
                // the quota message tells the parent to rescan for itself.
                warn!("[engine] rescan of {} failed: {source}", path.display());
                Ok(())
            }
            Err(WalkError::Fatal(e)) => Err(e),
        }
    }

    fn announce_limit(&mut self) {
        if self.source.limit_reached() && !self.limit_notified {
            self.limit_notified = true;
            warn!("[engine] watch limit reached, watch list is incomplete");
            self.handler
                .message("watch limit reached; some paths are not watched");
        }
    }
}

/// Builder for constructing a [`WatchEngine`].
pub struct WatchEngineBuilder {
    handler: Option<Box<dyn ChangeHandler>>,
    max_watches: Option<usize>,
    global_rules: Vec<String>,
}

impl WatchEngineBuilder {
    pub fn new() -> Self {
        Self {
            handler: None,
            max_watches: None,
            global_rules: Vec::new(),
        }
    }

    /// Set the change handler. Required.
    pub fn handler(mut self, handler: impl ChangeHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Cap live registrations below the platform quota. Zero means use
    /// the platform's own limit.
    pub fn max_watches(mut self, limit: usize) -> Self {
        self.max_watches = Some(limit);
        self
    }

    /// Rules appended to every root's ignore list.
    pub fn ignore_rules(mut self, rules: Vec<String>) -> Self {
        self.global_rules = rules;
        self
    }

    /// Open the kernel channel and build the engine.
    pub fn build<S: EventSource>(self) -> Result<WatchEngine<S>, WatchError> {
        let handler = self.handler.ok_or_else(|| WatchError::InitFailed {
            reason: "change handler is required".to_string(),
        })?;

        let source = S::init(self.max_watches.filter(|n| *n > 0))?;
        let tree = WatchTree::new(source.max_watches());

        Ok(WatchEngine {
            source,
            tree,
            handler,
            global_rules: self.global_rules,
            limit_notified: false,
        })
    }
}

impl Default for WatchEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
