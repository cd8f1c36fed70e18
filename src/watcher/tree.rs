//! Recursive discovery and maintenance of the mirror tree.
//!
//! `WatchTree` owns the node store and the root registry. The walker
//! descends a directory, registers what it finds through the event
//! source, and links nodes into the sparse parent/child relation.
//! Teardown always runs top-down and children-first.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use super::error::{WalkError, WatchError};
use super::handler::ChangeHandler;
use super::source::EventSource;
use super::store::{WatchHandle, WatchNode, WatchStore};

/// Dotted VCS bookkeeping directories are never worth watching,
/// whatever the caller's rules say.
const VCS_MARKERS: [&str; 3] = [".svn", ".git", ".hg"];

/// Per-root ignore rules. A path is ignored when a rule matches it as a
/// prefix (a designated subtree) or a suffix (a categorical name at any
/// depth), or when any of its components is a VCS marker.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    rules: Vec<String>,
}

impl IgnoreList {
    pub fn new(rules: Vec<String>) -> Self {
        Self {
            rules: rules.into_iter().filter(|r| !r.is_empty()).collect(),
        }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        for component in path.components() {
            if let Component::Normal(name) = component {
                if VCS_MARKERS
                    .iter()
                    .any(|marker| name == std::ffi::OsStr::new(marker))
                {
                    return true;
                }
            }
        }

        let text = path.to_string_lossy();
        for rule in &self.rules {
            if text.starts_with(rule.as_str()) || text.ends_with(rule.as_str()) {
                debug!("[walker] {} is under unwatchable {rule}", path.display());
                return true;
            }
        }
        false
    }
}

/// A user-requested subtree and its ignore context.
#[derive(Debug)]
pub struct Root {
    pub path: PathBuf,
    pub ignores: IgnoreList,
    pub handle: WatchHandle,
}

pub struct WatchTree {
    store: WatchStore,
    roots: Vec<Root>,
}

impl WatchTree {
    pub fn new(capacity: usize) -> Self {
        Self {
            store: WatchStore::new(capacity),
            roots: Vec::new(),
        }
    }

    pub fn node(&self, handle: WatchHandle) -> Option<&WatchNode> {
        self.store.get(handle)
    }

    pub fn watch_count(&self) -> usize {
        self.store.len()
    }

    pub fn roots(&self) -> &[Root] {
        &self.roots
    }

    /// Start watching a subtree. The root is realpath-normalized before
    /// registration; when normalization fails the path is used as given,
    /// and the walk decides whether it is usable at all.
    pub fn watch<S: EventSource>(
        &mut self,
        source: &mut S,
        root: &Path,
        ignores: IgnoreList,
        handler: &mut dyn ChangeHandler,
    ) -> Result<WatchHandle, WalkError> {
        let normalized = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let handle = self.walk(source, &normalized, None, &ignores, false, handler)?;
        if !self.roots.iter().any(|r| r.handle == handle) {
            self.roots.push(Root {
                path: normalized,
                ignores,
                handle,
            });
        }
        Ok(handle)
    }

    /// Externally initiated teardown of a watched subtree.
    /// Returns false when the handle is not live.
    pub fn unwatch<S: EventSource>(&mut self, source: &mut S, handle: WatchHandle) -> bool {
        if self.store.get(handle).is_none() {
            return false;
        }
        self.remove_watch(source, handle, true);
        true
    }

    /// Ignore context for event-driven rescans: the owning root's rules,
    /// found by following parent links.
    pub fn resolve_ignores(&self, handle: WatchHandle) -> IgnoreList {
        let mut current = handle;
        while let Some(node) = self.store.get(current) {
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        self.roots
            .iter()
            .find(|r| r.handle == current)
            .map(|r| r.ignores.clone())
            .unwrap_or_default()
    }

    /// Register `path` and everything under it.
    ///
    /// `announce` is set on event-driven rescans so newly discovered
    /// nodes are reported; the initial walk of a fresh root stays quiet.
    pub fn walk<S: EventSource>(
        &mut self,
        source: &mut S,
        path: &Path,
        parent: Option<WatchHandle>,
        ignores: &IgnoreList,
        announce: bool,
        handler: &mut dyn ChangeHandler,
    ) -> Result<WatchHandle, WalkError> {
        if ignores.is_ignored(path) {
            return Err(WalkError::Ignored);
        }

        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                return match e.kind() {
                    io::ErrorKind::PermissionDenied => Err(WalkError::Ignored),
                    // Flat root: a regular file gets a single leaf watch.
                    io::ErrorKind::NotADirectory => {
                        self.add_watch(source, path, parent, false, announce, handler)
                    }
                    _ => {
                        warn!("[walker] read_dir {}: {e}", path.display());
                        Err(WalkError::Ignored)
                    }
                };
            }
        };

        let id = self.add_watch(source, path, parent, true, announce, handler)?;

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("[walker] read_dir entry under {}: {e}", path.display());
                    continue;
                }
            };
            let subpath = path.join(entry.file_name());

            if is_directory(&entry, &subpath) {
                match self.walk(source, &subpath, Some(id), ignores, announce, handler) {
                    Ok(_) | Err(WalkError::Ignored) => {}
                    // A per-path refusal leaves the rest of the tree
                    // standing; the watch list is incomplete, not broken.
                    Err(WalkError::Transient { source: e }) => {
                        warn!("[walker] skipping {}: {e}", subpath.display());
                    }
                    Err(err @ WalkError::Fatal(_)) => {
                        self.remove_watch(source, id, true);
                        return Err(err);
                    }
                }
            } else if S::WATCHES_LEAF_FILES && !ignores.is_ignored(&subpath) {
                match self.add_watch(source, &subpath, Some(id), false, announce, handler) {
                    Ok(_) | Err(WalkError::Ignored) | Err(WalkError::Transient { .. }) => {}
                    Err(err @ WalkError::Fatal(_)) => {
                        self.remove_watch(source, id, true);
                        return Err(err);
                    }
                }
            }
        }

        Ok(id)
    }

    /// Register a single path and link it into the tree.
    ///
    /// Revisits are routine: both the initial walk and event-driven
    /// rescans reach known paths, so an existing node under the same
    /// parent (or among the roots) is returned instead of duplicated.
    fn add_watch<S: EventSource>(
        &mut self,
        source: &mut S,
        path: &Path,
        parent: Option<WatchHandle>,
        is_dir: bool,
        announce: bool,
        handler: &mut dyn ChangeHandler,
    ) -> Result<WatchHandle, WalkError> {
        match parent {
            Some(parent_handle) => {
                if let Some(parent_node) = self.store.get(parent_handle) {
                    if parent_node.name == path {
                        return Ok(parent_handle);
                    }
                    for kid_handle in parent_node.child_handles() {
                        if let Some(kid) = self.store.get(kid_handle) {
                            if kid.name == path {
                                return Ok(kid_handle);
                            }
                        }
                    }
                }
            }
            None => {
                for root in &self.roots {
                    if let Some(node) = self.store.get(root.handle) {
                        if node.name == path {
                            return Ok(root.handle);
                        }
                    }
                }
            }
        }

        let handle = source.register(path, is_dir)?;

        if let Some(existing) = self.store.get(handle) {
            if existing.name == path {
                return Ok(handle);
            }
            // The kernel reused an identifier the store still considers
            // live; the bookkeeping can no longer be trusted.
            return Err(WalkError::Fatal(WatchError::StoreCollision {
                handle,
                path: path.to_path_buf(),
                existing: existing.name.clone(),
            }));
        }

        self.store
            .insert(WatchNode::new(path.to_path_buf(), handle, is_dir, parent))?;
        if let Some(parent_handle) = parent {
            if let Some(parent_node) = self.store.get_mut(parent_handle) {
                parent_node.add_child(handle);
            }
        }

        if announce {
            handler.created(path);
        }
        Ok(handle)
    }

    /// Tear down a node and its subtree.
    ///
    /// Children go first: on the vnode model closing a directory leaves
    /// child registrations live, and a leaked child would sit stale in
    /// the store. `update_parent` is false during recursive teardown so
    /// the doomed parent's slots are not scanned once per child.
    pub fn remove_watch<S: EventSource>(
        &mut self,
        source: &mut S,
        handle: WatchHandle,
        update_parent: bool,
    ) {
        let Some(node) = self.store.get(handle) else {
            return;
        };
        debug!("[walker] unwatching {}: {handle}", node.name.display());
        let parent = node.parent;
        let kids: Vec<WatchHandle> = node.child_handles().collect();

        for kid in kids {
            self.remove_watch(source, kid, false);
        }

        source.unregister(handle);

        if update_parent {
            if let Some(parent_handle) = parent {
                if let Some(parent_node) = self.store.get_mut(parent_handle) {
                    parent_node.clear_child(handle);
                }
            }
        }

        self.store.remove(handle);
        self.roots.retain(|r| r.handle != handle);
    }
}

fn is_directory(entry: &fs::DirEntry, path: &Path) -> bool {
    match entry.file_type() {
        Ok(file_type) => file_type.is_dir(),
        // Filesystem did not report a type; ask stat instead.
        Err(_) => fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{self, ErrorKind};
    use std::os::unix::io::{AsRawFd, RawFd};

    use tempfile::TempDir;

    use crate::watcher::error::RegisterError;
    use crate::watcher::event::{ChangeMask, RawEvent};

    /// How a [`ScriptedSource`] misbehaves, counted in registration calls.
    enum Script {
        Honest,
        ChannelFailAt(usize),
        ReuseHandleAt(usize),
    }

    /// Kernel-free event source: hands out sequential handles and fails
    /// exactly where the script says, so walker unwind paths can be
    /// driven deterministically.
    struct ScriptedSource {
        script: Script,
        calls: usize,
        next_handle: i32,
        unregistered: Vec<WatchHandle>,
    }

    impl ScriptedSource {
        fn new(script: Script) -> Self {
            Self {
                script,
                calls: 0,
                next_handle: 1,
                unregistered: Vec::new(),
            }
        }
    }

    impl AsRawFd for ScriptedSource {
        fn as_raw_fd(&self) -> RawFd {
            -1
        }
    }

    impl EventSource for ScriptedSource {
        const WATCHES_LEAF_FILES: bool = false;

        fn init(_max_override: Option<usize>) -> Result<Self, WatchError> {
            Ok(Self::new(Script::Honest))
        }

        fn max_watches(&self) -> usize {
            64
        }

        fn limit_reached(&self) -> bool {
            false
        }

        fn register(&mut self, _path: &Path, _is_dir: bool) -> Result<WatchHandle, RegisterError> {
            self.calls += 1;
            match self.script {
                Script::ChannelFailAt(n) if self.calls == n => {
                    return Err(RegisterError::Channel {
                        source: io::Error::new(ErrorKind::BrokenPipe, "event channel torn"),
                    });
                }
                // Collides with the first registration still in the store.
                Script::ReuseHandleAt(n) if self.calls == n => {
                    return Ok(WatchHandle::new(1));
                }
                _ => {}
            }
            let handle = WatchHandle::new(self.next_handle);
            self.next_handle += 1;
            Ok(handle)
        }

        fn unregister(&mut self, handle: WatchHandle) {
            self.unregistered.push(handle);
        }

        fn poll(&mut self) -> Result<Vec<RawEvent>, WatchError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Announced(Vec<PathBuf>);

    impl ChangeHandler for Announced {
        fn created(&mut self, path: &Path) {
            self.0.push(path.to_path_buf());
        }

        fn changed(&mut self, _path: &Path, _mask: ChangeMask) {}

        fn message(&mut self, _text: &str) {}
    }

    #[test]
    fn channel_failure_mid_walk_tears_down_the_partial_subtree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir(root.join("one")).unwrap();
        fs::create_dir(root.join("two")).unwrap();

        // Registration 1 is the root, 2 the first child reached, 3 the
        // second child, which takes the channel down.
        let mut source = ScriptedSource::new(Script::ChannelFailAt(3));
        let mut tree = WatchTree::new(64);
        let mut handler = Announced::default();

        let result = tree.watch(&mut source, &root, IgnoreList::default(), &mut handler);
        assert!(matches!(
            result,
            Err(WalkError::Fatal(WatchError::Channel { .. }))
        ));
        // The root and the child that did register were both unwound,
        // children before parent.
        assert_eq!(tree.watch_count(), 0);
        assert_eq!(
            source.unregistered,
            vec![WatchHandle::new(2), WatchHandle::new(1)]
        );
        assert!(tree.roots().is_empty());
    }

    #[test]
    fn handle_collision_is_fatal_and_unwinds() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir(root.join("sub")).unwrap();

        let mut source = ScriptedSource::new(Script::ReuseHandleAt(2));
        let mut tree = WatchTree::new(64);
        let mut handler = Announced::default();

        let result = tree.watch(&mut source, &root, IgnoreList::default(), &mut handler);
        assert!(matches!(
            result,
            Err(WalkError::Fatal(WatchError::StoreCollision { .. }))
        ));
        assert_eq!(tree.watch_count(), 0);
        assert_eq!(source.unregistered, vec![WatchHandle::new(1)]);
    }

    #[test]
    fn revisit_returns_the_existing_nodes_without_announcing() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir(root.join("sub")).unwrap();

        let mut source = ScriptedSource::new(Script::Honest);
        let mut tree = WatchTree::new(64);
        let mut handler = Announced::default();

        let handle = tree
            .watch(&mut source, &root, IgnoreList::default(), &mut handler)
            .unwrap();
        assert_eq!(tree.watch_count(), 2);

        // An announced rescan of a tree with nothing new registers
        // nothing and stays quiet.
        let ignores = tree.resolve_ignores(handle);
        let revisit = tree
            .walk(&mut source, &root, None, &ignores, true, &mut handler)
            .unwrap();
        assert_eq!(revisit, handle);
        assert_eq!(tree.watch_count(), 2);
        assert!(handler.0.is_empty());
    }

    #[test]
    fn ignores_by_prefix() {
        let ignores = IgnoreList::new(vec!["/tmp/a/skip".to_string()]);
        assert!(ignores.is_ignored(Path::new("/tmp/a/skip")));
        assert!(ignores.is_ignored(Path::new("/tmp/a/skip/deeper")));
        assert!(!ignores.is_ignored(Path::new("/tmp/a/keep")));
    }

    #[test]
    fn ignores_by_suffix_at_any_depth() {
        let ignores = IgnoreList::new(vec!["node_modules".to_string()]);
        assert!(ignores.is_ignored(Path::new("/x/node_modules")));
        assert!(ignores.is_ignored(Path::new("/x/y/z/node_modules")));
        assert!(!ignores.is_ignored(Path::new("/x/node_modules_backup")));
    }

    #[test]
    fn vcs_markers_match_components_only() {
        let ignores = IgnoreList::default();
        assert!(ignores.is_ignored(Path::new("/repo/.git")));
        assert!(ignores.is_ignored(Path::new("/repo/.git/objects")));
        assert!(ignores.is_ignored(Path::new("/repo/.svn")));
        assert!(ignores.is_ignored(Path::new("/repo/sub/.hg/store")));
        // A component merely containing a marker is not a marker.
        assert!(!ignores.is_ignored(Path::new("/repo/mygit")));
        assert!(!ignores.is_ignored(Path::new("/repo/gadget/src")));
    }

    #[test]
    fn empty_rules_never_match() {
        let ignores = IgnoreList::new(vec![String::new()]);
        assert!(!ignores.is_ignored(Path::new("/anything")));
    }
}
