//! Watch-node records and the handle-keyed store that owns them.
//!
//! Every live kernel registration has exactly one [`WatchNode`]. Nodes
//! reference each other by [`WatchHandle`] rather than by pointer, so the
//! parent/child relation forms no ownership cycle: the store owns every
//! node, and the tree walks the relation through lookups.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use super::error::WatchError;

/// Kernel-assigned identifier for one registration: an inotify watch
/// descriptor on Linux, the object's open file descriptor on the vnode
/// backends. Unique among live registrations on either model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(i32);

impl WatchHandle {
    pub fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One live registration in the mirror tree.
#[derive(Debug)]
pub struct WatchNode {
    /// Absolute, realpath-normalized path of the watched object.
    pub name: PathBuf,
    pub handle: WatchHandle,
    /// Whether the object was a directory at registration time.
    pub is_dir: bool,
    /// Enclosing directory's node, or none for a user-supplied root.
    pub parent: Option<WatchHandle>,
    /// Known subordinate nodes. Sparse: slots are cleared, not compacted,
    /// so indices stay stable while an outer loop iterates the array.
    pub children: Vec<Option<WatchHandle>>,
}

impl WatchNode {
    pub fn new(
        name: PathBuf,
        handle: WatchHandle,
        is_dir: bool,
        parent: Option<WatchHandle>,
    ) -> Self {
        Self {
            name,
            handle,
            is_dir,
            parent,
            children: Vec::new(),
        }
    }

    /// Link a child, reusing the first cleared slot if one exists.
    pub fn add_child(&mut self, child: WatchHandle) {
        for slot in self.children.iter_mut() {
            if slot.is_none() {
                *slot = Some(child);
                return;
            }
        }
        self.children.push(Some(child));
    }

    /// Clear the slot holding `child`, leaving a tombstone.
    pub fn clear_child(&mut self, child: WatchHandle) {
        for slot in self.children.iter_mut() {
            if *slot == Some(child) {
                *slot = None;
                return;
            }
        }
    }

    /// Live children, skipping tombstones.
    pub fn child_handles(&self) -> impl Iterator<Item = WatchHandle> + '_ {
        self.children.iter().filter_map(|slot| *slot)
    }
}

/// Capacity-bounded mapping from handle to node.
///
/// The bound mirrors the kernel's registration quota; the map itself is
/// not preallocated. The store owns each node: removal drops it.
#[derive(Debug)]
pub struct WatchStore {
    nodes: HashMap<WatchHandle, WatchNode>,
    capacity: usize,
}

impl WatchStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            capacity,
        }
    }

    pub fn get(&self, handle: WatchHandle) -> Option<&WatchNode> {
        self.nodes.get(&handle)
    }

    pub fn get_mut(&mut self, handle: WatchHandle) -> Option<&mut WatchNode> {
        self.nodes.get_mut(&handle)
    }

    pub fn insert(&mut self, node: WatchNode) -> Result<(), WatchError> {
        if self.nodes.len() >= self.capacity {
            return Err(WatchError::StoreFull {
                capacity: self.capacity,
            });
        }
        self.nodes.insert(node.handle, node);
        Ok(())
    }

    pub fn remove(&mut self, handle: WatchHandle) -> Option<WatchNode> {
        self.nodes.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn node(h: i32, name: &str, parent: Option<i32>) -> WatchNode {
        WatchNode::new(
            Path::new(name).to_path_buf(),
            WatchHandle::new(h),
            true,
            parent.map(WatchHandle::new),
        )
    }

    #[test]
    fn store_insert_and_lookup() {
        let mut store = WatchStore::new(8);
        store.insert(node(1, "/a", None)).unwrap();
        store.insert(node(2, "/a/b", Some(1))).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(WatchHandle::new(2)).unwrap().name, Path::new("/a/b"));
        assert!(store.get(WatchHandle::new(3)).is_none());

        store.remove(WatchHandle::new(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_rejects_when_full() {
        let mut store = WatchStore::new(1);
        store.insert(node(1, "/a", None)).unwrap();

        let err = store.insert(node(2, "/b", None)).unwrap_err();
        assert!(matches!(err, WatchError::StoreFull { capacity: 1 }));
    }

    #[test]
    fn sparse_children_keep_indices_stable() {
        let mut n = node(1, "/a", None);
        n.add_child(WatchHandle::new(2));
        n.add_child(WatchHandle::new(3));
        n.add_child(WatchHandle::new(4));

        n.clear_child(WatchHandle::new(3));
        assert_eq!(n.children[0], Some(WatchHandle::new(2)));
        assert_eq!(n.children[1], None);
        assert_eq!(n.children[2], Some(WatchHandle::new(4)));

        // A later add reuses the tombstone instead of shifting slots.
        n.add_child(WatchHandle::new(5));
        assert_eq!(n.children[1], Some(WatchHandle::new(5)));
        assert_eq!(n.children.len(), 3);
    }

    #[test]
    fn child_handles_skip_tombstones() {
        let mut n = node(1, "/a", None);
        n.add_child(WatchHandle::new(2));
        n.add_child(WatchHandle::new(3));
        n.clear_child(WatchHandle::new(2));

        let live: Vec<_> = n.child_handles().collect();
        assert_eq!(live, vec![WatchHandle::new(3)]);
    }
}
