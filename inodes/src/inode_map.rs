//! [InodeMap]: the mount's index from [InodeNumber] to the loaded
//! [InodeBase] it names, and the allocator for fresh inode numbers (§4.7).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use edenfs_object_model::{InodeNumber, PathComponent};
use parking_lot::RwLock;

use crate::inode_base::InodeBase;

/// Tracks every currently-loaded inode by number and hands out numbers for
/// newly-loaded ones. Unlike the on-disk [edenfs_storage::InodeTable], this
/// index holds only inodes with a live in-memory [InodeBase] — an entry
/// disappears as soon as [InodeMap::unload] (or ordinary `Arc` drop, for
/// inodes that were never unlinked) removes the last loaded reference.
pub struct InodeMap {
    loaded: RwLock<HashMap<InodeNumber, Arc<InodeBase>>>,
    next_number: AtomicU64,
}

impl InodeMap {
    /// Creates a map already containing `root`, and sets the allocator to
    /// hand out numbers starting immediately after it.
    pub fn new(root: Arc<InodeBase>) -> Self {
        let mut loaded = HashMap::new();
        let next = root.number().get() + 1;
        loaded.insert(root.number(), root);
        Self {
            loaded: RwLock::new(loaded),
            next_number: AtomicU64::new(next),
        }
    }

    pub fn root(&self) -> Arc<InodeBase> {
        self.loaded
            .read()
            .get(&InodeNumber::ROOT)
            .cloned()
            .expect("root is always loaded")
    }

    /// Allocates a fresh, never-before-used inode number.
    pub fn allocate_number(&self) -> InodeNumber {
        let n = self.next_number.fetch_add(1, Ordering::SeqCst);
        InodeNumber::new(n).expect("allocator never produces zero")
    }

    pub fn lookup(&self, number: InodeNumber) -> Option<Arc<InodeBase>> {
        self.loaded.read().get(&number).cloned()
    }

    /// Registers a freshly-constructed inode (already given a number via
    /// [InodeMap::allocate_number]) as loaded.
    pub fn insert_loaded(&self, inode: Arc<InodeBase>) {
        self.loaded.write().insert(inode.number(), inode);
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.read().len()
    }

    /// Removes `inode` from both this map and its parent's child table,
    /// called from [InodeBase::mark_unlinked] once it has determined no
    /// other strong or filesystem references remain. Returns the removed
    /// inode so the caller can drop it outside any lock.
    pub(crate) fn unload(
        &self,
        inode: &Arc<InodeBase>,
        parent: &Arc<InodeBase>,
        name: &PathComponent,
    ) -> Option<Arc<InodeBase>> {
        if let Some(contents_lock) = parent.contents() {
            contents_lock.write().remove(name);
        }
        self.loaded.write().remove(&inode.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> PathComponent {
        PathComponent::try_from(s).unwrap()
    }

    #[test]
    fn root_is_preloaded_and_numbers_allocate_after_it() {
        let root = InodeBase::new_root(0o755);
        let map = InodeMap::new(root.clone());
        assert_eq!(map.loaded_count(), 1);
        assert!(Arc::ptr_eq(&map.root(), &root));

        let a = map.allocate_number();
        let b = map.allocate_number();
        assert_ne!(a, b);
        assert!(a.get() > InodeNumber::ROOT.get());
    }

    #[test]
    fn insert_and_lookup_round_trip() {
        let root = InodeBase::new_root(0o755);
        let map = InodeMap::new(root.clone());
        let number = map.allocate_number();
        let child = InodeBase::new_child(number, 0o644, root.clone(), name("a.txt"), false);
        map.insert_loaded(child.clone());

        assert!(map.lookup(number).is_some());
        assert_eq!(map.loaded_count(), 2);
    }

    #[test]
    fn unload_removes_from_map_and_parent_contents() {
        let root = InodeBase::new_root(0o755);
        let map = InodeMap::new(root.clone());
        let number = map.allocate_number();
        let child = InodeBase::new_child(number, 0o644, root.clone(), name("a.txt"), false);
        root.contents().unwrap().write().insert(name("a.txt"), child.clone());
        map.insert_loaded(child.clone());

        let removed = map.unload(&child, &root, &name("a.txt"));
        assert!(removed.is_some());
        assert!(map.lookup(number).is_none());
        assert!(root.contents().unwrap().read().get(&name("a.txt")).is_none());
    }
}
