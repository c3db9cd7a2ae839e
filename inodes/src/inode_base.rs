//! [InodeBase]: the runtime inode object shared by every loaded filesystem
//! object, and [InodeMap], the mount's index of them (§4.7).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use edenfs_object_model::{InodeNumber, PathComponent};
use edenfs_storage::{InodeMetadata, InodeTable, Timestamp};
use parking_lot::RwLock;
use tracing::warn;

use crate::rename_lock::RenameLockGuard;

/// `{parent, name, unlinked}`, guarded by its own reader-writer lock.
/// Read-holders walk paths; write-holders mutate under the rename lock.
struct Location {
    parent: Option<Arc<InodeBase>>,
    name: Option<PathComponent>,
    unlinked: bool,
}

/// The ordered child table of a directory inode, keyed by name.
///
/// Loaded children are reachable from [InodeMap] by [InodeNumber]; a parent
/// does not hold a strong reference back down to its children, only this
/// lightweight name index.
#[derive(Default)]
pub struct Contents {
    children: HashMap<PathComponent, Arc<InodeBase>>,
}

impl Contents {
    pub fn get(&self, name: &PathComponent) -> Option<Arc<InodeBase>> {
        self.children.get(name).cloned()
    }

    pub fn insert(&mut self, name: PathComponent, child: Arc<InodeBase>) {
        self.children.insert(name, child);
    }

    pub fn remove(&mut self, name: &PathComponent) -> Option<Arc<InodeBase>> {
        self.children.remove(name)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// One path segment collected by [InodeBase::path], rendered either as a
/// clean relative path or, if an ancestor was found unlinked during the
/// walk, as a `<deleted:...>`-marked one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodePath {
    Live(Vec<PathComponent>),
    Deleted(Vec<PathComponent>),
}

impl std::fmt::Display for InodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn join(f: &mut std::fmt::Formatter<'_>, parts: &[PathComponent]) -> std::fmt::Result {
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, "/")?;
                }
                write!(f, "{part}")?;
            }
            Ok(())
        }
        match self {
            InodePath::Live(parts) => join(f, parts),
            InodePath::Deleted(parts) => {
                write!(f, "<deleted:")?;
                join(f, parts)?;
                write!(f, ">")
            }
        }
    }
}

/// Whether [InodeBase::path] fails outright or returns a marked path when it
/// discovers an unlinked ancestor mid-walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    Strict,
    Logging,
}

/// The outcome of [InodeBase::get_parent_info]: whether the caller needs to
/// retry with a fresh view, found a stable parent, or hit the mount root /
/// an unlinked inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentInfoError {
    Unlinked,
    IsRoot,
}

/// Runtime inode object: `{InodeNumber, initial_mode, fs_ref_count,
/// location}`. The root has no parent and no name.
pub struct InodeBase {
    number: InodeNumber,
    initial_mode: u32,
    fs_ref_count: AtomicI64,
    location: RwLock<Location>,
    /// `Some` for directories (which have a child table), `None` for leaves.
    contents: Option<RwLock<Contents>>,
}

const MAX_PARENT_INFO_RETRIES: u32 = 1000;

impl InodeBase {
    /// Creates the mount's root inode. Its `fs_ref_count` starts at 1,
    /// representing the kernel's implicit reference to the mountpoint.
    pub fn new_root(mode: u32) -> Arc<Self> {
        Arc::new(Self {
            number: InodeNumber::ROOT,
            initial_mode: mode,
            fs_ref_count: AtomicI64::new(1),
            location: RwLock::new(Location {
                parent: None,
                name: None,
                unlinked: false,
            }),
            contents: Some(RwLock::new(Contents::default())),
        })
    }

    /// Creates a non-root inode parented under `parent`, as happens on
    /// first lookup of a directory entry. `is_directory` decides whether
    /// this inode gets its own child table.
    pub fn new_child(
        number: InodeNumber,
        mode: u32,
        parent: Arc<InodeBase>,
        name: PathComponent,
        is_directory: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            number,
            initial_mode: mode,
            fs_ref_count: AtomicI64::new(0),
            location: RwLock::new(Location {
                parent: Some(parent),
                name: Some(name),
                unlinked: false,
            }),
            contents: is_directory.then(Contents::default).map(RwLock::new),
        })
    }

    pub fn number(&self) -> InodeNumber {
        self.number
    }

    pub fn initial_mode(&self) -> u32 {
        self.initial_mode
    }

    pub fn is_root(&self) -> bool {
        self.number.is_root()
    }

    pub fn is_directory(&self) -> bool {
        self.contents.is_some()
    }

    pub fn contents(&self) -> Option<&RwLock<Contents>> {
        self.contents.as_ref()
    }

    pub fn is_unlinked(&self) -> bool {
        self.location.read().unlinked
    }

    pub fn fs_ref_count(&self) -> i64 {
        self.fs_ref_count.load(Ordering::SeqCst)
    }

    pub fn increment_fs_ref_count(&self) -> i64 {
        self.fs_ref_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrements the FUSE-held reference count, returning the new value.
    /// The caller (the kernel-request layer, out of this core's scope) is
    /// responsible for acting on a resulting zero by consulting
    /// [InodeBase::mark_unlinked]'s unload decision if this inode is also
    /// unlinked.
    pub fn decrement_fs_ref_count(&self) -> i64 {
        let prev = self.fs_ref_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "fs_ref_count underflow");
        prev - 1
    }

    /// Walks from this inode upward to the root, collecting names under
    /// each ancestor's location read-lock. Stops at the root by
    /// inode-number test, so the root's own location lock is never taken.
    pub fn path(&self, mode: PathMode) -> Option<InodePath> {
        let mut parts = Vec::new();
        let mut saw_unlinked = false;

        if self.is_root() {
            return Some(InodePath::Live(parts));
        }

        let loc = self.location.read();
        if loc.unlinked {
            saw_unlinked = true;
        }
        parts.push(loc.name.clone().expect("non-root inode always has a name"));
        let mut current = loc.parent.clone().expect("non-root inode always has a parent");
        drop(loc);

        while !current.is_root() {
            let loc = current.location.read();
            if loc.unlinked {
                saw_unlinked = true;
            }
            parts.push(loc.name.clone().expect("non-root inode always has a name"));
            let next = loc.parent.clone().expect("non-root inode always has a parent");
            drop(loc);
            current = next;
        }

        parts.reverse();

        if saw_unlinked {
            match mode {
                PathMode::Strict => None,
                PathMode::Logging => Some(InodePath::Deleted(parts)),
            }
        } else {
            Some(InodePath::Live(parts))
        }
    }

    /// Marks this inode unlinked. If the caller's reference and the inode
    /// map's own bookkeeping reference are the only strong pointers left,
    /// and the kernel holds no reference either, the inode is immediately
    /// removed from `inode_map` and ownership handed back to the caller for
    /// destruction outside the map's lock.
    ///
    /// The caller must hold the mount-wide rename lock, guaranteeing
    /// `parent` stays valid for the duration of this call.
    pub fn mark_unlinked(
        self: &Arc<Self>,
        parent: &Arc<InodeBase>,
        name: &PathComponent,
        _rename_lock: &RenameLockGuard<'_>,
        inode_map: &crate::inode_map::InodeMap,
    ) -> Option<Arc<InodeBase>> {
        {
            let mut loc = self.location.write();
            loc.unlinked = true;
        }

        // The inode map retains one strong reference, and this call holds
        // the other (`self`, borrowed from the caller's own `Arc`); an
        // inode with no other observers has strong_count == 2 here.
        let no_external_strong_refs = Arc::strong_count(self) <= 2;
        let no_fs_refs = self.fs_ref_count() == 0;

        if no_external_strong_refs && no_fs_refs {
            inode_map.unload(self, parent, name)
        } else {
            None
        }
    }

    /// Mutates `location.parent`/`location.name` in place. Requires the
    /// mount-wide rename lock and that this inode isn't already unlinked.
    pub fn update_location(
        &self,
        new_parent: Arc<InodeBase>,
        new_name: PathComponent,
        _rename_lock: &RenameLockGuard<'_>,
    ) {
        let mut loc = self.location.write();
        assert!(!loc.unlinked, "update_location called on an unlinked inode");
        loc.parent = Some(new_parent);
        loc.name = Some(new_name);
    }

    /// Runs `f` against a consistent `(parent, parent's write-locked
    /// contents)` pair: reads this inode's current parent, acquires the
    /// parent's contents write lock, then re-checks that the parent hasn't
    /// changed underneath us (a concurrent rename). Retries (bounded) on
    /// mismatch rather than taking any mount-wide lock.
    pub fn get_parent_info<F, T>(&self, f: F) -> Result<T, ParentInfoError>
    where
        F: FnOnce(&Arc<InodeBase>, &mut Contents) -> T,
    {
        let mut tries = 0u32;
        loop {
            tries += 1;
            if tries > MAX_PARENT_INFO_RETRIES {
                panic!("get_parent_info did not converge after {MAX_PARENT_INFO_RETRIES} tries");
            }

            let parent = {
                let loc = self.location.read();
                if loc.unlinked {
                    return Err(ParentInfoError::Unlinked);
                }
                match &loc.parent {
                    Some(p) => p.clone(),
                    None => return Err(ParentInfoError::IsRoot),
                }
            };

            let parent_contents_lock = parent
                .contents
                .as_ref()
                .expect("a location's parent is always a directory");
            let mut contents = parent_contents_lock.write();

            let still_same_parent = {
                let loc = self.location.read();
                !loc.unlinked && loc.parent.as_ref().is_some_and(|p| Arc::ptr_eq(p, &parent))
            };

            if still_same_parent {
                if tries > 1 {
                    warn!(tries, "get_parent_info retried due to a concurrent rename");
                }
                return Ok(f(&parent, &mut contents));
            }
            // Parent changed underneath us (a concurrent rename); drop the
            // lock we took on the stale parent and retry.
        }
    }

    /// Updates this inode's on-disk atime, leaving mtime/ctime untouched.
    pub fn update_atime(&self, table: &InodeTable<InodeMetadata>, now: Timestamp) -> edenfs_storage::Result<()> {
        table.modify_or_throw(self.number, |m| m.atime = now)?;
        Ok(())
    }

    /// Updates this inode's on-disk mtime and ctime together, as happens on
    /// any write to the inode's contents.
    pub fn update_mtime_and_ctime(
        &self,
        table: &InodeTable<InodeMetadata>,
        now: Timestamp,
    ) -> edenfs_storage::Result<()> {
        table.modify_or_throw(self.number, |m| {
            m.mtime = now;
            m.ctime = now;
        })?;
        Ok(())
    }
}
