//! The in-memory inode graph: [InodeBase] nodes linked by [Location],
//! indexed by [InodeMap], mutated only under the mount-wide [RenameLock]
//! (§4.7, §5).

mod inode_base;
mod inode_map;
mod rename_lock;

pub use inode_base::{Contents, InodeBase, InodePath, ParentInfoError, PathMode};
pub use inode_map::InodeMap;
pub use rename_lock::{RenameLock, RenameLockGuard};
