//! A persistent, thread-safe table mapping [InodeNumber] to a fixed-size
//! metadata record `R`, backed by a [MappedDiskVector].

use std::collections::HashMap;
use std::path::Path;

use edenfs_object_model::InodeNumber;
use parking_lot::RwLock;

use crate::errors::{Result, StorageError};
use crate::mapped_disk_vector::{DiskRecord, MappedDiskVector, MigrationStep};

/// On-disk record: an [InodeNumber] packed with its metadata.
///
/// `Entry<R>`'s [DiskRecord::VERSION] is `R::VERSION` — the table's header
/// records the version of the metadata record, not of this wrapper, since
/// the wrapper's shape (an inode number plus the record) never changes.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Entry<R> {
    pub ino: u64,
    pub record: R,
}

impl<R: DiskRecord> DiskRecord for Entry<R> {
    const VERSION: u32 = R::VERSION;
}

/// One step of an in-place migration for an [InodeTable]'s record type,
/// expressed in terms of the underlying metadata record rather than the
/// packed [Entry]; the inode number survives a migration unchanged.
pub struct TableMigrationStep<R> {
    pub from_version: u32,
    pub from_size: usize,
    pub convert: Box<dyn Fn(&[u8]) -> R + Send + Sync>,
}

struct Storage<R: DiskRecord> {
    vector: MappedDiskVector<Entry<R>>,
    index: HashMap<InodeNumber, usize>,
}

/// Fixed-width per-inode metadata, persisted densely in a memory-mapped
/// file and indexed in memory by [InodeNumber].
///
/// The index (`InodeNumber -> slot`) is guarded by a single reader-writer
/// lock; the contents of a slot are not — callers are expected to hold the
/// corresponding inode's own lock before mutating its record (see
/// [InodeTable::modify_or_throw]).
pub struct InodeTable<R: DiskRecord> {
    storage: RwLock<Storage<R>>,
}

impl<R: DiskRecord> InodeTable<R> {
    /// Opens (or creates) the table at `path`. `migrations` lists schema
    /// versions of the metadata record this code knows how to upgrade from.
    pub fn open(path: impl AsRef<Path>, migrations: Vec<TableMigrationStep<R>>) -> Result<Self>
    where
        R: 'static,
    {
        let ino_size = std::mem::size_of::<u64>();

        let entry_migrations = migrations
            .into_iter()
            .map(|step| {
                let from_size = step.from_size + ino_size;
                let convert = step.convert;
                MigrationStep {
                    from_version: step.from_version,
                    from_size,
                    convert: Box::new(move |raw: &[u8]| {
                        let ino = u64::from_ne_bytes(raw[..ino_size].try_into().unwrap());
                        let record = convert(&raw[ino_size..]);
                        Entry { ino, record }
                    }),
                }
            })
            .collect();

        let vector: MappedDiskVector<Entry<R>> = MappedDiskVector::open(path, entry_migrations)?;

        let mut index = HashMap::with_capacity(vector.len() as usize);
        for i in 0..vector.len() {
            let entry = vector.get(i).expect("index within len");
            let ino = InodeNumber::new(entry.ino).expect("persisted inode numbers are nonzero");
            index.insert(ino, i as usize);
        }

        Ok(Self {
            storage: RwLock::new(Storage { vector, index }),
        })
    }

    pub fn len(&self) -> usize {
        self.storage.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the record stored for `ino`, if any.
    pub fn get(&self, ino: InodeNumber) -> Option<R> {
        let storage = self.storage.read();
        let idx = *storage.index.get(&ino)?;
        storage.vector.get(idx as u64).map(|e| e.record)
    }

    pub fn get_or_throw(&self, ino: InodeNumber) -> Result<R> {
        self.get(ino).ok_or(StorageError::InodeNotFound(ino))
    }

    /// Inserts or overwrites the record for `ino`.
    pub fn set(&self, ino: InodeNumber, record: R) {
        let mut storage = self.storage.write();
        if let Some(&idx) = storage.index.get(&ino) {
            storage.vector.set(idx as u64, Entry { ino: ino.get(), record });
        } else {
            let idx = storage
                .vector
                .emplace_back(Entry { ino: ino.get(), record })
                .expect("mapped disk vector append");
            storage.index.insert(ino, idx as usize);
        }
    }

    /// Inserts `record` for `ino` iff absent, returning whatever record ends
    /// up stored (the one just inserted, or the pre-existing one).
    pub fn set_default(&self, ino: InodeNumber, record: R) -> R {
        let mut storage = self.storage.write();
        if let Some(&idx) = storage.index.get(&ino) {
            return storage.vector.get(idx as u64).expect("index within len").record;
        }
        let idx = storage
            .vector
            .emplace_back(Entry { ino: ino.get(), record })
            .expect("mapped disk vector append");
        storage.index.insert(ino, idx as usize);
        record
    }

    /// If `ino` is absent, calls `make` outside any table lock to compute a
    /// default record, then inserts it under the write lock — discarding the
    /// computed value if another writer raced and inserted first.
    pub fn populate_if_not_set<F: FnOnce() -> R>(&self, ino: InodeNumber, make: F) -> R {
        if let Some(existing) = self.get(ino) {
            return existing;
        }
        let computed = make();
        self.set_default(ino, computed)
    }

    /// Calls `f` on the stored record for `ino` under the table's read lock
    /// (per-inode mutual exclusion is the caller's responsibility), returning
    /// the record's value after `f` runs.
    pub fn modify_or_throw<F: FnOnce(&mut R)>(&self, ino: InodeNumber, f: F) -> Result<R> {
        let storage = self.storage.read();
        let idx = *storage
            .index
            .get(&ino)
            .ok_or(StorageError::InodeNotFound(ino))?;
        let mut result = None;
        storage.vector.modify_in_place(idx as u64, |entry: &mut Entry<R>| {
            f(&mut entry.record);
            result = Some(entry.record);
        });
        Ok(result.expect("modify_in_place always calls f"))
    }

    /// Idempotent removal: a no-op if `ino` is absent. Removal is dense — the
    /// last storage slot is moved into the vacated slot and the index of
    /// both the removed and the moved entry is updated.
    pub fn free_inode(&self, ino: InodeNumber) {
        let mut storage = self.storage.write();
        let Some(idx) = storage.index.remove(&ino) else {
            return;
        };
        let last_idx = storage.vector.len() - 1;
        if (idx as u64) != last_idx {
            let moved = storage.vector.get(last_idx).expect("last index within len");
            storage.vector.set(idx as u64, moved);
            let moved_ino = InodeNumber::new(moved.ino).expect("stored inode numbers are nonzero");
            storage.index.insert(moved_ino, idx);
        }
        storage.vector.pop_back();
    }

    /// Calls `f` on every stored `(InodeNumber, &mut R)`, under the table's
    /// write lock.
    pub fn for_each<F: FnMut(InodeNumber, &mut R)>(&self, mut f: F) {
        let mut storage = self.storage.write();
        let len = storage.vector.len();
        for i in 0..len {
            let mut entry = storage.vector.get(i).expect("index within len");
            let ino = InodeNumber::new(entry.ino).expect("stored inode numbers are nonzero");
            f(ino, &mut entry.record);
            storage.vector.set(i, entry);
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.storage.write().vector.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[repr(C)]
    struct Rec {
        value: u64,
    }

    impl DiskRecord for Rec {
        const VERSION: u32 = 1;
    }

    fn ino(n: u64) -> InodeNumber {
        InodeNumber::new(n).unwrap()
    }

    #[test]
    fn set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let table: InodeTable<Rec> = InodeTable::open(dir.path().join("t.mdv"), vec![]).unwrap();
        table.set(ino(10), Rec { value: 15 });
        assert_eq!(table.get(ino(10)), Some(Rec { value: 15 }));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mdv");
        {
            let table: InodeTable<Rec> = InodeTable::open(&path, vec![]).unwrap();
            table.set(ino(10), Rec { value: 15 });
            table.flush().unwrap();
        }
        let table: InodeTable<Rec> = InodeTable::open(&path, vec![]).unwrap();
        assert_eq!(table.get_or_throw(ino(10)).unwrap(), Rec { value: 15 });
    }

    #[test]
    fn free_inode_is_idempotent_and_dense() {
        let dir = tempfile::tempdir().unwrap();
        let table: InodeTable<Rec> = InodeTable::open(dir.path().join("t.mdv"), vec![]).unwrap();
        table.set(ino(1), Rec { value: 1 });
        table.set(ino(2), Rec { value: 2 });
        table.set(ino(3), Rec { value: 3 });
        assert_eq!(table.len(), 3);

        table.free_inode(ino(1));
        assert_eq!(table.len(), 2);
        assert!(table.get(ino(1)).is_none());
        // ino(3), which occupied the last slot, must still be reachable
        // after being swapped into the vacated slot.
        assert_eq!(table.get(ino(3)), Some(Rec { value: 3 }));

        // idempotent
        table.free_inode(ino(1));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn populate_if_not_set_calls_maker_once() {
        let dir = tempfile::tempdir().unwrap();
        let table: InodeTable<Rec> = InodeTable::open(dir.path().join("t.mdv"), vec![]).unwrap();
        let mut calls = 0;
        let v1 = table.populate_if_not_set(ino(5), || {
            calls += 1;
            Rec { value: 42 }
        });
        let v2 = table.populate_if_not_set(ino(5), || {
            calls += 1;
            Rec { value: 99 }
        });
        assert_eq!(v1, Rec { value: 42 });
        assert_eq!(v2, Rec { value: 42 });
        assert_eq!(calls, 1);
    }

    #[test]
    fn modify_or_throw_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let table: InodeTable<Rec> = InodeTable::open(dir.path().join("t.mdv"), vec![]).unwrap();
        table.set(ino(1), Rec { value: 1 });
        let after = table
            .modify_or_throw(ino(1), |r| r.value += 41)
            .unwrap();
        assert_eq!(after, Rec { value: 42 });
        assert_eq!(table.get(ino(1)), Some(Rec { value: 42 }));
    }

    #[test]
    fn modify_or_throw_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let table: InodeTable<Rec> = InodeTable::open(dir.path().join("t.mdv"), vec![]).unwrap();
        assert!(matches!(
            table.modify_or_throw(ino(1), |r| r.value += 1),
            Err(StorageError::InodeNotFound(_))
        ));
    }
}
