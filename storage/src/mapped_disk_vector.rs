//! A growable array of fixed-size records memory-mapped from a file, with
//! in-place schema migration.
//!
//! Record types are plain, fixed-layout data: they must be `Copy` and carry
//! a small `VERSION` tag so the file header can detect whether the on-disk
//! shape still matches the running code.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;

use memmap2::MmapMut;

use crate::errors::{Result, StorageError};

pub const PAGE_SIZE: usize = 4096;
pub const GROWTH_IN_PAGES: u64 = 256;

const MAGIC: [u8; 4] = *b"MDV\0";
const STRUCT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 32;

/// A fixed-layout record stored in a [MappedDiskVector]. Implementors must
/// be plain-old-data: no pointers, no padding that carries uninitialized
/// bytes across a `Copy`.
pub trait DiskRecord: Copy + Send + Sync + 'static {
    const VERSION: u32;
}

/// One step of an in-place schema migration: converts a raw on-disk record
/// of a previous shape (`from_version`, `from_size` bytes) into the current
/// record type.
///
/// The C++ original threads a chain of these through template parameters
/// (`Migrator<T, First, Rest...>`); the equivalent idiomatic shape here is a
/// list of type-erased closures, since Rust generics can't express a
/// variadic migration chain as directly.
pub struct MigrationStep<R> {
    pub from_version: u32,
    pub from_size: usize,
    pub convert: Box<dyn Fn(&[u8]) -> R + Send + Sync>,
}

struct Header {
    record_version: u32,
    record_size: u32,
    entry_count: u64,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&STRUCT_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.record_version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.record_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[24..32].copy_from_slice(&0u64.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; HEADER_SIZE], path: &Path) -> Result<Header> {
        let magic: [u8; 4] = buf[0..4].try_into().unwrap();
        if magic != MAGIC {
            return Err(StorageError::InvalidHeader {
                path: path.to_path_buf(),
                expected_magic: MAGIC,
                actual_magic: magic,
            });
        }
        let struct_version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if struct_version != STRUCT_VERSION {
            return Err(StorageError::InvalidHeader {
                path: path.to_path_buf(),
                expected_magic: MAGIC,
                actual_magic: magic,
            });
        }
        Ok(Header {
            record_version: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            record_size: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            entry_count: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        })
    }
}

fn lock_exclusive(file: &File, path: &Path) -> Result<()> {
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Err(StorageError::AlreadyLocked(path.to_path_buf()));
        }
        return Err(StorageError::Io {
            path: path.to_path_buf(),
            source: err,
        });
    }
    Ok(())
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct MappedDiskVector<R: DiskRecord> {
    file: File,
    mmap: MmapMut,
    path: PathBuf,
    len: u64,
    capacity_pages: u64,
    _marker: std::marker::PhantomData<R>,
}

impl<R: DiskRecord> MappedDiskVector<R> {
    fn record_size() -> usize {
        std::mem::size_of::<R>()
    }

    fn mapped_len_for_pages(pages: u64) -> usize {
        HEADER_SIZE + (pages as usize) * PAGE_SIZE
    }

    fn capacity(&self) -> u64 {
        let usable = (self.capacity_pages as usize) * PAGE_SIZE;
        (usable / Self::record_size()) as u64
    }

    /// Opens (or creates) the vector at `path`.
    ///
    /// `migrations` covers schema versions this code can upgrade from; an
    /// on-disk file whose record version/size doesn't match `R::VERSION`
    /// but does match one of these is migrated in place (via a tmp-file
    /// rename) before being reopened as `R`.
    pub fn open(path: impl AsRef<Path>, migrations: Vec<MigrationStep<R>>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut seen = std::collections::HashSet::new();
        for step in &migrations {
            if !seen.insert(step.from_version) {
                return Err(StorageError::DuplicateMigrationVersion(step.from_version));
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        lock_exclusive(&file, &path)?;

        let file_len = file.metadata().map_err(|e| io_err(&path, e))?.len();

        if file_len == 0 {
            Self::initialize_from_scratch(file, path)
        } else {
            Self::open_existing(file, path, file_len, migrations)
        }
    }

    fn initialize_from_scratch(file: File, path: PathBuf) -> Result<Self> {
        let header = Header {
            record_version: R::VERSION,
            record_size: Self::record_size() as u32,
            entry_count: 0,
        };
        let total_len = Self::mapped_len_for_pages(GROWTH_IN_PAGES);
        file.set_len(total_len as u64).map_err(|e| io_err(&path, e))?;

        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| io_err(&path, e))?;
        mmap[0..HEADER_SIZE].copy_from_slice(&header.encode());

        Ok(Self {
            file,
            mmap,
            path,
            len: 0,
            capacity_pages: GROWTH_IN_PAGES,
            _marker: std::marker::PhantomData,
        })
    }

    fn open_existing(
        mut file: File,
        path: PathBuf,
        file_len: u64,
        migrations: Vec<MigrationStep<R>>,
    ) -> Result<Self> {
        let mut header_buf = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0)).map_err(|e| io_err(&path, e))?;
        file.read_exact(&mut header_buf).map_err(|e| io_err(&path, e))?;
        let header = Header::decode(&header_buf, &path)?;

        if header.record_version == R::VERSION && header.record_size as usize == Self::record_size()
        {
            let capacity_pages = Self::capacity_pages_for_len(file_len);
            let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| io_err(&path, e))?;
            return Ok(Self {
                file,
                mmap,
                path,
                len: header.entry_count,
                capacity_pages,
                _marker: std::marker::PhantomData,
            });
        }

        let step = migrations
            .iter()
            .find(|m| m.from_version == header.record_version && m.from_size == header.record_size as usize);

        let step = match step {
            Some(step) => step,
            None => {
                return Err(StorageError::VersionMismatch {
                    path,
                    on_disk: header.record_version,
                    on_disk_size: header.record_size as usize,
                    current: R::VERSION,
                    current_size: Self::record_size(),
                })
            }
        };

        Self::migrate(file, path, header, step)
    }

    fn capacity_pages_for_len(file_len: u64) -> u64 {
        let usable = file_len.saturating_sub(HEADER_SIZE as u64);
        (usable + PAGE_SIZE as u64 - 1) / PAGE_SIZE as u64
    }

    fn migrate(
        mut old_file: File,
        path: PathBuf,
        old_header: Header,
        step: &MigrationStep<R>,
    ) -> Result<Self> {
        let tmp_path = path.with_extension("mdv.tmp");
        let old_record_size = old_header.record_size as usize;

        old_file
            .seek(SeekFrom::Start(HEADER_SIZE as u64))
            .map_err(|e| io_err(&path, e))?;
        let mut raw = Vec::with_capacity(old_record_size);
        raw.resize(old_record_size, 0);

        let new_pages = std::cmp::max(
            GROWTH_IN_PAGES,
            Self::capacity_pages_for_entry_count(old_header.entry_count),
        );

        let tmp_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| io_err(&tmp_path, e))?;
        tmp_file
            .set_len(Self::mapped_len_for_pages(new_pages) as u64)
            .map_err(|e| io_err(&tmp_path, e))?;

        let result = (|| -> Result<()> {
            let mut tmp_mmap =
                unsafe { MmapMut::map_mut(&tmp_file) }.map_err(|e| io_err(&tmp_path, e))?;
            let new_header = Header {
                record_version: R::VERSION,
                record_size: Self::record_size() as u32,
                entry_count: old_header.entry_count,
            };
            tmp_mmap[0..HEADER_SIZE].copy_from_slice(&new_header.encode());

            for i in 0..old_header.entry_count {
                old_file
                    .seek(SeekFrom::Start(
                        HEADER_SIZE as u64 + i * old_record_size as u64,
                    ))
                    .map_err(|e| io_err(&path, e))?;
                old_file.read_exact(&mut raw).map_err(|e| io_err(&path, e))?;
                let converted = (step.convert)(&raw);
                let offset = HEADER_SIZE + (i as usize) * Self::record_size();
                unsafe {
                    ptr::write(
                        tmp_mmap.as_mut_ptr().add(offset) as *mut R,
                        converted,
                    );
                }
            }
            tmp_mmap.flush().map_err(|e| io_err(&tmp_path, e))?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        lock_exclusive(&file, &path)?;
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| io_err(&path, e))?;

        Ok(Self {
            file,
            mmap,
            path,
            len: old_header.entry_count,
            capacity_pages: new_pages,
            _marker: std::marker::PhantomData,
        })
    }

    fn capacity_pages_for_entry_count(entry_count: u64) -> u64 {
        let bytes_needed = entry_count as usize * Self::record_size();
        ((bytes_needed + PAGE_SIZE - 1) / PAGE_SIZE) as u64
    }

    fn write_header(&mut self) {
        let header = Header {
            record_version: R::VERSION,
            record_size: Self::record_size() as u32,
            entry_count: self.len,
        };
        self.mmap[0..HEADER_SIZE].copy_from_slice(&header.encode());
    }

    fn grow(&mut self) -> Result<()> {
        self.capacity_pages += GROWTH_IN_PAGES;
        let new_len = Self::mapped_len_for_pages(self.capacity_pages) as u64;
        self.file.set_len(new_len).map_err(|e| io_err(&self.path, e))?;
        self.mmap = unsafe { MmapMut::map_mut(&self.file) }.map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn offset_of(&self, index: u64) -> usize {
        HEADER_SIZE + (index as usize) * Self::record_size()
    }

    pub fn get(&self, index: u64) -> Option<R> {
        if index >= self.len {
            return None;
        }
        let offset = self.offset_of(index);
        Some(unsafe { ptr::read(self.mmap.as_ptr().add(offset) as *const R) })
    }

    pub fn set(&mut self, index: u64, value: R) {
        assert!(index < self.len, "index out of bounds");
        let offset = self.offset_of(index);
        unsafe { ptr::write(self.mmap.as_mut_ptr().add(offset) as *mut R, value) };
    }

    /// Mutates the record at `index` through a shared reference.
    ///
    /// [crate::InodeTable] locks only its index (the `InodeNumber -> slot`
    /// map), not individual records; callers of this method must otherwise
    /// guarantee exclusive access to this slot (in practice, by holding the
    /// inode's own per-inode lock) for the duration of `f`.
    pub fn modify_in_place<F: FnOnce(&mut R)>(&self, index: u64, f: F) {
        assert!(index < self.len, "index out of bounds");
        let offset = self.offset_of(index);
        let ptr = self.mmap.as_ptr().wrapping_add(offset) as *mut R;
        unsafe { f(&mut *ptr) };
    }

    pub fn front(&self) -> Option<R> {
        self.get(0)
    }

    pub fn back(&self) -> Option<R> {
        if self.len == 0 {
            None
        } else {
            self.get(self.len - 1)
        }
    }

    pub fn emplace_back(&mut self, value: R) -> Result<u64> {
        if self.len >= self.capacity() {
            self.grow()?;
        }
        let index = self.len;
        let offset = self.offset_of(index);
        unsafe { ptr::write(self.mmap.as_mut_ptr().add(offset) as *mut R, value) };
        self.len += 1;
        self.write_header();
        Ok(index)
    }

    pub fn pop_back(&mut self) -> Option<R> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        let value = self.get(self.len);
        self.write_header();
        value
    }

    pub fn iter(&self) -> impl Iterator<Item = R> + '_ {
        (0..self.len).map(move |i| self.get(i).unwrap())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.write_header();
        self.mmap.flush().map_err(|e| io_err(&self.path, e))
    }
}

impl<R: DiskRecord> Drop for MappedDiskVector<R> {
    fn drop(&mut self) {
        self.write_header();
        if let Err(err) = self.mmap.flush() {
            tracing::warn!(path = %self.path.display(), %err, "failed to flush mapped disk vector on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[repr(C)]
    struct OldRecord {
        x: u32,
        y: u32,
    }

    impl DiskRecord for OldRecord {
        const VERSION: u32 = 1;
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[repr(C)]
    struct NewRecord {
        x: u64,
        y: u64,
        z: u64,
    }

    impl DiskRecord for NewRecord {
        const VERSION: u32 = 2;
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mdv");

        {
            let mut v: MappedDiskVector<OldRecord> = MappedDiskVector::open(&path, vec![]).unwrap();
            v.emplace_back(OldRecord { x: 10, y: 20 }).unwrap();
            v.flush().unwrap();
        }

        let v: MappedDiskVector<OldRecord> = MappedDiskVector::open(&path, vec![]).unwrap();
        assert_eq!(v.len(), 1);
        assert_eq!(v.get(0), Some(OldRecord { x: 10, y: 20 }));
    }

    #[test]
    fn migrates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mdv");

        {
            let mut v: MappedDiskVector<OldRecord> = MappedDiskVector::open(&path, vec![]).unwrap();
            v.emplace_back(OldRecord { x: 11, y: 22 }).unwrap();
            v.emplace_back(OldRecord { x: 100, y: 200 }).unwrap();
            v.flush().unwrap();
        }

        let migrations = vec![MigrationStep {
            from_version: OldRecord::VERSION,
            from_size: std::mem::size_of::<OldRecord>(),
            convert: Box::new(|raw: &[u8]| {
                let old = unsafe { ptr::read(raw.as_ptr() as *const OldRecord) };
                NewRecord {
                    x: old.x as u64,
                    y: old.y as u64,
                    z: (old.x + old.y) as u64,
                }
            }),
        }];

        let v: MappedDiskVector<NewRecord> = MappedDiskVector::open(&path, migrations).unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(
            v.get(0),
            Some(NewRecord {
                x: 11,
                y: 22,
                z: 33
            })
        );
        assert_eq!(
            v.get(1),
            Some(NewRecord {
                x: 100,
                y: 200,
                z: 300
            })
        );
    }

    #[test]
    fn rejects_unmigratable_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mdv");
        {
            let mut v: MappedDiskVector<OldRecord> = MappedDiskVector::open(&path, vec![]).unwrap();
            v.emplace_back(OldRecord { x: 1, y: 2 }).unwrap();
        }
        let err = MappedDiskVector::<NewRecord>::open(&path, vec![]).unwrap_err();
        assert!(matches!(err, StorageError::VersionMismatch { .. }));
    }
}
