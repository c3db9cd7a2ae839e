//! The persistence layer: a memory-mapped, schema-migrating record vector
//! ([MappedDiskVector]), the per-inode metadata table built on top of it
//! ([InodeTable]), the local content-addressed cache ([LocalStore]), and the
//! three in-memory LRU caches that sit in front of it.

pub mod caches;
pub mod errors;
pub mod inode_table;
pub mod local_store;
pub mod mapped_disk_vector;
pub mod metadata;

pub use caches::{BlobCache, BlobMetadataCache, SizeBoundedCache, TreeCache};
pub use errors::{Result, StorageError};
pub use inode_table::{Entry, InodeTable, TableMigrationStep};
pub use local_store::{Column, LocalStore, MemoryLocalStore, SledLocalStore};
pub use mapped_disk_vector::{DiskRecord, MappedDiskVector, MigrationStep};
pub use metadata::{InodeMetadata, Timestamp};
