use thiserror::Error;

/// Errors raised by [crate::MappedDiskVector] and [crate::InodeTable].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("another process already holds an exclusive lock on {0}")]
    AlreadyLocked(std::path::PathBuf),

    #[error("{path}: invalid header (expected magic {expected_magic:?}, got {actual_magic:?})")]
    InvalidHeader {
        path: std::path::PathBuf,
        expected_magic: [u8; 4],
        actual_magic: [u8; 4],
    },

    #[error(
        "{path}: on-disk record version {on_disk} (size {on_disk_size}) has no migration path to current version {current} (size {current_size})"
    )]
    VersionMismatch {
        path: std::path::PathBuf,
        on_disk: u32,
        on_disk_size: usize,
        current: u32,
        current_size: usize,
    },

    #[error("migration chain contains duplicate version {0}")]
    DuplicateMigrationVersion(u32),

    #[error("inode {0} not found")]
    InodeNotFound(edenfs_object_model::InodeNumber),
}

pub type Result<T> = std::result::Result<T, StorageError>;
