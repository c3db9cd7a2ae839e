use thiserror::Error;

/// The error taxonomy shared by every layer in this crate (§7): a
/// `BackingStore`, the `ObjectStore` orchestrator atop it, and the
/// `HgImporter` subprocess client all report through this type.
#[derive(Debug, Error)]
pub enum BackingStoreError {
    /// Addressed by id, hash, or inode number; no data. Cache misses never
    /// negatively cache — they simply propagate as this variant.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Subprocess protocol framing, version, or request-id violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A typed error delivered by the backing store or helper subprocess.
    /// `type_name == "ResetRepoError"` triggers exactly one transparent
    /// retry in `HgImporterManager`.
    #[error("remote error ({type_name}): {message}")]
    Remote { type_name: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Bug(String),
}

impl BackingStoreError {
    pub fn is_reset_repo_error(&self) -> bool {
        matches!(self, BackingStoreError::Remote { type_name, .. } if type_name == "ResetRepoError")
    }
}

impl From<edenfs_storage::StorageError> for BackingStoreError {
    fn from(err: edenfs_storage::StorageError) -> Self {
        BackingStoreError::Io {
            operation: "local store access",
            source: std::io::Error::new(std::io::ErrorKind::Other, err),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackingStoreError>;
