use crate::{Hash20, Hash32};

/// Cheap-to-compare summary of a [crate::Blob]'s contents: size plus digests.
///
/// `blake3` is optional because it is more expensive to compute than `sha1`
/// and is only filled in on demand (see `ObjectStore::get_blob_metadata`'s
/// `blake3_needed` parameter in the backing-store crate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    pub size: u64,
    pub sha1: Hash20,
    pub blake3: Option<Hash32>,
}

impl BlobMetadata {
    pub fn new(size: u64, sha1: Hash20) -> Self {
        Self {
            size,
            sha1,
            blake3: None,
        }
    }

    pub fn with_blake3(mut self, blake3: Hash32) -> Self {
        self.blake3 = Some(blake3);
        self
    }
}
