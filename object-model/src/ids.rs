use bytes::Bytes;
use std::fmt;

/// An opaque identifier for a [crate::Blob] or [crate::Tree], minted and
/// interpreted only by a `BackingStore` implementation.
///
/// The core never parses or renders these bytes itself — rendering and
/// parsing are backing-store methods (`render_object_id`/`parse_object_id`),
/// and semantic comparison of two ids goes through
/// `BackingStore::compare_objects_by_id`, not through this type's `Eq`.
///
/// `ObjectId` does implement structural `Eq`/`Hash` so it can key the
/// in-memory caches (tree cache, blob cache): a cache hit only ever needs
/// "these are the same bytes", never "resolve to the same content by a
/// backing-store-specific equivalence".
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ObjectId(Bytes);

impl ObjectId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for ObjectId {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<Vec<u8>> for ObjectId {
    fn from(value: Vec<u8>) -> Self {
        Self(value.into())
    }
}

impl From<ObjectId> for Bytes {
    fn from(value: ObjectId) -> Self {
        value.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({} bytes)", self.0.len())
    }
}

/// An opaque identifier for a commit/root manifest, minted and interpreted
/// only by a `BackingStore` implementation. See [ObjectId] for why this
/// doesn't carry comparison or rendering logic of its own.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RootId(Bytes);

impl RootId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for RootId {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<Vec<u8>> for RootId {
    fn from(value: Vec<u8>) -> Self {
        Self(value.into())
    }
}

impl fmt::Debug for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootId({} bytes)", self.0.len())
    }
}

/// A nonzero, stable identifier of a filesystem object within a mount.
///
/// `1` is reserved for the mount root.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeNumber(std::num::NonZeroU64);

impl InodeNumber {
    pub const ROOT: InodeNumber = InodeNumber(match std::num::NonZeroU64::new(1) {
        Some(v) => v,
        None => unreachable!(),
    });

    pub fn new(value: u64) -> Option<Self> {
        std::num::NonZeroU64::new(value).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Debug for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InodeNumber({})", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of filesystem entry a [crate::TreeEntry] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Tree,
    RegularFile,
    ExecutableFile,
    Symlink,
}

/// Whether a [crate::Tree]'s entries are looked up case-sensitively.
///
/// When the mount's configured sensitivity differs from a stored tree's own
/// flag, the object store returns a shallow copy with the flag flipped rather
/// than mutating the cached value in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseSensitivity {
    Sensitive,
    Insensitive,
}

/// The outcome of `BackingStore::compare_objects_by_id`: only the backing
/// store that minted two [ObjectId]s knows whether they name the same
/// content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    Identical,
    Different,
    Unknown,
}

/// Attribution tag for where a fetched object ultimately came from. Used for
/// telemetry and for deprioritizing processes that are fetching heavily from
/// the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    FromMemoryCache,
    FromDiskCache,
    FromNetworkFetch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_number_root_is_one() {
        assert_eq!(InodeNumber::ROOT.get(), 1);
        assert!(InodeNumber::ROOT.is_root());
    }

    #[test]
    fn inode_number_rejects_zero() {
        assert!(InodeNumber::new(0).is_none());
    }
}
