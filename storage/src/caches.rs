//! The three in-memory LRU caches that short-circuit a [crate::LocalStore]
//! lookup: the tree cache, the blob cache, and the blob-metadata cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use edenfs_object_model::{Blob, BlobMetadata, ObjectId, Tree};
use lru::LruCache;
use parking_lot::Mutex;

struct SizedEntry<T> {
    value: Arc<T>,
    size: usize,
}

struct SizeBoundedInner<T> {
    lru: LruCache<ObjectId, SizedEntry<T>>,
    used: usize,
}

/// An LRU cache bounded by a total byte budget rather than an entry count,
/// used for the tree cache and blob cache (§4.4).
pub struct SizeBoundedCache<T> {
    inner: Mutex<SizeBoundedInner<T>>,
    budget: usize,
}

impl<T> SizeBoundedCache<T> {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(SizeBoundedInner {
                lru: LruCache::unbounded(),
                used: 0,
            }),
            budget: budget_bytes,
        }
    }

    pub fn get(&self, id: &ObjectId) -> Option<Arc<T>> {
        let mut inner = self.inner.lock();
        inner.lru.get(id).map(|e| e.value.clone())
    }

    /// Inserts `value` keyed by `id`, accounting `size` bytes against the
    /// budget and evicting least-recently-used entries until back under it.
    pub fn insert(&self, id: ObjectId, value: Arc<T>, size: usize) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.lru.put(id, SizedEntry { value, size }) {
            inner.used -= old.size;
        }
        inner.used += size;
        while inner.used > self.budget {
            match inner.lru.pop_lru() {
                Some((_, evicted)) => inner.used -= evicted.size,
                None => break,
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        inner.used = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `ObjectId -> Arc<Tree>`, bounded by [Tree::estimated_size].
pub struct TreeCache(SizeBoundedCache<Tree>);

impl TreeCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self(SizeBoundedCache::new(budget_bytes))
    }

    pub fn get(&self, id: &ObjectId) -> Option<Arc<Tree>> {
        self.0.get(id)
    }

    pub fn insert(&self, tree: Arc<Tree>) {
        let size = tree.estimated_size();
        self.0.insert(tree.id().clone(), tree, size);
    }

    pub fn clear(&self) {
        self.0.clear()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `ObjectId -> Arc<Blob>`, bounded by [Blob::len].
pub struct BlobCache(SizeBoundedCache<Blob>);

impl BlobCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self(SizeBoundedCache::new(budget_bytes))
    }

    pub fn get(&self, id: &ObjectId) -> Option<Arc<Blob>> {
        self.0.get(id)
    }

    pub fn insert(&self, blob: Arc<Blob>) {
        let size = blob.len() as usize;
        self.0.insert(blob.id().clone(), blob, size);
    }

    pub fn clear(&self) {
        self.0.clear()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `ObjectId -> BlobMetadata`, bounded by entry count rather than byte size:
/// individual entries are tiny and fixed-size, so a plain count-based LRU is
/// enough.
pub struct BlobMetadataCache {
    lru: Mutex<LruCache<ObjectId, BlobMetadata>>,
}

impl BlobMetadataCache {
    pub fn new(max_entries: NonZeroUsize) -> Self {
        Self {
            lru: Mutex::new(LruCache::new(max_entries)),
        }
    }

    pub fn get(&self, id: &ObjectId) -> Option<BlobMetadata> {
        self.lru.lock().get(id).cloned()
    }

    pub fn insert(&self, id: ObjectId, metadata: BlobMetadata) {
        self.lru.lock().put(id, metadata);
    }

    pub fn clear(&self) {
        self.lru.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use edenfs_object_model::{CaseSensitivity, Hash20};

    fn id(b: &'static [u8]) -> ObjectId {
        ObjectId::from(Bytes::from_static(b))
    }

    #[test]
    fn tree_cache_hit_and_clear() {
        let cache = TreeCache::new(1 << 20);
        let tree = Arc::new(Tree::new(id(b"t1"), CaseSensitivity::Sensitive));
        cache.insert(tree.clone());
        assert!(cache.get(&id(b"t1")).is_some());
        cache.clear();
        assert!(cache.get(&id(b"t1")).is_none());
    }

    #[test]
    fn blob_cache_evicts_by_size() {
        let cache = BlobCache::new(10);
        let a = Arc::new(Blob::from_bytes(id(b"a"), Bytes::from_static(b"0123456789")));
        let b = Arc::new(Blob::from_bytes(id(b"b"), Bytes::from_static(b"abcdefghij")));
        cache.insert(a.clone());
        assert!(cache.get(&id(b"a")).is_some());
        // inserting b exceeds the 10-byte budget together with a, evicting a
        cache.insert(b.clone());
        assert!(cache.get(&id(b"a")).is_none());
        assert!(cache.get(&id(b"b")).is_some());
    }

    #[test]
    fn blob_metadata_cache_bounded_by_count() {
        let cache = BlobMetadataCache::new(NonZeroUsize::new(1).unwrap());
        cache.insert(id(b"a"), BlobMetadata::new(10, Hash20::from_sha1(b"a")));
        cache.insert(id(b"b"), BlobMetadata::new(20, Hash20::from_sha1(b"b")));
        assert!(cache.get(&id(b"a")).is_none());
        assert!(cache.get(&id(b"b")).is_some());
    }
}
