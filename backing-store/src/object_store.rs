//! [ObjectStore]: the multi-tier fetch orchestrator sitting above a
//! [BackingStore] (§4.6), grounded on `ObjectStore.cpp`'s memory-cache ->
//! backing-store fetch path and fetch-heavy deprioritization.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use edenfs_object_model::{BlobMetadata, CaseSensitivity, CompareResult, EntryKind, Hash32, ObjectId, Origin, RootId, Tree};
use edenfs_storage::{BlobCache, BlobMetadataCache, TreeCache};
use parking_lot::Mutex;

use crate::backing_store::BackingStore;
use crate::errors::{BackingStoreError, Result};
use crate::fetch_context::{FetchContext, FetchKind, ProcessId};

const DEPRIORITIZE_AMOUNT: u64 = 1;

/// Tracks per-process fetch volume so that a process crossing the configured
/// heavy-fetch threshold gets its subsequent requests deprioritized.
#[derive(Default)]
struct PidFetchCounts {
    counts: Mutex<HashMap<ProcessId, u64>>,
}

impl PidFetchCounts {
    fn record(&self, pid: ProcessId) -> u64 {
        let mut counts = self.counts.lock();
        let entry = counts.entry(pid).or_insert(0);
        *entry += 1;
        *entry
    }

    fn get(&self, pid: ProcessId) -> u64 {
        *self.counts.lock().get(&pid).unwrap_or(&0)
    }
}

pub struct ObjectStoreConfig {
    pub case_sensitivity: CaseSensitivity,
    /// `0` disables the heavy-fetch check entirely.
    pub fetch_heavy_threshold: u64,
    /// When set, blob BLAKE3 digests are computed with this process-wide key
    /// rather than the unkeyed hash.
    pub blake3_key: Option<[u8; 32]>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            case_sensitivity: CaseSensitivity::Sensitive,
            fetch_heavy_threshold: 0,
            blake3_key: None,
        }
    }
}

/// Orchestrates fetches across the in-memory tree/blob/metadata caches and a
/// single [BackingStore], attributing every served object and deprioritizing
/// processes that fetch heavily.
pub struct ObjectStore<B> {
    backing_store: B,
    tree_cache: TreeCache,
    blob_cache: BlobCache,
    metadata_cache: BlobMetadataCache,
    pid_fetch_counts: PidFetchCounts,
    config: ObjectStoreConfig,
    fetch_count: AtomicU64,
}

impl<B: BackingStore> ObjectStore<B> {
    pub fn new(
        backing_store: B,
        tree_cache: TreeCache,
        blob_cache: BlobCache,
        metadata_cache: BlobMetadataCache,
        config: ObjectStoreConfig,
    ) -> Self {
        Self {
            backing_store,
            tree_cache,
            blob_cache,
            metadata_cache,
            pid_fetch_counts: PidFetchCounts::default(),
            config,
            fetch_count: AtomicU64::new(0),
        }
    }

    pub fn total_fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    fn update_process_fetch(&self, ctx: &dyn FetchContext) {
        if let Some(pid) = ctx.client_pid() {
            self.pid_fetch_counts.record(pid);
        }
    }

    fn deprioritize_when_fetch_heavy(&self, ctx: &dyn FetchContext) {
        let threshold = self.config.fetch_heavy_threshold;
        if threshold == 0 {
            return;
        }
        if let Some(pid) = ctx.client_pid() {
            if self.pid_fetch_counts.get(pid) >= threshold {
                ctx.deprioritize(DEPRIORITIZE_AMOUNT);
            }
        }
    }

    fn adjust_case_sensitivity(&self, tree: Arc<Tree>) -> Result<Arc<Tree>> {
        if tree.case_sensitivity() == self.config.case_sensitivity {
            return Ok(tree);
        }
        let adjusted = tree
            .with_case_sensitivity(self.config.case_sensitivity)
            .map_err(|e| BackingStoreError::Bug(e.to_string()))?;
        Ok(Arc::new(adjusted))
    }

    pub async fn get_root_tree(&self, root_id: &RootId, ctx: &dyn FetchContext) -> Result<Arc<Tree>> {
        let result = self.backing_store.get_root_tree(root_id, ctx).await?;
        self.tree_cache.insert(result.tree.clone());
        self.adjust_case_sensitivity(result.tree)
    }

    pub async fn get_tree_entry_for_root(
        &self,
        root_id: &RootId,
        kind: EntryKind,
        ctx: &dyn FetchContext,
    ) -> Result<Arc<edenfs_object_model::TreeEntry>> {
        self.backing_store.get_tree_entry_for_root(root_id, kind, ctx).await
    }

    pub async fn get_tree(&self, id: &ObjectId, ctx: &dyn FetchContext) -> Result<Arc<Tree>> {
        if let Some(tree) = self.tree_cache.get(id) {
            self.fetch_count.fetch_add(1, Ordering::Relaxed);
            ctx.did_fetch(FetchKind::Tree, &self.render_object_id(id), Origin::FromMemoryCache);
            self.update_process_fetch(ctx);
            return self.adjust_case_sensitivity(tree);
        }

        self.deprioritize_when_fetch_heavy(ctx);

        let result = self.backing_store.get_tree(id, ctx).await?;
        self.tree_cache.insert(result.tree.clone());
        ctx.did_fetch(FetchKind::Tree, &self.render_object_id(id), result.origin);
        self.update_process_fetch(ctx);
        self.adjust_case_sensitivity(result.tree)
    }

    pub async fn prefetch_blobs(&self, ids: &[ObjectId], ctx: &dyn FetchContext) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.backing_store.prefetch_blobs(ids, ctx).await
    }

    pub async fn get_blob(&self, id: &ObjectId, ctx: &dyn FetchContext) -> Result<Arc<edenfs_object_model::Blob>> {
        if let Some(blob) = self.blob_cache.get(id) {
            self.fetch_count.fetch_add(1, Ordering::Relaxed);
            ctx.did_fetch(FetchKind::Blob, &self.render_object_id(id), Origin::FromMemoryCache);
            self.update_process_fetch(ctx);
            return Ok(blob);
        }

        self.deprioritize_when_fetch_heavy(ctx);

        let result = self.backing_store.get_blob(id, ctx).await?;
        self.blob_cache.insert(result.blob.clone());
        self.update_process_fetch(ctx);
        ctx.did_fetch(FetchKind::Blob, &self.render_object_id(id), result.origin);
        Ok(result.blob)
    }

    fn metadata_from_memory(&self, id: &ObjectId) -> Option<BlobMetadata> {
        self.metadata_cache.get(id)
    }

    /// Fetches blob metadata, optionally guaranteeing a BLAKE3 digest is
    /// present even if the backing store didn't supply one (computed by
    /// hashing the full blob, on demand).
    pub async fn get_blob_metadata(
        &self,
        id: &ObjectId,
        ctx: &dyn FetchContext,
        blake3_needed: bool,
    ) -> Result<BlobMetadata> {
        if let Some(cached) = self.metadata_from_memory(id) {
            if !blake3_needed || cached.blake3.is_some() {
                self.fetch_count.fetch_add(1, Ordering::Relaxed);
                ctx.did_fetch(FetchKind::BlobMetadata, &self.render_object_id(id), Origin::FromMemoryCache);
                return Ok(cached);
            }
            let blob = self.get_blob(id, ctx).await?;
            let blake3 = self.compute_blake3(&blob);
            let completed = cached.with_blake3(blake3);
            self.metadata_cache.insert(id.clone(), completed.clone());
            return Ok(completed);
        }

        self.deprioritize_when_fetch_heavy(ctx);

        let result = self.backing_store.get_blob_metadata(id, ctx).await?;
        let mut metadata = result.metadata;
        if blake3_needed && metadata.blake3.is_none() {
            let blob = self.get_blob(id, ctx).await?;
            metadata = metadata.with_blake3(self.compute_blake3(&blob));
        }
        self.metadata_cache.insert(id.clone(), metadata.clone());
        ctx.did_fetch(FetchKind::BlobMetadata, &self.render_object_id(id), result.origin);
        Ok(metadata)
    }

    pub async fn get_blob_size(&self, id: &ObjectId, ctx: &dyn FetchContext) -> Result<u64> {
        Ok(self.get_blob_metadata(id, ctx, false).await?.size)
    }

    pub async fn get_blob_sha1(&self, id: &ObjectId, ctx: &dyn FetchContext) -> Result<edenfs_object_model::Hash20> {
        Ok(self.get_blob_metadata(id, ctx, false).await?.sha1)
    }

    pub async fn get_blob_blake3(&self, id: &ObjectId, ctx: &dyn FetchContext) -> Result<Hash32> {
        let metadata = self.get_blob_metadata(id, ctx, true).await?;
        metadata
            .blake3
            .ok_or_else(|| BackingStoreError::Bug("blake3 requested but not computed".to_string()))
    }

    fn compute_blake3(&self, blob: &edenfs_object_model::Blob) -> Hash32 {
        let content = blob.coalesced_bytes();
        match &self.config.blake3_key {
            Some(key) => Hash32::keyed_blake3(key, content),
            None => Hash32::blake3(content),
        }
    }

    pub fn compare_objects_by_id(&self, a: &ObjectId, b: &ObjectId) -> CompareResult {
        if a == b {
            return CompareResult::Identical;
        }
        self.backing_store.compare_objects_by_id(a, b)
    }

    pub fn periodic_management_task(&self) {
        self.backing_store.periodic_management_task();
    }

    pub fn parse_root_id(&self, s: &str) -> Result<RootId> {
        self.backing_store.parse_root_id(s)
    }

    pub fn render_root_id(&self, id: &RootId) -> String {
        self.backing_store.render_root_id(id)
    }

    pub fn parse_object_id(&self, s: &str) -> Result<ObjectId> {
        self.backing_store.parse_object_id(s)
    }

    pub fn render_object_id(&self, id: &ObjectId) -> String {
        self.backing_store.render_object_id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_context::{NullFetchContext, ProcessFetchContext};
    use crate::null::NullBackingStore;
    use std::num::NonZeroUsize;

    fn store() -> ObjectStore<NullBackingStore> {
        ObjectStore::new(
            NullBackingStore,
            TreeCache::new(1 << 20),
            BlobCache::new(1 << 20),
            BlobMetadataCache::new(NonZeroUsize::new(16).unwrap()),
            ObjectStoreConfig::default(),
        )
    }

    #[test]
    fn compare_identical_ids_short_circuits_backing_store() {
        let store = store();
        let id = store.parse_object_id("abc").unwrap();
        assert_eq!(store.compare_objects_by_id(&id, &id), CompareResult::Identical);
    }

    #[tokio::test]
    async fn get_tree_miss_propagates_not_found() {
        let store = store();
        let ctx = NullFetchContext;
        let id = store.parse_object_id("deadbeef").unwrap();
        assert!(store.get_tree(&id, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn heavy_fetch_threshold_deprioritizes() {
        let mut config = ObjectStoreConfig::default();
        config.fetch_heavy_threshold = 1;
        let store = ObjectStore::new(
            NullBackingStore,
            TreeCache::new(1 << 20),
            BlobCache::new(1 << 20),
            BlobMetadataCache::new(NonZeroUsize::new(16).unwrap()),
            config,
        );
        let ctx = ProcessFetchContext::new(ProcessId(42));
        let id = store.parse_object_id("deadbeef").unwrap();
        let _ = store.get_tree(&id, &ctx).await;
        // first fetch: pid_fetch_counts is 0 at check time, no deprioritization yet
        assert_eq!(ctx.priority_penalty(), 0);
        let _ = store.get_tree(&id, &ctx).await;
        // second fetch: count is now 1, meets the threshold
        assert_eq!(ctx.priority_penalty(), 1);
    }
}
