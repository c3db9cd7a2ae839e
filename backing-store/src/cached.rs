//! [LocalStoreCachedBackingStore]: wraps any [BackingStore] with a
//! write-through [LocalStore] disk cache (§4.5), grounded on
//! `LocalStoreCachedBackingStore.cpp`'s get-local-then-delegate-then-put
//! shape.

use std::collections::HashSet;
use std::sync::Arc;

use edenfs_object_model::{
    codec, Blob, CaseSensitivity, CompareResult, EntryKind, Hash20, ObjectId, Origin, RootId, Tree,
    TreeEntry,
};
use edenfs_storage::{Column, LocalStore};
use tonic::async_trait;
use tracing::warn;

use crate::backing_store::{BackingStore, GetBlobMetaResult, GetBlobResult, GetTreeResult, RootTreeResult};
use crate::blob_metadata_codec;
use crate::errors::Result;
use crate::fetch_context::FetchContext;

pub struct LocalStoreCachedBackingStore<B, L> {
    inner: B,
    local_store: Arc<L>,
}

impl<B, L> LocalStoreCachedBackingStore<B, L>
where
    B: BackingStore,
    L: LocalStore,
{
    pub fn new(inner: B, local_store: Arc<L>) -> Self {
        Self { inner, local_store }
    }

    fn put_tree(&self, tree: &Tree) {
        let bytes = codec::encode_v1(tree);
        if let Err(err) = self.local_store.put(Column::Tree, tree.id(), &bytes) {
            warn!(error = %err, "failed to write tree through to local store");
        }
    }

    fn put_blob(&self, id: &ObjectId, blob: &Blob) {
        if let Err(err) = self.local_store.put(Column::Blob, id, blob.coalesced_bytes()) {
            warn!(error = %err, "failed to write blob through to local store");
        }
    }
}

#[async_trait]
impl<B, L> BackingStore for LocalStoreCachedBackingStore<B, L>
where
    B: BackingStore,
    L: LocalStore,
{
    fn compare_objects_by_id(&self, a: &ObjectId, b: &ObjectId) -> CompareResult {
        self.inner.compare_objects_by_id(a, b)
    }

    async fn get_root_tree(&self, root_id: &RootId, ctx: &dyn FetchContext) -> Result<RootTreeResult> {
        let result = self.inner.get_root_tree(root_id, ctx).await?;
        self.put_tree(&result.tree);
        Ok(result)
    }

    async fn get_tree_entry_for_root(
        &self,
        root_id: &RootId,
        kind: EntryKind,
        ctx: &dyn FetchContext,
    ) -> Result<Arc<TreeEntry>> {
        self.inner.get_tree_entry_for_root(root_id, kind, ctx).await
    }

    async fn get_tree(&self, id: &ObjectId, ctx: &dyn FetchContext) -> Result<GetTreeResult> {
        if let Some(bytes) = self.local_store.get(Column::Tree, id)? {
            let tree = codec::decode(bytes.into(), id.clone(), CaseSensitivity::Sensitive)
                .map_err(|e| crate::errors::BackingStoreError::Protocol(e.to_string()))?;
            return Ok(GetTreeResult {
                tree: Arc::new(tree),
                origin: Origin::FromDiskCache,
            });
        }

        let result = self.inner.get_tree(id, ctx).await?;
        self.put_tree(&result.tree);
        Ok(result)
    }

    async fn get_blob(&self, id: &ObjectId, ctx: &dyn FetchContext) -> Result<GetBlobResult> {
        if let Some(bytes) = self.local_store.get(Column::Blob, id)? {
            let blob = Blob::from_bytes(id.clone(), bytes.into());
            return Ok(GetBlobResult {
                blob: Arc::new(blob),
                origin: Origin::FromDiskCache,
            });
        }

        let result = self.inner.get_blob(id, ctx).await?;
        self.put_blob(id, &result.blob);
        Ok(result)
    }

    async fn get_blob_metadata(
        &self,
        id: &ObjectId,
        ctx: &dyn FetchContext,
    ) -> Result<GetBlobMetaResult> {
        if let Some(bytes) = self.local_store.get(Column::BlobMetadata, id)? {
            let metadata = blob_metadata_codec::decode(bytes.into())?;
            return Ok(GetBlobMetaResult {
                metadata,
                origin: Origin::FromDiskCache,
            });
        }

        let result = self.inner.get_blob_metadata(id, ctx).await?;
        if let Err(err) = self.local_store.put(
            Column::BlobMetadata,
            id,
            &blob_metadata_codec::encode(&result.metadata),
        ) {
            warn!(error = %err, "failed to write blob metadata through to local store");
        }
        Ok(result)
    }

    async fn prefetch_blobs(&self, ids: &[ObjectId], ctx: &dyn FetchContext) -> Result<()> {
        self.inner.prefetch_blobs(ids, ctx).await
    }

    fn periodic_management_task(&self) {
        self.inner.periodic_management_task()
    }

    fn start_recording_fetch(&self) {
        self.inner.start_recording_fetch()
    }

    fn stop_recording_fetch(&self) -> HashSet<String> {
        self.inner.stop_recording_fetch()
    }

    async fn import_manifest_for_root(&self, root_id: &RootId, manifest: &Hash20) -> Result<()> {
        self.inner.import_manifest_for_root(root_id, manifest).await
    }

    fn parse_root_id(&self, s: &str) -> Result<RootId> {
        self.inner.parse_root_id(s)
    }

    fn render_root_id(&self, id: &RootId) -> String {
        self.inner.render_root_id(id)
    }

    fn parse_object_id(&self, s: &str) -> Result<ObjectId> {
        self.inner.parse_object_id(s)
    }

    fn render_object_id(&self, id: &ObjectId) -> String {
        self.inner.render_object_id(id)
    }

    fn get_repo_name(&self) -> Option<&str> {
        self.inner.get_repo_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_context::NullFetchContext;
    use crate::null::NullBackingStore;
    use edenfs_storage::MemoryLocalStore;

    #[tokio::test]
    async fn get_tree_miss_falls_through_and_does_not_populate_cache() {
        let store = LocalStoreCachedBackingStore::new(NullBackingStore, Arc::new(MemoryLocalStore::new()));
        let ctx = NullFetchContext;
        let id = store.parse_object_id("deadbeef").unwrap();
        assert!(store.get_tree(&id, &ctx).await.is_err());
    }
}
