//! A `BackingStore` that holds nothing and fails every fetch. Used by tests
//! and by one-shot CLI invocations that only need id parsing.

use std::collections::HashSet;
use std::sync::Arc;

use edenfs_object_model::{CompareResult, EntryKind, Hash20, ObjectId, RootId, TreeEntry};
use tonic::async_trait;

use crate::backing_store::{BackingStore, GetBlobMetaResult, GetBlobResult, GetTreeResult, RootTreeResult};
use crate::errors::{BackingStoreError, Result};
use crate::fetch_context::FetchContext;

#[derive(Debug, Default)]
pub struct NullBackingStore;

#[async_trait]
impl BackingStore for NullBackingStore {
    fn compare_objects_by_id(&self, _a: &ObjectId, _b: &ObjectId) -> CompareResult {
        CompareResult::Unknown
    }

    async fn get_root_tree(&self, root_id: &RootId, _ctx: &dyn FetchContext) -> Result<RootTreeResult> {
        Err(BackingStoreError::NotFound(self.render_root_id(root_id)))
    }

    async fn get_tree_entry_for_root(
        &self,
        root_id: &RootId,
        _kind: EntryKind,
        _ctx: &dyn FetchContext,
    ) -> Result<Arc<TreeEntry>> {
        Err(BackingStoreError::NotFound(self.render_root_id(root_id)))
    }

    async fn get_tree(&self, id: &ObjectId, _ctx: &dyn FetchContext) -> Result<GetTreeResult> {
        Err(BackingStoreError::NotFound(self.render_object_id(id)))
    }

    async fn get_blob(&self, id: &ObjectId, _ctx: &dyn FetchContext) -> Result<GetBlobResult> {
        Err(BackingStoreError::NotFound(self.render_object_id(id)))
    }

    async fn get_blob_metadata(
        &self,
        id: &ObjectId,
        _ctx: &dyn FetchContext,
    ) -> Result<GetBlobMetaResult> {
        Err(BackingStoreError::NotFound(self.render_object_id(id)))
    }

    async fn prefetch_blobs(&self, _ids: &[ObjectId], _ctx: &dyn FetchContext) -> Result<()> {
        Ok(())
    }

    fn stop_recording_fetch(&self) -> HashSet<String> {
        HashSet::new()
    }

    async fn import_manifest_for_root(&self, root_id: &RootId, _manifest: &Hash20) -> Result<()> {
        Err(BackingStoreError::NotFound(self.render_root_id(root_id)))
    }

    fn parse_root_id(&self, s: &str) -> Result<RootId> {
        Ok(RootId::from(s.as_bytes().to_vec()))
    }

    fn render_root_id(&self, id: &RootId) -> String {
        String::from_utf8_lossy(id.as_bytes()).into_owned()
    }

    fn parse_object_id(&self, s: &str) -> Result<ObjectId> {
        Ok(ObjectId::from(s.as_bytes().to_vec()))
    }

    fn render_object_id(&self, id: &ObjectId) -> String {
        data_encoding::HEXLOWER.encode(id.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_context::NullFetchContext;

    #[tokio::test]
    async fn every_fetch_is_not_found() {
        let store = NullBackingStore;
        let ctx = NullFetchContext;
        let id = store.parse_object_id("deadbeef").unwrap();
        assert!(store.get_tree(&id, &ctx).await.is_err());
        assert!(store.get_blob(&id, &ctx).await.is_err());
        assert!(store.get_blob_metadata(&id, &ctx).await.is_err());
    }

    #[tokio::test]
    async fn prefetch_is_a_noop_success() {
        let store = NullBackingStore;
        let ctx = NullFetchContext;
        assert!(store.prefetch_blobs(&[], &ctx).await.is_ok());
    }
}
