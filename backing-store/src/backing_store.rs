//! The `BackingStore` abstraction (§4.5): a uniform façade over whichever
//! remote store (hg, git, recas, or nothing at all) actually holds content.

use std::collections::HashSet;
use std::sync::Arc;

use edenfs_object_model::{BlobMetadata, CompareResult, EntryKind, Hash20, ObjectId, Origin, RootId};
use tonic::async_trait;

use crate::errors::Result;
use crate::fetch_context::FetchContext;

pub struct RootTreeResult {
    pub tree_id: ObjectId,
    pub tree: Arc<edenfs_object_model::Tree>,
}

pub struct GetTreeResult {
    pub tree: Arc<edenfs_object_model::Tree>,
    pub origin: Origin,
}

pub struct GetBlobResult {
    pub blob: Arc<edenfs_object_model::Blob>,
    pub origin: Origin,
}

pub struct GetBlobMetaResult {
    pub metadata: BlobMetadata,
    pub origin: Origin,
}

/// A uniform façade over a content-addressed remote store. Implementors
/// mint and interpret [ObjectId]/[RootId] bytes; the core never does.
#[async_trait]
pub trait BackingStore: Send + Sync {
    fn compare_objects_by_id(&self, a: &ObjectId, b: &ObjectId) -> CompareResult;

    async fn get_root_tree(&self, root_id: &RootId, ctx: &dyn FetchContext) -> Result<RootTreeResult>;

    async fn get_tree_entry_for_root(
        &self,
        root_id: &RootId,
        kind: EntryKind,
        ctx: &dyn FetchContext,
    ) -> Result<Arc<edenfs_object_model::TreeEntry>>;

    async fn get_tree(&self, id: &ObjectId, ctx: &dyn FetchContext) -> Result<GetTreeResult>;

    async fn get_blob(&self, id: &ObjectId, ctx: &dyn FetchContext) -> Result<GetBlobResult>;

    async fn get_blob_metadata(
        &self,
        id: &ObjectId,
        ctx: &dyn FetchContext,
    ) -> Result<GetBlobMetaResult>;

    async fn prefetch_blobs(&self, ids: &[ObjectId], ctx: &dyn FetchContext) -> Result<()>;

    /// Runs backing-store-specific maintenance (e.g. compacting an hgcache).
    /// Called periodically by the mount, not in response to any request.
    fn periodic_management_task(&self) {}

    fn start_recording_fetch(&self) {}

    fn stop_recording_fetch(&self) -> HashSet<String> {
        HashSet::new()
    }

    async fn import_manifest_for_root(&self, root_id: &RootId, manifest: &Hash20) -> Result<()>;

    fn parse_root_id(&self, s: &str) -> Result<RootId>;
    fn render_root_id(&self, id: &RootId) -> String;
    fn parse_object_id(&self, s: &str) -> Result<ObjectId>;
    fn render_object_id(&self, id: &ObjectId) -> String;

    fn get_repo_name(&self) -> Option<&str> {
        None
    }
}

#[async_trait]
impl<T: BackingStore + ?Sized> BackingStore for Arc<T> {
    fn compare_objects_by_id(&self, a: &ObjectId, b: &ObjectId) -> CompareResult {
        (**self).compare_objects_by_id(a, b)
    }

    async fn get_root_tree(&self, root_id: &RootId, ctx: &dyn FetchContext) -> Result<RootTreeResult> {
        (**self).get_root_tree(root_id, ctx).await
    }

    async fn get_tree_entry_for_root(
        &self,
        root_id: &RootId,
        kind: EntryKind,
        ctx: &dyn FetchContext,
    ) -> Result<Arc<edenfs_object_model::TreeEntry>> {
        (**self).get_tree_entry_for_root(root_id, kind, ctx).await
    }

    async fn get_tree(&self, id: &ObjectId, ctx: &dyn FetchContext) -> Result<GetTreeResult> {
        (**self).get_tree(id, ctx).await
    }

    async fn get_blob(&self, id: &ObjectId, ctx: &dyn FetchContext) -> Result<GetBlobResult> {
        (**self).get_blob(id, ctx).await
    }

    async fn get_blob_metadata(
        &self,
        id: &ObjectId,
        ctx: &dyn FetchContext,
    ) -> Result<GetBlobMetaResult> {
        (**self).get_blob_metadata(id, ctx).await
    }

    async fn prefetch_blobs(&self, ids: &[ObjectId], ctx: &dyn FetchContext) -> Result<()> {
        (**self).prefetch_blobs(ids, ctx).await
    }

    fn periodic_management_task(&self) {
        (**self).periodic_management_task()
    }

    fn start_recording_fetch(&self) {
        (**self).start_recording_fetch()
    }

    fn stop_recording_fetch(&self) -> HashSet<String> {
        (**self).stop_recording_fetch()
    }

    async fn import_manifest_for_root(&self, root_id: &RootId, manifest: &Hash20) -> Result<()> {
        (**self).import_manifest_for_root(root_id, manifest).await
    }

    fn parse_root_id(&self, s: &str) -> Result<RootId> {
        (**self).parse_root_id(s)
    }

    fn render_root_id(&self, id: &RootId) -> String {
        (**self).render_root_id(id)
    }

    fn parse_object_id(&self, s: &str) -> Result<ObjectId> {
        (**self).parse_object_id(s)
    }

    fn render_object_id(&self, id: &ObjectId) -> String {
        (**self).render_object_id(id)
    }

    fn get_repo_name(&self) -> Option<&str> {
        (**self).get_repo_name()
    }
}
