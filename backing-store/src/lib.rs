//! The backing-store layer: a uniform façade over remote content stores
//! ([BackingStore]), a disk-cache wrapper ([LocalStoreCachedBackingStore]),
//! the multi-tier fetch orchestrator ([ObjectStore]), and the `hg
//! debugedenimporthelper` subprocess client ([HgImporter]).

mod backing_store;
mod blob_metadata_codec;
mod cached;
mod errors;
mod fetch_context;
mod hg_importer;
mod null;
mod object_store;

pub use backing_store::{BackingStore, GetBlobMetaResult, GetBlobResult, GetTreeResult, RootTreeResult};
pub use cached::LocalStoreCachedBackingStore;
pub use errors::{BackingStoreError, Result};
pub use fetch_context::{FetchContext, FetchKind, NullFetchContext, ProcessFetchContext, ProcessId};
pub use hg_importer::{CommandType, HgImporter, HgImporterManager, ImporterOptions};
pub use null::NullBackingStore;
pub use object_store::{ObjectStore, ObjectStoreConfig};
