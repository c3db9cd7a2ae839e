//! Content-addressed object model: digests, identifiers, blobs and trees,
//! and their wire serialization.

mod blob;
mod blob_metadata;
pub mod codec;
mod digests;
mod errors;
mod git;
mod ids;
mod path;
mod tree;
mod tree_entry;

pub use blob::Blob;
pub use blob_metadata::BlobMetadata;
pub use digests::{Error as DigestError, Hash20, Hash32};
pub use errors::{CodecError, TreeError};
pub use git::{parse_git_blob, render_git_blob};
pub use ids::{CaseSensitivity, CompareResult, EntryKind, InodeNumber, ObjectId, Origin, RootId};
pub use path::{InvalidPathComponent, PathComponent};
pub use tree::{Tree, TreeAuxData};
pub use tree_entry::{TreeEntry, TreeEntryAux};
