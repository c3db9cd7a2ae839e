use crate::{EntryKind, Hash20, Hash32, ObjectId, PathComponent};

/// Optional, versioned auxiliary data carried alongside a [TreeEntry].
///
/// Every field is independently optional: older writers may have populated
/// only `sha1` and `size`, while newer ones also fill in the BLAKE3-based
/// digest fields. Absence of a field means "not computed yet", not "zero".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeEntryAux {
    pub sha1: Option<Hash20>,
    pub blake3: Option<Hash32>,
    pub size: Option<u64>,
    /// The root digest of this entry's own content (for a `Tree` entry, the
    /// recursive size/hash digest of the subtree).
    pub digest_hash: Option<Hash32>,
    pub digest_size: Option<u64>,
}

/// A single named entry inside a [crate::Tree].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: PathComponent,
    pub id: ObjectId,
    pub kind: EntryKind,
    pub aux: Option<TreeEntryAux>,
}

impl TreeEntry {
    pub fn new(name: PathComponent, id: ObjectId, kind: EntryKind) -> Self {
        Self {
            name,
            id,
            kind,
            aux: None,
        }
    }

    pub fn with_aux(mut self, aux: TreeEntryAux) -> Self {
        self.aux = Some(aux);
        self
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryKind::Tree)
    }
}
