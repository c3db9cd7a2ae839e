use indexmap::IndexMap;

use crate::{CaseSensitivity, Hash32, ObjectId, PathComponent, TreeEntry, TreeError};

/// Optional digest summary of a [Tree], carried in the V2 wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeAuxData {
    pub digest_size: u64,
    pub digest_hash: Option<Hash32>,
}

/// An immutable directory: an ordered map from [PathComponent] to
/// [TreeEntry], preserving insertion order on iteration.
///
/// Lookup honours the tree's own [CaseSensitivity] flag. A tree's entry
/// names must be unique under that flag: inserting `"A"` after `"a"` into a
/// case-insensitive tree is rejected exactly like inserting `"a"` twice.
#[derive(Debug, Clone)]
pub struct Tree {
    id: ObjectId,
    case_sensitivity: CaseSensitivity,
    entries: IndexMap<bytes::Bytes, TreeEntry>,
    aux: Option<TreeAuxData>,
}

impl Tree {
    pub fn new(id: ObjectId, case_sensitivity: CaseSensitivity) -> Self {
        Self {
            id,
            case_sensitivity,
            entries: IndexMap::new(),
            aux: None,
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.case_sensitivity
    }

    pub fn aux_data(&self) -> Option<&TreeAuxData> {
        self.aux.as_ref()
    }

    pub fn set_aux_data(&mut self, aux: TreeAuxData) {
        self.aux = Some(aux);
    }

    fn lookup_key(&self, name: &PathComponent) -> bytes::Bytes {
        match self.case_sensitivity {
            CaseSensitivity::Sensitive => name.clone().into(),
            CaseSensitivity::Insensitive => name.to_ascii_lowercase(),
        }
    }

    /// Adds `entry`, preserving insertion order. Fails if an entry with the
    /// same name (under this tree's case-sensitivity) already exists.
    pub fn add(&mut self, entry: TreeEntry) -> Result<(), TreeError> {
        let key = self.lookup_key(&entry.name);
        if self.entries.contains_key(&key) {
            return Err(TreeError::DuplicateName(entry.name.clone().into()));
        }
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Looks up an entry by name, honouring this tree's case-sensitivity.
    pub fn find(&self, name: &PathComponent) -> Option<&TreeEntry> {
        let key = self.lookup_key(name);
        self.entries.get(&key)
    }

    /// Iterates entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &TreeEntry> + '_ {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate in-memory footprint, used by the tree cache's
    /// size-accounted LRU.
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .entries
                .iter()
                .map(|(k, v)| {
                    k.len()
                        + v.name.as_ref().len()
                        + v.id.as_bytes().len()
                        + std::mem::size_of::<TreeEntry>()
                })
                .sum::<usize>()
    }

    /// Returns a shallow copy of this tree with a different case-sensitivity
    /// flag, used by the object store when the mount's sensitivity differs
    /// from a tree's own.
    ///
    /// Returns an error if flipping sensitivity would introduce a name
    /// collision that did not previously exist (e.g. `"a"` and `"A"` both
    /// present in a case-sensitive tree being reinterpreted as
    /// case-insensitive).
    pub fn with_case_sensitivity(
        &self,
        case_sensitivity: CaseSensitivity,
    ) -> Result<Self, TreeError> {
        if case_sensitivity == self.case_sensitivity {
            return Ok(self.clone());
        }
        let mut copy = Tree::new(self.id.clone(), case_sensitivity);
        copy.aux = self.aux.clone();
        for entry in self.entries() {
            copy.add(entry.clone())?;
        }
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntryKind;

    fn entry(name: &str) -> TreeEntry {
        TreeEntry::new(
            PathComponent::try_from(name).unwrap(),
            ObjectId::from(bytes::Bytes::from_static(b"abc")),
            EntryKind::RegularFile,
        )
    }

    #[test]
    fn insertion_order_preserved() {
        let mut t = Tree::new(ObjectId::from(bytes::Bytes::new()), CaseSensitivity::Sensitive);
        t.add(entry("z")).unwrap();
        t.add(entry("a")).unwrap();
        t.add(entry("m")).unwrap();
        let names: Vec<_> = t.entries().map(|e| e.name.to_string()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn duplicate_rejected() {
        let mut t = Tree::new(ObjectId::from(bytes::Bytes::new()), CaseSensitivity::Sensitive);
        t.add(entry("a")).unwrap();
        assert!(t.add(entry("a")).is_err());
    }

    #[test]
    fn case_insensitive_lookup() {
        let mut t = Tree::new(
            ObjectId::from(bytes::Bytes::new()),
            CaseSensitivity::Insensitive,
        );
        t.add(entry("a_file")).unwrap();
        assert!(t.find(&PathComponent::try_from("A_FILE").unwrap()).is_some());
        assert!(t.find(&PathComponent::try_from("not_a_file").unwrap()).is_none());
    }

    #[test]
    fn case_sensitive_lookup_is_exact() {
        let mut t = Tree::new(ObjectId::from(bytes::Bytes::new()), CaseSensitivity::Sensitive);
        t.add(entry("a_file")).unwrap();
        assert!(t.find(&PathComponent::try_from("A_FILE").unwrap()).is_none());
    }
}
