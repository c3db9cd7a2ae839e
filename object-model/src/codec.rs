//! Wire serialization for [Tree], versions 1 and 2.
//!
//! V1 writes only the entry list. V2 appends a trailing digest summary
//! (`digest_size` plus an optional `digest_hash`). Both versions reject any
//! bytes left over after their declared fields are consumed.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    CaseSensitivity, CodecError, EntryKind, Hash20, Hash32, ObjectId, PathComponent, Tree,
    TreeAuxData, TreeEntry, TreeEntryAux,
};

const VERSION_1: u32 = 1;
const VERSION_2: u32 = 2;

bitflags::bitflags! {
    struct AuxFlags: u8 {
        const SHA1 = 0b001;
        const BLAKE3 = 0b010;
        const SIZE = 0b100;
    }
}

fn kind_tag(kind: EntryKind) -> u8 {
    match kind {
        EntryKind::Tree => 0,
        EntryKind::RegularFile => 1,
        EntryKind::ExecutableFile => 2,
        EntryKind::Symlink => 3,
    }
}

fn kind_from_tag(tag: u8) -> Result<EntryKind, CodecError> {
    match tag {
        0 => Ok(EntryKind::Tree),
        1 => Ok(EntryKind::RegularFile),
        2 => Ok(EntryKind::ExecutableFile),
        3 => Ok(EntryKind::Symlink),
        other => Err(CodecError::InvalidKind(other)),
    }
}

fn need(buf: &impl Buf, n: usize) -> Result<(), CodecError> {
    if buf.remaining() < n {
        Err(CodecError::Truncated(n - buf.remaining()))
    } else {
        Ok(())
    }
}

fn write_entry(out: &mut BytesMut, entry: &TreeEntry) {
    let name = entry.name.as_ref();
    out.put_u16(name.len() as u16);
    out.put_slice(name);
    out.put_u8(kind_tag(entry.kind));
    let id = entry.id.as_bytes();
    out.put_u8(id.len() as u8);
    out.put_slice(id);

    match &entry.aux {
        None => out.put_u8(0),
        Some(aux) => {
            out.put_u8(1);
            let mut flags = AuxFlags::empty();
            flags.set(AuxFlags::SHA1, aux.sha1.is_some());
            flags.set(AuxFlags::BLAKE3, aux.blake3.is_some());
            flags.set(AuxFlags::SIZE, aux.size.is_some());
            out.put_u8(flags.bits());
            if let Some(sha1) = &aux.sha1 {
                out.put_slice(sha1.as_slice());
            }
            if let Some(blake3) = &aux.blake3 {
                out.put_slice(blake3.as_slice());
            }
            if let Some(size) = aux.size {
                out.put_u64(size);
            }
        }
    }
}

fn read_entry(buf: &mut Bytes) -> Result<TreeEntry, CodecError> {
    need(buf, 2)?;
    let name_len = buf.get_u16() as usize;
    need(buf, name_len)?;
    let name_bytes = buf.copy_to_bytes(name_len);
    let name = PathComponent::try_from(name_bytes.clone())
        .map_err(|_| CodecError::InvalidTreeEntry(crate::TreeError::InvalidName(name_bytes)))?;

    need(buf, 2)?;
    let kind = kind_from_tag(buf.get_u8())?;
    let id_len = buf.get_u8() as usize;
    need(buf, id_len)?;
    let id = ObjectId::from(buf.copy_to_bytes(id_len));

    need(buf, 1)?;
    let has_aux = buf.get_u8();
    let aux = if has_aux == 0 {
        None
    } else {
        need(buf, 1)?;
        let flags = AuxFlags::from_bits_truncate(buf.get_u8());
        let sha1 = if flags.contains(AuxFlags::SHA1) {
            need(buf, 20)?;
            Some(Hash20::try_from(buf.copy_to_bytes(20).to_vec())?)
        } else {
            None
        };
        let blake3 = if flags.contains(AuxFlags::BLAKE3) {
            need(buf, 32)?;
            Some(Hash32::try_from(buf.copy_to_bytes(32).to_vec())?)
        } else {
            None
        };
        let size = if flags.contains(AuxFlags::SIZE) {
            need(buf, 8)?;
            Some(buf.get_u64())
        } else {
            None
        };
        Some(TreeEntryAux {
            sha1,
            blake3,
            size,
            digest_hash: None,
            digest_size: None,
        })
    };

    Ok(TreeEntry {
        name,
        id,
        kind,
        aux,
    })
}

/// Serializes `tree` using the V1 format (no trailing digest summary).
pub fn encode_v1(tree: &Tree) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u32(VERSION_1);
    out.put_u32(tree.len() as u32);
    for entry in tree.entries() {
        write_entry(&mut out, entry);
    }
    out.freeze()
}

/// Serializes `tree` using the V2 format, appending `aux`'s digest summary.
pub fn encode_v2(tree: &Tree, aux: &TreeAuxData) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u32(VERSION_2);
    out.put_u32(tree.len() as u32);
    for entry in tree.entries() {
        write_entry(&mut out, entry);
    }
    out.put_u64(aux.digest_size);
    match &aux.digest_hash {
        Some(hash) => {
            out.put_u8(1);
            out.put_slice(hash.as_slice());
        }
        None => out.put_u8(0),
    }
    out.freeze()
}

/// Decodes a tree previously produced by [encode_v1] or [encode_v2].
///
/// `id` and `case_sensitivity` are not part of the wire format (they are
/// known from context, e.g. the lookup key used to fetch these bytes) and
/// are supplied by the caller.
pub fn decode(
    mut bytes: Bytes,
    id: ObjectId,
    case_sensitivity: CaseSensitivity,
) -> Result<Tree, CodecError> {
    need(&bytes, 8)?;
    let version = bytes.get_u32();
    if version != VERSION_1 && version != VERSION_2 {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let num_entries = bytes.get_u32();

    let mut tree = Tree::new(id, case_sensitivity);
    for _ in 0..num_entries {
        let entry = read_entry(&mut bytes)?;
        tree.add(entry)?;
    }

    if version == VERSION_2 {
        need(&bytes, 9)?;
        let digest_size = bytes.get_u64();
        let has_hash = bytes.get_u8();
        let digest_hash = if has_hash == 0 {
            None
        } else {
            need(&bytes, 32)?;
            Some(Hash32::try_from(bytes.copy_to_bytes(32).to_vec())?)
        };
        tree.set_aux_data(TreeAuxData {
            digest_size,
            digest_hash,
        });
    }

    if bytes.has_remaining() {
        return Err(CodecError::TrailingBytes(bytes.remaining()));
    }

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Tree {
        let mut tree = Tree::new(ObjectId::from(Bytes::from_static(b"root")), CaseSensitivity::Sensitive);
        tree.add(TreeEntry::new(
            PathComponent::try_from("a.txt").unwrap(),
            ObjectId::from(Bytes::from_static(b"aaaa")),
            EntryKind::RegularFile,
        ).with_aux(TreeEntryAux {
            sha1: None,
            blake3: None,
            size: Some(42),
            digest_hash: None,
            digest_size: None,
        }))
        .unwrap();
        tree.add(TreeEntry::new(
            PathComponent::try_from("subdir").unwrap(),
            ObjectId::from(Bytes::from_static(b"bbbb")),
            EntryKind::Tree,
        ))
        .unwrap();
        tree
    }

    #[test]
    fn v1_roundtrip() {
        let tree = sample_tree();
        let bytes = encode_v1(&tree);
        let decoded = decode(bytes, tree.id().clone(), CaseSensitivity::Sensitive).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded.aux_data().is_none());
        let a = decoded.find(&PathComponent::try_from("a.txt").unwrap()).unwrap();
        assert_eq!(a.aux.as_ref().unwrap().size, Some(42));
    }

    #[test]
    fn v2_roundtrip_with_digest() {
        let tree = sample_tree();
        let aux = TreeAuxData {
            digest_size: 1234,
            digest_hash: Some(Hash32::blake3(b"hello")),
        };
        let bytes = encode_v2(&tree, &aux);
        let decoded = decode(bytes, tree.id().clone(), CaseSensitivity::Sensitive).unwrap();
        let decoded_aux = decoded.aux_data().unwrap();
        assert_eq!(decoded_aux.digest_size, 1234);
        assert_eq!(decoded_aux.digest_hash, Some(Hash32::blake3(b"hello")));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let tree = sample_tree();
        let mut bytes = encode_v1(&tree).to_vec();
        bytes.push(0xff);
        let err = decode(Bytes::from(bytes), tree.id().clone(), CaseSensitivity::Sensitive)
            .unwrap_err();
        assert!(matches!(err, CodecError::TrailingBytes(1)));
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut out = BytesMut::new();
        out.put_u32(99);
        out.put_u32(0);
        let err = decode(
            out.freeze(),
            ObjectId::from(Bytes::new()),
            CaseSensitivity::Sensitive,
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion(99)));
    }
}
