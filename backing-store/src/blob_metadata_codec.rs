//! On-disk encoding for [edenfs_object_model::BlobMetadata], used only by the
//! local-store write-through cache (the wire format for trees lives in
//! `edenfs_object_model::codec`; blob metadata has no such module there since
//! nothing else needs to serialize it).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use edenfs_object_model::{BlobMetadata, Hash20, Hash32};

use crate::errors::{BackingStoreError, Result};

pub fn encode(meta: &BlobMetadata) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u64(meta.size);
    out.put_slice(meta.sha1.as_slice());
    match &meta.blake3 {
        Some(hash) => {
            out.put_u8(1);
            out.put_slice(hash.as_slice());
        }
        None => out.put_u8(0),
    }
    out.freeze()
}

pub fn decode(mut bytes: Bytes) -> Result<BlobMetadata> {
    if bytes.remaining() < 29 {
        return Err(BackingStoreError::Protocol(
            "truncated blob metadata record".to_string(),
        ));
    }
    let size = bytes.get_u64();
    let sha1 = Hash20::try_from(bytes.copy_to_bytes(20).to_vec())
        .map_err(|e| BackingStoreError::Protocol(e.to_string()))?;
    let has_blake3 = bytes.get_u8();
    let mut meta = BlobMetadata::new(size, sha1);
    if has_blake3 != 0 {
        if bytes.remaining() < 32 {
            return Err(BackingStoreError::Protocol(
                "truncated blob metadata blake3 field".to_string(),
            ));
        }
        let blake3 = Hash32::try_from(bytes.copy_to_bytes(32).to_vec())
            .map_err(|e| BackingStoreError::Protocol(e.to_string()))?;
        meta = meta.with_blake3(blake3);
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_without_blake3() {
        let meta = BlobMetadata::new(42, Hash20::from_sha1(b"x"));
        let decoded = decode(encode(&meta)).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn roundtrip_with_blake3() {
        let meta = BlobMetadata::new(42, Hash20::from_sha1(b"x")).with_blake3(Hash32::blake3(b"x"));
        let decoded = decode(encode(&meta)).unwrap();
        assert_eq!(decoded, meta);
    }
}
