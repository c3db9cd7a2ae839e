use bytes::Bytes;
use std::sync::OnceLock;

use crate::ObjectId;

/// Immutable byte contents of a file, keyed by the [ObjectId] the backing
/// store minted for it.
///
/// Backing stores may hand back content in chunks (e.g. streamed over a
/// subprocess pipe or an HTTP range request); [Blob] preserves that shape
/// until something actually needs a contiguous view, at which point the
/// chunks are coalesced once and cached.
pub struct Blob {
    id: ObjectId,
    chunks: Vec<Bytes>,
    len: u64,
    coalesced: OnceLock<Bytes>,
}

impl Blob {
    /// Builds a `Blob` from a single contiguous buffer.
    pub fn from_bytes(id: ObjectId, bytes: Bytes) -> Self {
        let len = bytes.len() as u64;
        Self {
            id,
            chunks: vec![bytes],
            len,
            coalesced: OnceLock::new(),
        }
    }

    /// Builds a `Blob` from a sequence of chunks, as produced by a chunked
    /// transfer from the backing store.
    pub fn from_chunks(id: ObjectId, chunks: Vec<Bytes>) -> Self {
        let len = chunks.iter().map(|c| c.len() as u64).sum();
        Self {
            id,
            chunks,
            len,
            coalesced: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a contiguous view of the blob's contents, coalescing
    /// multi-chunk buffers on first access.
    pub fn coalesced_bytes(&self) -> &[u8] {
        if self.chunks.len() == 1 {
            return &self.chunks[0];
        }
        self.coalesced
            .get_or_init(|| {
                let mut buf = Vec::with_capacity(self.len as usize);
                for chunk in &self.chunks {
                    buf.extend_from_slice(chunk);
                }
                Bytes::from(buf)
            })
            .as_ref()
    }

    /// Interprets the blob's contents as a UTF-8 string, replacing invalid
    /// sequences as `String::from_utf8_lossy` does.
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(self.coalesced_bytes()).into_owned()
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ObjectId {
        ObjectId::from(Bytes::from_static(b"deadbeef"))
    }

    #[test]
    fn single_chunk_is_not_recopied() {
        let b = Blob::from_bytes(id(), Bytes::from_static(b"hello world"));
        assert_eq!(b.coalesced_bytes(), b"hello world");
        assert_eq!(b.len(), 11);
    }

    #[test]
    fn chunked_blob_coalesces() {
        let b = Blob::from_chunks(
            id(),
            vec![Bytes::from_static(b"hello "), Bytes::from_static(b"world")],
        );
        assert_eq!(b.len(), 11);
        assert_eq!(b.coalesced_bytes(), b"hello world");
        // calling twice must be stable
        assert_eq!(b.coalesced_bytes(), b"hello world");
    }

    #[test]
    fn as_string() {
        let b = Blob::from_bytes(id(), Bytes::from_static(b"some text"));
        assert_eq!(b.as_string(), "some text");
    }
}
