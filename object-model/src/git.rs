//! Parsing and rendering of the git loose-object blob framing:
//! `"blob " <ascii-decimal-size> "\0" <bytes>`.

use bytes::Bytes;

use crate::{Blob, CodecError, ObjectId};

const MAGIC: &[u8] = b"blob ";

/// Parses a git-blob-framed buffer into a [Blob].
///
/// When `owned` is `true`, the returned blob aliases a zero-copy slice of
/// `buf`; otherwise the content is copied. Fails on a missing/wrong magic
/// prefix, an unparseable ASCII size, or a declared size that does not
/// match the actual trailing byte count.
pub fn parse_git_blob(buf: Bytes, id: ObjectId, owned: bool) -> Result<Blob, CodecError> {
    if !buf.starts_with(MAGIC) {
        return Err(CodecError::WrongGitMagic);
    }
    let rest = buf.slice(MAGIC.len()..);
    let nul_pos = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(CodecError::WrongGitMagic)?;

    let size_str =
        std::str::from_utf8(&rest[..nul_pos]).map_err(|_| CodecError::UnparseableGitSize)?;
    let declared: u64 = size_str
        .parse()
        .map_err(|_| CodecError::UnparseableGitSize)?;

    let body = rest.slice(nul_pos + 1..);
    if body.len() as u64 != declared {
        return Err(CodecError::GitSizeMismatch {
            declared,
            actual: body.len(),
        });
    }

    let content = if owned { body } else { Bytes::copy_from_slice(&body) };
    Ok(Blob::from_bytes(id, content))
}

/// Renders `blob` in the git loose-object blob framing.
pub fn render_git_blob(blob: &Blob) -> Bytes {
    let body = blob.coalesced_bytes();
    let mut out = Vec::with_capacity(MAGIC.len() + 20 + 1 + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(blob.len().to_string().as_bytes());
    out.push(0);
    out.extend_from_slice(body);
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ObjectId {
        ObjectId::from(Bytes::from_static(b"xyz"))
    }

    #[test]
    fn roundtrip() {
        let blob = Blob::from_bytes(id(), Bytes::from_static(b"hello world"));
        let framed = render_git_blob(&blob);
        let parsed = parse_git_blob(framed, id(), true).unwrap();
        assert_eq!(parsed.coalesced_bytes(), b"hello world");
    }

    #[test]
    fn rejects_wrong_magic() {
        let buf = Bytes::from_static(b"tree 11\0hello world");
        assert!(matches!(
            parse_git_blob(buf, id(), true),
            Err(CodecError::WrongGitMagic)
        ));
    }

    #[test]
    fn rejects_size_mismatch() {
        let buf = Bytes::from_static(b"blob 999\0hello world");
        assert!(matches!(
            parse_git_blob(buf, id(), true),
            Err(CodecError::GitSizeMismatch {
                declared: 999,
                actual: 11
            })
        ));
    }

    #[test]
    fn rejects_unparseable_size() {
        let buf = Bytes::from_static(b"blob abc\0hello world");
        assert!(matches!(
            parse_git_blob(buf, id(), true),
            Err(CodecError::UnparseableGitSize)
        ));
    }
}
