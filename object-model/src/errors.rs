use bstr::ByteSlice;
use thiserror::Error;

/// Errors raised while building or mutating a [crate::Tree] in memory.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("duplicate entry name: {:?}", .0.as_bstr())]
    DuplicateName(bytes::Bytes),
    #[error("invalid entry name: {:?}", .0.as_bstr())]
    InvalidName(bytes::Bytes),
}

/// Errors raised while decoding a serialized [crate::Tree] or git blob.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unsupported tree wire version: {0}")]
    UnsupportedVersion(u32),
    #[error("truncated tree record: expected at least {0} more bytes")]
    Truncated(usize),
    #[error("{0} trailing bytes after declared fields")]
    TrailingBytes(usize),
    #[error("invalid entry kind tag: {0}")]
    InvalidKind(u8),
    #[error("missing aux-data tail declared present")]
    MissingAuxTail,
    #[error(transparent)]
    InvalidDigest(#[from] crate::digests::Error),
    #[error(transparent)]
    InvalidTreeEntry(#[from] TreeError),
    #[error("wrong git-blob magic")]
    WrongGitMagic,
    #[error("git-blob size mismatch: header said {declared}, body has {actual}")]
    GitSizeMismatch { declared: u64, actual: usize },
    #[error("unparseable git-blob size")]
    UnparseableGitSize,
}
