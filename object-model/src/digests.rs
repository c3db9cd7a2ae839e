use bytes::Bytes;
use data_encoding::HEXLOWER;
use thiserror::Error;

pub const HASH20_LEN: usize = 20;
pub const HASH32_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid digest length: {0}, expected {1}")]
    InvalidDigestLen(usize, usize),
    #[error("invalid hex digest: {0}")]
    InvalidHex(String),
}

/// A 20-byte content digest: SHA-1, or an hg/git manifest node id.
#[derive(PartialEq, Eq, Hash, Clone)]
pub struct Hash20(Bytes);

impl Hash20 {
    pub fn from_sha1(bytes: &[u8]) -> Self {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        Self(Bytes::copy_from_slice(&digest))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0[..]
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let bytes = HEXLOWER
            .decode(s.to_ascii_lowercase().as_bytes())
            .map_err(|_| Error::InvalidHex(s.to_string()))?;
        Self::try_from(bytes)
    }
}

impl TryFrom<Vec<u8>> for Hash20 {
    type Error = Error;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        if value.len() != HASH20_LEN {
            Err(Error::InvalidDigestLen(value.len(), HASH20_LEN))
        } else {
            Ok(Self(value.into()))
        }
    }
}

impl TryFrom<&[u8]> for Hash20 {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != HASH20_LEN {
            Err(Error::InvalidDigestLen(value.len(), HASH20_LEN))
        } else {
            Ok(Self(Bytes::copy_from_slice(value)))
        }
    }
}

impl From<&[u8; HASH20_LEN]> for Hash20 {
    fn from(value: &[u8; HASH20_LEN]) -> Self {
        Self(Bytes::copy_from_slice(value))
    }
}

impl From<Hash20> for [u8; HASH20_LEN] {
    fn from(value: Hash20) -> Self {
        value.0.to_vec().try_into().unwrap()
    }
}

impl std::fmt::Display for Hash20 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for Hash20 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash20({})", self.to_hex())
    }
}

/// A 32-byte BLAKE3 content digest.
#[derive(PartialEq, Eq, Hash, Clone)]
pub struct Hash32(Bytes);

impl Hash32 {
    /// Computes the unkeyed BLAKE3 digest of `bytes`.
    pub fn blake3(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(blake3::hash(bytes).as_bytes()))
    }

    /// Computes the keyed BLAKE3 digest of `bytes` under `key`.
    ///
    /// Used by [`ObjectStore::compute_blake3`](crate) when a process-wide key has
    /// been configured, so that blob digests aren't directly comparable to
    /// publicly-known BLAKE3 hashes of the same bytes.
    pub fn keyed_blake3(key: &[u8; 32], bytes: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_keyed(key);
        hasher.update(bytes);
        Self(Bytes::copy_from_slice(hasher.finalize().as_bytes()))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0[..]
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let bytes = HEXLOWER
            .decode(s.to_ascii_lowercase().as_bytes())
            .map_err(|_| Error::InvalidHex(s.to_string()))?;
        Self::try_from(bytes)
    }
}

impl TryFrom<Vec<u8>> for Hash32 {
    type Error = Error;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        if value.len() != HASH32_LEN {
            Err(Error::InvalidDigestLen(value.len(), HASH32_LEN))
        } else {
            Ok(Self(value.into()))
        }
    }
}

impl TryFrom<&[u8]> for Hash32 {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != HASH32_LEN {
            Err(Error::InvalidDigestLen(value.len(), HASH32_LEN))
        } else {
            Ok(Self(Bytes::copy_from_slice(value)))
        }
    }
}

impl From<&[u8; HASH32_LEN]> for Hash32 {
    fn from(value: &[u8; HASH32_LEN]) -> Self {
        Self(Bytes::copy_from_slice(value))
    }
}

impl From<Hash32> for [u8; HASH32_LEN] {
    fn from(value: Hash32) -> Self {
        value.0.to_vec().try_into().unwrap()
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "blake3:{}", self.to_hex())
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash20_hex_roundtrip() {
        let h = Hash20::from_sha1(b"hello");
        let hex = h.to_hex();
        assert_eq!(Hash20::from_hex(&hex).unwrap(), h);
    }

    #[test]
    fn hash32_hex_roundtrip() {
        let h = Hash32::blake3(b"hello");
        let hex = h.to_hex();
        assert_eq!(Hash32::from_hex(&hex).unwrap(), h);
    }

    #[test]
    fn hash32_keyed_differs_from_unkeyed() {
        let key = [7u8; 32];
        let keyed = Hash32::keyed_blake3(&key, b"hello");
        let unkeyed = Hash32::blake3(b"hello");
        assert_ne!(keyed, unkeyed);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            Hash32::try_from(vec![0u8; 31]).unwrap_err(),
            Error::InvalidDigestLen(31, HASH32_LEN)
        );
    }
}
