use bstr::ByteSlice;
use std::fmt::{self, Debug, Display};

/// A validated path component: the basename of a [crate::Tree] entry.
///
/// Internally a [bytes::Bytes], but disallows slashes and null bytes, as well
/// as `.`, `..` and the empty string, mirroring the restrictions every
/// filesystem entry name must satisfy.
#[repr(transparent)]
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathComponent {
    inner: bytes::Bytes,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("invalid path component: {:?}", .0.as_bstr())]
pub struct InvalidPathComponent(pub bytes::Bytes);

fn is_valid_name<B: AsRef<[u8]>>(name: B) -> bool {
    let v = name.as_ref();
    !v.is_empty() && v != b".." && v != b"." && !v.contains(&0x00) && !v.contains(&b'/')
}

impl PathComponent {
    /// Folds ASCII case, used when a [Tree] is looked up under
    /// case-insensitive comparison.
    pub fn to_ascii_lowercase(&self) -> bytes::Bytes {
        self.inner.to_ascii_lowercase().into()
    }
}

impl AsRef<[u8]> for PathComponent {
    fn as_ref(&self) -> &[u8] {
        self.inner.as_ref()
    }
}

impl From<PathComponent> for bytes::Bytes {
    fn from(value: PathComponent) -> Self {
        value.inner
    }
}

impl TryFrom<bytes::Bytes> for PathComponent {
    type Error = InvalidPathComponent;

    fn try_from(value: bytes::Bytes) -> Result<Self, Self::Error> {
        if !is_valid_name(&value) {
            return Err(InvalidPathComponent(value));
        }
        Ok(Self { inner: value })
    }
}

impl TryFrom<&str> for PathComponent {
    type Error = InvalidPathComponent;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if !is_valid_name(value) {
            return Err(InvalidPathComponent(bytes::Bytes::copy_from_slice(
                value.as_bytes(),
            )));
        }
        Ok(Self {
            inner: bytes::Bytes::copy_from_slice(value.as_bytes()),
        })
    }
}

impl Debug for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Debug::fmt(self.inner.as_bstr(), f)
    }
}

impl Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(self.inner.as_bstr(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_names() {
        assert!(PathComponent::try_from("").is_err());
        assert!(PathComponent::try_from(".").is_err());
        assert!(PathComponent::try_from("..").is_err());
        assert!(PathComponent::try_from("a/b").is_err());
        assert!(PathComponent::try_from("a\0b").is_err());
    }

    #[test]
    fn accepts_valid_name() {
        assert!(PathComponent::try_from("hello.txt").is_ok());
    }
}
