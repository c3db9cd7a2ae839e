//! [Pipe] and [SocketPair]: the two kinds of connected descriptor pairs used
//! to wire a parent up to a spawned child (§4.12).

use nix::sys::socket::{self, AddressFamily, SockFlag, SockType};
use nix::unistd;

use crate::errors::{nix_err, Result};
use crate::file_descriptor::{FdKind, FileDescriptor};

/// An anonymous pipe: bytes written to `write` are readable from `read`, in
/// order, until `write` (and every duplicate of it) is closed.
pub struct Pipe {
    pub read: FileDescriptor,
    pub write: FileDescriptor,
}

impl Pipe {
    /// Creates a pipe with both ends close-on-exec, optionally non-blocking.
    pub fn new(non_blocking: bool) -> Result<Self> {
        let mut flags = unistd::OFlag::O_CLOEXEC;
        if non_blocking {
            flags |= unistd::OFlag::O_NONBLOCK;
        }
        let (read, write) = unistd::pipe2(flags).map_err(|e| nix_err("pipe2", e))?;
        Ok(Self {
            read: FileDescriptor::from_owned(read, FdKind::Pipe),
            write: FileDescriptor::from_owned(write, FdKind::Pipe),
        })
    }
}

/// A connected pair of `AF_UNIX`/`SOCK_STREAM` descriptors, usable as a
/// bidirectional alternative to [Pipe] when both ends need to read and
/// write.
pub struct SocketPair {
    pub read: FileDescriptor,
    pub write: FileDescriptor,
}

impl SocketPair {
    pub fn new(non_blocking: bool) -> Result<Self> {
        let mut flags = SockFlag::SOCK_CLOEXEC;
        if non_blocking {
            flags |= SockFlag::SOCK_NONBLOCK;
        }
        let (a, b) = socket::socketpair(AddressFamily::Unix, SockType::Stream, None, flags)
            .map_err(|e| nix_err("socketpair", e))?;
        Ok(Self {
            read: FileDescriptor::from_owned(a, FdKind::Socket),
            write: FileDescriptor::from_owned(b, FdKind::Socket),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_round_trips_bytes() {
        let pipe = Pipe::new(false).unwrap();
        pipe.write.write_full(b"hello").unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(pipe.read.read_full(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn socketpair_is_bidirectional() {
        let pair = SocketPair::new(false).unwrap();
        pair.read.write_full(b"ping").unwrap();
        let mut buf = [0u8; 4];
        pair.write.read_full(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }
}
