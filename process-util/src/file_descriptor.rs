//! [FileDescriptor]: an owned POSIX file descriptor with the retry-on-EINTR
//! and short-read/short-write handling every caller of raw `read`/`write`
//! otherwise has to reimplement (§4.12).

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::socket::{getsockopt, sockopt::SockType};
use nix::sys::stat::{fstat, SFlag};
use nix::unistd;

use crate::errors::{io_err, nix_err, Result};

/// What sort of stream a descriptor turned out to be, resolved lazily since
/// a descriptor's kind generally isn't known until it's inspected with
/// `fstat`/`getsockopt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    Unknown,
    Generic,
    Pipe,
    Socket,
}

/// An owned file descriptor, closed on drop.
pub struct FileDescriptor {
    fd: OwnedFd,
    kind: FdKind,
}

impl FileDescriptor {
    /// Takes ownership of an already-open descriptor.
    pub fn from_owned(fd: OwnedFd, kind: FdKind) -> Self {
        Self { fd, kind }
    }

    /// # Safety
    /// `raw` must be a valid, open, uniquely-owned descriptor.
    pub unsafe fn from_raw(raw: RawFd, kind: FdKind) -> Self {
        Self {
            fd: OwnedFd::from_raw_fd(raw),
            kind,
        }
    }

    pub fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn kind(&self) -> FdKind {
        self.kind
    }

    /// Probes the descriptor's kind via `getsockopt`/`fstat`, returning the
    /// resolved value and caching nothing (callers are expected to track
    /// the kind themselves once known, as when a [crate::Pipe] is created).
    pub fn resolve_kind(&self) -> FdKind {
        if self.kind != FdKind::Unknown {
            return self.kind;
        }
        if getsockopt(&self.fd, SockType).is_ok() {
            return FdKind::Socket;
        }
        match fstat(&self.fd) {
            Ok(st) if SFlag::from_bits_truncate(st.st_mode).contains(SFlag::S_IFIFO) => FdKind::Pipe,
            _ => FdKind::Generic,
        }
    }

    /// Stops owning the descriptor, handing it to the caller to manage
    /// (typically to pass across a `fork`/`exec` boundary).
    pub fn into_raw(self) -> RawFd {
        self.fd.into_raw_fd()
    }

    pub fn duplicate(&self) -> Result<FileDescriptor> {
        let new_fd = unistd::dup(self.fd.as_raw_fd()).map_err(|e| nix_err("dup", e))?;
        Ok(FileDescriptor {
            fd: unsafe { OwnedFd::from_raw_fd(new_fd) },
            kind: self.kind,
        })
    }

    pub fn set_close_on_exec(&self) -> Result<()> {
        fcntl(&self.fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(|e| nix_err("fcntl(F_SETFD)", e))?;
        Ok(())
    }

    pub fn clear_close_on_exec(&self) -> Result<()> {
        fcntl(&self.fd, FcntlArg::F_SETFD(FdFlag::empty())).map_err(|e| nix_err("fcntl(F_SETFD)", e))?;
        Ok(())
    }

    pub fn set_non_blocking(&self) -> Result<()> {
        self.set_o_nonblock(true)
    }

    pub fn clear_non_blocking(&self) -> Result<()> {
        self.set_o_nonblock(false)
    }

    fn set_o_nonblock(&self, enable: bool) -> Result<()> {
        let raw_flags = fcntl(&self.fd, FcntlArg::F_GETFL).map_err(|e| nix_err("fcntl(F_GETFL)", e))?;
        let mut flags = OFlag::from_bits_truncate(raw_flags);
        flags.set(OFlag::O_NONBLOCK, enable);
        fcntl(&self.fd, FcntlArg::F_SETFL(flags)).map_err(|e| nix_err("fcntl(F_SETFL)", e))?;
        Ok(())
    }

    /// A single `read(2)`: may return fewer bytes than `buf.len()`.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        unistd::read(self.fd.as_raw_fd(), buf).map_err(|e| nix_err("read", e))
    }

    /// Reads until `buf` is completely filled or EOF, retrying on `EINTR`
    /// and short reads. Returns the number of bytes actually read, which is
    /// less than `buf.len()` only at EOF.
    pub fn read_full(&self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(_) => return Err(io_err("read", std::io::Error::last_os_error())),
            }
        }
        Ok(total)
    }

    /// A single scatter `readv(2)`.
    pub fn readv(&self, bufs: &mut [std::io::IoSliceMut<'_>]) -> Result<usize> {
        unistd::readv(self.fd.as_raw_fd(), bufs).map_err(|e| nix_err("readv", e))
    }

    /// `readv` retried on `EINTR` and short reads until every buffer is full
    /// or EOF is reached.
    pub fn readv_full(&self, bufs: &mut [std::io::IoSliceMut<'_>]) -> Result<usize> {
        let mut total = 0;
        let mut remaining = &mut bufs[..];
        while !remaining.is_empty() {
            match self.readv(remaining) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    std::io::IoSliceMut::advance_slices(&mut remaining, n);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        unistd::write(self.fd.as_raw_fd(), buf).map_err(|e| nix_err("write", e))
    }

    /// A single gather `writev(2)`.
    pub fn writev(&self, bufs: &[std::io::IoSlice<'_>]) -> Result<usize> {
        unistd::writev(self.fd.as_raw_fd(), bufs).map_err(|e| nix_err("writev", e))
    }

    /// `writev` retried on `EINTR` and partial writes until every buffer is
    /// fully written.
    pub fn writev_full(&self, bufs: &mut [std::io::IoSlice<'_>]) -> Result<()> {
        let mut remaining = &mut bufs[..];
        while !remaining.is_empty() {
            let n = self.writev(remaining)?;
            if n == 0 {
                return Err(io_err(
                    "writev",
                    std::io::Error::new(std::io::ErrorKind::WriteZero, "writev returned 0"),
                ));
            }
            std::io::IoSlice::advance_slices(&mut remaining, n);
        }
        Ok(())
    }

    /// Writes all of `buf`, retrying on `EINTR` and partial writes.
    pub fn write_full(&self, buf: &[u8]) -> Result<()> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.write(&buf[total..])?;
            if n == 0 {
                return Err(io_err(
                    "write",
                    std::io::Error::new(std::io::ErrorKind::WriteZero, "write returned 0"),
                ));
            }
            total += n;
        }
        Ok(())
    }
}

impl AsRawFd for FileDescriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for FileDescriptor {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::FromRawFd;

    fn owned_pipe() -> (FileDescriptor, FileDescriptor) {
        let (r, w) = unistd::pipe().unwrap();
        unsafe {
            (
                FileDescriptor::from_raw(r.into_raw_fd(), FdKind::Pipe),
                FileDescriptor::from_raw(w.into_raw_fd(), FdKind::Pipe),
            )
        }
    }

    #[test]
    fn write_then_read_full_round_trips() {
        let (r, w) = owned_pipe();
        w.write_full(b"hello").unwrap();
        let mut buf = [0u8; 5];
        let n = r.read_full(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn duplicate_shares_the_same_underlying_stream() {
        let (r, w) = owned_pipe();
        let w2 = w.duplicate().unwrap();
        w2.write_full(b"hi").unwrap();
        let mut buf = [0u8; 2];
        r.read_full(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn non_blocking_read_on_empty_pipe_does_not_block() {
        let (r, _w) = owned_pipe();
        r.set_non_blocking().unwrap();
        let mut buf = [0u8; 1];
        let err = r.read(&mut buf).unwrap_err();
        match err {
            crate::errors::ProcessError::Io { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::WouldBlock);
            }
            _ => panic!("expected Io error"),
        }
    }
}
