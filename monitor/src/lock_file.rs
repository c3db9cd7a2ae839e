//! The monitor's own `monitor.lock` (§6): an exclusive advisory lock that
//! keeps two monitors from managing the same `edenDir` at once.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::fcntl::{flock, FlockArg};

#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("failed to open lock file {path}: {source}")]
    Open { path: String, source: std::io::Error },

    #[error("another edenfs monitor already holds the lock on {path}")]
    AlreadyLocked { path: String },

    #[error("failed to write pid to lock file {path}: {source}")]
    Write { path: String, source: std::io::Error },
}

/// Holds the open, locked file for as long as this monitor process runs;
/// dropping it releases the `flock` along with the fd.
pub struct LockFile {
    file: File,
}

impl LockFile {
    /// Opens and locks `path`, truncating it and writing our own pid on
    /// success. Returns [LockError::AlreadyLocked] if another process
    /// already holds the lock.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o644)
            .open(path)
            .map_err(|source| LockError::Open { path: path.display().to_string(), source })?;

        set_cloexec(&file);

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {}
            Err(_) => return Err(LockError::AlreadyLocked { path: path.display().to_string() }),
        }

        let mut this = Self { file };
        this.write_pid(std::process::id())
            .map_err(|source| LockError::Write { path: path.display().to_string(), source })?;
        Ok(this)
    }

    fn write_pid(&mut self, pid: u32) -> std::io::Result<()> {
        use std::io::Seek;
        self.file.set_len(0)?;
        self.file.seek(std::io::SeekFrom::Start(0))?;
        write!(self.file, "{pid}")?;
        self.file.flush()
    }
}

fn set_cloexec(file: &File) {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    let _ = fcntl(file.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_our_pid_and_rejects_a_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.lock");

        let lock = LockFile::acquire(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());

        let err = LockFile::acquire(&path);
        assert!(matches!(err, Err(LockError::AlreadyLocked { .. })));

        drop(lock);
        // Once released, a fresh acquire succeeds again.
        assert!(LockFile::acquire(&path).is_ok());
    }
}
