//! [LogFile]: an append-only log with synchronous size-triggered rotation
//! and a background thread that performs the slower cleanup work (§4.10).

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::log_rotation::LogRotationStrategy;

/// `None` is the sentinel entry that tells the rotation thread to exit.
type RotateQueue = VecDeque<Option<PathBuf>>;

struct RotateShared {
    queue: Mutex<RotateQueue>,
    cv: Condvar,
    strategy: Mutex<Option<Box<dyn LogRotationStrategy>>>,
}

pub struct LogFile {
    path: PathBuf,
    log: File,
    log_size: u64,
    max_log_size: u64,
    shared: Arc<RotateShared>,
    rotation_thread: Option<JoinHandle<()>>,
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).write(true).append(true).mode(0o644).open(path)
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>, max_size: u64, rotation_strategy: Option<Box<dyn LogRotationStrategy>>) -> std::io::Result<Self> {
        let path = path.into();
        let log = open_log_file(&path)?;
        let log_size = log.metadata().map(|m| m.len()).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "unable to get file size of log file");
            0
        });

        let shared = Arc::new(RotateShared {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            strategy: Mutex::new(rotation_strategy),
        });
        if let Some(strategy) = shared.strategy.lock().as_mut() {
            strategy.init(&path);
        }

        let rotation_thread = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || run_rotate_thread(shared))
        };

        Ok(Self {
            path,
            log,
            log_size,
            max_log_size: max_size,
            shared,
            rotation_thread: Some(rotation_thread),
        })
    }

    pub fn fd(&self) -> std::os::fd::RawFd {
        std::os::fd::AsRawFd::as_raw_fd(&self.log)
    }

    /// Writes the full buffer, even if doing so pushes the file past
    /// `max_log_size` — better to risk one oversized file than split a
    /// message mid-write.
    pub fn write(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.log.write_all(buf)?;
        self.log_size += buf.len() as u64;
        if self.log_size >= self.max_log_size {
            self.rotate();
        }
        Ok(())
    }

    fn rotate(&mut self) {
        debug!(path = %self.path.display(), "rotating log file");

        let mut strategy = self.shared.strategy.lock();
        let Some(strategy) = strategy.as_mut() else {
            // No rotation configured: keep appending to the same file.
            return;
        };

        let rotated_path = match strategy.rename_main_log_file(&self.path) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to rename log file for rotation");
                None
            }
        };
        drop(strategy);

        let new_log = match open_log_file(&self.path) {
            Ok(f) => f,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "failed to reopen log file after rotation");
                return;
            }
        };

        self.trigger_background_rotation(rotated_path);
        self.log = new_log;
        self.log_size = 0;
    }

    fn trigger_background_rotation(&self, path: Option<PathBuf>) {
        self.shared.queue.lock().push_back(path);
        self.shared.cv.notify_one();
    }
}

fn run_rotate_thread(shared: Arc<RotateShared>) {
    loop {
        let mut guard = shared.queue.lock();
        shared.cv.wait_while(&mut guard, |q| q.is_empty());
        let Some(entry) = guard.pop_front() else { continue };
        drop(guard);
        let Some(path) = entry else {
            // Sentinel: shut down.
            break;
        };
        if let Some(strategy) = shared.strategy.lock().as_mut() {
            strategy.perform_rotation(&path);
        }
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        self.trigger_background_rotation(None);
        if let Some(handle) = self.rotation_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_rotation::TimestampLogRotation;

    #[test]
    fn write_accumulates_size_and_rotates_past_the_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edenfs.log");
        let mut log = LogFile::new(path.as_path(), 8, Some(Box::new(TimestampLogRotation::new(5)))).unwrap();
        log.write(b"1234").unwrap();
        assert_eq!(log.log_size, 4);
        log.write(b"56789").unwrap();
        // Crossed max_log_size, so rotation fired and a fresh empty file was opened.
        assert_eq!(log.log_size, 0);
        assert!(path.exists());
        drop(log);

        let rotated: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_str().unwrap().to_owned())
            .filter(|n| n.starts_with("edenfs.log-"))
            .collect();
        assert_eq!(rotated.len(), 1);
    }
}
