//! Log rotation strategies (§4.10). [LogFile] renames the live log file
//! through a [LogRotationStrategy] and hands the rotated path to a
//! background thread for pruning.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Implements the two-phase rotation protocol: `rename_main_log_file` runs
/// on the logging thread and must be fast; `perform_rotation` runs on the
/// dedicated rotation thread and may block.
pub trait LogRotationStrategy: Send {
    fn init(&mut self, path: &Path);
    fn rename_main_log_file(&mut self, path: &Path) -> std::io::Result<PathBuf>;
    fn perform_rotation(&mut self, rotated_path: &Path);
}

type FileSuffix = (u32, u32, u32);

const TIMESTAMP_LEN: usize = 8 + 1 + 6;

/// Appends a local-time `YYYYMMDD.HHMMSS[.N]` suffix to the log file name on
/// each rotation, keeping only the `num_files_to_keep` newest.
pub struct TimestampLogRotation {
    num_files_to_keep: usize,
    last_rotation_time: i64,
    next_suffix: u32,
}

impl TimestampLogRotation {
    pub fn new(num_files_to_keep: usize) -> Self {
        Self { num_files_to_keep, last_rotation_time: 0, next_suffix: 0 }
    }

    fn local_broken_down_time() -> libc::tm {
        unsafe {
            let now = libc::time(std::ptr::null_mut());
            let mut out: libc::tm = std::mem::zeroed();
            if libc::localtime_r(&now, &mut out).is_null() {
                out = std::mem::zeroed();
            }
            out
        }
    }

    fn compute_new_path(&mut self, path: &Path) -> PathBuf {
        let now = unsafe { libc::time(std::ptr::null_mut()) };
        let tm = Self::local_broken_down_time();

        let suffix_num = if now != self.last_rotation_time {
            self.next_suffix = 0;
            self.last_rotation_time = now;
            0
        } else {
            self.next_suffix += 1;
            self.next_suffix
        };

        let basename = path.file_name().and_then(|n| n.to_str()).unwrap_or("log");
        let mut name = format!(
            "{}-{:04}{:02}{:02}.{:02}{:02}{:02}",
            basename,
            tm.tm_year + 1900,
            tm.tm_mon + 1,
            tm.tm_mday,
            tm.tm_hour,
            tm.tm_min,
            tm.tm_sec,
        );
        if suffix_num != 0 {
            name = format!("{}.{}", name, suffix_num);
        }
        path.parent().unwrap_or_else(|| Path::new(".")).join(name)
    }

    fn parse_log_suffix(str: &str) -> Option<FileSuffix> {
        if str.len() < TIMESTAMP_LEN {
            return None;
        }
        if str.as_bytes()[8] != b'.' {
            return None;
        }
        let date_num: u32 = str[0..8].parse().ok()?;
        let time_num: u32 = str[9..15].parse().ok()?;
        if str.len() == TIMESTAMP_LEN {
            return Some((date_num, time_num, 0));
        }
        if str.as_bytes()[TIMESTAMP_LEN] != b'.' {
            return None;
        }
        let suffix_num: u32 = str[TIMESTAMP_LEN + 1..].parse().ok()?;
        Some((date_num, time_num, suffix_num))
    }

    fn append_log_suffix(prefix: &str, suffix: FileSuffix) -> String {
        let (date, time, n) = suffix;
        if n == 0 {
            format!("{prefix}{date:08}.{time:06}")
        } else {
            format!("{prefix}{date:08}.{time:06}.{n}")
        }
    }

    fn remove_old_log_files(&self, path: &Path) {
        let dir = match path.parent() {
            Some(d) => d,
            None => return,
        };
        let basename = path.file_name().and_then(|n| n.to_str()).unwrap_or("log");
        let prefix = format!("{basename}-");

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "error cleaning up old log files");
                return;
            }
        };

        // Smallest-first heap of every rotated file found, keyed by its
        // parsed suffix so lexicographic (date, time, seq) order matches
        // chronological order.
        let mut found: Vec<(FileSuffix, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let file_name = match file_name.to_str() {
                Some(s) => s,
                None => continue,
            };
            let Some(rest) = file_name.strip_prefix(&prefix) else { continue };
            let Some(suffix) = Self::parse_log_suffix(rest) else { continue };
            found.push((suffix, entry.path()));
        }
        found.sort_by_key(|(suffix, _)| *suffix);

        if found.len() > self.num_files_to_keep {
            for (_, stale_path) in &found[..found.len() - self.num_files_to_keep] {
                if let Err(e) = fs::remove_file(stale_path) {
                    warn!(path = %stale_path.display(), error = %e, "error removing rotated log file");
                }
            }
        }
    }
}

impl LogRotationStrategy for TimestampLogRotation {
    fn init(&mut self, path: &Path) {
        self.remove_old_log_files(path);
    }

    fn rename_main_log_file(&mut self, path: &Path) -> std::io::Result<PathBuf> {
        let new_path = self.compute_new_path(path);
        fs::rename(path, &new_path)?;
        Ok(new_path)
    }

    fn perform_rotation(&mut self, rotated_path: &Path) {
        // `rotated_path` names the just-rotated file; pruning works off the
        // live path's directory and prefix, which is the same directory.
        self.remove_old_log_files(rotated_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_suffix_round_trips_through_append() {
        let suffix = (20240131, 235959, 0);
        let name = TimestampLogRotation::append_log_suffix("edenfs.log-", suffix);
        assert_eq!(TimestampLogRotation::parse_log_suffix(&name["edenfs.log-".len()..]), Some(suffix));
    }

    #[test]
    fn parse_log_suffix_rejects_short_or_malformed_strings() {
        assert_eq!(TimestampLogRotation::parse_log_suffix("short"), None);
        assert_eq!(TimestampLogRotation::parse_log_suffix("2024013a.235959"), None);
        assert_eq!(TimestampLogRotation::parse_log_suffix("20240131x235959"), None);
    }

    #[test]
    fn parse_log_suffix_accepts_numeric_collision_suffix() {
        assert_eq!(TimestampLogRotation::parse_log_suffix("20240131.235959.3"), Some((20240131, 235959, 3)));
    }

    #[test]
    fn remove_old_log_files_keeps_only_the_newest_n() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("edenfs.log");
        let names = [
            "edenfs.log-20240101.000000",
            "edenfs.log-20240102.000000",
            "edenfs.log-20240103.000000",
            "edenfs.log-20240104.000000",
        ];
        for name in names {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let rotation = TimestampLogRotation::new(2);
        rotation.remove_old_log_files(&log_path);

        let remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&"edenfs.log-20240103.000000".to_string()));
        assert!(remaining.contains(&"edenfs.log-20240104.000000".to_string()));
    }
}
