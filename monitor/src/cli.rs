//! Command-line flags for the monitor binary (§6), parsed with `clap`'s
//! derive API. Flag spellings match §6 exactly (including its mix of
//! snake_case and camelCase) since the `--childEdenFSPid`/`--childEdenFSPipe`
//! pair must round-trip through [crate::monitor::EdenMonitor]'s self-exec.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Supervises and restarts the EdenFS daemon", long_about = None)]
pub struct MonitorArgs {
    /// Executable path for spawning a fresh edenfs daemon.
    #[arg(long, default_value = "/usr/local/libexec/eden/edenfs")]
    pub edenfs: PathBuf,

    /// Path to the edenfsctl CLI companion, if any operations need it.
    #[arg(long)]
    pub edenfsctl: Option<PathBuf>,

    /// Fallback log-forwarder binary, used if a spawned daemon's log pipe
    /// outlives the daemon itself.
    #[arg(long = "cat_exe", default_value = "/bin/cat")]
    pub cat_exe: PathBuf,

    /// Poll period, in milliseconds, for checking the liveness of an
    /// already-running daemon this monitor did not spawn.
    #[arg(long = "edenfs_poll_interval_ms", default_value_t = 5000)]
    pub edenfs_poll_interval_ms: u64,

    /// The directory owning `edenfs`'s state (`logs/`, `socket`, `monitor.lock`).
    #[arg(long = "eden_dir")]
    pub eden_dir: PathBuf,

    /// Maximum size, in bytes, the log file is allowed to reach before it is
    /// rotated. A value of 0 disables rotation entirely.
    #[arg(long = "max_log_file_size", default_value_t = 100 * 1024 * 1024)]
    pub max_log_file_size: u64,

    /// Number of rotated log files to keep once rotation is enabled.
    #[arg(long = "max_rotated_log_files", default_value_t = 10)]
    pub max_rotated_log_files: usize,

    /// Internal: set when this process is performing an in-place restart of
    /// itself (triggered by `SIGHUP`).
    #[arg(long)]
    pub restart: bool,

    /// Internal: the pid of an existing edenfs child process to take over,
    /// only meaningful alongside `--restart`.
    #[arg(long = "childEdenFSPid")]
    pub child_eden_fs_pid: Option<i32>,

    /// Internal: the log pipe fd inherited from the process that execed us,
    /// only meaningful alongside `--restart`.
    #[arg(long = "childEdenFSPipe")]
    pub child_eden_fs_pipe: Option<i32>,

    /// Run in the foreground instead of forking off a daemonized child.
    #[arg(long)]
    pub foreground: bool,

    /// Internal: fd of the pipe a daemonizing parent is waiting on for our
    /// startup status byte.
    #[arg(long = "startupLoggerFd")]
    pub startup_logger_fd: Option<i32>,

    /// In foreground mode, additionally append startup messages to this file.
    #[arg(long = "startupLogPath")]
    pub startup_log_path: Option<PathBuf>,

    /// Extra arguments forwarded verbatim to the spawned edenfs process,
    /// following a literal `--`.
    #[arg(last = true)]
    pub edenfs_args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_required_arguments() {
        let args = MonitorArgs::parse_from(["edenfs_monitor", "--eden_dir", "/tmp/eden"]);
        assert_eq!(args.eden_dir, PathBuf::from("/tmp/eden"));
        assert_eq!(args.edenfs, PathBuf::from("/usr/local/libexec/eden/edenfs"));
        assert_eq!(args.edenfs_poll_interval_ms, 5000);
        assert!(!args.restart);
    }

    #[test]
    fn parses_restart_takeover_flags() {
        let args = MonitorArgs::parse_from([
            "edenfs_monitor",
            "--eden_dir",
            "/tmp/eden",
            "--restart",
            "--childEdenFSPid",
            "1234",
            "--childEdenFSPipe",
            "9",
        ]);
        assert!(args.restart);
        assert_eq!(args.child_eden_fs_pid, Some(1234));
        assert_eq!(args.child_eden_fs_pipe, Some(9));
    }
}
