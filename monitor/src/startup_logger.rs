//! [StartupLogger] and the daemonisation handshake (§4.11): messages
//! logged while `edenfs` initializes, routed to whichever of the three
//! startup modes this process is running in, plus a final
//! success/exit-unsuccessfully call that also signals the original
//! foreground process when daemonizing.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::fd::FromRawFd;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use edenfs_process_util::{FileDescriptor, Options, SpawnedProcess};
use nix::unistd::setsid;
use tracing::{info, warn};

use crate::session_id::session_id;

/// `sysexits.h`'s `EX_SOFTWARE`/`EX_IOERR`, used verbatim by the original
/// implementation on POSIX and under `#ifdef _WIN32` elsewhere.
const EX_SOFTWARE: i32 = 70;
const EX_IOERR: i32 = 74;

pub trait StartupLogger {
    fn write_message_impl(&mut self, level: tracing::Level, message: &str);

    fn log(&mut self, message: &str) {
        self.write_message(tracing::Level::DEBUG, message);
    }

    fn warn(&mut self, message: &str) {
        self.write_message(tracing::Level::WARN, message);
    }

    fn write_message(&mut self, level: tracing::Level, message: &str) {
        match level {
            tracing::Level::ERROR => tracing::error!("{message}"),
            tracing::Level::WARN => warn!("{message}"),
            _ => info!("{message}"),
        }
        self.write_message_impl(level, message);
    }

    /// Formats and emits the one-line startup success message, then
    /// delegates to the mode-specific completion handling.
    fn success(&mut self, startup_seconds: u64) {
        let message = format!(
            "Started EdenFS (pid {}, session_id {}) in {}s",
            std::process::id(),
            session_id(),
            startup_seconds
        );
        self.write_message(tracing::Level::INFO, &message);
        self.success_impl();
    }

    fn success_impl(&mut self);

    /// Logs `message` at ERROR and terminates the process; in daemon mode
    /// this also unblocks the waiting foreground parent.
    fn exit_unsuccessfully(&mut self, exit_code: i32, message: &str) -> ! {
        self.write_message(tracing::Level::ERROR, message);
        self.fail_and_exit_impl(exit_code)
    }

    fn fail_and_exit_impl(&mut self, exit_code: i32) -> !;
}

/// The daemonizing mode: spawned from [DaemonStartupLogger::spawn] (run by
/// the original foreground process, never returns) or constructed in the
/// spawned child via [DaemonStartupLogger::from_inherited_pipe].
pub struct DaemonStartupLogger {
    orig_stderr: Option<File>,
    log_path: String,
    pipe: Option<FileDescriptor>,
}

impl DaemonStartupLogger {
    /// Spawns a `--foreground` copy of this binary with the given `argv`,
    /// waits for it to report its initialization status over a pipe, prints
    /// any error, and exits this process — this call never returns.
    pub fn spawn(mut self, log_path: &str, argv: &[String]) -> ! {
        match self.spawn_impl(log_path, argv) {
            Ok((process, exit_status_pipe)) => self.run_parent_process(process, exit_status_pipe, log_path),
            Err(e) => {
                eprintln!("unexpected error in daemonization parent process: {e}");
                std::process::exit(EX_SOFTWARE);
            }
        }
    }

    fn spawn_impl(&mut self, log_path: &str, argv: &[String]) -> edenfs_process_util::Result<(SpawnedProcess, FileDescriptor)> {
        let exe_path = std::env::current_exe().map_err(|e| edenfs_process_util::ProcessError::Spawn(e.to_string()))?;

        let mut options = Options::new();
        options.executable_path(exe_path.as_path());
        options.null_stdin()?;

        // Preserve a trailing `-- extra args` group at the tail of argv.
        let split = argv.iter().position(|a| a == "--").unwrap_or(argv.len());
        let (head, tail) = argv.split_at(split);

        let mut args: Vec<String> = head.to_vec();
        args.push("--foreground".to_string());
        args.push("--logPath".to_string());
        args.push(log_path.to_string());

        // The child writes its single-byte result here; we keep the read end.
        options.pipe(EXIT_STATUS_PIPE_FD, false)?;
        args.push("--startupLoggerFd".to_string());
        args.push(EXIT_STATUS_PIPE_FD.to_string());
        args.extend(tail.iter().cloned());

        let mut process = SpawnedProcess::new(&args, options)?;
        let exit_status_pipe = process.parent_fd(EXIT_STATUS_PIPE_FD).expect("exit status pipe was just configured");
        Ok((process, exit_status_pipe))
    }

    fn run_parent_process(&mut self, mut process: SpawnedProcess, mut pipe: FileDescriptor, log_path: &str) -> ! {
        let (exit_code, message) = self.wait_for_child_status(&mut pipe, &mut process, log_path);
        if !message.is_empty() {
            eprintln!("{message}");
        }
        std::process::exit(exit_code);
    }

    fn wait_for_child_status(&mut self, pipe: &mut FileDescriptor, process: &mut SpawnedProcess, log_path: &str) -> (i32, String) {
        let mut status = [0u8; 1];
        match pipe.read_full(&mut status) {
            Ok(1) => (status[0] as i32, String::new()),
            Ok(_) => {
                let (code, mut message) = self.handle_child_crash(process);
                message.push_str(&format!("\nCheck the EdenFS log file at {log_path} for more details"));
                (code, message)
            }
            Err(e) => (EX_SOFTWARE, format!("error reading status of EdenFS initialization: {e}")),
        }
    }

    fn handle_child_crash(&mut self, process: &mut SpawnedProcess) -> (i32, String) {
        const MAX_RETRIES: u32 = 5;
        const RETRY_SLEEP: Duration = Duration::from_millis(100);

        let mut retries = 0;
        loop {
            if process.terminated() {
                let status = process.wait().unwrap_or_else(|_| process.status());
                if status.kill_signal() != 0 {
                    return (
                        EX_SOFTWARE,
                        format!("error: EdenFS crashed with status {status} before it finished initializing"),
                    );
                }
                let mut exit_code = status.exit_status();
                if exit_code == 0 {
                    exit_code = EX_SOFTWARE;
                }
                return (exit_code, format!("error: EdenFS {status} before it finished initializing"));
            }

            if retries < MAX_RETRIES {
                retries += 1;
                std::thread::sleep(RETRY_SLEEP);
                continue;
            }

            return (EX_SOFTWARE, "error: EdenFS is still running but did not report its initialization status".to_string());
        }
    }

    /// Configures this logger as the client side of the pipe set up by
    /// [DaemonStartupLogger::spawn], called by the freshly-exec'd child
    /// after it parses `--startupLoggerFd`.
    pub fn from_inherited_pipe(log_path: &str, pipe: FileDescriptor) -> std::io::Result<Self> {
        nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
            .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
        let mut this = Self { orig_stderr: None, log_path: log_path.to_string(), pipe: Some(pipe) };
        this.redirect_output(log_path)?;
        Ok(this)
    }

    fn redirect_output(&mut self, log_path: &str) -> std::io::Result<()> {
        self.log_path = log_path.to_string();

        let orig = unsafe { std::os::fd::OwnedFd::from_raw_fd(nix::unistd::dup(libc::STDERR_FILENO).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?) };
        self.orig_stderr = Some(File::from(orig));

        let log_file = OpenOptions::new().create(true).append(true).mode(0o644).open(log_path)?;
        let log_fd = log_file.as_raw_fd();
        nix::unistd::dup2(log_fd, libc::STDOUT_FILENO).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
        nix::unistd::dup2(log_fd, libc::STDERR_FILENO).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
        Ok(())
    }

    fn send_result(&mut self, result: u8) {
        self.orig_stderr = None;
        if let Some(pipe) = self.pipe.take() {
            if let Err(e) = pipe.write_full(&[result]) {
                warn!("error writing result to startup log pipe: {e}");
            }
        }
        let _ = setsid();
    }
}

/// The fd number the spawned child sees its `--startupLoggerFd` pipe under.
const EXIT_STATUS_PIPE_FD: i32 = 3;

impl StartupLogger for DaemonStartupLogger {
    fn write_message_impl(&mut self, _level: tracing::Level, message: &str) {
        if let Some(file) = &mut self.orig_stderr {
            let _ = writeln!(file, "{message}");
        }
    }

    fn success_impl(&mut self) {
        if !self.log_path.is_empty() {
            let message = format!("Logs available at {}", self.log_path);
            self.write_message_impl(tracing::Level::INFO, &message);
        }
        self.send_result(0);
    }

    fn fail_and_exit_impl(&mut self, exit_code: i32) -> ! {
        self.send_result(exit_code as u8);
        std::process::exit(exit_code);
    }
}

/// The non-daemonizing, `--foreground` mode: messages already went to
/// stderr via `tracing`, so there is nothing extra to do here.
pub struct ForegroundStartupLogger;

impl StartupLogger for ForegroundStartupLogger {
    fn write_message_impl(&mut self, _level: tracing::Level, _message: &str) {}

    fn success_impl(&mut self) {}

    fn fail_and_exit_impl(&mut self, exit_code: i32) -> ! {
        std::process::exit(exit_code);
    }
}

/// `--startupLogPath <file>` mode: appends every message to a plain file in
/// addition to the normal `tracing` output.
pub struct FileStartupLogger {
    file: File,
}

impl FileStartupLogger {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl StartupLogger for FileStartupLogger {
    fn write_message_impl(&mut self, _level: tracing::Level, message: &str) {
        let _ = writeln!(self.file, "{message}");
    }

    fn success_impl(&mut self) {}

    fn fail_and_exit_impl(&mut self, exit_code: i32) -> ! {
        std::process::exit(exit_code);
    }
}

/// Picks a [StartupLogger] mode per §4.11: an already-daemonized child
/// (`startup_logger_fd` set) configures the pipe client; otherwise, absent
/// `--foreground`, re-execs and daemonizes; otherwise a plain file or
/// foreground logger.
pub fn daemonize_if_requested(
    log_path: &str,
    foreground: bool,
    startup_logger_fd: Option<i32>,
    startup_log_path: Option<&PathBuf>,
    argv: &[String],
) -> std::io::Result<Box<dyn StartupLogger>> {
    if !foreground && startup_logger_fd.is_none() {
        let mut logger = DaemonStartupLogger { orig_stderr: None, log_path: String::new(), pipe: None };
        if let Some(path) = startup_log_path {
            logger.warn(&format!("Ignoring --startupLogPath={} because --foreground was not specified", path.display()));
        }
        logger.spawn(log_path, argv);
    }

    if let Some(fd) = startup_logger_fd {
        let pipe = unsafe { FileDescriptor::from_raw(fd, edenfs_process_util::FdKind::Pipe) };
        return Ok(Box::new(DaemonStartupLogger::from_inherited_pipe(log_path, pipe)?));
    }

    if let Some(path) = startup_log_path {
        return Ok(Box::new(FileStartupLogger::new(path)?));
    }

    Ok(Box::new(ForegroundStartupLogger))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_startup_logger_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("startup.log");
        let mut logger = FileStartupLogger::new(&path).unwrap();
        logger.log("hello");
        logger.warn("uh oh");
        drop(logger);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hello"));
        assert!(contents.contains("uh oh"));
    }
}
