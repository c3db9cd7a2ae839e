//! [EdenMonitor]: the daemon supervisor's main loop (§4.9). A single-
//! threaded process that picks up (or spawns) one `edenfs` instance, forwards
//! its log output, watches it for liveness, and reacts to signals —
//! forwarding `SIGINT`/`SIGTERM` to the child and performing an in-place
//! self-restart on `SIGHUP`.
//!
//! The original runs this loop on a `folly::EventBase`; nothing in this
//! crate's dependency set plays that role, so the loop here is a plain
//! `poll(2)` over the child's log pipe and a self-pipe that signal handlers
//! write into (the standard async-signal-safe way to get a signal's
//! occurrence onto a synchronous poll loop).

use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use edenfs_process_util::{FileDescriptor, Options, Pipe};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::eden_instance::{
    DaemonControlClient, EdenInstance, ExistingEdenInstance, InstanceEvent, SpawnedEdenInstance,
};
use crate::log_file::LogFile;
use crate::log_rotation::TimestampLogRotation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Starting,
    Running,
}

/// What this invocation was told about an `edenfs` process the monitor
/// should take over rather than spawn fresh, carried across a self-restart's
/// `execv` via `--childEdenFSPid`/`--childEdenFSPipe`.
#[derive(Debug, Clone)]
pub struct TakeoverInfo {
    pub pid: i32,
    pub log_pipe_fd: RawFd,
}

/// Static configuration the monitor needs at construction; everything here
/// comes from CLI flags or their defaults (§6).
pub struct MonitorConfig {
    pub eden_dir: PathBuf,
    pub max_log_file_size: u64,
    pub max_rotated_log_files: usize,
    pub edenfs_args: Vec<String>,
    pub poll_interval: Duration,
}

/// Factory for the daemon control plane client (Thrift in the original; out
/// of this core's scope — see [DaemonControlClient]).
pub type ControlClientFactory = Box<dyn Fn() -> Box<dyn DaemonControlClient>>;

static SIGNAL_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn deliver_signal(sig: libc::c_int) {
    let fd = SIGNAL_WRITE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = sig as u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

/// Installs `deliver_signal` for the signals the monitor cares about and
/// returns the self-pipe's read end. Only one [EdenMonitor] may exist per
/// process since the handler writes to a single global fd.
fn install_signal_self_pipe() -> edenfs_process_util::Result<FileDescriptor> {
    let pipe = Pipe::new(true)?;

    // The write end lives for the rest of the process: the signal handler
    // writes to it for as long as any signal we registered for can fire.
    SIGNAL_WRITE_FD.store(pipe.write.raw(), Ordering::Relaxed);
    std::mem::forget(pipe.write);

    let handler = SigHandler::Handler(deliver_signal);
    for sig in [Signal::SIGCHLD, Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM] {
        unsafe { signal::signal(sig, handler) }
            .map_err(|e| edenfs_process_util::ProcessError::Spawn(format!("failed to install handler for {sig:?}: {e}")))?;
    }

    Ok(pipe.read)
}

fn ensure_directory_exists(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

/// The supervisor's main loop: owns exactly one [EdenInstance] at a time and
/// reacts to its output, its exit, and incoming signals.
pub struct EdenMonitor {
    eden_dir: PathBuf,
    self_exe: PathBuf,
    self_argv: Vec<String>,
    signal_pipe: FileDescriptor,
    state: State,
    edenfs: Box<dyn EdenInstance>,
}

impl EdenMonitor {
    /// Constructs the monitor and picks up its initial [EdenInstance] per
    /// §4.9: a `--restart` takeover, an already-running daemon found by
    /// `get_pid`, or a freshly spawned one.
    pub fn new(
        config: MonitorConfig,
        self_exe: PathBuf,
        self_argv: Vec<String>,
        make_control: ControlClientFactory,
        takeover: Option<TakeoverInfo>,
    ) -> edenfs_process_util::Result<Self> {
        let signal_pipe = install_signal_self_pipe()?;

        let log_dir = config.eden_dir.join("logs");
        ensure_directory_exists(&log_dir)
            .map_err(|e| edenfs_process_util::ProcessError::Spawn(format!("failed to create log dir: {e}")))?;
        let log_path = log_dir.join("edenfs.log");

        let rotation_strategy = if config.max_log_file_size > 0 {
            Some(Box::new(TimestampLogRotation::new(config.max_rotated_log_files)) as Box<dyn crate::log_rotation::LogRotationStrategy>)
        } else {
            None
        };
        let log = LogFile::new(log_path.as_path(), config.max_log_file_size, rotation_strategy)
            .map_err(|e| edenfs_process_util::ProcessError::Spawn(format!("failed to open log file {}: {e}", log_path.display())))?;

        let edenfs = Self::pick_instance(&config, &make_control, log, takeover)?;

        Ok(Self {
            eden_dir: config.eden_dir.clone(),
            self_exe,
            self_argv,
            signal_pipe,
            state: State::Starting,
            edenfs,
        })
    }

    fn pick_instance(
        config: &MonitorConfig,
        make_control: &ControlClientFactory,
        log: LogFile,
        takeover: Option<TakeoverInfo>,
    ) -> edenfs_process_util::Result<Box<dyn EdenInstance>> {
        if let Some(takeover) = takeover {
            info!(pid = takeover.pid, "taking over management of existing EdenFS daemon");
            let log_pipe = unsafe { FileDescriptor::from_raw(takeover.log_pipe_fd, edenfs_process_util::FdKind::Pipe) };
            let instance = SpawnedEdenInstance::takeover(takeover.pid, log_pipe, log, make_control())?;
            return Ok(Box::new(instance));
        }

        // Probe for an EdenFS daemon that was already running before this
        // monitor existed (see the grounding note on this in DESIGN.md).
        if let Some(pid) = make_control().get_pid() {
            info!(pid, "found existing EdenFS process");
            return Ok(Box::new(ExistingEdenInstance::new(pid, config.poll_interval)));
        }

        info!(args = ?config.edenfs_args, "starting new EdenFS process");
        let mut options = Options::new();
        options.chdir(config.eden_dir.clone());
        let instance = SpawnedEdenInstance::spawn(&config.edenfs_args, options, log, make_control())?;
        Ok(Box::new(instance))
    }

    pub fn eden_dir(&self) -> &Path {
        &self.eden_dir
    }

    /// Runs the supervisor loop until the managed `edenfs` process exits (or
    /// a self-restart hands the process off via `execv`).
    pub fn run(&mut self) -> i32 {
        loop {
            let events = self.edenfs.poll();
            let mut exited = None;
            for event in events {
                match event {
                    InstanceEvent::LogForwarded(_) => {}
                    InstanceEvent::BecameRunning => {
                        self.state = State::Running;
                        notify_ready();
                    }
                    InstanceEvent::Exited(status) => exited = Some(status),
                }
            }
            if let Some(status) = exited {
                info!("EdenFS has exited; terminating the monitor");
                return status.map(|s| s.exit_status()).unwrap_or(0);
            }

            if !self.wait_for_activity() {
                continue;
            }
            self.drain_signals();
        }
    }

    /// Blocks on the signal pipe and (if any) the instance's log pipe until
    /// one is readable or the poll interval elapses. Returns whether the
    /// signal pipe specifically had something to read.
    fn wait_for_activity(&mut self) -> bool {
        let mut fds = vec![PollFd::new(self.signal_pipe.as_fd(), PollFlags::POLLIN)];
        if let Some(fd) = self.edenfs.log_pipe_fd() {
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            fds.push(PollFd::new(borrowed, PollFlags::POLLIN));
        }

        let timeout = PollTimeout::try_from(100i32).unwrap_or(PollTimeout::NONE);
        match poll(&mut fds, timeout) {
            Ok(_) => fds[0]
                .revents()
                .map(|r| r.intersects(PollFlags::POLLIN))
                .unwrap_or(false),
            Err(nix::errno::Errno::EINTR) => false,
            Err(e) => {
                warn!(error = %e, "poll failed in monitor loop");
                false
            }
        }
    }

    fn drain_signals(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.signal_pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for &sig in &buf[..n] {
                        self.handle_signal(sig as libc::c_int);
                    }
                }
                Err(edenfs_process_util::ProcessError::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    break
                }
                Err(e) => {
                    warn!(error = %e, "error reading monitor signal pipe");
                    break;
                }
            }
        }
    }

    fn handle_signal(&mut self, sig: libc::c_int) {
        match sig {
            libc::SIGCHLD => {
                debug!("got SIGCHLD");
                self.edenfs.check_liveness();
            }
            libc::SIGHUP => self.perform_self_restart(),
            libc::SIGINT | libc::SIGTERM => {
                debug!(sig, "received terminal signal");
                let pid = self.edenfs.pid();
                if let Err(e) = nix::sys::signal::kill(
                    Pid::from_raw(pid),
                    Signal::try_from(sig).expect("terminal signal is always a valid Signal"),
                ) {
                    warn!(error = %e, sig, "error forwarding signal to EdenFS");
                }
            }
            other => warn!(sig = other, "received unexpected signal"),
        }
    }

    /// `SIGHUP` handling: fork+exec this same binary, passing along the
    /// currently-managed child so the new monitor process takes over without
    /// disturbing it. Ignored while still starting up (§4.9).
    fn perform_self_restart(&mut self) {
        if self.state == State::Starting {
            warn!("ignoring self-restart request for the EdenFS monitor: EdenFS is still starting");
            return;
        }

        let child_pipe_fd = self.edenfs.log_pipe_fd();
        let pid = self.edenfs.pid();

        let mut argv: Vec<String> = Vec::new();
        for arg in &self.self_argv {
            if arg == "--restart" {
                break;
            }
            argv.push(arg.clone());
        }
        argv.push("--restart".to_string());
        if let Some(fd) = child_pipe_fd {
            argv.push("--childEdenFSPid".to_string());
            argv.push(pid.to_string());
            argv.push("--childEdenFSPipe".to_string());
            argv.push(fd.to_string());
        }

        if let Some(fd) = child_pipe_fd {
            if let Err(e) = fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())) {
                error!(error = %e, "failed to clear CLOEXEC flag on child log pipe");
                return;
            }
        }

        info!(exe = %self.self_exe.display(), ?argv, "restarting EdenFS monitor in place");
        let err = exec_self(&self.self_exe, &argv);
        error!(error = %err, "failed to perform self-restart");

        if let Some(fd) = child_pipe_fd {
            if let Err(e) = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
                error!(error = %e, "failed to restore CLOEXEC flag on log pipe");
            }
        }
    }
}

fn exec_self(exe: &Path, argv: &[String]) -> std::io::Error {
    use std::os::unix::process::CommandExt;
    std::process::Command::new(exe).args(&argv[..]).exec()
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    // Best-effort: tell an init system (systemd) we finished starting, if
    // one is listening on $NOTIFY_SOCKET. Silently does nothing otherwise.
    if std::env::var_os("NOTIFY_SOCKET").is_none() {
        return;
    }
    if let Err(e) = send_sd_notify("READY=1") {
        warn!(error = %e, "sd_notify READY=1 failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn send_sd_notify(message: &str) -> std::io::Result<()> {
    use std::os::unix::net::UnixDatagram;
    let path = std::env::var_os("NOTIFY_SOCKET").ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))?;
    let socket = UnixDatagram::unbound()?;
    socket.send_to(message.as_bytes(), Path::new(&path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eden_instance::NullControlClient;

    #[test]
    fn pick_instance_spawns_a_fresh_process_when_no_existing_daemon_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("edenfs.log");
        let log = LogFile::new(log_path.as_path(), 0, None).unwrap();

        let config = MonitorConfig {
            eden_dir: dir.path().to_path_buf(),
            max_log_file_size: 0,
            max_rotated_log_files: 0,
            edenfs_args: vec!["/bin/sh".to_string(), "-c".to_string(), "sleep 60".to_string()],
            poll_interval: Duration::from_millis(10),
        };
        let make_control: ControlClientFactory = Box::new(|| Box::new(NullControlClient));

        let mut instance = EdenMonitor::pick_instance(&config, &make_control, log, None).unwrap();
        assert!(instance.pid() > 0);
        instance.check_liveness();
    }
}
