//! [SpawnedProcess]: a portable child-process handle with the
//! inherited-descriptor, wait/terminate, and `communicate` primitives every
//! subprocess caller in this repository (the hg importer helper, the daemon
//! supervisor, the startup-logger handshake) otherwise has to reimplement
//! (§4.12). POSIX only: the teacher's own workspace targets Linux/macOS, and
//! the Windows branch of the original source (`CreateProcessW`, an
//! inheritable-handle whitelist attribute) has no analog worth porting here.

use std::collections::HashMap;
use std::ffi::OsString;
use std::os::fd::AsFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::errors::{io_err, nix_err, ProcessError, Result};
use crate::file_descriptor::{FdKind, FileDescriptor};
use crate::pipe::Pipe;

/// The running/exited/killed state of a [SpawnedProcess], mirroring a raw
/// `waitpid(2)` status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Exited,
    Killed,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessStatus {
    state: ProcessState,
    /// Exit code if `Exited`, signal number if `Killed`, otherwise 0.
    status: i32,
}

impl ProcessStatus {
    pub fn not_started() -> Self {
        Self { state: ProcessState::NotStarted, status: 0 }
    }

    pub fn running() -> Self {
        Self { state: ProcessState::Running, status: 0 }
    }

    pub fn from_exit_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            Self { state: ProcessState::Exited, status: code }
        } else if let Some(signal) = status.signal() {
            Self { state: ProcessState::Killed, status: signal }
        } else {
            Self { state: ProcessState::Exited, status: 1 }
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// The value returned from `exit(3)`, or 1 if the process did not exit
    /// normally.
    pub fn exit_status(&self) -> i32 {
        match self.state {
            ProcessState::Exited => self.status,
            _ => 1,
        }
    }

    /// The signal that killed the process, or 0 if it did not die by signal.
    pub fn kill_signal(&self) -> i32 {
        match self.state {
            ProcessState::Killed => self.status,
            _ => 0,
        }
    }

    pub fn success(&self) -> bool {
        self.state == ProcessState::Exited && self.status == 0
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state {
            ProcessState::NotStarted => write!(f, "not started"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Exited => write!(f, "exited with status {}", self.status),
            ProcessState::Killed => write!(f, "killed by signal {}", self.status),
        }
    }
}

/// A process environment, seeded from the current process's and then
/// mutated before spawn.
#[derive(Debug, Clone)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self { vars: std::env::vars().collect() }
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn unset(&mut self, key: &str) {
        self.vars.remove(key);
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A file to be `open(2)`'d in the child and made available under a given
/// target descriptor number, per [Options::open].
pub struct OpenFileHandleOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
    pub mode: u32,
}

/// Builder for the descriptors, environment, and working directory of a
/// [SpawnedProcess].
#[derive(Default)]
pub struct Options {
    /// Target fd number in the child -> the already-open descriptor to
    /// `dup2` onto it.
    dup2s: HashMap<i32, FileDescriptor>,
    /// Target fd number -> the parent's retained end of a pipe created for
    /// that target.
    pipes: HashMap<i32, FileDescriptor>,
    env: Environment,
    cwd: Option<PathBuf>,
    exec_path: Option<PathBuf>,
    next_inherited_fd: i32,
}

const FIRST_INHERITED_FD: i32 = 3;

impl Options {
    pub fn new() -> Self {
        Self { next_inherited_fd: FIRST_INHERITED_FD, ..Default::default() }
    }

    pub fn environment(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Arranges to duplicate `fd` as `target_fd` in the child.
    pub fn dup2(&mut self, fd: FileDescriptor, target_fd: i32) {
        self.dup2s.insert(target_fd, fd);
    }

    /// Creates a pipe for communicating with the child, and arranges for its
    /// child-side end to appear as `target_fd`. `child_read` selects which
    /// end the child gets; the parent keeps the other end, retrievable via
    /// [SpawnedProcess::parent_fd].
    pub fn pipe(&mut self, target_fd: i32, child_read: bool) -> Result<()> {
        let pipe = Pipe::new(false)?;
        let (child_end, parent_end) =
            if child_read { (pipe.read, pipe.write) } else { (pipe.write, pipe.read) };
        self.dup2s.insert(target_fd, child_end);
        self.pipes.insert(target_fd, parent_end);
        Ok(())
    }

    pub fn pipe_stdin(&mut self) -> Result<()> {
        self.pipe(libc::STDIN_FILENO, true)
    }

    pub fn pipe_stdout(&mut self) -> Result<()> {
        self.pipe(libc::STDOUT_FILENO, false)
    }

    pub fn pipe_stderr(&mut self) -> Result<()> {
        self.pipe(libc::STDERR_FILENO, false)
    }

    /// Sets up stdin to read from `/dev/null`.
    pub fn null_stdin(&mut self) -> Result<()> {
        self.open(
            libc::STDIN_FILENO,
            Path::new("/dev/null"),
            OpenFileHandleOptions { read: true, write: false, create: false, truncate: false, append: false, mode: 0 },
        )
    }

    pub fn open(&mut self, target_fd: i32, path: &Path, opts: OpenFileHandleOptions) -> Result<()> {
        use nix::fcntl::OFlag;
        let mut flags = match (opts.read, opts.write) {
            (true, true) => OFlag::O_RDWR,
            (true, false) => OFlag::O_RDONLY,
            (false, true) => OFlag::O_WRONLY,
            (false, false) => OFlag::O_RDONLY,
        };
        if opts.create {
            flags |= OFlag::O_CREAT;
        }
        if opts.truncate {
            flags |= OFlag::O_TRUNC;
        }
        if opts.append {
            flags |= OFlag::O_APPEND;
        }
        let fd = nix::fcntl::open(path, flags, nix::sys::stat::Mode::from_bits_truncate(opts.mode))
            .map_err(|e| nix_err("open", e))?;
        self.dup2s.insert(target_fd, unsafe { FileDescriptor::from_raw(fd, FdKind::Generic) });
        Ok(())
    }

    /// Sets the child's working directory; if unset, the child inherits ours.
    pub fn chdir(&mut self, path: impl Into<PathBuf>) {
        self.cwd = Some(path.into());
    }

    /// Overrides the executable image path, independent of `argv[0]`.
    pub fn executable_path(&mut self, path: impl Into<PathBuf>) {
        self.exec_path = Some(path.into());
    }

    /// Explicitly inherits `fd`, returning the descriptor number it will
    /// have in the child (allocated sequentially starting at 3, since the
    /// caller typically needs to pass this number to the child on its
    /// command line).
    pub fn inherit_descriptor(&mut self, fd: FileDescriptor) -> i32 {
        let target = self.next_inherited_fd;
        self.next_inherited_fd += 1;
        self.dup2s.insert(target, fd);
        target
    }
}

/// A spawned child process. Closes every descriptor it still owns on drop.
pub struct SpawnedProcess {
    child: Option<Child>,
    pid: i32,
    waited: bool,
    status: ProcessStatus,
    pipes: HashMap<i32, FileDescriptor>,
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

impl SpawnedProcess {
    /// Spawns `args[0]` (resolved via `$PATH` unless `options` sets an
    /// explicit executable path) with `args[1..]` as arguments.
    pub fn new(args: &[String], mut options: Options) -> Result<Self> {
        if args.is_empty() {
            return Err(ProcessError::Spawn("cannot spawn with an empty argv".into()));
        }

        let mut cmd = if options.cwd.is_some() && options.exec_path.is_some() {
            // posix_spawnp can't atomically chdir before exec; shell out so
            // the child observes the right cwd before the real exec(3).
            let cwd = options.cwd.take().unwrap();
            let exec_path = options.exec_path.take().unwrap();
            let mut script = format!("cd {} && exec {}", shell_quote(&cwd.to_string_lossy()), shell_quote(&exec_path.to_string_lossy()));
            for arg in &args[1..] {
                script.push(' ');
                script.push_str(&shell_quote(arg));
            }
            let mut cmd = Command::new("/bin/sh");
            cmd.arg("-c").arg(script);
            options.env.set("ARGV0", &args[0]);
            options.env.set("BASH_ARGV0", &args[0]);
            cmd
        } else {
            let program = options.exec_path.clone().unwrap_or_else(|| PathBuf::from(&args[0]));
            let mut cmd = Command::new(program);
            cmd.arg0(&args[0]);
            cmd.args(&args[1..]);
            if let Some(cwd) = &options.cwd {
                cmd.current_dir(cwd);
            }
            cmd
        };

        cmd.env_clear();
        cmd.envs(options.env.iter().map(|(k, v)| (OsString::from(k), OsString::from(v))));

        let dup2s: Vec<(i32, i32)> = options
            .dup2s
            .iter()
            .map(|(target, fd)| (*target, fd.raw()))
            .collect();
        // std::process::Command sets up stdio before running pre_exec; avoid
        // momentarily inheriting our own stdio for descriptors the caller is
        // about to dup2 over anyway.
        if dup2s.iter().any(|(t, _)| *t == libc::STDIN_FILENO) {
            cmd.stdin(Stdio::null());
        }
        if dup2s.iter().any(|(t, _)| *t == libc::STDOUT_FILENO) {
            cmd.stdout(Stdio::null());
        }
        if dup2s.iter().any(|(t, _)| *t == libc::STDERR_FILENO) {
            cmd.stderr(Stdio::null());
        }
        unsafe {
            cmd.pre_exec(move || {
                for (target, source) in &dup2s {
                    if libc::dup2(*source, *target) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| io_err("posix_spawnp", e))?;
        let pid = child.id() as i32;

        Ok(Self {
            child: Some(child),
            pid,
            waited: false,
            status: ProcessStatus::running(),
            pipes: options.pipes,
        })
    }

    /// Wraps an already-running process this code did not spawn (used for
    /// in-place restart takeover, §4.9).
    pub fn from_existing_process(pid: i32) -> Self {
        Self { child: None, pid, waited: true, status: ProcessStatus::running(), pipes: HashMap::new() }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// The status as of the last `terminated`/`wait`/`wait_timeout` call.
    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    /// fd as seen by the child -> the parent's retained end of the pipe
    /// configured for it via [Options::pipe]/[Options::pipe_stdin] etc.
    pub fn parent_fd(&mut self, target_fd: i32) -> Option<FileDescriptor> {
        self.pipes.remove(&target_fd)
    }

    /// Non-blocking: returns true once the process has terminated.
    pub fn terminated(&mut self) -> bool {
        if self.waited {
            return true;
        }
        match &mut self.child {
            None => {
                // A takeover instance: poll liveness with a signal-0 kill.
                !matches!(signal::kill(Pid::from_raw(self.pid), None), Ok(()))
            }
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    self.status = ProcessStatus::from_exit_status(status);
                    self.waited = true;
                    true
                }
                Ok(None) => false,
                Err(_) => false,
            },
        }
    }

    /// Blocks until the process exits.
    pub fn wait(&mut self) -> Result<ProcessStatus> {
        if self.waited {
            return Ok(self.status);
        }
        match &mut self.child {
            None => Err(ProcessError::Spawn("cannot wait() on a takeover instance".into())),
            Some(child) => {
                let status = child.wait().map_err(|e| io_err("waitpid", e))?;
                self.status = ProcessStatus::from_exit_status(status);
                self.waited = true;
                Ok(self.status)
            }
        }
    }

    /// Polls `terminated()` with exponential backoff up to `timeout`.
    pub fn wait_timeout(&mut self, timeout: Duration) -> ProcessStatus {
        let deadline = Instant::now() + timeout;
        let mut sleep = Duration::from_millis(1);
        const MAX_SLEEP: Duration = Duration::from_millis(100);
        loop {
            if self.terminated() {
                return self.status;
            }
            if Instant::now() >= deadline {
                return ProcessStatus::running();
            }
            std::thread::sleep(sleep.min(deadline.saturating_duration_since(Instant::now())));
            sleep = (sleep * 2).min(MAX_SLEEP);
        }
    }

    /// Polls up to `wait_timeout`; if the process is still alive, sends
    /// SIGTERM and polls up to `sigterm_timeout`; if it's still alive after
    /// that, sends SIGKILL and waits (blocking).
    pub fn wait_or_terminate_or_kill(&mut self, wait_timeout: Duration, sigterm_timeout: Duration) -> Result<ProcessStatus> {
        let status = self.wait_timeout(wait_timeout);
        if status.state() != ProcessState::Running {
            return Ok(status);
        }
        self.terminate_or_kill(sigterm_timeout)
    }

    /// Sends SIGTERM, polls for up to `sigterm_timeout`, then SIGKILL and
    /// blocks.
    pub fn terminate_or_kill(&mut self, sigterm_timeout: Duration) -> Result<ProcessStatus> {
        self.terminate();
        let status = self.wait_timeout(sigterm_timeout);
        if status.state() != ProcessState::Running {
            return Ok(status);
        }
        self.kill();
        self.wait()
    }

    pub fn kill(&mut self) {
        self.send_signal(libc::SIGKILL);
    }

    pub fn terminate(&mut self) {
        self.send_signal(libc::SIGTERM);
    }

    pub fn send_signal(&mut self, signo: i32) {
        let _ = signal::kill(Pid::from_raw(self.pid), Signal::try_from(signo).ok());
    }

    /// Closes the parent's retained end of the pipe for `target_fd`, if any.
    pub fn close_parent_fd(&mut self, target_fd: i32) {
        self.pipes.remove(&target_fd);
    }

    /// Runs a read/write loop over the child's stdout/stderr (and stdin, via
    /// `on_writable`) with `poll(2)`, returning the fully-drained stdout and
    /// stderr once both pipes reach EOF and stdin (if any) has been closed.
    ///
    /// `on_writable` is called whenever the stdin pipe is writable; it should
    /// perform a partial non-blocking write and return `true` once it has
    /// nothing more to write, at which point the pipe is closed.
    pub fn communicate(&mut self, mut on_writable: impl FnMut(&FileDescriptor) -> bool) -> Result<(Vec<u8>, Vec<u8>)> {
        use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

        let mut stdin = self.pipes.remove(&libc::STDIN_FILENO);
        let mut stdout = self.pipes.remove(&libc::STDOUT_FILENO);
        let mut stderr = self.pipes.remove(&libc::STDERR_FILENO);
        for fd in [&stdin, &stdout, &stderr].into_iter().flatten() {
            fd.set_non_blocking()?;
        }

        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let mut read_buf = [0u8; 64 * 1024];

        while stdin.is_some() || stdout.is_some() || stderr.is_some() {
            let mut fds = Vec::new();
            if let Some(fd) = &stdin {
                fds.push(PollFd::new(fd.as_fd(), PollFlags::POLLOUT));
            }
            if let Some(fd) = &stdout {
                fds.push(PollFd::new(fd.as_fd(), PollFlags::POLLIN));
            }
            if let Some(fd) = &stderr {
                fds.push(PollFd::new(fd.as_fd(), PollFlags::POLLIN));
            }

            poll(&mut fds, PollTimeout::NONE).map_err(|e| nix_err("poll", e))?;

            let mut idx = 0;
            if stdin.is_some() {
                let revents = fds[idx].revents().unwrap_or_else(PollFlags::empty);
                idx += 1;
                if revents.intersects(PollFlags::POLLOUT | PollFlags::POLLHUP | PollFlags::POLLERR)
                    && on_writable(stdin.as_ref().unwrap())
                {
                    stdin = None;
                }
            }
            if stdout.is_some() {
                let revents = fds[idx].revents().unwrap_or_else(PollFlags::empty);
                idx += 1;
                if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                    && drain_once(stdout.as_ref().unwrap(), &mut out_buf, &mut read_buf)?
                {
                    stdout = None;
                }
            }
            if stderr.is_some() {
                let revents = fds[idx].revents().unwrap_or_else(PollFlags::empty);
                if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                    && drain_once(stderr.as_ref().unwrap(), &mut err_buf, &mut read_buf)?
                {
                    stderr = None;
                }
            }
        }

        Ok((out_buf, err_buf))
    }
}

/// Reads whatever is immediately available into `out`, returning `true` once
/// EOF is reached.
fn drain_once(fd: &FileDescriptor, out: &mut Vec<u8>, buf: &mut [u8]) -> Result<bool> {
    loop {
        match fd.read(buf) {
            Ok(0) => return Ok(true),
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(ProcessError::Io { source, .. }) if source.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }
}

impl Drop for SpawnedProcess {
    fn drop(&mut self) {
        // `Child` itself only closes the descriptors std::process::Command
        // created for piped stdio; our own Options-managed pipes drop along
        // with `self.pipes`.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_exits_zero_and_is_waitable() {
        let mut proc = SpawnedProcess::new(&["/bin/echo".into(), "hi".into()], Options::new()).unwrap();
        let status = proc.wait().unwrap();
        assert!(status.success());
    }

    #[test]
    fn sigterm_then_sigkill_reaps_a_stuck_process() {
        let mut proc = SpawnedProcess::new(&["/bin/sleep".into(), "30".into()], Options::new()).unwrap();
        let status = proc.terminate_or_kill(Duration::from_millis(50)).unwrap();
        assert_eq!(status.state(), ProcessState::Killed);
    }

    #[test]
    fn inherited_pipe_lets_parent_read_child_stdout() {
        let mut options = Options::new();
        options.pipe_stdout().unwrap();
        let mut proc = SpawnedProcess::new(&["/bin/echo".into(), "hello".into()], options).unwrap();
        let out_fd = proc.parent_fd(libc::STDOUT_FILENO).unwrap();
        let mut buf = [0u8; 5];
        out_fd.read_full(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        proc.wait().unwrap();
    }
}
