//! POSIX process and descriptor primitives: [FileDescriptor] wraps an owned
//! fd with retry-safe I/O, [Pipe]/[SocketPair] build connected descriptor
//! pairs, and [SpawnedProcess] builds on both to launch and supervise a
//! child (§4.12). Nothing here is EdenFS-specific; the monitor crate and the
//! backing-store importer helpers are both just callers.

mod errors;
mod file_descriptor;
mod pipe;
mod spawned_process;

pub use errors::{ProcessError, Result};
pub use file_descriptor::{FdKind, FileDescriptor};
pub use pipe::{Pipe, SocketPair};
pub use spawned_process::{
    Environment, OpenFileHandleOptions, Options, ProcessState, ProcessStatus, SpawnedProcess,
};
