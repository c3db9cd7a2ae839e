//! The `edenfs_monitor` supervisor (§4.9–§4.12): keeps one `edenfs` daemon
//! process running, forwards its output into a rotating log file, and
//! handles its own restart/shutdown signals.

mod cli;
mod eden_instance;
mod lock_file;
mod log_file;
mod log_rotation;
mod monitor;
mod session_id;
mod startup_logger;

pub use cli::MonitorArgs;
pub use eden_instance::{
    DaemonControlClient, DaemonStatus, EdenInstance, ExistingEdenInstance, InstanceEvent,
    NullControlClient, SpawnedEdenInstance,
};
pub use lock_file::{LockError, LockFile};
pub use log_file::LogFile;
pub use log_rotation::{LogRotationStrategy, TimestampLogRotation};
pub use monitor::{ControlClientFactory, EdenMonitor, MonitorConfig, TakeoverInfo};
pub use session_id::session_id;
pub use startup_logger::{
    daemonize_if_requested, DaemonStartupLogger, FileStartupLogger, ForegroundStartupLogger,
    StartupLogger,
};
