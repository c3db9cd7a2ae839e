use std::time::Duration;

use clap::Parser;
use edenfs_monitor::{
    daemonize_if_requested, session_id, ControlClientFactory, EdenMonitor, LockFile, MonitorArgs,
    MonitorConfig, NullControlClient, StartupLogger, TakeoverInfo,
};
use tracing::Level;

fn main() {
    let args = MonitorArgs::parse();
    let raw_argv: Vec<String> = std::env::args().skip(1).collect();

    let _tracing = edenfs_tracing::TracingBuilder::default().level(Level::INFO).build();

    let log_path = args.eden_dir.join("logs").join("edenfs.log");
    let mut logger = match daemonize_if_requested(
        &log_path.display().to_string(),
        args.foreground,
        args.startup_logger_fd,
        args.startup_log_path.as_ref(),
        &raw_argv,
    ) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("error setting up startup logger: {e}");
            std::process::exit(74); // EX_IOERR
        }
    };

    logger.log(&format!("EdenFS monitor starting (session_id {})", session_id()));

    let lock_path = args.eden_dir.join("monitor.lock");
    let _lock = match LockFile::acquire(&lock_path) {
        Ok(lock) => lock,
        Err(e) => logger.exit_unsuccessfully(70, &format!("{e}")), // EX_SOFTWARE
    };

    let self_exe = match std::env::current_exe() {
        Ok(p) => p,
        Err(e) => logger.exit_unsuccessfully(70, &format!("unable to determine our own executable path: {e}")),
    };

    let takeover = if args.restart {
        match (args.child_eden_fs_pid, args.child_eden_fs_pipe) {
            (Some(pid), Some(fd)) => Some(TakeoverInfo { pid, log_pipe_fd: fd }),
            _ => None,
        }
    } else {
        None
    };

    let mut edenfs_args = vec![args.edenfs.display().to_string()];
    edenfs_args.extend(args.edenfs_args.iter().cloned());

    let config = MonitorConfig {
        eden_dir: args.eden_dir.clone(),
        max_log_file_size: args.max_log_file_size,
        max_rotated_log_files: args.max_rotated_log_files,
        edenfs_args,
        poll_interval: Duration::from_millis(args.edenfs_poll_interval_ms),
    };

    let make_control: ControlClientFactory = Box::new(|| Box::new(NullControlClient));

    let mut monitor = match EdenMonitor::new(config, self_exe, raw_argv, make_control, takeover) {
        Ok(m) => m,
        Err(e) => logger.exit_unsuccessfully(70, &format!("failed to start EdenFS monitor: {e}")),
    };

    let started_at = std::time::Instant::now();
    logger.success(started_at.elapsed().as_secs());

    let exit_code = monitor.run();
    std::process::exit(exit_code);
}
