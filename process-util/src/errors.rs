use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    #[error("{operation} failed: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Spawn(String),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

pub(crate) fn io_err(operation: &'static str, source: io::Error) -> ProcessError {
    ProcessError::Io { operation, source }
}

pub(crate) fn nix_err(operation: &'static str, source: nix::Error) -> ProcessError {
    ProcessError::Io {
        operation,
        source: io::Error::from_raw_os_error(source as i32),
    }
}
