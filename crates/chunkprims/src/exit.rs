use std::fmt;
use std::io;

use chunkprims_stream::ChunkError;

// Exit code constants shared by the prims CLIs.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::BrokenPipe => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn chunk_error(context: &str, err: ChunkError) -> CliError {
    if let ChunkError::Io(source) = err {
        return io_error(context, source);
    }
    let code = match &err {
        ChunkError::Message(_)
        | ChunkError::ConnectionClosed
        | ChunkError::InvalidChunkStreamId(_)
        | ChunkError::EmptyMessage(_) => DATA_INVALID,
        err if err.is_protocol_violation() => DATA_INVALID,
        ChunkError::InvalidChunkSize { .. }
        | ChunkError::InvalidWindowSize { .. }
        | ChunkError::InvalidConfig(_) => USAGE,
        ChunkError::Closed => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_errors_map_to_exit_codes() {
        assert_eq!(
            chunk_error("x", ChunkError::UnsupportedFormat(4)).code,
            DATA_INVALID
        );
        assert_eq!(
            chunk_error("x", ChunkError::InvalidChunkSize { size: 0, max: 1 }).code,
            USAGE
        );
        assert_eq!(
            chunk_error("x", ChunkError::Internal("boom".to_string())).code,
            INTERNAL
        );
        let denied = ChunkError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(chunk_error("x", denied).code, PERMISSION_DENIED);
    }

    #[test]
    fn message_keeps_context() {
        let err = chunk_error("dump failed", ChunkError::Busy(3));
        assert!(err.message.starts_with("dump failed: "));
        assert_eq!(err.code, INTERNAL);
    }
}
