use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("bind failed: {reason}")]
    ErrBindFailed { reason: String },
    #[error("connect failed: {reason}")]
    ErrConnectFailed { reason: String },
    #[error("connect timed out")]
    ErrConnectTimeout,
    #[error("read failed: {reason}")]
    ErrReadFailed { reason: String },
    #[error("write failed: {reason}")]
    ErrWriteFailed { reason: String },
    #[error("short write: expected {expected} bytes, wrote {written}")]
    ErrShortWrite { expected: usize, written: usize },
    #[error("try again")]
    ErrTryAgain,

    #[error("channel closed")]
    ErrChannelClosed,
    #[error("channel is not bound")]
    ErrChannelNotBound,
    #[error("channel is not connected")]
    ErrNotConnected,
    #[error("stream identifier {stream_identifier} exceeds the negotiated outbound streams ({outbound_streams})")]
    ErrStreamIdentifierOutOfRange {
        stream_identifier: u16,
        outbound_streams: u16,
    },

    #[error("unknown channel option `{key}`")]
    ErrUnknownOption { key: String },
    #[error("invalid value for channel option `{key}`: {reason}")]
    ErrInvalidOption { key: String, reason: String },
    #[error("failed to apply channel option: {reason}")]
    ErrConfigIo { reason: String },

    #[error("unsupported operation `{operation}`")]
    ErrUnsupportedOperation { operation: String },
    #[error("flush must be overridden by handlers that buffer writes")]
    ErrFlushNotOverridden,

    #[error("{0}")]
    Other(String),
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            e @ Error::ErrChannelClosed => {
                io::Error::new(io::ErrorKind::ConnectionAborted, e.to_string())
            }
            e @ Error::ErrConnectTimeout => io::Error::new(io::ErrorKind::TimedOut, e.to_string()),
            e @ Error::ErrTryAgain => io::Error::new(io::ErrorKind::WouldBlock, e.to_string()),
            e => io::Error::new(io::ErrorKind::Other, e.to_string()),
        }
    }
}
