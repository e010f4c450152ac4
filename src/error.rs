//! Error types for framereel

use crate::{Codec, Container};
use thiserror::Error;

/// Result type alias for framereel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for framereel operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid stream configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Frame does not match the configured resolution
    #[error("Frame is {actual_width}x{actual_height}, pipeline expects {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Codec is not available on this system
    #[error("Codec unavailable: {0}")]
    CodecUnavailable(String),

    /// Container and codec combination is not supported
    #[error("Container {container:?} does not support codec {codec:?}")]
    UnsupportedFormat { container: Container, codec: Codec },

    /// Codec could not allocate its state
    #[error("Codec allocation failed: {0}")]
    FatalAllocation(String),

    /// Per-call codec hiccup ("try again", "not ready", generic encode error)
    #[error("Encoder not ready: {0}")]
    RetryableEncode(String),

    /// Codec refused its configuration
    #[error("Encoding error: {0}")]
    Encode(String),

    /// Muxing error
    #[error("Muxing error: {0}")]
    Mux(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Whether the pipeline may continue with the next frame after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RetryableEncode(_))
    }
}

/// Stable numeric error codes, used as the process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// Success
    Ok = 0,
    /// Invalid configuration or frame
    InvalidInput = 1,
    /// Codec not available
    CodecUnavailable = 2,
    /// Container/codec mismatch
    UnsupportedFormat = 3,
    /// I/O error
    IoError = 4,
    /// Encoding error
    EncodeError = 5,
    /// Muxing error
    MuxError = 6,
}

impl From<&Error> for ErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidConfig(_) => ErrorCode::InvalidInput,
            Error::DimensionMismatch { .. } => ErrorCode::InvalidInput,
            Error::InvalidState(_) => ErrorCode::InvalidInput,
            Error::CodecUnavailable(_) => ErrorCode::CodecUnavailable,
            Error::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            Error::FatalAllocation(_) => ErrorCode::EncodeError,
            Error::RetryableEncode(_) => ErrorCode::EncodeError,
            Error::Encode(_) => ErrorCode::EncodeError,
            Error::Mux(_) => ErrorCode::MuxError,
            Error::Io(_) => ErrorCode::IoError,
            Error::Image(_) => ErrorCode::IoError,
        }
    }
}
