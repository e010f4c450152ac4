//! H.264 encoder backed by libx264 through FFmpeg

use super::Encoder;
use crate::{Result, StreamConfig};

#[cfg(feature = "x264")]
mod x264;

/// Check if H.264 encoding is available
pub fn check_available() -> Result<()> {
    #[cfg(feature = "x264")]
    {
        x264::check_available()
    }

    #[cfg(not(feature = "x264"))]
    {
        Err(crate::Error::CodecUnavailable(
            "H.264 support not compiled in (enable the `x264` feature)".to_string(),
        ))
    }
}

/// Create an H.264 encoder
pub fn create_encoder(config: &StreamConfig) -> Result<Box<dyn Encoder>> {
    #[cfg(feature = "x264")]
    {
        Ok(Box::new(x264::X264Encoder::new(config)?))
    }

    #[cfg(not(feature = "x264"))]
    {
        let _ = config;
        Err(crate::Error::CodecUnavailable(
            "H.264 support not compiled in (enable the `x264` feature)".to_string(),
        ))
    }
}
