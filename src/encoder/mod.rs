//! Video encoders

#[cfg(feature = "av1")]
pub mod av1;

pub mod h264;

use crate::convert::YuvFrame;
use crate::{Codec, Rational, Result, StreamConfig};

/// Encoded video packet
#[derive(Debug, Clone)]
pub struct Packet {
    /// Encoded data
    pub data: Vec<u8>,
    /// Presentation timestamp in the encoder time base
    pub pts: i64,
    /// Decoding timestamp in the encoder time base
    pub dts: i64,
    /// Is this a keyframe?
    pub is_keyframe: bool,
}

/// Video encoder trait
///
/// Construction configures and opens the codec. After [`Encoder::flush`] the
/// encoder is closed: further submissions fail and further flushes return no
/// packets.
pub trait Encoder: Send {
    /// Encode a frame, returning whatever packets the codec has ready
    fn submit(&mut self, frame: &YuvFrame) -> Result<Vec<Packet>>;

    /// Signal end of stream and drain every buffered packet
    fn flush(&mut self) -> Result<Vec<Packet>>;

    /// Time base of packet timestamps
    fn time_base(&self) -> Rational;

    /// Codec private data for the container header (av1C, or H.264 SPS/PPS)
    fn codec_config(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Map a CRF on the x264 scale (0-51) onto an AV1 quantizer (0-255)
pub fn crf_to_quantizer(crf: u8) -> usize {
    (crf.min(crate::MAX_CRF) as usize * 255) / crate::MAX_CRF as usize
}

/// Create an encoder for the configured codec
pub fn create_encoder(config: &StreamConfig) -> Result<Box<dyn Encoder>> {
    match config.codec {
        #[cfg(feature = "av1")]
        Codec::Av1 => Ok(Box::new(av1::Av1Encoder::new(config)?)),
        #[cfg(not(feature = "av1"))]
        Codec::Av1 => Err(crate::Error::CodecUnavailable(
            "AV1 support not compiled in".to_string(),
        )),
        Codec::H264 => h264::create_encoder(config),
    }
}
