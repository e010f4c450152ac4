//! Video container muxers

pub mod avc;
pub mod mp4;
pub mod webm;

use crate::encoder::Packet;
use crate::{Codec, Container, Error, Rational, Result};
use std::path::Path;

/// Video muxer trait
///
/// Construction writes the container header; [`Muxer::finalize`] writes the
/// trailer and closes the file.
pub trait Muxer: Send {
    /// Rescale a packet to the stream time base and write it
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Write the trailer and close the output file
    fn finalize(self: Box<Self>) -> Result<()>;

    /// Time base of the container stream
    fn stream_time_base(&self) -> Rational;
}

/// Muxer configuration
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame rate (fps)
    pub fps: u32,
    /// Video codec
    pub codec: Codec,
    /// Time base of incoming packet timestamps
    pub encoder_time_base: Rational,
    /// Codec-specific configuration data (av1C for AV1, Annex-B SPS/PPS for H.264)
    pub codec_config: Option<Vec<u8>>,
}

impl MuxerConfig {
    /// Reject values that would break timestamp or duration arithmetic
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "stream resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(Error::InvalidConfig("stream fps must be non-zero".to_string()));
        }
        if !self.encoder_time_base.is_valid() {
            return Err(Error::InvalidConfig(format!(
                "invalid encoder time base {}",
                self.encoder_time_base
            )));
        }
        Ok(())
    }
}

/// Create a muxer for the specified container format
pub fn create_muxer<P: AsRef<Path>>(
    container: Container,
    output_path: P,
    config: MuxerConfig,
) -> Result<Box<dyn Muxer>> {
    if !container.supports_codec(config.codec) {
        return Err(Error::UnsupportedFormat {
            container,
            codec: config.codec,
        });
    }
    match container {
        Container::Mp4 => Ok(Box::new(mp4::Mp4Muxer::new(output_path, config)?)),
        Container::WebM => Ok(Box::new(webm::WebmMuxer::new(output_path, config)?)),
    }
}

/// Tracks the last written decode timestamp so out-of-order packets are
/// rejected before they reach the container
#[derive(Debug, Default)]
pub(crate) struct DtsGuard {
    last: Option<i64>,
}

impl DtsGuard {
    pub(crate) fn check(&mut self, dts: i64) -> Result<()> {
        if let Some(last) = self.last {
            if dts < last {
                return Err(Error::Mux(format!(
                    "decode timestamp went backwards: {} after {}",
                    dts, last
                )));
            }
        }
        self.last = Some(dts);
        Ok(())
    }
}
