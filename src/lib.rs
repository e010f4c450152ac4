//! framereel - streaming frame-to-video encoding pipeline
//!
//! Frames go through three stages:
//! - `convert`: RGBA to planar YUV 4:2:0, full range
//! - `encoder`: compressed packets from AV1 (rav1e) or H.264 (libx264)
//! - `muxer`: WebM or MP4 container with rescaled timestamps
//!
//! [`Pipeline`] drives them and owns the teardown order. [`life`] is a
//! Game of Life frame source used by the `framereel` binary.

pub mod convert;
pub mod encoder;
pub mod error;
pub mod life;
pub mod muxer;
pub mod pipeline;
pub mod time;

pub use convert::{PixelConverter, YuvFrame};
pub use error::{Error, ErrorCode, Result};
pub use pipeline::{Pipeline, PipelineState, PipelineStats};
pub use time::Rational;

/// Video codec types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// AV1 codec (using rav1e)
    Av1,
    /// H.264 codec (using libx264 through FFmpeg)
    H264,
}

/// Container format types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// MP4 container (H.264 only)
    Mp4,
    /// WebM container (AV1 only)
    WebM,
}

impl Container {
    /// Check if the container supports the given codec
    pub fn supports_codec(&self, codec: Codec) -> bool {
        match (self, codec) {
            (Container::Mp4, Codec::H264) => true,
            (Container::Mp4, Codec::Av1) => false,
            (Container::WebM, Codec::Av1) => true,
            (Container::WebM, Codec::H264) => false,
        }
    }

    /// File extension conventionally used for this container
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::WebM => "webm",
        }
    }
}

/// Speed/efficiency preset, named after the x264 presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
    Placebo,
}

impl Preset {
    /// Value of libx264's `preset` option
    pub fn x264_name(&self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Slower => "slower",
            Preset::Veryslow => "veryslow",
            Preset::Placebo => "placebo",
        }
    }

    /// rav1e speed level, 10 (fastest) to 0 (slowest)
    pub fn rav1e_speed(&self) -> u8 {
        match self {
            Preset::Ultrafast => 10,
            Preset::Superfast => 9,
            Preset::Veryfast => 8,
            Preset::Faster => 7,
            Preset::Fast => 6,
            Preset::Medium => 5,
            Preset::Slow => 4,
            Preset::Slower => 3,
            Preset::Veryslow => 2,
            Preset::Placebo => 0,
        }
    }
}

/// What the pipeline does when the encoder reports a transient error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransientPolicy {
    /// Log the error, treat the call as having produced no packets, continue.
    /// A frame whose packets never re-emerge is lost.
    #[default]
    DropAndContinue,
    /// Return the error to the caller
    FailRun,
}

/// Largest CRF accepted (x264 scale)
pub const MAX_CRF: u8 = 51;

/// Smallest width and height rav1e will encode
pub const AV1_MIN_DIMENSION: u32 = 16;

/// Stream configuration, fixed for the lifetime of a pipeline
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frames per second; the encoder time base is `1/fps`
    pub fps: u32,
    /// Video codec
    pub codec: Codec,
    /// Container format
    pub container: Container,
    /// Speed/efficiency preset
    pub preset: Preset,
    /// Constant rate factor, 0 (lossless-ish) to 51 (worst)
    pub crf: u8,
    /// Transient encoder error handling
    pub transient_policy: TransientPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            codec: Codec::Av1,
            container: Container::WebM,
            preset: Preset::Slow,
            crf: 20,
            transient_policy: TransientPolicy::DropAndContinue,
        }
    }
}

impl StreamConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(Error::InvalidConfig("fps must be non-zero".to_string()));
        }
        if self.crf > MAX_CRF {
            return Err(Error::InvalidConfig(format!(
                "crf must be in 0..={}, got {}",
                MAX_CRF, self.crf
            )));
        }
        if !self.container.supports_codec(self.codec) {
            return Err(Error::UnsupportedFormat {
                container: self.container,
                codec: self.codec,
            });
        }
        if self.codec == Codec::Av1
            && (self.width < AV1_MIN_DIMENSION || self.height < AV1_MIN_DIMENSION)
        {
            return Err(Error::InvalidConfig(format!(
                "AV1 needs at least {}x{}, got {}x{}",
                AV1_MIN_DIMENSION, AV1_MIN_DIMENSION, self.width, self.height
            )));
        }
        // avc1 sample entries store 16-bit dimensions
        if self.container == Container::Mp4
            && (self.width > u16::MAX as u32 || self.height > u16::MAX as u32)
        {
            return Err(Error::InvalidConfig(format!(
                "MP4 dimensions are limited to {}, got {}x{}",
                u16::MAX,
                self.width,
                self.height
            )));
        }
        Ok(())
    }

    /// Encoder time base
    pub fn time_base(&self) -> Rational {
        Rational::per_frame(self.fps)
    }
}

/// Check if a codec is available in this build and on this system
pub fn available(codec: Codec) -> Result<()> {
    match codec {
        Codec::Av1 => {
            #[cfg(feature = "av1")]
            {
                Ok(())
            }
            #[cfg(not(feature = "av1"))]
            {
                Err(Error::CodecUnavailable(
                    "AV1 support not compiled in".to_string(),
                ))
            }
        }
        Codec::H264 => encoder::h264::check_available(),
    }
}
