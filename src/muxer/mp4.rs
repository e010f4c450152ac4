//! MP4 container muxer

use super::avc::{annexb_to_length_prefixed, parameter_sets};
use super::{DtsGuard, Muxer, MuxerConfig};
use crate::encoder::Packet;
use crate::{Codec, Error, Rational, Result};
use mp4::{Mp4Config, Mp4Writer, TrackConfig};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// MP4 muxer (H.264 only)
///
/// `ftyp` and the start of `mdat` are written on open; `moov` is the trailer.
pub struct Mp4Muxer {
    writer: Mp4Writer<BufWriter<File>>,
    config: MuxerConfig,
    track_id: u32,
    stream_time_base: Rational,
    sample_duration: u32,
    /// Added to every DTS so the first sample starts at zero
    dts_shift: Option<i64>,
    dts_guard: DtsGuard,
    sample_count: u32,
}

impl Mp4Muxer {
    pub fn new<P: AsRef<Path>>(output_path: P, config: MuxerConfig) -> Result<Self> {
        // The mp4 crate only writes avc1 sample entries
        if config.codec != Codec::H264 {
            return Err(Error::Mux(
                "MP4 container only supports H.264. Use WebM for AV1 instead.".to_string(),
            ));
        }

        config.validate()?;
        let (width, height) = match (u16::try_from(config.width), u16::try_from(config.height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(Error::InvalidConfig(format!(
                    "MP4 dimensions are limited to {}, got {}x{}",
                    u16::MAX,
                    config.width,
                    config.height
                )))
            }
        };

        let (sps, pps) = parameter_sets(config.codec_config.as_deref().unwrap_or_default());
        if sps.is_empty() || pps.is_empty() {
            return Err(Error::Mux(
                "H.264 encoder did not provide SPS/PPS for avcC".to_string(),
            ));
        }

        let stream_time_base = Rational::new(1, track_timescale(config.fps));
        let sample_duration = config.encoder_time_base.rescale(1, stream_time_base) as u32;

        let file = File::create(output_path.as_ref()).map_err(Error::Io)?;
        let writer = BufWriter::new(file);

        let mp4_config = Mp4Config {
            major_brand: str_to_brand("isom"),
            minor_version: 512,
            compatible_brands: vec![
                str_to_brand("isom"),
                str_to_brand("iso2"),
                str_to_brand("avc1"),
                str_to_brand("mp41"),
            ],
            timescale: 1000, // milliseconds
        };

        let mut mp4_writer = Mp4Writer::write_start(writer, &mp4_config)
            .map_err(|e| Error::Mux(format!("Failed to create MP4 writer: {}", e)))?;

        let track_config = TrackConfig {
            track_type: mp4::TrackType::Video,
            timescale: stream_time_base.den,
            language: String::from("und"),
            media_conf: mp4::MediaConfig::AvcConfig(mp4::AvcConfig {
                width,
                height,
                seq_param_set: sps,
                pic_param_set: pps,
            }),
        };

        mp4_writer
            .add_track(&track_config)
            .map_err(|e| Error::Mux(format!("Failed to add track: {}", e)))?;

        log::info!(
            "mp4 header written: {}x{} timescale={}",
            config.width,
            config.height,
            stream_time_base.den
        );

        Ok(Self {
            writer: mp4_writer,
            config,
            // Track ID is always 1 for single track
            track_id: 1,
            stream_time_base,
            sample_duration,
            dts_shift: None,
            dts_guard: DtsGuard::default(),
            sample_count: 0,
        })
    }
}

impl Muxer for Mp4Muxer {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.dts_guard.check(packet.dts)?;

        let encoder_tb = self.config.encoder_time_base;
        let dts = encoder_tb.rescale(packet.dts, self.stream_time_base);
        let pts = encoder_tb.rescale(packet.pts, self.stream_time_base);
        let shift = *self.dts_shift.get_or_insert((-dts).max(0));

        let sample = mp4::Mp4Sample {
            start_time: (dts + shift) as u64,
            duration: self.sample_duration,
            rendering_offset: (pts - dts) as i32,
            is_sync: packet.is_keyframe,
            bytes: mp4::Bytes::from(annexb_to_length_prefixed(&packet.data)),
        };

        self.writer
            .write_sample(self.track_id, &sample)
            .map_err(|e| Error::Mux(format!("Failed to write sample: {}", e)))?;

        self.sample_count += 1;
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<()> {
        let mut muxer = *self;
        muxer
            .writer
            .write_end()
            .map_err(|e| Error::Mux(format!("Failed to finalize MP4: {}", e)))?;

        let mut writer = muxer.writer.into_writer();
        writer.flush().map_err(Error::Io)?;

        log::info!("mp4 trailer written: {} samples", muxer.sample_count);
        Ok(())
    }

    fn stream_time_base(&self) -> Rational {
        self.stream_time_base
    }
}

/// Track timescale: the frame rate doubled until it reaches 10000, so frame
/// boundaries stay exact and the timestamp resolution is fine enough for
/// composition offsets.
fn track_timescale(fps: u32) -> u32 {
    let mut timescale = fps.max(1);
    while timescale < 10000 {
        timescale *= 2;
    }
    timescale
}

fn str_to_brand(s: &str) -> mp4::FourCC {
    let bytes = s.as_bytes();
    mp4::FourCC {
        value: [
            bytes.first().copied().unwrap_or(0),
            bytes.get(1).copied().unwrap_or(0),
            bytes.get(2).copied().unwrap_or(0),
            bytes.get(3).copied().unwrap_or(0),
        ],
    }
}
