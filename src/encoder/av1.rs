//! AV1 encoder using rav1e

use super::{crf_to_quantizer, Encoder, Packet};
use crate::convert::YuvFrame;
use crate::{Error, Result, StreamConfig};
use rav1e::prelude::*;
use std::collections::HashMap;

/// AV1 encoder using rav1e
pub struct Av1Encoder {
    context: Context<u8>,
    time_base: crate::Rational,
    /// Caller PTS keyed by rav1e's input frame number
    pending_pts: HashMap<u64, i64>,
    accepted: u64,
    flushed: bool,
}

impl Av1Encoder {
    /// Create and open a new AV1 encoder
    pub fn new(config: &StreamConfig) -> Result<Self> {
        let quantizer = crf_to_quantizer(config.crf);
        let min_quantizer = quantizer.saturating_sub(10) as u8;

        let enc_config = rav1e::config::EncoderConfig {
            width: config.width as usize,
            height: config.height as usize,
            speed_settings: SpeedSettings::from_preset(config.preset.rav1e_speed().into()),
            time_base: Rational::new(1, config.fps as u64),
            sample_aspect_ratio: Rational::new(1, 1),
            bit_depth: 8,
            chroma_sampling: ChromaSampling::Cs420,
            chroma_sample_position: ChromaSamplePosition::Unknown,
            pixel_range: PixelRange::Full,
            still_picture: false,
            low_latency: false,
            max_key_frame_interval: 240,
            quantizer,
            min_quantizer,
            bitrate: 0,
            tune: Tune::Psychovisual,
            ..Default::default()
        };

        let rav1e_config = Config::new()
            .with_encoder_config(enc_config)
            .with_threads(0);

        let context = rav1e_config
            .new_context()
            .map_err(|e| Error::Encode(format!("Failed to create AV1 context: {}", e)))?;

        log::debug!(
            "rav1e opened: {}x{} speed={} quantizer={}",
            config.width,
            config.height,
            config.preset.rav1e_speed(),
            quantizer
        );

        Ok(Self {
            context,
            time_base: config.time_base(),
            pending_pts: HashMap::new(),
            accepted: 0,
            flushed: false,
        })
    }

    fn to_packet(&mut self, pkt: rav1e::prelude::Packet<u8>) -> Packet {
        let pts = self
            .pending_pts
            .remove(&pkt.input_frameno)
            .unwrap_or(pkt.input_frameno as i64);
        Packet {
            data: pkt.data,
            pts,
            dts: pts,
            is_keyframe: pkt.frame_type == FrameType::KEY,
        }
    }

    /// Receive packets until rav1e needs more input (or, after flush, is done)
    fn receive_packets(&mut self) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();

        loop {
            match self.context.receive_packet() {
                Ok(pkt) => {
                    let packet = self.to_packet(pkt);
                    packets.push(packet);
                }
                Err(EncoderStatus::Encoded) => continue,
                Err(EncoderStatus::NeedMoreData) => break,
                Err(EncoderStatus::LimitReached) => break,
                Err(e) => {
                    if packets.is_empty() {
                        return Err(Error::RetryableEncode(format!("AV1 receive: {}", e)));
                    }
                    log::warn!("AV1 receive stopped early: {}", e);
                    break;
                }
            }
        }

        Ok(packets)
    }
}

impl Encoder for Av1Encoder {
    fn submit(&mut self, frame: &YuvFrame) -> Result<Vec<Packet>> {
        if self.flushed {
            return Err(Error::InvalidState(
                "AV1 encoder already flushed".to_string(),
            ));
        }

        let mut yuv = self.context.new_frame();
        let chroma_stride = frame.chroma_width();
        yuv.planes[0].copy_from_raw_u8(&frame.y, frame.width as usize, 1);
        yuv.planes[1].copy_from_raw_u8(&frame.u, chroma_stride, 1);
        yuv.planes[2].copy_from_raw_u8(&frame.v, chroma_stride, 1);

        self.context
            .send_frame(yuv)
            .map_err(|e| Error::RetryableEncode(format!("AV1 send frame: {}", e)))?;

        self.pending_pts.insert(self.accepted, frame.pts);
        self.accepted += 1;
        self.receive_packets()
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        if self.flushed {
            return Ok(Vec::new());
        }
        self.flushed = true;
        self.context.flush();

        match self.receive_packets() {
            Ok(packets) => Ok(packets),
            Err(e) => {
                log::warn!("AV1 drain ended with error: {}", e);
                Ok(Vec::new())
            }
        }
    }

    fn time_base(&self) -> crate::Rational {
        self.time_base
    }

    fn codec_config(&self) -> Option<Vec<u8>> {
        Some(self.context.container_sequence_header())
    }
}
