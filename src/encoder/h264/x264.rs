//! libx264 through ffmpeg-next

use super::super::{Encoder, Packet};
use crate::convert::YuvFrame;
use crate::{Error, Rational, Result, StreamConfig};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::util::color::Range;
use ffmpeg_next::{codec, Dictionary};

const ENCODER_NAME: &str = "libx264";

/// H.264 encoder driving libx264 with `preset` and `crf` options
pub struct X264Encoder {
    encoder: ffmpeg_next::encoder::Video,
    time_base: Rational,
    extradata: Vec<u8>,
    flushed: bool,
}

// The codec context is only touched through `&mut self`.
unsafe impl Send for X264Encoder {}

impl X264Encoder {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        ffmpeg_next::init()
            .map_err(|e| Error::CodecUnavailable(format!("FFmpeg init: {}", e)))?;

        let codec = ffmpeg_next::encoder::find_by_name(ENCODER_NAME).ok_or_else(|| {
            Error::CodecUnavailable(format!("{} not found in FFmpeg", ENCODER_NAME))
        })?;

        let mut video = codec::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| open_error("allocate context", e))?;
        video.set_width(config.width);
        video.set_height(config.height);
        video.set_format(Pixel::YUV420P);
        video.set_color_range(Range::JPEG);
        video.set_time_base(ffmpeg_next::Rational::new(1, config.fps as i32));
        video.set_frame_rate(Some(ffmpeg_next::Rational::new(config.fps as i32, 1)));
        // SPS/PPS go to extradata so the MP4 muxer can build avcC
        video.set_flags(codec::Flags::GLOBAL_HEADER);

        let mut opts = Dictionary::new();
        opts.set("preset", config.preset.x264_name());
        opts.set("crf", &config.crf.to_string());

        let encoder = video
            .open_with(opts)
            .map_err(|e| open_error("open", e))?;

        let extradata = unsafe {
            let ctx = encoder.as_ptr();
            if (*ctx).extradata.is_null() || (*ctx).extradata_size <= 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts((*ctx).extradata, (*ctx).extradata_size as usize)
                    .to_vec()
            }
        };

        log::info!(
            "{} opened: {}x{} preset={} crf={}",
            ENCODER_NAME,
            config.width,
            config.height,
            config.preset.x264_name(),
            config.crf
        );

        Ok(Self {
            encoder,
            time_base: config.time_base(),
            extradata,
            flushed: false,
        })
    }

    fn receive_packets(&mut self) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();

        loop {
            let mut packet = ffmpeg_next::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    let pts = packet.pts().unwrap_or(0);
                    packets.push(Packet {
                        data: packet.data().map(|d| d.to_vec()).unwrap_or_default(),
                        pts,
                        dts: packet.dts().unwrap_or(pts),
                        is_keyframe: packet.is_key(),
                    });
                }
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(e) => {
                    if packets.is_empty() {
                        return Err(call_error("receive packet", e));
                    }
                    log::warn!("{} receive stopped early: {}", ENCODER_NAME, e);
                    break;
                }
            }
        }

        Ok(packets)
    }
}

impl Encoder for X264Encoder {
    fn submit(&mut self, frame: &YuvFrame) -> Result<Vec<Packet>> {
        if self.flushed {
            return Err(Error::InvalidState(format!(
                "{} already flushed",
                ENCODER_NAME
            )));
        }

        // Fresh frame per call: the encoder may still reference the last one
        let mut av_frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, frame.width, frame.height);
        av_frame.set_color_range(Range::JPEG);
        av_frame.set_pts(Some(frame.pts));

        let planes: [(&[u8], usize, usize); 3] = [
            (&frame.y, frame.width as usize, frame.height as usize),
            (&frame.u, frame.chroma_width(), frame.chroma_height()),
            (&frame.v, frame.chroma_width(), frame.chroma_height()),
        ];
        for (index, (src, width, rows)) in planes.into_iter().enumerate() {
            let stride = av_frame.stride(index);
            let dst = av_frame.data_mut(index);
            for row in 0..rows {
                dst[row * stride..row * stride + width]
                    .copy_from_slice(&src[row * width..(row + 1) * width]);
            }
        }

        self.encoder
            .send_frame(&av_frame)
            .map_err(|e| call_error("send frame", e))?;

        self.receive_packets()
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        if self.flushed {
            return Ok(Vec::new());
        }
        self.flushed = true;

        if let Err(e) = self.encoder.send_eof() {
            log::warn!("{} send eof: {}", ENCODER_NAME, e);
            return Ok(Vec::new());
        }

        match self.receive_packets() {
            Ok(packets) => Ok(packets),
            Err(e) => {
                log::warn!("{} drain ended with error: {}", ENCODER_NAME, e);
                Ok(Vec::new())
            }
        }
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn codec_config(&self) -> Option<Vec<u8>> {
        if self.extradata.is_empty() {
            None
        } else {
            Some(self.extradata.clone())
        }
    }
}

/// Setup failures are fatal; ENOMEM is reported as an allocation failure
fn open_error(what: &str, err: ffmpeg_next::Error) -> Error {
    match err {
        ffmpeg_next::Error::Other { errno } if errno == libc::ENOMEM => {
            Error::FatalAllocation(format!("{} {}: {}", ENCODER_NAME, what, err))
        }
        _ => Error::Encode(format!("{} {}: {}", ENCODER_NAME, what, err)),
    }
}

/// Per-call failures are transient unless the codec ran out of memory
fn call_error(what: &str, err: ffmpeg_next::Error) -> Error {
    match err {
        ffmpeg_next::Error::Other { errno } if errno == libc::ENOMEM => {
            Error::FatalAllocation(format!("{} {}: {}", ENCODER_NAME, what, err))
        }
        _ => Error::RetryableEncode(format!("{} {}: {}", ENCODER_NAME, what, err)),
    }
}

/// Check if FFmpeg provides libx264
pub fn check_available() -> Result<()> {
    ffmpeg_next::init().map_err(|e| Error::CodecUnavailable(format!("FFmpeg init: {}", e)))?;
    match ffmpeg_next::encoder::find_by_name(ENCODER_NAME) {
        Some(_) => Ok(()),
        None => Err(Error::CodecUnavailable(format!(
            "FFmpeg does not have {} support",
            ENCODER_NAME
        ))),
    }
}
