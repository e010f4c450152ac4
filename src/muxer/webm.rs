//! WebM container muxer
//!
//! Layout: EBML header, then a Segment holding Info, Tracks, one Cluster per
//! keyframe interval and a trailing Cues index. Segment size and Duration are
//! written as placeholders in the header and patched by `finalize`.

use super::{DtsGuard, Muxer, MuxerConfig};
use crate::encoder::Packet;
use crate::{Codec, Error, Rational, Result};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

const ID_EBML: u32 = 0x1A45DFA3;
const ID_SEGMENT: u32 = 0x18538067;
const ID_INFO: u32 = 0x1549A966;
const ID_TIMESTAMP_SCALE: u32 = 0x2AD7B1;
const ID_DURATION: u32 = 0x4489;
const ID_MUXING_APP: u32 = 0x4D80;
const ID_WRITING_APP: u32 = 0x5741;
const ID_TRACKS: u32 = 0x1654AE6B;
const ID_TRACK_ENTRY: u32 = 0xAE;
const ID_CLUSTER: u32 = 0x1F43B675;
const ID_CLUSTER_TIMESTAMP: u32 = 0xE7;
const ID_SIMPLE_BLOCK: u32 = 0xA3;
const ID_CUES: u32 = 0x1C53BB6B;
const ID_CUE_POINT: u32 = 0xBB;
const ID_CUE_TIME: u32 = 0xB3;
const ID_CUE_TRACK_POSITIONS: u32 = 0xB7;
const ID_CUE_TRACK: u32 = 0xF7;
const ID_CUE_CLUSTER_POSITION: u32 = 0xF1;

/// Matroska colour range value for full (0-255) range
const COLOUR_RANGE_FULL: u64 = 2;

/// Unknown-size marker, later overwritten with the real 8-byte size
const SIZE_UNKNOWN: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

const APP_NAME: &[u8] = b"framereel";

/// Cluster being assembled in memory
struct OpenCluster {
    timecode: i64,
    blocks: Vec<u8>,
    starts_with_keyframe: bool,
}

/// WebM muxer (AV1 only)
pub struct WebmMuxer {
    writer: BufWriter<File>,
    config: MuxerConfig,
    stream_time_base: Rational,
    /// Bytes written so far; also the current file offset
    position: u64,
    segment_size_pos: u64,
    segment_data_start: u64,
    duration_pos: u64,
    cluster: Option<OpenCluster>,
    /// (cluster timecode, cluster offset from segment data start)
    cues: Vec<(i64, u64)>,
    end_timecode: i64,
    dts_guard: DtsGuard,
    blocks_written: u64,
}

impl WebmMuxer {
    pub fn new<P: AsRef<Path>>(output_path: P, config: MuxerConfig) -> Result<Self> {
        // WebM only supports AV1 (and VP8/VP9, but we only implement AV1)
        if config.codec != Codec::Av1 {
            return Err(Error::Mux(
                "WebM container only supports AV1 codec".to_string(),
            ));
        }
        config.validate()?;

        let file = File::create(output_path.as_ref()).map_err(Error::Io)?;
        let writer = BufWriter::new(file);

        let mut muxer = Self {
            writer,
            config,
            // TimestampScale is 1ms
            stream_time_base: Rational::new(1, 1000),
            position: 0,
            segment_size_pos: 0,
            segment_data_start: 0,
            duration_pos: 0,
            cluster: None,
            cues: Vec::new(),
            end_timecode: 0,
            dts_guard: DtsGuard::default(),
            blocks_written: 0,
        };

        muxer.write_header()?;
        log::info!(
            "webm header written: {}x{} @ {} fps",
            muxer.config.width,
            muxer.config.height,
            muxer.config.fps
        );

        Ok(muxer)
    }

    fn write_header(&mut self) -> Result<()> {
        self.emit(&encode_ebml_element(ID_EBML, &create_ebml_header()))?;

        // Segment, size patched on finalize
        self.emit(&encode_ebml_id(ID_SEGMENT))?;
        self.segment_size_pos = self.position;
        self.emit(&SIZE_UNKNOWN)?;
        self.segment_data_start = self.position;

        let (info, duration_offset) = create_segment_info();
        let info_header_len =
            encode_ebml_id(ID_INFO).len() + encode_ebml_size(info.len() as u64).len();
        self.duration_pos = self.position + info_header_len as u64 + duration_offset as u64;
        self.emit(&encode_ebml_element(ID_INFO, &info))?;

        let tracks = encode_ebml_element(ID_TRACK_ENTRY, &self.create_track_entry());
        self.emit(&encode_ebml_element(ID_TRACKS, &tracks))?;

        Ok(())
    }

    fn create_track_entry(&self) -> Vec<u8> {
        let mut data = Vec::new();

        // TrackNumber = 1
        data.extend(encode_ebml_element(0xD7, &[1]));
        // TrackUID = 1
        data.extend(encode_ebml_element(0x73C5, &encode_uint(1)));
        // TrackType = 1 (video)
        data.extend(encode_ebml_element(0x83, &[1]));
        // CodecID = "V_AV1"
        data.extend(encode_ebml_element(0x86, b"V_AV1"));
        // CodecPrivate = av1C record
        if let Some(private) = &self.config.codec_config {
            data.extend(encode_ebml_element(0x63A2, private));
        }
        // DefaultDuration in nanoseconds
        data.extend(encode_ebml_element(
            0x23E383,
            &encode_uint(1_000_000_000 / self.config.fps as u64),
        ));
        // Video settings
        data.extend(encode_ebml_element(0xE0, &self.create_video_settings()));

        data
    }

    fn create_video_settings(&self) -> Vec<u8> {
        let mut data = Vec::new();

        // PixelWidth
        data.extend(encode_ebml_element(
            0xB0,
            &encode_uint(self.config.width as u64),
        ));
        // PixelHeight
        data.extend(encode_ebml_element(
            0xBA,
            &encode_uint(self.config.height as u64),
        ));
        // Colour { Range = full }
        let colour = encode_ebml_element(0x55B9, &encode_uint(COLOUR_RANGE_FULL));
        data.extend(encode_ebml_element(0x55B0, &colour));

        data
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).map_err(Error::Io)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn close_cluster(&mut self) -> Result<()> {
        let Some(cluster) = self.cluster.take() else {
            return Ok(());
        };

        if cluster.starts_with_keyframe {
            self.cues
                .push((cluster.timecode, self.position - self.segment_data_start));
        }

        let mut body = encode_ebml_element(
            ID_CLUSTER_TIMESTAMP,
            &encode_uint(cluster.timecode.max(0) as u64),
        );
        body.extend(cluster.blocks);
        self.emit(&encode_ebml_element(ID_CLUSTER, &body))
    }

    fn write_cues(&mut self) -> Result<()> {
        if self.cues.is_empty() {
            return Ok(());
        }

        let mut data = Vec::new();
        for (timecode, position) in &self.cues {
            let mut positions = encode_ebml_element(ID_CUE_TRACK, &[1]);
            positions.extend(encode_ebml_element(
                ID_CUE_CLUSTER_POSITION,
                &encode_uint(*position),
            ));

            let mut point =
                encode_ebml_element(ID_CUE_TIME, &encode_uint((*timecode).max(0) as u64));
            point.extend(encode_ebml_element(ID_CUE_TRACK_POSITIONS, &positions));
            data.extend(encode_ebml_element(ID_CUE_POINT, &point));
        }

        self.emit(&encode_ebml_element(ID_CUES, &data))
    }
}

impl Muxer for WebmMuxer {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.dts_guard.check(packet.dts)?;

        let encoder_tb = self.config.encoder_time_base;
        let timecode = encoder_tb.rescale(packet.pts, self.stream_time_base);
        let end = encoder_tb.rescale(packet.pts + 1, self.stream_time_base);
        self.end_timecode = self.end_timecode.max(end);

        // Start a new cluster on keyframes, or when the relative timecode overflows
        let needs_new_cluster = match &self.cluster {
            None => true,
            Some(cluster) => {
                let relative = timecode - cluster.timecode;
                (packet.is_keyframe && !cluster.blocks.is_empty())
                    || relative > i16::MAX as i64
                    || relative < i16::MIN as i64
            }
        };
        if needs_new_cluster {
            self.close_cluster()?;
            self.cluster = Some(OpenCluster {
                timecode,
                blocks: Vec::new(),
                starts_with_keyframe: packet.is_keyframe,
            });
        }

        let Some(cluster) = self.cluster.as_mut() else {
            return Err(Error::Mux("no open cluster".to_string()));
        };
        let relative = (timecode - cluster.timecode) as i16;

        let mut block_data = Vec::with_capacity(packet.data.len() + 4);
        // Track number (EBML coded, track 1)
        block_data.push(0x81);
        block_data.extend_from_slice(&relative.to_be_bytes());
        // Flags: keyframe if applicable
        block_data.push(if packet.is_keyframe { 0x80 } else { 0x00 });
        block_data.extend_from_slice(&packet.data);

        cluster
            .blocks
            .extend(encode_ebml_element(ID_SIMPLE_BLOCK, &block_data));
        self.blocks_written += 1;

        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<()> {
        let mut muxer = *self;
        muxer.close_cluster()?;
        muxer.write_cues()?;

        let end = muxer.position;
        let segment_size = end - muxer.segment_data_start;

        muxer
            .writer
            .seek(SeekFrom::Start(muxer.segment_size_pos))
            .map_err(Error::Io)?;
        muxer
            .writer
            .write_all(&encode_size_8(segment_size))
            .map_err(Error::Io)?;

        muxer
            .writer
            .seek(SeekFrom::Start(muxer.duration_pos))
            .map_err(Error::Io)?;
        muxer
            .writer
            .write_all(&(muxer.end_timecode as f64).to_be_bytes())
            .map_err(Error::Io)?;

        muxer.writer.seek(SeekFrom::Start(end)).map_err(Error::Io)?;
        muxer.writer.flush().map_err(Error::Io)?;

        log::info!(
            "webm trailer written: {} blocks, {} cues, {} ms",
            muxer.blocks_written,
            muxer.cues.len(),
            muxer.end_timecode
        );

        let file = muxer
            .writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all().map_err(Error::Io)?;
        Ok(())
    }

    fn stream_time_base(&self) -> Rational {
        self.stream_time_base
    }
}

fn create_ebml_header() -> Vec<u8> {
    let mut data = Vec::new();

    // EBMLVersion = 1
    data.extend(encode_ebml_element(0x4286, &[1]));
    // EBMLReadVersion = 1
    data.extend(encode_ebml_element(0x42F7, &[1]));
    // EBMLMaxIDLength = 4
    data.extend(encode_ebml_element(0x42F2, &[4]));
    // EBMLMaxSizeLength = 8
    data.extend(encode_ebml_element(0x42F3, &[8]));
    // DocType = "webm"
    data.extend(encode_ebml_element(0x4282, b"webm"));
    // DocTypeVersion = 4
    data.extend(encode_ebml_element(0x4287, &[4]));
    // DocTypeReadVersion = 2
    data.extend(encode_ebml_element(0x4285, &[2]));

    data
}

/// Segment Info payload and the offset of the Duration value inside it
fn create_segment_info() -> (Vec<u8>, usize) {
    let mut data = Vec::new();

    // TimestampScale = 1000000 (1ms)
    data.extend(encode_ebml_element(
        ID_TIMESTAMP_SCALE,
        &encode_uint(1_000_000),
    ));
    // Duration placeholder (8-byte float)
    let duration = encode_ebml_element(ID_DURATION, &0f64.to_be_bytes());
    let duration_offset = data.len() + duration.len() - 8;
    data.extend(duration);
    // MuxingApp
    data.extend(encode_ebml_element(ID_MUXING_APP, APP_NAME));
    // WritingApp
    data.extend(encode_ebml_element(ID_WRITING_APP, APP_NAME));

    (data, duration_offset)
}

// EBML encoding helpers

/// Encode an EBML element ID.
///
/// EBML IDs carry their length marker in the leading bits, so the value is
/// written big-endian without leading zero bytes.
fn encode_ebml_id(id: u32) -> Vec<u8> {
    if id <= 0xFF {
        vec![id as u8]
    } else if id <= 0xFFFF {
        vec![(id >> 8) as u8, (id & 0xFF) as u8]
    } else if id <= 0xFF_FFFF {
        vec![(id >> 16) as u8, ((id >> 8) & 0xFF) as u8, (id & 0xFF) as u8]
    } else {
        id.to_be_bytes().to_vec()
    }
}

fn encode_ebml_size(size: u64) -> Vec<u8> {
    if size < 0x7F {
        vec![(size as u8) | 0x80]
    } else if size < 0x3FFF {
        vec![((size >> 8) as u8) | 0x40, (size & 0xFF) as u8]
    } else if size < 0x1FFFFF {
        vec![
            ((size >> 16) as u8) | 0x20,
            ((size >> 8) & 0xFF) as u8,
            (size & 0xFF) as u8,
        ]
    } else if size < 0x0FFFFFFF {
        vec![
            ((size >> 24) as u8) | 0x10,
            ((size >> 16) & 0xFF) as u8,
            ((size >> 8) & 0xFF) as u8,
            (size & 0xFF) as u8,
        ]
    } else {
        encode_size_8(size).to_vec()
    }
}

/// 8-byte size field, used for sizes patched in place
fn encode_size_8(size: u64) -> [u8; 8] {
    let mut bytes = size.to_be_bytes();
    bytes[0] = 0x01;
    bytes
}

fn encode_ebml_element(id: u32, data: &[u8]) -> Vec<u8> {
    let mut result = encode_ebml_id(id);
    result.extend(encode_ebml_size(data.len() as u64));
    result.extend(data);
    result
}

fn encode_uint(value: u64) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }

    let skip = (value.leading_zeros() / 8) as usize;
    value.to_be_bytes()[skip..].to_vec()
}
