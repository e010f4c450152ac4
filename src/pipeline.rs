//! Frame-to-file pipeline
//!
//! Per frame: convert, stamp the next PTS, encode, mux every packet the
//! encoder produced. Teardown drains the encoder, writes the drained packets,
//! writes the container trailer and only then releases the codec and frame
//! buffers. Teardown also runs from `Drop`, so an early return or a panic
//! between frames still produces a finalized file.

use crate::convert::{PixelConverter, YuvFrame};
use crate::encoder::{create_encoder, Encoder, Packet};
use crate::muxer::{create_muxer, Muxer, MuxerConfig};
use crate::{Error, Result, StreamConfig, TransientPolicy};
use image::RgbaImage;
use std::path::Path;

/// Lifecycle of a [`Pipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Accepting frames
    Open,
    /// An encoder or muxer error was returned; only teardown is allowed
    Failed,
    /// Flushing the encoder and writing the trailer
    Draining,
    /// Trailer written, resources released
    Closed,
}

/// Counters reported when the pipeline closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames handed to the encoder (including dropped submissions)
    pub frames_submitted: u64,
    /// Packets written to the container, including the flushed tail
    pub packets_written: u64,
    /// Submissions whose transient error was dropped
    pub dropped_submissions: u64,
}

/// Owns converter, encoder and muxer for one output file
pub struct Pipeline {
    converter: PixelConverter,
    encoder: Option<Box<dyn Encoder>>,
    muxer: Option<Box<dyn Muxer>>,
    frame: YuvFrame,
    next_pts: i64,
    state: PipelineState,
    policy: TransientPolicy,
    stats: PipelineStats,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("state", &self.state)
            .field("next_pts", &self.next_pts)
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Build a pipeline writing to `output_path`.
    ///
    /// Fails without leaving anything running if the codec cannot be opened
    /// or the container cannot be created.
    pub fn create<P: AsRef<Path>>(config: &StreamConfig, output_path: P) -> Result<Self> {
        config.validate()?;

        let converter = PixelConverter::new(config.width, config.height)?;
        let encoder = create_encoder(config)?;

        let muxer_config = MuxerConfig {
            width: config.width,
            height: config.height,
            fps: config.fps,
            codec: config.codec,
            encoder_time_base: encoder.time_base(),
            codec_config: encoder.codec_config(),
        };
        let muxer = create_muxer(config.container, output_path.as_ref(), muxer_config)?;

        log::info!(
            "pipeline open: {:?}/{:?} {}x{} @ {} fps -> {}",
            config.codec,
            config.container,
            config.width,
            config.height,
            config.fps,
            output_path.as_ref().display()
        );

        Ok(Self::from_parts(
            converter,
            encoder,
            muxer,
            config.transient_policy,
        ))
    }

    /// Assemble a pipeline from already opened parts
    pub fn from_parts(
        converter: PixelConverter,
        encoder: Box<dyn Encoder>,
        muxer: Box<dyn Muxer>,
        policy: TransientPolicy,
    ) -> Self {
        let frame = converter.alloc_frame();
        Self {
            converter,
            encoder: Some(encoder),
            muxer: Some(muxer),
            frame,
            next_pts: 0,
            state: PipelineState::Open,
            policy,
            stats: PipelineStats::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Frames handed to the encoder so far
    pub fn frames_submitted(&self) -> u64 {
        self.stats.frames_submitted
    }

    /// PTS the next frame will receive
    pub fn next_pts(&self) -> i64 {
        self.next_pts
    }

    /// Encode one frame and mux whatever packets it produced.
    ///
    /// Returns the number of packets written for this call. A frame of the
    /// wrong size is rejected without side effects; any encoder or muxer
    /// error that is returned moves the pipeline to `Failed`.
    pub fn add_frame(&mut self, image: &RgbaImage) -> Result<usize> {
        if self.state != PipelineState::Open {
            return Err(Error::InvalidState(format!(
                "cannot add frames while {:?}",
                self.state
            )));
        }
        let Some(encoder) = self.encoder.as_mut() else {
            return Err(Error::InvalidState("encoder released".to_string()));
        };

        self.converter.convert(image, &mut self.frame)?;
        self.frame.pts = self.next_pts;
        self.next_pts += 1;
        self.stats.frames_submitted += 1;

        let packets = match encoder.submit(&self.frame) {
            Ok(packets) => packets,
            Err(e) if e.is_transient() && self.policy == TransientPolicy::DropAndContinue => {
                log::warn!("frame {}: {}; continuing", self.frame.pts, e);
                self.stats.dropped_submissions += 1;
                Vec::new()
            }
            Err(e) => return Err(self.fail(e)),
        };

        self.write_packets(&packets).map_err(|e| self.fail(e))
    }

    /// Drain the encoder, write the trailer and release resources.
    ///
    /// May be called once, from `Open` or `Failed`; later calls fail with
    /// `InvalidState`.
    pub fn finalize(&mut self) -> Result<PipelineStats> {
        if !self.can_teardown() {
            return Err(Error::InvalidState(format!(
                "finalize called while {:?}",
                self.state
            )));
        }
        self.teardown()?;
        Ok(self.stats)
    }

    /// Consume the pipeline, finalizing the output
    pub fn finish(mut self) -> Result<PipelineStats> {
        self.finalize()
    }

    fn can_teardown(&self) -> bool {
        matches!(self.state, PipelineState::Open | PipelineState::Failed)
    }

    fn fail(&mut self, err: Error) -> Error {
        log::error!("frame {}: {}; no further frames accepted", self.frame.pts, err);
        self.state = PipelineState::Failed;
        err
    }

    fn write_packets(&mut self, packets: &[Packet]) -> Result<usize> {
        if packets.is_empty() {
            return Ok(0);
        }
        let Some(muxer) = self.muxer.as_mut() else {
            return Err(Error::InvalidState("muxer closed".to_string()));
        };

        for packet in packets {
            muxer.write_packet(packet)?;
            self.stats.packets_written += 1;
        }
        log::debug!(
            "muxed {} packet(s), last dts {}",
            packets.len(),
            packets[packets.len() - 1].dts
        );
        Ok(packets.len())
    }

    fn teardown(&mut self) -> Result<()> {
        self.state = PipelineState::Draining;

        let drained = match self.encoder.as_mut() {
            Some(encoder) => encoder.flush(),
            None => Ok(Vec::new()),
        };
        let written = drained.and_then(|packets| {
            log::debug!("flush returned {} packet(s)", packets.len());
            self.write_packets(&packets)
        });

        // The flush loop has terminated either way; close the container
        let finalized = match self.muxer.take() {
            Some(muxer) => muxer.finalize(),
            None => Ok(()),
        };

        self.encoder = None;
        self.frame = YuvFrame::default();
        self.state = PipelineState::Closed;

        log::info!(
            "pipeline closed: {} frames, {} packets, {} dropped",
            self.stats.frames_submitted,
            self.stats.packets_written,
            self.stats.dropped_submissions
        );

        written.and(finalized)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.can_teardown() {
            if let Err(e) = self.teardown() {
                log::error!("pipeline teardown on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rational;
    use image::Rgba;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Header,
        Packet { pts: i64, dts: i64 },
        Trailer,
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    /// Holds `lookahead` frames before emitting, like a reordering codec
    struct MockEncoder {
        lookahead: usize,
        queue: VecDeque<i64>,
        submitted: Arc<Mutex<Vec<i64>>>,
        fail_on: Option<i64>,
        fatal: bool,
        flush_fails: bool,
        flushed: bool,
    }

    impl MockEncoder {
        fn new(lookahead: usize, submitted: Arc<Mutex<Vec<i64>>>) -> Self {
            Self {
                lookahead,
                queue: VecDeque::new(),
                submitted,
                fail_on: None,
                fatal: false,
                flush_fails: false,
                flushed: false,
            }
        }

        fn packet(pts: i64) -> Packet {
            Packet {
                data: vec![pts as u8],
                pts,
                dts: pts,
                is_keyframe: pts == 0,
            }
        }
    }

    impl Encoder for MockEncoder {
        fn submit(&mut self, frame: &YuvFrame) -> Result<Vec<Packet>> {
            self.submitted.lock().unwrap().push(frame.pts);
            if self.fail_on == Some(frame.pts) {
                if self.fatal {
                    return Err(Error::FatalAllocation("ENOMEM".to_string()));
                }
                return Err(Error::RetryableEncode("EAGAIN".to_string()));
            }
            self.queue.push_back(frame.pts);
            let mut out = Vec::new();
            while self.queue.len() > self.lookahead {
                let pts = self.queue.pop_front().unwrap();
                out.push(Self::packet(pts));
            }
            Ok(out)
        }

        fn flush(&mut self) -> Result<Vec<Packet>> {
            if self.flushed {
                return Ok(Vec::new());
            }
            self.flushed = true;
            if self.flush_fails {
                self.queue.clear();
                return Err(Error::RetryableEncode("drain interrupted".to_string()));
            }
            Ok(self.queue.drain(..).map(Self::packet).collect())
        }

        fn time_base(&self) -> Rational {
            Rational::per_frame(60)
        }
    }

    struct RecordingMuxer {
        log: Log,
        fail_on: Option<i64>,
    }

    impl RecordingMuxer {
        fn open(log: Log) -> Self {
            log.lock().unwrap().push(Event::Header);
            Self { log, fail_on: None }
        }
    }

    impl Muxer for RecordingMuxer {
        fn write_packet(&mut self, packet: &Packet) -> Result<()> {
            if self.fail_on == Some(packet.pts) {
                return Err(Error::Mux("disk full".to_string()));
            }
            self.log.lock().unwrap().push(Event::Packet {
                pts: packet.pts,
                dts: packet.dts,
            });
            Ok(())
        }

        fn finalize(self: Box<Self>) -> Result<()> {
            self.log.lock().unwrap().push(Event::Trailer);
            Ok(())
        }

        fn stream_time_base(&self) -> Rational {
            Rational::new(1, 1000)
        }
    }

    struct Harness {
        pipeline: Pipeline,
        submitted: Arc<Mutex<Vec<i64>>>,
        log: Log,
    }

    fn harness(lookahead: usize, fail_on: Option<i64>, policy: TransientPolicy) -> Harness {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut encoder = MockEncoder::new(lookahead, submitted.clone());
        encoder.fail_on = fail_on;
        harness_with(encoder, submitted, None, policy)
    }

    fn harness_with(
        encoder: MockEncoder,
        submitted: Arc<Mutex<Vec<i64>>>,
        muxer_fail_on: Option<i64>,
        policy: TransientPolicy,
    ) -> Harness {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut muxer = RecordingMuxer::open(log.clone());
        muxer.fail_on = muxer_fail_on;
        let pipeline = Pipeline::from_parts(
            PixelConverter::new(2, 2).unwrap(),
            Box::new(encoder),
            Box::new(muxer),
            policy,
        );
        Harness {
            pipeline,
            submitted,
            log,
        }
    }

    fn frame(shade: u8) -> RgbaImage {
        RgbaImage::from_pixel(2, 2, Rgba([shade, shade, shade, 255]))
    }

    #[test]
    fn test_pts_are_consecutive_regardless_of_lookahead() {
        for lookahead in [0, 1, 4] {
            let mut h = harness(lookahead, None, TransientPolicy::DropAndContinue);
            for i in 0..10 {
                h.pipeline.add_frame(&frame(i * 20)).unwrap();
            }
            h.pipeline.finalize().unwrap();
            assert_eq!(*h.submitted.lock().unwrap(), (0..10).collect::<Vec<i64>>());
        }
    }

    #[test]
    fn test_header_before_packets_and_trailer_after_flush() {
        let mut h = harness(3, None, TransientPolicy::DropAndContinue);
        let mut during = 0;
        for i in 0..5 {
            during += h.pipeline.add_frame(&frame(i)).unwrap();
        }
        // Three frames still buffered in the encoder
        assert_eq!(during, 2);

        let stats = h.pipeline.finalize().unwrap();
        assert_eq!(stats.packets_written, 5);
        assert_eq!(h.pipeline.state(), PipelineState::Closed);

        let log = h.log.lock().unwrap();
        assert_eq!(log.first(), Some(&Event::Header));
        assert_eq!(log.last(), Some(&Event::Trailer));
        assert_eq!(log.iter().filter(|e| **e == Event::Trailer).count(), 1);
        let dts: Vec<i64> = log
            .iter()
            .filter_map(|e| match e {
                Event::Packet { dts, .. } => Some(*dts),
                _ => None,
            })
            .collect();
        assert_eq!(dts, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_single_frame_two_by_two() {
        let mut h = harness(2, None, TransientPolicy::DropAndContinue);
        assert_eq!(h.pipeline.add_frame(&frame(255)).unwrap(), 0);
        let stats = h.pipeline.finalize().unwrap();
        assert_eq!(stats.frames_submitted, 1);
        assert_eq!(stats.packets_written, 1);
        assert_eq!(
            *h.log.lock().unwrap(),
            vec![Event::Header, Event::Packet { pts: 0, dts: 0 }, Event::Trailer]
        );
    }

    #[test]
    fn test_drop_finalizes_open_pipeline() {
        let h = harness(2, None, TransientPolicy::DropAndContinue);
        let log = h.log.clone();
        let mut pipeline = h.pipeline;
        pipeline.add_frame(&frame(1)).unwrap();
        pipeline.add_frame(&frame(2)).unwrap();
        drop(pipeline);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 4);
        assert_eq!(log.last(), Some(&Event::Trailer));
    }

    #[test]
    fn test_frames_rejected_after_finalize() {
        let mut h = harness(0, None, TransientPolicy::DropAndContinue);
        h.pipeline.finalize().unwrap();
        assert!(matches!(
            h.pipeline.add_frame(&frame(0)),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            h.pipeline.finalize(),
            Err(Error::InvalidState(_))
        ));
        // Trailer written exactly once, also after drop
        drop(h.pipeline);
        let log = h.log.lock().unwrap();
        assert_eq!(log.iter().filter(|e| **e == Event::Trailer).count(), 1);
    }

    #[test]
    fn test_transient_error_dropped_by_default() {
        let mut h = harness(0, Some(2), TransientPolicy::DropAndContinue);
        for i in 0..5 {
            let written = h.pipeline.add_frame(&frame(i)).unwrap();
            assert_eq!(written, if i == 2 { 0 } else { 1 });
        }
        let stats = h.pipeline.finalize().unwrap();
        assert_eq!(stats.dropped_submissions, 1);
        assert_eq!(stats.frames_submitted, 5);
        assert_eq!(stats.packets_written, 4);
        assert_eq!(*h.submitted.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    fn trailer_count(log: &Log) -> usize {
        log.lock()
            .unwrap()
            .iter()
            .filter(|e| **e == Event::Trailer)
            .count()
    }

    #[test]
    fn test_transient_error_fails_run_when_configured() {
        let mut h = harness(0, Some(1), TransientPolicy::FailRun);
        h.pipeline.add_frame(&frame(0)).unwrap();
        let err = h.pipeline.add_frame(&frame(1)).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(h.pipeline.state(), PipelineState::Failed);

        // No more frames once the run has failed
        assert!(matches!(
            h.pipeline.add_frame(&frame(2)),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(*h.submitted.lock().unwrap(), vec![0, 1]);

        // Teardown still writes the trailer
        let stats = h.pipeline.finalize().unwrap();
        assert_eq!(stats.packets_written, 1);
        assert_eq!(h.pipeline.state(), PipelineState::Closed);
        assert_eq!(trailer_count(&h.log), 1);
    }

    #[test]
    fn test_fatal_encoder_error_stops_frames() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut encoder = MockEncoder::new(0, submitted.clone());
        encoder.fail_on = Some(0);
        encoder.fatal = true;
        let mut h = harness_with(encoder, submitted, None, TransientPolicy::DropAndContinue);

        let err = h.pipeline.add_frame(&frame(0)).unwrap_err();
        assert!(matches!(err, Error::FatalAllocation(_)));
        assert_eq!(h.pipeline.state(), PipelineState::Failed);
        assert!(h.pipeline.add_frame(&frame(1)).is_err());
        assert_eq!(h.pipeline.stats().dropped_submissions, 0);
    }

    #[test]
    fn test_muxer_failure_stops_frames_and_drop_still_finalizes() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let encoder = MockEncoder::new(0, submitted.clone());
        let mut h = harness_with(encoder, submitted, Some(1), TransientPolicy::DropAndContinue);

        h.pipeline.add_frame(&frame(0)).unwrap();
        let err = h.pipeline.add_frame(&frame(1)).unwrap_err();
        assert!(matches!(err, Error::Mux(_)));
        assert_eq!(h.pipeline.state(), PipelineState::Failed);
        assert!(matches!(
            h.pipeline.add_frame(&frame(2)),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(h.pipeline.frames_submitted(), 2);

        let log = h.log.clone();
        drop(h.pipeline);
        let log_events = log.lock().unwrap().clone();
        assert_eq!(
            log_events,
            vec![Event::Header, Event::Packet { pts: 0, dts: 0 }, Event::Trailer]
        );
    }

    #[test]
    fn test_flush_error_still_writes_trailer() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut encoder = MockEncoder::new(2, submitted.clone());
        encoder.flush_fails = true;
        let mut h = harness_with(encoder, submitted, None, TransientPolicy::DropAndContinue);

        for i in 0..4 {
            h.pipeline.add_frame(&frame(i)).unwrap();
        }
        let err = h.pipeline.finalize().unwrap_err();
        assert!(err.is_transient());
        assert_eq!(h.pipeline.state(), PipelineState::Closed);
        assert_eq!(h.pipeline.stats().packets_written, 2);

        let log = h.log.lock().unwrap();
        assert_eq!(log.last(), Some(&Event::Trailer));
        assert_eq!(log.iter().filter(|e| **e == Event::Trailer).count(), 1);
        drop(log);

        // Closed is terminal even though teardown reported an error
        assert!(matches!(
            h.pipeline.finalize(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_flush_error_on_drop_still_writes_trailer() {
        let submitted = Arc::new(Mutex::new(Vec::new()));
        let mut encoder = MockEncoder::new(3, submitted.clone());
        encoder.flush_fails = true;
        let h = harness_with(encoder, submitted, None, TransientPolicy::DropAndContinue);
        let log = h.log.clone();
        let mut pipeline = h.pipeline;
        pipeline.add_frame(&frame(9)).unwrap();
        drop(pipeline);

        assert_eq!(
            *log.lock().unwrap(),
            vec![Event::Header, Event::Trailer]
        );
    }

    #[test]
    fn test_frames_submitted_tracks_counter() {
        let mut h = harness(1, None, TransientPolicy::DropAndContinue);
        assert_eq!(h.pipeline.frames_submitted(), 0);
        h.pipeline.add_frame(&frame(0)).unwrap();
        h.pipeline.add_frame(&frame(1)).unwrap();
        assert_eq!(h.pipeline.frames_submitted(), 2);
        assert_eq!(h.pipeline.next_pts(), 2);
    }

    #[test]
    fn test_wrong_dimensions_rejected_before_encoding() {
        let mut h = harness(0, None, TransientPolicy::DropAndContinue);
        let wrong = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        assert!(matches!(
            h.pipeline.add_frame(&wrong),
            Err(Error::DimensionMismatch { .. })
        ));
        assert_eq!(h.pipeline.next_pts(), 0);
        assert!(h.submitted.lock().unwrap().is_empty());

        h.pipeline.add_frame(&frame(0)).unwrap();
        assert_eq!(*h.submitted.lock().unwrap(), vec![0]);
    }
}
