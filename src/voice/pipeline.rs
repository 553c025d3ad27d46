//! The two unidirectional audio pipelines
//!
//! Capture: frame -> encode -> (buffer until open) -> transport.
//! Playback: base64 delta -> decode -> schedule -> output device.

use super::analyser::AnalyserTap;
use super::codec::{self, EncodedChunk};
use super::device::PlaybackSink;
use super::frame::CaptureFrame;
use super::scheduler::{PlaybackQueueEntry, PlaybackScheduler, SegmentId};
use crate::Result;
use crate::live::OutboundQueue;

/// Encodes capture frames and holds them back until the stream opens
#[derive(Debug)]
pub struct CapturePipeline {
    queue: OutboundQueue,
    open: bool,
    last_seq: Option<u64>,
}

impl CapturePipeline {
    /// Create a pipeline buffering up to `buffer_frames` before open
    #[must_use]
    pub fn new(buffer_frames: usize) -> Self {
        Self {
            queue: OutboundQueue::new(buffer_frames),
            open: false,
            last_seq: None,
        }
    }

    /// Encode a frame
    ///
    /// Returns the chunk to send now, or `None` if it was buffered because
    /// the stream is not open yet.
    pub fn push(&mut self, frame: &CaptureFrame) -> Option<EncodedChunk> {
        if let Some(last) = self.last_seq
            && frame.seq <= last
        {
            tracing::warn!(seq = frame.seq, last, "capture frame out of order");
        }
        self.last_seq = Some(frame.seq);

        let chunk = codec::encode(&frame.samples);
        if self.open {
            Some(chunk)
        } else {
            self.queue.push(chunk);
            None
        }
    }

    /// Mark the stream open and return buffered chunks, oldest first
    pub fn open(&mut self) -> Vec<EncodedChunk> {
        self.open = true;
        let buffered = self.queue.drain();
        if !buffered.is_empty() {
            tracing::debug!(
                count = buffered.len(),
                dropped = self.queue.dropped(),
                "flushing frames captured before open"
            );
        }
        buffered
    }

    /// Whether frames go straight to the transport
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Frames evicted while waiting for the stream to open
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

/// Decodes model audio and schedules it for gapless output
pub struct PlaybackPipeline {
    scheduler: PlaybackScheduler,
    sink: Box<dyn PlaybackSink>,
    sample_rate: u32,
    channels: u16,
    closed: bool,
}

impl PlaybackPipeline {
    /// Wrap an open sink; the scheduler cursor starts at the sink's clock
    #[must_use]
    pub fn new(sink: Box<dyn PlaybackSink>, sample_rate: u32, channels: u16) -> Self {
        let scheduler = PlaybackScheduler::new(sink.current_time());
        Self {
            scheduler,
            sink,
            sample_rate,
            channels,
            closed: false,
        }
    }

    /// Decode one base64 delta and schedule it after everything queued
    ///
    /// Empty payloads are skipped and return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedAudio` if the payload cannot be decoded; nothing is
    /// scheduled and earlier segments are unaffected
    pub fn push_delta(&mut self, data: &str) -> Result<Option<PlaybackQueueEntry>> {
        let segment = codec::decode_segment(data, self.sample_rate, self.channels)?;
        if segment.frame_count() == 0 {
            tracing::debug!("skipping empty audio delta");
            return Ok(None);
        }

        let entry = self.scheduler.schedule(segment, self.sink.current_time());
        if let Err(e) = self.sink.start(&entry) {
            self.scheduler.finish(entry.id);
            return Err(e);
        }
        Ok(Some(entry))
    }

    /// Stop and discard everything scheduled or playing
    ///
    /// Returns the number of segments flushed.
    pub fn interrupt(&mut self) -> usize {
        let flushed = self.scheduler.flush();
        for entry in &flushed {
            self.sink.stop(entry.id);
        }
        flushed.len()
    }

    /// Record natural completion of a segment
    pub fn segment_ended(&mut self, id: SegmentId) -> bool {
        self.scheduler.finish(id)
    }

    /// Whether any segment is scheduled or playing
    #[must_use]
    pub fn is_talking(&self) -> bool {
        self.scheduler.is_talking()
    }

    /// Read-only view of the scheduler
    #[must_use]
    pub const fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// Analysis tap on the output
    #[must_use]
    pub fn analyser(&self) -> AnalyserTap {
        self.sink.analyser()
    }

    /// Stop all output and release the playback context
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.interrupt();
        self.sink.close();
    }
}
