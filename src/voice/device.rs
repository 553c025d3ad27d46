//! Audio backend seam between the session and real hardware
//!
//! The session only talks to these traits, so the capture and playback
//! paths can run against in-memory fakes in tests.

use tokio::sync::mpsc;

use super::analyser::AnalyserTap;
use super::frame::CaptureFrame;
use super::scheduler::{PlaybackQueueEntry, SegmentId};
use crate::Result;

/// An open playback context with its own sample clock
pub trait PlaybackSink {
    /// Current time of the output clock in seconds
    fn current_time(&self) -> f64;

    /// Start an entry at its scheduled time
    ///
    /// When the entry finishes naturally its id is sent on the `ended`
    /// channel given at open time. Stopped entries are never reported.
    ///
    /// # Errors
    ///
    /// Returns error if the output device rejects the segment
    fn start(&mut self, entry: &PlaybackQueueEntry) -> Result<()>;

    /// Stop an entry immediately, even mid-playback
    fn stop(&mut self, id: SegmentId);

    /// Analysis tap on the mixed output
    fn analyser(&self) -> AnalyserTap;

    /// Release the output device
    fn close(&mut self);
}

/// An open microphone stream and its capture context
pub trait CaptureStream {
    /// Stop capture and release the microphone
    fn close(&mut self);
}

/// Factory for capture and playback contexts
pub trait AudioBackend {
    /// Open a playback context
    ///
    /// # Errors
    ///
    /// Returns `Audio` if no suitable output device is available
    fn open_output(
        &self,
        sample_rate: u32,
        fft_size: usize,
        ended: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn PlaybackSink>>;

    /// Open the microphone, delivering fixed-size frames in capture order
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if microphone access is refused
    fn open_input(
        &self,
        sample_rate: u32,
        frame_size: usize,
        frames: mpsc::UnboundedSender<CaptureFrame>,
    ) -> Result<Box<dyn CaptureStream>>;
}

/// Backend for the host's default input and output devices
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_output(
        &self,
        sample_rate: u32,
        fft_size: usize,
        ended: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn PlaybackSink>> {
        let playback = super::playback::AudioPlayback::open(sample_rate, fft_size, ended)?;
        Ok(Box::new(playback))
    }

    fn open_input(
        &self,
        sample_rate: u32,
        frame_size: usize,
        frames: mpsc::UnboundedSender<CaptureFrame>,
    ) -> Result<Box<dyn CaptureStream>> {
        let capture = super::capture::AudioCapture::open(sample_rate, frame_size, frames)?;
        Ok(Box::new(capture))
    }
}
