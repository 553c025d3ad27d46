//! Voice processing module
//!
//! Handles microphone capture, PCM transport encoding, and gapless
//! scheduled playback of streamed model audio.

mod analyser;
mod capture;
pub mod codec;
mod device;
mod frame;
mod pipeline;
mod playback;
mod scheduler;

pub use analyser::{AnalyserTap, DEFAULT_FFT_SIZE, calculate_rms};
pub use capture::{AudioCapture, Framer, StreamResampler, samples_to_wav};
pub use codec::{CAPTURE_MIME_TYPE, EncodedChunk};
pub use device::{AudioBackend, CaptureStream, CpalBackend, PlaybackSink};
pub use frame::{
    CAPTURE_FRAME_SIZE, CAPTURE_SAMPLE_RATE, CaptureFrame, PLAYBACK_SAMPLE_RATE, PlaybackSegment,
};
pub use pipeline::{CapturePipeline, PlaybackPipeline};
pub use playback::AudioPlayback;
pub use scheduler::{PlaybackQueueEntry, PlaybackScheduler, SegmentId};
