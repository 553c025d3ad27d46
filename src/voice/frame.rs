//! Audio frames flowing through the capture and playback paths

/// Sample rate for microphone capture (16kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of model audio responses
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Samples per capture window
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// A fixed-size mono window of microphone samples
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    /// Production order within the session, starting at 0
    pub seq: u64,
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl CaptureFrame {
    /// Duration of the frame in seconds at the capture rate
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(CAPTURE_SAMPLE_RATE)
    }
}

/// A decoded slice of the model's spoken response
///
/// Samples are stored planar: one `Vec` per channel, all the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSegment {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Per-channel sample data
    pub channels: Vec<Vec<f32>>,
}

impl PlaybackSegment {
    /// Build a mono segment
    #[must_use]
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    /// Number of sample frames (samples per channel)
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Number of channels
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }

    /// Mix all channels down to a single mono buffer
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.as_slice() {
            [] => Vec::new(),
            [only] => only.clone(),
            many => {
                let n = many.len() as f32;
                (0..self.frame_count())
                    .map(|i| many.iter().map(|ch| ch[i]).sum::<f32>() / n)
                    .collect()
            }
        }
    }
}
