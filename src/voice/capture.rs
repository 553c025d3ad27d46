//! Audio capture from microphone
//!
//! The input callback frames the continuous signal into fixed windows and
//! pushes each full window out as soon as it is complete. Devices that
//! cannot capture mono 16kHz directly are read at their default config and
//! resampled.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;

use super::device::CaptureStream;
use super::frame::CaptureFrame;
use crate::{Error, Result};

/// Input chunk size fed to the resampler
const RESAMPLER_CHUNK: usize = 1024;

/// Splits a continuous sample stream into fixed-size frames
///
/// Holds at most one partial window.
#[derive(Debug)]
pub struct Framer {
    frame_size: usize,
    pending: Vec<f32>,
    next_seq: u64,
}

impl Framer {
    /// Create a framer emitting windows of `frame_size` samples
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
            next_seq: 0,
        }
    }

    /// Feed samples, returning every window completed by them
    pub fn push(&mut self, mut samples: &[f32]) -> Vec<CaptureFrame> {
        let mut frames = Vec::new();
        while !samples.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(CaptureFrame {
                    seq: self.next_seq,
                    samples: full,
                });
                self.next_seq += 1;
            }
        }
        frames
    }

    /// Samples waiting for the current window to fill
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Streaming sample-rate converter for a single channel
pub struct StreamResampler {
    resampler: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a converter from `from_rate` to `to_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the rates are not supported by the resampler
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            RESAMPLER_CHUNK,
            2,
            1,
        )
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        Ok(Self {
            resampler,
            pending: Vec::with_capacity(RESAMPLER_CHUNK * 2),
        })
    }

    /// Convert as many whole input chunks as are available
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(input);
        let mut output = Vec::new();

        while self.pending.len() >= RESAMPLER_CHUNK {
            let chunk: Vec<f32> = self.pending.drain(..RESAMPLER_CHUNK).collect();
            match self.resampler.process(&[chunk], None) {
                Ok(mut result) => output.append(&mut result[0]),
                Err(e) => tracing::warn!(error = %e, "resample failed, dropping chunk"),
            }
        }

        output
    }
}

/// Map stream construction failures onto the session error taxonomy
fn map_build_error(err: BuildStreamError) -> Error {
    match err {
        BuildStreamError::DeviceNotAvailable | BuildStreamError::BackendSpecific { .. } => {
            Error::PermissionDenied(err.to_string())
        }
        other => Error::Audio(other.to_string()),
    }
}

/// Captures framed audio from the default input device
pub struct AudioCapture {
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device and start delivering frames
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if the microphone is missing or access is
    /// refused, `Audio` for other device failures
    pub fn open(
        sample_rate: u32,
        frame_size: usize,
        frames: mpsc::UnboundedSender<CaptureFrame>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::PermissionDenied("no input device available".to_string()))?;

        let native = device
            .supported_input_configs()
            .map_err(|e| Error::PermissionDenied(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            });

        let (config, mut resampler): (StreamConfig, Option<StreamResampler>) = match native {
            Some(supported) => (supported.with_sample_rate(SampleRate(sample_rate)).config(), None),
            None => {
                let default = device
                    .default_input_config()
                    .map_err(|e| Error::PermissionDenied(e.to_string()))?;
                let config = default.config();
                let resampler = StreamResampler::new(config.sample_rate.0, sample_rate)?;
                (config, Some(resampler))
            }
        };

        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            sample_rate,
            channels,
            resampling = resampler.is_some(),
            "audio capture initialized"
        );

        let mut framer = Framer::new(frame_size);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = data.iter().step_by(channels).copied().collect();
                    let samples = match resampler.as_mut() {
                        Some(r) => r.process(&mono),
                        None => mono,
                    };
                    for frame in framer.push(&samples) {
                        // Receiver gone means the session was torn down
                        if frames.send(frame).is_err() {
                            return;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(map_build_error)?;

        stream
            .play()
            .map_err(|e| Error::PermissionDenied(e.to_string()))?;

        tracing::debug!("audio capture started");

        Ok(Self {
            stream: Some(stream),
        })
    }
}

impl CaptureStream for AudioCapture {
    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
