//! Audio playback to speakers
//!
//! A single output stream renders a mixer. Scheduled entries are placed on
//! the mixer's frame clock, which is the playback clock the scheduler
//! reads through [`PlaybackSink::current_time`].

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::analyser::AnalyserTap;
use super::device::PlaybackSink;
use super::scheduler::{PlaybackQueueEntry, SegmentId};
use crate::{Error, Result};

/// One entry placed on the mixer clock
#[derive(Debug)]
struct Voice {
    id: SegmentId,
    start_frame: u64,
    samples: Vec<f32>,
    position: usize,
}

impl Voice {
    const fn is_finished(&self) -> bool {
        self.position >= self.samples.len()
    }
}

/// Frame clock plus the voices scheduled against it
#[derive(Debug)]
pub(crate) struct Mixer {
    sample_rate: u32,
    rendered_frames: u64,
    voices: Vec<Voice>,
    ended: mpsc::UnboundedSender<SegmentId>,
    analyser: AnalyserTap,
}

impl Mixer {
    pub(crate) fn new(
        sample_rate: u32,
        ended: mpsc::UnboundedSender<SegmentId>,
        analyser: AnalyserTap,
    ) -> Self {
        Self {
            sample_rate,
            rendered_frames: 0,
            voices: Vec::new(),
            ended,
            analyser,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn current_time(&self) -> f64 {
        self.rendered_frames as f64 / f64::from(self.sample_rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn add(&mut self, entry: &PlaybackQueueEntry) {
        let start_frame = (entry.start_time * f64::from(self.sample_rate)).round().max(0.0) as u64;
        // Frames already rendered past the start are skipped, not replayed late
        let position = usize::try_from(self.rendered_frames.saturating_sub(start_frame))
            .unwrap_or(usize::MAX);
        self.voices.push(Voice {
            id: entry.id,
            start_frame,
            samples: entry.segment.to_mono(),
            position,
        });
    }

    pub(crate) fn remove(&mut self, id: SegmentId) {
        self.voices.retain(|v| v.id != id);
    }

    /// Render mono output frames, advancing the clock by `out.len()`
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        for sample in out.iter_mut() {
            let now = self.rendered_frames;
            let mut acc = 0.0;
            for voice in &mut self.voices {
                if now >= voice.start_frame && !voice.is_finished() {
                    acc += voice.samples[voice.position];
                    voice.position += 1;
                }
            }
            *sample = acc.clamp(-1.0, 1.0);
            self.rendered_frames += 1;
        }

        let ended = &self.ended;
        self.voices.retain(|voice| {
            if voice.is_finished() {
                // Receiver gone means the session was torn down
                let _ = ended.send(voice.id);
                false
            } else {
                true
            }
        });

        self.analyser.write(out);
    }
}

/// Plays scheduled segments on the default output device
pub struct AudioPlayback {
    stream: Option<Stream>,
    mixer: Arc<Mutex<Mixer>>,
    analyser: AnalyserTap,
}

impl AudioPlayback {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open(
        sample_rate: u32,
        fft_size: usize,
        ended: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio playback initialized"
        );

        let analyser = AnalyserTap::new(fft_size);
        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate, ended, analyser.clone())));
        let mixer_clone = Arc::clone(&mixer);
        let mut mono = Vec::new();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mono.resize(data.len() / channels, 0.0);
                    match mixer_clone.lock() {
                        Ok(mut mixer) => mixer.render(&mut mono),
                        Err(_) => mono.fill(0.0),
                    }
                    for (frame, &sample) in data.chunks_mut(channels).zip(&mono) {
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            mixer,
            analyser,
        })
    }
}

impl PlaybackSink for AudioPlayback {
    fn current_time(&self) -> f64 {
        self.mixer.lock().map(|m| m.current_time()).unwrap_or_default()
    }

    fn start(&mut self, entry: &PlaybackQueueEntry) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::Audio("playback context closed".to_string()));
        }
        self.mixer
            .lock()
            .map_err(|_| Error::Audio("mixer lock poisoned".to_string()))?
            .add(entry);
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.remove(id);
        }
    }

    fn analyser(&self) -> AnalyserTap {
        self.analyser.clone()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            if let Ok(mut mixer) = self.mixer.lock() {
                mixer.voices.clear();
            }
            tracing::debug!("audio playback closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::frame::PlaybackSegment;

    fn entry(id: SegmentId, start_time: f64, samples: Vec<f32>) -> PlaybackQueueEntry {
        let segment = PlaybackSegment::mono(10, samples);
        PlaybackQueueEntry {
            id,
            start_time,
            duration: segment.duration(),
            segment: Arc::new(segment),
        }
    }

    #[test]
    fn test_mixer_plays_back_to_back() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(10, tx, AnalyserTap::new(4));
        mixer.add(&entry(0, 0.0, vec![0.1, 0.2]));
        mixer.add(&entry(1, 0.2, vec![0.3, 0.4]));

        let mut out = [0.0; 5];
        mixer.render(&mut out);

        assert_eq!(out, [0.1, 0.2, 0.3, 0.4, 0.0]);
        assert_eq!(rx.try_recv().unwrap(), 0);
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!((mixer.current_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_mixer_waits_for_start_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(10, tx, AnalyserTap::new(4));
        mixer.add(&entry(0, 0.3, vec![0.5]));

        let mut out = [0.0; 3];
        mixer.render(&mut out);
        assert_eq!(out, [0.0; 3]);
        assert!(rx.try_recv().is_err());

        let mut out = [0.0; 1];
        mixer.render(&mut out);
        assert_eq!(out, [0.5]);
        assert_eq!(rx.try_recv().unwrap(), 0);
    }

    #[test]
    fn test_late_voice_keeps_its_schedule() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(10, tx, AnalyserTap::new(4));

        // A block renders between reading the clock and adding the voice
        let first = entry(0, mixer.current_time(), vec![0.25; 4]);
        mixer.render(&mut [0.0; 2]);
        mixer.add(&first);
        let start = mixer.current_time().max(first.start_time + first.duration);
        mixer.add(&entry(1, start, vec![0.5; 4]));

        let mut out = [0.0; 8];
        mixer.render(&mut out);
        assert_eq!(out, [0.25, 0.25, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(rx.try_recv().unwrap(), 0);
        assert_eq!(rx.try_recv().unwrap(), 1);
    }

    #[test]
    fn test_voice_added_after_its_end_reports_ended() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(10, tx, AnalyserTap::new(4));
        mixer.render(&mut [0.0; 5]);
        mixer.add(&entry(3, 0.0, vec![0.5; 2]));

        let mut out = [0.0; 1];
        mixer.render(&mut out);
        assert_eq!(out, [0.0]);
        assert_eq!(rx.try_recv().unwrap(), 3);
    }

    #[test]
    fn test_removed_voice_never_reports_ended() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(10, tx, AnalyserTap::new(4));
        mixer.add(&entry(7, 0.0, vec![0.5, 0.5, 0.5]));

        let mut out = [0.0; 1];
        mixer.render(&mut out);
        mixer.remove(7);

        let mut out = [0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_mixer_feeds_analyser() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let tap = AnalyserTap::new(2);
        let mut mixer = Mixer::new(10, tx, tap.clone());
        mixer.add(&entry(0, 0.0, vec![0.25, 0.75]));

        let mut out = [0.0; 2];
        mixer.render(&mut out);
        assert_eq!(tap.time_domain_data(), vec![0.25, 0.75]);
    }
}
