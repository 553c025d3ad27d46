//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;

use vocab_live::voice::{
    CAPTURE_FRAME_SIZE, CAPTURE_MIME_TYPE, CAPTURE_SAMPLE_RATE, CapturePipeline, Framer,
    PLAYBACK_SAMPLE_RATE, PlaybackScheduler, PlaybackSegment, codec, samples_to_wav,
};
use vocab_live::Error;

mod common;

const QUANTUM: f32 = 1.0 / 32768.0;

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (CAPTURE_SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / CAPTURE_SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Evenly spaced samples covering [-1, 1)
fn sweep(count: usize) -> Vec<f32> {
    (0..count)
        .map(|i| -1.0 + 2.0 * i as f32 / count as f32)
        .collect()
}

fn segment_of(secs: f64) -> PlaybackSegment {
    let len = (secs * f64::from(PLAYBACK_SAMPLE_RATE)).round() as usize;
    PlaybackSegment::mono(PLAYBACK_SAMPLE_RATE, vec![0.0; len])
}

#[test]
fn test_codec_round_trip_within_one_step() {
    let mut samples = sweep(20_000);
    samples.extend([-1.0, 0.0, QUANTUM, -QUANTUM, 1.0 - QUANTUM]);

    let chunk = codec::encode(&samples);
    assert_eq!(chunk.mime_type, CAPTURE_MIME_TYPE);

    let segment = codec::decode_segment(&chunk.data, CAPTURE_SAMPLE_RATE, 1).unwrap();
    assert_eq!(segment.frame_count(), samples.len());

    for (original, decoded) in samples.iter().zip(&segment.channels[0]) {
        assert!(
            (original - decoded).abs() <= QUANTUM,
            "{original} decoded as {decoded}"
        );
    }
}

#[test]
fn test_full_scale_wraps_instead_of_clamping() {
    let chunk = codec::encode(&[1.0]);
    let bytes = codec::decode(&chunk.data).unwrap();
    assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MIN);
}

#[test]
fn test_sine_frame_round_trip() {
    let samples = generate_sine_samples(440.0, 0.256, 0.8);
    assert_eq!(samples.len(), CAPTURE_FRAME_SIZE);

    let chunk = codec::encode(&samples);
    // 16-bit samples, base64 expands by 4/3
    assert_eq!(chunk.data.len(), (CAPTURE_FRAME_SIZE * 2).div_ceil(3) * 4);

    let decoded = codec::decode_segment(&chunk.data, CAPTURE_SAMPLE_RATE, 1).unwrap();
    let max_err = samples
        .iter()
        .zip(decoded.to_mono())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    assert!(max_err <= QUANTUM);
}

#[test]
fn test_odd_length_payload_is_malformed() {
    let bytes = [0u8, 1, 2];
    assert!(matches!(
        codec::bytes_to_segment(&bytes, PLAYBACK_SAMPLE_RATE, 1),
        Err(Error::MalformedAudio(_))
    ));

    // Six bytes is three mono samples but not whole stereo frames
    let bytes = [0u8; 6];
    assert!(codec::bytes_to_segment(&bytes, PLAYBACK_SAMPLE_RATE, 1).is_ok());
    assert!(matches!(
        codec::bytes_to_segment(&bytes, PLAYBACK_SAMPLE_RATE, 2),
        Err(Error::MalformedAudio(_))
    ));
}

#[test]
fn test_scheduler_back_to_back() {
    let mut scheduler = PlaybackScheduler::new(1.5);

    let durations = [0.5, 0.3, 0.2, 0.75];
    let entries: Vec<_> = durations
        .iter()
        .map(|&d| scheduler.schedule(segment_of(d), 1.5))
        .collect();

    assert!((entries[0].start_time - 1.5).abs() < 1e-9);
    for (prev, next) in entries.iter().zip(entries.iter().skip(1)) {
        assert!((next.start_time - (prev.start_time + prev.duration)).abs() < 1e-9);
    }
    assert!((scheduler.next_start_time() - 3.25).abs() < 1e-9);
    assert_eq!(scheduler.active_len(), 4);
}

#[test]
fn test_scheduler_flush_resets_cursor() {
    let mut scheduler = PlaybackScheduler::new(0.0);
    scheduler.schedule(segment_of(1.0), 0.0);
    scheduler.schedule(segment_of(1.0), 0.0);

    let flushed = scheduler.flush();
    assert_eq!(flushed.len(), 2);
    assert!(!scheduler.is_talking());

    let entry = scheduler.schedule(segment_of(0.5), 0.4);
    assert!((entry.start_time - 0.4).abs() < 1e-9);
}

#[test]
fn test_framer_emits_fixed_windows() {
    let mut framer = Framer::new(CAPTURE_FRAME_SIZE);

    // Device callbacks rarely line up with the window size
    let mut frames = Vec::new();
    for _ in 0..10 {
        frames.extend(framer.push(&vec![0.25; 1000]));
    }

    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f.samples.len() == CAPTURE_FRAME_SIZE));
    assert_eq!(frames[0].seq, 0);
    assert_eq!(frames[1].seq, 1);
    assert_eq!(framer.pending_len(), 10_000 - 2 * CAPTURE_FRAME_SIZE);
}

#[test]
fn test_capture_pipeline_through_framer() {
    let mut framer = Framer::new(4);
    let mut pipeline = CapturePipeline::new(8);

    let frames = framer.push(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]);
    for frame in &frames {
        assert!(pipeline.push(frame).is_none());
    }

    let flushed = pipeline.open();
    assert_eq!(flushed.len(), 2);
    assert_eq!(flushed[0].data, codec::encode(&[0.1, 0.2, 0.3, 0.4]).data);
    assert_eq!(flushed[1].data, codec::encode(&[0.5, 0.6, 0.7, 0.8]).data);
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, CAPTURE_SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    // WAV should have reasonable size
    assert!(wav_data.len() > 44); // WAV header is 44 bytes
}

#[test]
fn test_wav_roundtrip() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, CAPTURE_SAMPLE_RATE).unwrap();

    // Read WAV back
    let cursor = Cursor::new(wav_data);
    let mut reader = hound::WavReader::new(cursor).unwrap();

    let spec = reader.spec();
    assert_eq!(spec.sample_rate, CAPTURE_SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples.len(), original_samples.len());
}
