//! Shared test utilities
//!
//! In-memory stand-ins for the audio devices and the model stream, so the
//! session controller can be exercised without hardware or network.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use vocab_live::config::{AudioConfig, LiveConfig};
use vocab_live::live::{ConnectParams, Connector, ServerEvent, Transport};
use vocab_live::voice::{
    AnalyserTap, AudioBackend, CaptureFrame, CaptureStream, EncodedChunk, PlaybackQueueEntry,
    PlaybackSink, SegmentId, codec,
};
use vocab_live::{DbPool, Error, Result, SessionController, StaticCredentialResolver, db};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Recorded device activity
#[derive(Default)]
pub struct DeviceLog {
    pub clock: f64,
    pub deny_input: bool,
    pub started: Vec<PlaybackQueueEntry>,
    pub stopped: Vec<SegmentId>,
    pub output_opens: usize,
    pub output_closes: usize,
    pub input_opens: usize,
    pub input_closes: usize,
    frames: Option<mpsc::UnboundedSender<CaptureFrame>>,
    ended: Option<mpsc::UnboundedSender<SegmentId>>,
    next_seq: u64,
}

/// Audio backend with a manual clock
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub log: Arc<Mutex<DeviceLog>>,
}

impl FakeBackend {
    /// Backend whose microphone is refused
    #[must_use]
    pub fn denying_input() -> Self {
        let backend = Self::default();
        backend.log.lock().unwrap().deny_input = true;
        backend
    }

    pub fn set_clock(&self, secs: f64) {
        self.log.lock().unwrap().clock = secs;
    }

    /// Deliver one captured frame, returning its sequence number
    pub fn capture(&self, samples: Vec<f32>) -> u64 {
        let mut log = self.log.lock().unwrap();
        let seq = log.next_seq;
        log.next_seq += 1;
        log.frames
            .as_ref()
            .expect("microphone not open")
            .send(CaptureFrame { seq, samples })
            .expect("capture receiver dropped");
        seq
    }

    /// Report natural completion of a started segment
    pub fn finish(&self, id: SegmentId) {
        let log = self.log.lock().unwrap();
        log.ended
            .as_ref()
            .expect("output not open")
            .send(id)
            .expect("ended receiver dropped");
    }

    pub fn started(&self) -> Vec<PlaybackQueueEntry> {
        self.log.lock().unwrap().started.clone()
    }

    pub fn stopped(&self) -> Vec<SegmentId> {
        self.log.lock().unwrap().stopped.clone()
    }

    /// (output opens, output closes, input opens, input closes)
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let log = self.log.lock().unwrap();
        (
            log.output_opens,
            log.output_closes,
            log.input_opens,
            log.input_closes,
        )
    }
}

struct FakeSink {
    log: Arc<Mutex<DeviceLog>>,
    analyser: AnalyserTap,
}

impl PlaybackSink for FakeSink {
    fn current_time(&self) -> f64 {
        self.log.lock().unwrap().clock
    }

    fn start(&mut self, entry: &PlaybackQueueEntry) -> Result<()> {
        self.log.lock().unwrap().started.push(entry.clone());
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) {
        self.log.lock().unwrap().stopped.push(id);
    }

    fn analyser(&self) -> AnalyserTap {
        self.analyser.clone()
    }

    fn close(&mut self) {
        self.log.lock().unwrap().output_closes += 1;
    }
}

struct FakeMic {
    log: Arc<Mutex<DeviceLog>>,
}

impl CaptureStream for FakeMic {
    fn close(&mut self) {
        self.log.lock().unwrap().input_closes += 1;
    }
}

impl AudioBackend for FakeBackend {
    fn open_output(
        &self,
        _sample_rate: u32,
        fft_size: usize,
        ended: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn PlaybackSink>> {
        let mut log = self.log.lock().unwrap();
        log.output_opens += 1;
        log.ended = Some(ended);
        Ok(Box::new(FakeSink {
            log: Arc::clone(&self.log),
            analyser: AnalyserTap::new(fft_size),
        }))
    }

    fn open_input(
        &self,
        _sample_rate: u32,
        _frame_size: usize,
        frames: mpsc::UnboundedSender<CaptureFrame>,
    ) -> Result<Box<dyn CaptureStream>> {
        let mut log = self.log.lock().unwrap();
        if log.deny_input {
            return Err(Error::PermissionDenied("NotAllowedError".to_string()));
        }
        log.input_opens += 1;
        log.frames = Some(frames);
        Ok(Box::new(FakeMic {
            log: Arc::clone(&self.log),
        }))
    }
}

/// Recorded stream activity
#[derive(Default)]
pub struct StreamLog {
    pub connects: usize,
    pub closes: usize,
    pub sent: Vec<EncodedChunk>,
    pub last_params: Option<ConnectParams>,
    events: Option<mpsc::UnboundedSender<ServerEvent>>,
}

/// Connector whose streams are driven by the test
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub log: Arc<Mutex<StreamLog>>,
    fail: bool,
    gate: Option<Arc<Notify>>,
}

impl FakeConnector {
    /// Connector whose handshake always fails
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Connector whose handshake waits for `gate` to be notified
    #[must_use]
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Deliver an inbound event on the latest stream
    pub fn push(&self, event: ServerEvent) {
        let log = self.log.lock().unwrap();
        log.events
            .as_ref()
            .expect("no stream open")
            .send(event)
            .expect("stream receiver dropped");
    }

    /// Deliver an audio delta of `secs` seconds at 24kHz
    pub fn push_audio(&self, secs: f64) {
        self.push(ServerEvent::AudioDelta(delta(secs)));
    }

    pub fn sent(&self) -> Vec<EncodedChunk> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn connects(&self) -> usize {
        self.log.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }
}

struct FakeTransport {
    log: Arc<Mutex<StreamLog>>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    closed: bool,
}

#[async_trait]
impl Transport for FakeTransport {
    fn send(&mut self, chunk: &EncodedChunk) -> Result<()> {
        if self.closed {
            return Err(Error::Transport("stream closed".to_string()));
        }
        self.log.lock().unwrap().sent.push(chunk.clone());
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.log.lock().unwrap().closes += 1;
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Transport>> {
        {
            let mut log = self.log.lock().unwrap();
            log.connects += 1;
            log.last_params = Some(params.clone());
        }

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(Error::Transport("handshake refused".to_string()));
        }

        let (tx, events) = mpsc::unbounded_channel();
        self.log.lock().unwrap().events = Some(tx);

        Ok(Box::new(FakeTransport {
            log: Arc::clone(&self.log),
            events,
            closed: false,
        }))
    }
}

/// Base64 payload of `secs` seconds of quiet 24kHz mono audio
#[must_use]
pub fn delta(secs: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = (secs * 24000.0).round() as usize;
    codec::encode(&vec![0.1; len]).data
}

/// Controller wired to the given fakes
#[must_use]
pub fn controller(backend: &FakeBackend, connector: &FakeConnector) -> SessionController {
    SessionController::new(
        LiveConfig::default(),
        AudioConfig::default(),
        Arc::new(StaticCredentialResolver::new("test-key")),
        Arc::new(connector.clone()),
        Arc::new(backend.clone()),
    )
}
