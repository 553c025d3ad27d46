//! Live tutoring session controller
//!
//! Owns at most one [`Session`] at a time: the microphone stream, the
//! playback context and the model transport. The controller is driven by
//! its caller: `connect` opens everything, then `step` (or
//! `run_until_closed`) handles one event at a time from the transport, the
//! playback clock and the microphone. Because every operation takes
//! `&mut self`, capture handling and inbound message handling never overlap.
//!
//! Any teardown path (user `disconnect`, remote close, transport error,
//! failed connect) goes through the same routine, which releases each
//! resource exactly once.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::config::{AudioConfig, LiveConfig};
use crate::credentials::CredentialResolver;
use crate::live::{ConnectParams, Connector, ServerEvent, Transport};
use crate::voice::{
    AnalyserTap, AudioBackend, CaptureFrame, CapturePipeline, CaptureStream, PlaybackPipeline,
    SegmentId,
};
use crate::{Error, Result};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session has been started
    #[default]
    Idle,
    /// Devices are open and the stream is being established
    Connecting,
    /// The model acknowledged the stream
    Open,
    /// The last session ended
    Closed,
}

/// Observable session status
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub is_talking: bool,
    /// User-facing message for the most recent failure
    pub last_error: Option<String>,
}

/// Resolve once no session is running on the watched controller
///
/// Also resolves when the controller is dropped.
pub async fn wait_closed(mut status: watch::Receiver<SessionStatus>) {
    let _ = status
        .wait_for(|s| matches!(s.state, ConnectionState::Idle | ConnectionState::Closed))
        .await;
}

/// Callback receiving the output analysis tap when a session opens
pub type VisualizerHook = Box<dyn FnMut(AnalyserTap)>;

/// Resources of one live connection
struct Session {
    id: Uuid,
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    capture: Option<Box<dyn CaptureStream>>,
    playback: Option<PlaybackPipeline>,
    capture_pipeline: CapturePipeline,
    frames: mpsc::UnboundedReceiver<CaptureFrame>,
    ended: mpsc::UnboundedReceiver<SegmentId>,
}

/// One unit of work picked by `step`
enum Wake {
    Remote(Option<ServerEvent>),
    Ended(SegmentId),
    Frame(CaptureFrame),
}

/// Orchestrates capture, transport and playback for the voice tutor
pub struct SessionController {
    live: LiveConfig,
    audio: AudioConfig,
    credentials: Arc<dyn CredentialResolver>,
    connector: Arc<dyn Connector>,
    backend: Arc<dyn AudioBackend>,
    visualizer: Option<VisualizerHook>,
    status: watch::Sender<SessionStatus>,
    session: Option<Session>,
}

impl SessionController {
    /// Create an idle controller
    #[must_use]
    pub fn new(
        live: LiveConfig,
        audio: AudioConfig,
        credentials: Arc<dyn CredentialResolver>,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn AudioBackend>,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        Self {
            live,
            audio,
            credentials,
            connector,
            backend,
            visualizer: None,
            status,
            session: None,
        }
    }

    /// Attach a visualizer to the output of every future session
    pub fn set_visualizer(&mut self, hook: impl FnMut(AnalyserTap) + 'static) {
        self.visualizer = Some(Box::new(hook));
    }

    /// Snapshot of the current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Analysis tap of the current session's output
    #[must_use]
    pub fn analyser(&self) -> Option<AnalyserTap> {
        self.session
            .as_ref()
            .and_then(|s| s.playback.as_ref())
            .map(PlaybackPipeline::analyser)
    }

    /// Playback pipeline of the open session
    #[must_use]
    pub fn playback(&self) -> Option<&PlaybackPipeline> {
        self.session.as_ref().and_then(|s| s.playback.as_ref())
    }

    /// Open a session
    ///
    /// A no-op if a session is already open. A session left in `Connecting`
    /// by an abandoned connect is torn down and replaced. On failure all
    /// partially opened resources are released and the user-facing message
    /// is published as `last_error`.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` before any device is opened,
    /// `PermissionDenied` if the microphone is refused (no transport is
    /// opened), or `Transport` if the stream fails to open
    #[allow(clippy::future_not_send)]
    pub async fn connect(&mut self) -> Result<()> {
        match self.session.as_ref().map(|s| s.state) {
            Some(ConnectionState::Open) => {
                tracing::debug!("connect ignored, session already open");
                return Ok(());
            }
            Some(_) => {
                tracing::warn!("discarding session abandoned while connecting");
                self.teardown(None);
            }
            None => {}
        }

        self.publish(|s| s.last_error = None);

        match self.open_session().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "failed to start session");
                self.teardown(Some(&e));
                Err(e)
            }
        }
    }

    #[allow(clippy::future_not_send)]
    async fn open_session(&mut self) -> Result<()> {
        let credential = self.credentials.resolve()?;

        let id = Uuid::new_v4();
        let (ended_tx, ended) = mpsc::unbounded_channel();
        let (frames_tx, frames) = mpsc::unbounded_channel();

        let sink = self.backend.open_output(
            self.audio.playback_sample_rate,
            self.audio.fft_size,
            ended_tx,
        )?;
        let playback = PlaybackPipeline::new(
            sink,
            self.audio.playback_sample_rate,
            self.audio.playback_channels,
        );

        // Stored before the next fallible step so teardown can release it
        self.session = Some(Session {
            id,
            state: ConnectionState::Connecting,
            transport: None,
            capture: None,
            playback: Some(playback),
            capture_pipeline: CapturePipeline::new(self.audio.outbound_buffer_frames),
            frames,
            ended,
        });
        self.publish(|s| s.state = ConnectionState::Connecting);

        let capture = self
            .backend
            .open_input(
                self.audio.capture_sample_rate,
                self.audio.capture_frame_size,
                frames_tx,
            )
            .map_err(|e| match e {
                Error::PermissionDenied(_) => e,
                other => Error::PermissionDenied(other.to_string()),
            })?;
        if let Some(session) = self.session.as_mut() {
            session.capture = Some(capture);
        }

        if let Some(tap) = self.analyser()
            && let Some(hook) = self.visualizer.as_mut()
        {
            hook(tap);
        }

        let params = ConnectParams {
            endpoint: credential
                .endpoint
                .unwrap_or_else(|| self.live.endpoint.clone()),
            api_key: credential.api_key,
            setup: self.live.setup(),
        };

        tracing::info!(session = %id, voice = %params.setup.voice, "connecting");

        // Capture runs while the stream opens; frames queue until it does
        let connector = Arc::clone(&self.connector);
        let mut connecting = connector.connect(&params);
        let result = loop {
            let Some(session) = self.session.as_mut() else {
                break Err(Error::Transport("session torn down while connecting".to_string()));
            };
            tokio::select! {
                biased;
                result = &mut connecting => break result,
                Some(frame) = session.frames.recv() => {
                    session.capture_pipeline.push(&frame);
                }
            }
        };
        let mut transport = result?;

        let Some(session) = self.session.as_mut().filter(|s| s.id == id) else {
            transport.close();
            return Err(Error::Transport("session replaced while connecting".to_string()));
        };

        // Frames that raced the handshake still belong before anything live
        while let Ok(frame) = session.frames.try_recv() {
            session.capture_pipeline.push(&frame);
        }
        let buffered = session.capture_pipeline.open();
        let dropped = session.capture_pipeline.dropped();
        session.transport = Some(transport);
        if let Some(transport) = session.transport.as_mut() {
            for chunk in &buffered {
                transport.send(chunk)?;
            }
        }
        session.state = ConnectionState::Open;

        tracing::info!(
            session = %id,
            flushed = buffered.len(),
            dropped,
            "session open"
        );
        self.publish(|s| {
            s.state = ConnectionState::Open;
            s.is_connected = true;
        });

        Ok(())
    }

    /// Handle the next event of the open session
    ///
    /// Returns false once there is no open session, either because none was
    /// connected or because this event closed it.
    #[allow(clippy::future_not_send)]
    pub async fn step(&mut self) -> bool {
        let wake = {
            let Some(session) = self
                .session
                .as_mut()
                .filter(|s| s.state == ConnectionState::Open)
            else {
                return false;
            };
            let Some(transport) = session.transport.as_mut() else {
                return false;
            };

            tokio::select! {
                biased;
                event = transport.next_event() => Wake::Remote(event),
                Some(id) = session.ended.recv() => Wake::Ended(id),
                Some(frame) = session.frames.recv() => Wake::Frame(frame),
            }
        };

        match wake {
            Wake::Remote(event) => {
                self.handle_remote(event.unwrap_or(ServerEvent::Closed { reason: None }));
            }
            Wake::Ended(id) => {
                if let Some(playback) = self.playback_mut() {
                    playback.segment_ended(id);
                }
                self.publish_talking();
            }
            Wake::Frame(frame) => self.handle_frame(&frame),
        }

        self.is_open()
    }

    /// Drive the session until it closes
    #[allow(clippy::future_not_send)]
    pub async fn run_until_closed(&mut self) {
        while self.step().await {}
    }

    /// Tear down the current session, if any
    ///
    /// Safe to call in any state and any number of times.
    pub fn disconnect(&mut self) {
        if self.session.is_some() {
            tracing::info!("disconnecting");
        }
        self.teardown(None);
    }

    /// Whether a session is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state == ConnectionState::Open)
    }

    fn handle_frame(&mut self, frame: &CaptureFrame) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(chunk) = session.capture_pipeline.push(frame) else {
            return;
        };
        let sent = match session.transport.as_mut() {
            Some(transport) => transport.send(&chunk),
            None => Err(Error::Transport("no transport".to_string())),
        };
        if let Err(e) = sent {
            tracing::error!(error = %e, seq = frame.seq, "failed to send audio frame");
            self.teardown(Some(&e));
        }
    }

    fn handle_remote(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::AudioDelta(data) => {
                if let Some(playback) = self.playback_mut() {
                    match playback.push_delta(&data) {
                        Ok(Some(entry)) => {
                            tracing::trace!(
                                id = entry.id,
                                start = entry.start_time,
                                "audio scheduled"
                            );
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(error = %e, "dropping audio segment"),
                    }
                }
                self.publish_talking();
            }
            ServerEvent::Interrupted => {
                if let Some(playback) = self.playback_mut() {
                    let flushed = playback.interrupt();
                    tracing::debug!(flushed, "playback interrupted");
                }
                self.publish_talking();
            }
            ServerEvent::TurnComplete => tracing::debug!("model turn complete"),
            ServerEvent::SetupComplete => {}
            ServerEvent::Closed { reason } => {
                tracing::info!(reason = reason.as_deref().unwrap_or("none"), "stream closed");
                self.teardown(None);
            }
            ServerEvent::Error(message) => {
                tracing::error!(error = %message, "stream error");
                self.teardown(Some(&Error::Transport(message)));
            }
        }
    }

    fn playback_mut(&mut self) -> Option<&mut PlaybackPipeline> {
        self.session.as_mut().and_then(|s| s.playback.as_mut())
    }

    /// Release every resource of the current session exactly once
    fn teardown(&mut self, error: Option<&Error>) {
        let had_session = if let Some(mut session) = self.session.take() {
            if let Some(mut transport) = session.transport.take() {
                transport.close();
            }
            if let Some(mut capture) = session.capture.take() {
                capture.close();
            }
            if let Some(mut playback) = session.playback.take() {
                playback.close();
            }
            tracing::debug!(session = %session.id, "session resources released");
            true
        } else {
            false
        };

        let message = error.map(Error::user_message);
        self.publish(|s| {
            if had_session {
                s.state = ConnectionState::Closed;
            }
            s.is_connected = false;
            s.is_talking = false;
            if message.is_some() {
                s.last_error = message;
            }
        });
    }

    fn publish_talking(&self) {
        let talking = self.playback().is_some_and(PlaybackPipeline::is_talking);
        self.publish(|s| s.is_talking = talking);
    }

    fn publish(&self, update: impl FnOnce(&mut SessionStatus)) {
        self.status.send_if_modified(|status| {
            let before = status.clone();
            update(status);
            *status != before
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialResolver;
    use crate::live::WsConnector;
    use crate::voice::CpalBackend;

    fn controller(credentials: StaticCredentialResolver) -> SessionController {
        SessionController::new(
            LiveConfig::default(),
            AudioConfig::default(),
            Arc::new(credentials),
            Arc::new(WsConnector),
            Arc::new(CpalBackend),
        )
    }

    #[test]
    fn test_initial_status() {
        let controller = controller(StaticCredentialResolver::new("k"));
        let status = controller.status();
        assert_eq!(status.state, ConnectionState::Idle);
        assert!(!status.is_connected);
        assert!(!status.is_talking);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_disconnect_without_session() {
        let mut controller = controller(StaticCredentialResolver::new("k"));
        controller.disconnect();
        controller.disconnect();
        assert_eq!(controller.status().state, ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_devices() {
        let mut controller = controller(StaticCredentialResolver::missing());
        let err = controller.connect().await.unwrap_err();

        assert!(matches!(err, Error::MissingCredential(_)));
        let status = controller.status();
        assert!(!status.is_connected);
        assert_eq!(status.state, ConnectionState::Idle);
        assert!(status.last_error.unwrap().contains("No API key"));
    }

    #[tokio::test]
    async fn test_step_without_session() {
        let mut controller = controller(StaticCredentialResolver::new("k"));
        assert!(!controller.step().await);
    }
}
