//! Streaming session transport over WebSocket
//!
//! A connected transport splits the socket into a writer task fed by an
//! unbounded FIFO (so `send` never blocks capture) and a reader task that
//! decodes server frames into [`ServerEvent`]s.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::protocol::{ClientMessage, ServerEvent, ServerMessage, SessionSetup};
use crate::voice::EncodedChunk;
use crate::{Error, Result};

/// Path of the bidirectional generate-content stream
const STREAM_PATH: &str =
    "ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Everything needed to open one stream
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Base endpoint (`wss://`, `ws://`, `https://` or `http://`)
    pub endpoint: String,
    /// API key appended as the `key` query parameter
    pub api_key: SecretString,
    /// Opening configuration
    pub setup: SessionSetup,
}

/// An open bidirectional stream to the model
#[async_trait]
pub trait Transport: Send {
    /// Queue one chunk for sending; order between calls is preserved
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the stream is closed
    fn send(&mut self, chunk: &EncodedChunk) -> Result<()>;

    /// Wait for the next inbound event
    ///
    /// Returns `None` once the stream has ended and all events are drained.
    /// Cancel-safe.
    async fn next_event(&mut self) -> Option<ServerEvent>;

    /// Terminate the stream; safe to call any number of times
    fn close(&mut self);
}

/// Opens transports; resolves only once the remote end acknowledged setup
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a stream and wait for the setup acknowledgement
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the connection or setup handshake fails
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Transport>>;
}

/// Build the stream URL for an endpoint
///
/// # Errors
///
/// Returns `Config` if the endpoint is not a valid http(s)/ws(s) URL
pub fn stream_url(endpoint: &str, api_key: &str) -> Result<Url> {
    let base = endpoint.trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}/{STREAM_PATH}"))
        .map_err(|e| Error::Config(format!("invalid endpoint {endpoint:?}: {e}")))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(Error::Config(format!("unsupported endpoint scheme: {other}")));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::Config(format!("cannot use scheme {scheme} for {endpoint}")))?;
    url.query_pairs_mut().append_pair("key", api_key);

    Ok(url)
}

/// Decoded meaning of one socket frame
enum Inbound {
    Events(Vec<ServerEvent>),
    Closed(Option<String>),
}

fn decode_frame(msg: Message) -> Option<Inbound> {
    let text = match msg {
        Message::Text(text) => text,
        Message::Binary(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "non-UTF-8 binary frame skipped");
                return None;
            }
        },
        Message::Close(frame) => {
            return Some(Inbound::Closed(
                frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty()),
            ));
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return None,
    };

    match ServerMessage::parse(&text) {
        Ok(message) => Some(Inbound::Events(message.into_events())),
        Err(e) => {
            tracing::warn!(error = %e, "undecodable server message skipped");
            None
        }
    }
}

/// Connector for the hosted live model endpoint
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn Transport>> {
        let url = stream_url(&params.endpoint, params.api_key.expose_secret())?;

        tracing::info!(
            host = url.host_str().unwrap_or_default(),
            model = %params.setup.model,
            voice = %params.setup.voice,
            "opening live stream"
        );

        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("connect failed: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        let setup = serde_json::to_string(&params.setup.to_message())?;
        sink.send(Message::Text(setup))
            .await
            .map_err(|e| Error::Transport(format!("setup send failed: {e}")))?;

        // The stream is open only once the model acknowledges the setup
        loop {
            match stream.next().await {
                Some(Ok(msg)) => match decode_frame(msg) {
                    Some(Inbound::Events(events))
                        if events.contains(&ServerEvent::SetupComplete) =>
                    {
                        break;
                    }
                    Some(Inbound::Closed(reason)) => {
                        return Err(Error::Transport(format!(
                            "closed during setup: {}",
                            reason.unwrap_or_else(|| "no reason given".to_string())
                        )));
                    }
                    Some(Inbound::Events(_)) | None => {}
                },
                Some(Err(e)) => return Err(Error::Transport(format!("setup failed: {e}"))),
                None => return Err(Error::Transport("stream ended during setup".to_string())),
            }
        }

        tracing::info!("live stream open");

        let (event_tx, events) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer_events = event_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    let _ = writer_events.send(ServerEvent::Error(format!("send failed: {e}")));
                    return;
                }
                if closing {
                    return;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(msg) => match decode_frame(msg) {
                        Some(Inbound::Events(batch)) => {
                            for event in batch {
                                if event_tx.send(event).is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Inbound::Closed(reason)) => {
                            let _ = event_tx.send(ServerEvent::Closed { reason });
                            return;
                        }
                        None => {}
                    },
                    Err(e) => {
                        let _ = event_tx.send(ServerEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
            let _ = event_tx.send(ServerEvent::Closed { reason: None });
        });

        Ok(Box::new(WsTransport {
            outbound: Some(outbound),
            events,
            reader,
            writer,
            closed: false,
        }))
    }
}

/// WebSocket-backed transport
pub struct WsTransport {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    closed: bool,
}

#[async_trait]
impl Transport for WsTransport {
    fn send(&mut self, chunk: &EncodedChunk) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| Error::Transport("stream closed".to_string()))?;
        let text = serde_json::to_string(&ClientMessage::media(chunk))?;
        outbound
            .send(Message::Text(text))
            .map_err(|_| Error::Transport("writer stopped".to_string()))
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(outbound) = self.outbound.take() {
            // Writer flushes queued frames, then the close frame, then exits
            let _ = outbound.send(Message::Close(None));
        }
        self.reader.abort();
        tracing::debug!(writer_done = self.writer.is_finished(), "live stream closed");
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}
