//! Live model stream: wire protocol, transport, and pre-open buffering

mod outbound;
pub mod protocol;
mod transport;

pub use outbound::OutboundQueue;
pub use protocol::{ClientMessage, ServerEvent, ServerMessage, SessionSetup};
pub use transport::{ConnectParams, Connector, Transport, WsConnector, WsTransport, stream_url};
