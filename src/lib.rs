//! Vocab Live - Real-time voice tutor for vocabulary practice
//!
//! This library streams microphone audio to a live speech model and plays
//! its spoken replies back without gaps:
//! - PCM transport encoding and decoding
//! - Microphone capture and fixed-size framing
//! - Live model stream transport
//! - Gapless playback scheduling with barge-in flush
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 SessionController                    │
//! │   connect  │  step  │  disconnect  │  status        │
//! └──────┬──────────────────────┬───────────────────────┘
//!        │ capture              │ playback
//! ┌──────▼──────────┐    ┌──────▼──────────────────────┐
//! │ mic → framer →  │    │ delta → decode → scheduler  │
//! │ encode → FIFO   │    │ → output device → analyser  │
//! └──────┬──────────┘    └──────▲──────────────────────┘
//!        │                      │
//! ┌──────▼──────────────────────┴───────────────────────┐
//! │               Live model stream (WebSocket)          │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod live;
pub mod session;
pub mod setup;
pub mod voice;

pub use config::Config;
pub use credentials::{
    Credential, CredentialResolver, SettingsCredentialResolver, StaticCredentialResolver,
};
pub use db::DbPool;
pub use error::{Error, Result};
pub use session::{ConnectionState, SessionController, SessionStatus, wait_closed};
