//! Wire messages for the bidirectional live model stream

use serde::{Deserialize, Serialize};

use crate::voice::EncodedChunk;

/// Parameters sent once when the stream opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    /// Model identifier, with or without the `models/` prefix
    pub model: String,
    /// Prebuilt voice name
    pub voice: String,
    /// Tutoring behaviour instruction
    pub system_instruction: String,
}

impl SessionSetup {
    /// Build the opening `setup` message
    #[must_use]
    pub fn to_message(&self) -> ClientMessage {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        ClientMessage::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(self.system_instruction.clone()),
                    inline_data: None,
                }],
            },
        })
    }
}

/// Messages sent to the model
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session configuration, first message only
    Setup(Setup),
    /// Streaming microphone audio
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Wrap one encoded capture chunk
    #[must_use]
    pub fn media(chunk: &EncodedChunk) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![chunk.clone()],
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

/// Output modality requested from the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<EncodedChunk>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

/// Raw message received from the model
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

/// Inbound events after decoding a server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The model acknowledged the setup; the stream is open
    SetupComplete,
    /// Base64 24kHz PCM continuing the spoken response
    AudioDelta(String),
    /// The user barged in; discard all queued output
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// The stream ended cleanly
    Closed { reason: Option<String> },
    /// The stream failed
    Error(String),
}

impl ServerMessage {
    /// Parse a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not valid JSON for a server message
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Flatten into events: audio deltas in part order, then the interrupt
    #[must_use]
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            let parts = content.model_turn.map(|t| t.parts).unwrap_or_default();
            events.extend(
                parts
                    .into_iter()
                    .filter_map(|p| p.inline_data)
                    .map(|d| ServerEvent::AudioDelta(d.data)),
            );
            if content.interrupted {
                events.push(ServerEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(ServerEvent::TurnComplete);
            }
        }

        if let Some(go_away) = self.go_away {
            tracing::warn!(detail = %go_away, "server announced imminent disconnect");
        }

        events
    }
}
