//! Wire protocol for the speech agent session
//!
//! JSON messages exchanged with the remote agent. The client sends one
//! `setup` message when the session opens, then a stream of `realtimeInput`
//! audio frames. The server answers with `setupComplete` followed by
//! `serverContent` messages carrying audio parts and turn signals.

use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Default agent model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Default persona sent as the system instruction
pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are a friendly voice assistant. Keep your answers short and conversational.";

/// Resource prefix expected on model identifiers
const MODEL_PREFIX: &str = "models/";

// =============================================================================
// Shared Types
// =============================================================================

/// One unit of audio data on the wire
///
/// Uplink frames always carry `audio/pcm;rate=16000`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFrame {
    /// base64-encoded 16-bit little-endian PCM
    pub data: String,
    /// MIME descriptor of the payload
    pub mime_type: String,
}

/// Inline binary payload inside a content part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// base64 payload
    pub data: String,
    /// MIME descriptor, when the server provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A single part of a content block (text or inline data)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

/// An ordered list of parts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

// =============================================================================
// Client Messages
// =============================================================================

/// Output modality requested from the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

/// Name of a prebuilt voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Session setup, sent once right after the connection opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

/// Streaming audio input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub audio: WireFrame,
}

/// Messages sent from the client to the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Wrap an uplink audio frame
    pub fn audio(frame: WireFrame) -> Self {
        Self::RealtimeInput(RealtimeInput { audio: frame })
    }

    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// Acknowledgement of the setup message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupComplete {}

/// Model output and turn signals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    /// The user started speaking over the agent; playback must stop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
}

/// Messages received from the agent
///
/// Unknown fields are ignored so newer server features do not break parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<SetupComplete>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

impl ServerMessage {
    /// Parse a message from JSON text
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Whether this message acknowledges the setup
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Whether the agent signalled a barge-in
    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|content| content.interrupted)
            .unwrap_or(false)
    }

    /// Whether the agent finished its turn
    pub fn is_turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .and_then(|content| content.turn_complete)
            .unwrap_or(false)
    }

    /// base64 audio payloads in emission order
    pub fn audio_payloads(&self) -> Vec<&str> {
        self.parts()
            .filter_map(|part| part.inline_data.as_ref())
            .map(|inline| inline.data.as_str())
            .collect()
    }

    /// Text parts joined together, if any
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .parts()
            .filter_map(|part| part.text.as_deref())
            .collect();
        if text.is_empty() { None } else { Some(text) }
    }

    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.server_content
            .iter()
            .filter_map(|content| content.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Fixed configuration sent once at connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Model identity (with or without the `models/` prefix)
    pub model: String,
    /// Prebuilt voice name
    pub voice: String,
    /// Short persona string
    pub system_instruction: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl SessionConfig {
    /// Model identifier in resource form (`models/<name>`)
    pub fn model_resource(&self) -> String {
        if self.model.starts_with(MODEL_PREFIX) {
            self.model.clone()
        } else {
            format!("{}{}", MODEL_PREFIX, self.model)
        }
    }

    /// Build the setup message: audio-only responses with the configured voice
    pub fn setup_message(&self) -> ClientMessage {
        let system_instruction = if self.system_instruction.is_empty() {
            None
        } else {
            Some(Content {
                parts: vec![Part::text(self.system_instruction.clone())],
            })
        };

        ClientMessage::Setup(Setup {
            model: self.model_resource(),
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                }),
            },
            system_instruction,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
