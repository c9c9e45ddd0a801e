//! Connection-facing message types
//!
//! Text frames carry `{"event": <name>, "data": {...}}`. Binary frames are
//! raw audio and map straight to [`ClientMessage::AudioData`].

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RelayError;

/// Server-assigned identity of one live transport connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_id: Option<String>,
    pub user_id: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub tts_enabled: bool,
}

/// Payload of `start_translation` and `settings_changed`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoloSettings {
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    #[serde(default)]
    pub tts_enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartChatRequest {
    pub room_id: Option<String>,
    pub user_id: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub tts_enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub language: Option<String>,
    #[serde(default)]
    pub tts_enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub transcript: Option<String>,
    pub mode: Option<String>,
    pub source_language: Option<String>,
}

/// Payload of `get_ai_suggestion`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    pub transcript: Option<String>,
    pub source_language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ReportAudioRequest {
    text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AudioPayload {
    audio: String,
}

/// Inbound message from a connection
#[derive(Debug, Clone)]
pub enum ClientMessage {
    JoinRoom(JoinRoomRequest),
    StartTranslation(SoloSettings),
    SettingsChanged(SoloSettings),
    StartChatTranslation(StartChatRequest),
    UpdateUserSettings(UserSettings),
    AudioData(Vec<u8>),
    StopTranslation,
    LeaveRoom,
    RequestReportAudio { text: Option<String> },
    ProcessBatch(BatchRequest),
    GetAiSuggestion(SuggestionRequest),
    Ping,
}

impl ClientMessage {
    /// Parse a JSON text frame
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| RelayError::Validation(format!("Malformed message: {}", e)))?;

        let data = match envelope.data {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            data => data,
        };

        let message = match envelope.event.as_str() {
            "join_room" => Self::JoinRoom(payload(data)?),
            "start_translation" => Self::StartTranslation(payload(data)?),
            "settings_changed" => Self::SettingsChanged(payload(data)?),
            "start_chat_translation" => Self::StartChatTranslation(payload(data)?),
            "update_user_settings" => Self::UpdateUserSettings(payload(data)?),
            "audio_data" => {
                let AudioPayload { audio } = payload(data)?;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(audio)
                    .map_err(|e| RelayError::Validation(format!("Invalid audio payload: {}", e)))?;
                Self::AudioData(bytes)
            }
            "stop_translation" => Self::StopTranslation,
            "leave_room" => Self::LeaveRoom,
            "request_report_audio" => {
                let ReportAudioRequest { text } = payload(data)?;
                Self::RequestReportAudio { text }
            }
            "process_batch" => Self::ProcessBatch(payload(data)?),
            "get_ai_suggestion" => Self::GetAiSuggestion(payload(data)?),
            "ping" => Self::Ping,
            other => {
                return Err(RelayError::Validation(format!("Unknown event: {}", other)));
            }
        };

        Ok(message)
    }

    /// Event name, for logging
    pub fn event(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "join_room",
            Self::StartTranslation(_) => "start_translation",
            Self::SettingsChanged(_) => "settings_changed",
            Self::StartChatTranslation(_) => "start_chat_translation",
            Self::UpdateUserSettings(_) => "update_user_settings",
            Self::AudioData(_) => "audio_data",
            Self::StopTranslation => "stop_translation",
            Self::LeaveRoom => "leave_room",
            Self::RequestReportAudio { .. } => "request_report_audio",
            Self::ProcessBatch(_) => "process_batch",
            Self::GetAiSuggestion(_) => "get_ai_suggestion",
            Self::Ping => "ping",
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(data: serde_json::Value) -> Result<T, RelayError> {
    serde_json::from_value(data)
        .map_err(|e| RelayError::Validation(format!("Malformed message data: {}", e)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomUser {
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Outbound message to a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    InterimResult {
        text: String,
    },
    FinalResult {
        original: String,
        refined: String,
    },
    /// Base64 audio for the preceding solo `final_result`
    SynthesisResult {
        audio: String,
    },
    ChatMessage {
        #[serde(rename = "senderId")]
        sender_id: String,
        original: String,
        translated: String,
        audio: Option<String>,
    },
    RoomUpdate {
        users: Vec<RoomUser>,
    },
    StatusUpdate {
        message: String,
    },
    ServerError {
        error: String,
    },
    ReportAudio {
        audio: String,
    },
    BatchResult {
        report: String,
    },
    /// Short coaching advice for a running transcript
    AiSuggestionResult {
        report: String,
    },
    Pong,
}

impl ServerMessage {
    pub fn error(err: &RelayError) -> Self {
        Self::ServerError {
            error: err.client_message(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::StatusUpdate {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Base64 encoding used for every audio payload sent to clients
pub fn encode_audio(audio: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(audio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_room() {
        let msg = ClientMessage::parse(
            r#"{"event":"join_room","data":{"roomId":"R1","userId":"alice","language":"en-US","ttsEnabled":true}}"#,
        )
        .unwrap();

        match msg {
            ClientMessage::JoinRoom(req) => {
                assert_eq!(req.room_id.as_deref(), Some("R1"));
                assert_eq!(req.user_id.as_deref(), Some("alice"));
                assert_eq!(req.language.as_deref(), Some("en-US"));
                assert!(req.tts_enabled);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_without_data() {
        assert!(matches!(
            ClientMessage::parse(r#"{"event":"stop_translation"}"#).unwrap(),
            ClientMessage::StopTranslation
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"event":"leave_room","data":{}}"#).unwrap(),
            ClientMessage::LeaveRoom
        ));
        // Missing fields stay absent instead of failing the parse
        match ClientMessage::parse(r#"{"event":"settings_changed"}"#).unwrap() {
            ClientMessage::SettingsChanged(s) => {
                assert!(s.source_language.is_none());
                assert!(!s.tts_enabled);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_base64_audio() {
        let msg = ClientMessage::parse(r#"{"event":"audio_data","data":{"audio":"AQID"}}"#).unwrap();
        match msg {
            ClientMessage::AudioData(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_ai_suggestion() {
        let msg = ClientMessage::parse(
            r#"{"event":"get_ai_suggestion","data":{"transcript":"Q: why us?","sourceLanguage":"en-US"}}"#,
        )
        .unwrap();
        assert_eq!(msg.event(), "get_ai_suggestion");
        match msg {
            ClientMessage::GetAiSuggestion(req) => {
                assert_eq!(req.transcript.as_deref(), Some("Q: why us?"));
                assert_eq!(req.source_language.as_deref(), Some("en-US"));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let reply = ServerMessage::AiSuggestionResult {
            report: "Smile more.".to_string(),
        };
        assert_eq!(
            reply.to_json(),
            r#"{"event":"ai_suggestion_result","data":{"report":"Smile more."}}"#
        );
    }

    #[test]
    fn test_parse_unknown_event() {
        let err = ClientMessage::parse(r#"{"event":"dance"}"#).unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[test]
    fn test_chat_message_json() {
        let msg = ServerMessage::ChatMessage {
            sender_id: "alice".to_string(),
            original: "hello".to_string(),
            translated: "hola".to_string(),
            audio: None,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["event"], "chat_message");
        assert_eq!(json["data"]["senderId"], "alice");
        assert_eq!(json["data"]["translated"], "hola");
        assert!(json["data"]["audio"].is_null());
    }

    #[test]
    fn test_room_update_json() {
        let msg = ServerMessage::RoomUpdate {
            users: vec![RoomUser {
                user_id: "alice".to_string(),
            }],
        };
        assert_eq!(
            msg.to_json(),
            r#"{"event":"room_update","data":{"users":[{"userId":"alice"}]}}"#
        );
    }
}
