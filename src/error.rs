//! Error taxonomy for the relay
//!
//! Every failure is scoped to the connection that caused it. Errors that
//! reach the client are rendered through [`RelayError::client_message`]
//! and sent as a `server_error` event.

use thiserror::Error;

/// Coarse, user-facing category for a recognition cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationCategory {
    Authentication,
    Connectivity,
    Generic,
}

impl CancellationCategory {
    /// Classify an engine-provided cancellation detail string
    pub fn classify(detail: &str) -> Self {
        let detail = detail.to_lowercase();
        if detail.contains("authentication") || detail.contains("subscription") {
            Self::Authentication
        } else if detail.contains("websocket") || detail.contains("connection") {
            Self::Connectivity
        } else {
            Self::Generic
        }
    }

    pub fn client_message(self) -> &'static str {
        match self {
            Self::Authentication => {
                "Speech service authentication failed. Check API key or subscription status."
            }
            Self::Connectivity => "Network connection issue with speech service.",
            Self::Generic => "Speech recognition failed.",
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or malformed required fields
    #[error("validation failed: {0}")]
    Validation(String),

    /// The speech recognizer could not be constructed or started
    #[error("failed to initialize speech recognizer: {0}")]
    EngineInit(String),

    #[error("recognition canceled: {0:?}")]
    RecognitionCanceled(CancellationCategory),

    /// Writing to the audio sink failed
    #[error("audio stream write failed: {0}")]
    StreamWrite(String),

    #[error("connection is not a member of the requested room")]
    NotInRoom,

    #[error("translation failed: {0}")]
    Translation(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    /// The text model failed to produce a batch report
    #[error("report generation failed: {0}")]
    Generation(String),
}

impl RelayError {
    /// Text shown to the client in a `server_error` event
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::EngineInit(_) => {
                "Speech service unavailable: failed to initialize speech recognizer.".to_string()
            }
            Self::RecognitionCanceled(category) => category.client_message().to_string(),
            Self::StreamWrite(_) => "Audio stream failed. Please restart recording.".to_string(),
            Self::NotInRoom => "Not in a valid room.".to_string(),
            Self::Translation(_) => "Translation failed.".to_string(),
            Self::Synthesis(_) => "Speech synthesis failed.".to_string(),
            Self::Generation(_) => {
                "Failed to generate report due to an API error.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_authentication() {
        assert_eq!(
            CancellationCategory::classify("Authentication error (401). Please check subscription"),
            CancellationCategory::Authentication
        );
        assert_eq!(
            CancellationCategory::classify("Invalid SUBSCRIPTION key"),
            CancellationCategory::Authentication
        );
    }

    #[test]
    fn test_classify_connectivity() {
        assert_eq!(
            CancellationCategory::classify("WebSocket upgrade failed"),
            CancellationCategory::Connectivity
        );
        assert_eq!(
            CancellationCategory::classify("connection reset by peer"),
            CancellationCategory::Connectivity
        );
    }

    #[test]
    fn test_classify_generic() {
        assert_eq!(
            CancellationCategory::classify("internal engine fault"),
            CancellationCategory::Generic
        );
    }

    #[test]
    fn test_engine_init_is_service_unavailable() {
        let err = RelayError::EngineInit("no route to host".to_string());
        assert!(err.client_message().starts_with("Speech service unavailable"));
    }

    #[test]
    fn test_stream_write_asks_for_restart() {
        let err = RelayError::StreamWrite("closed".to_string());
        assert_eq!(
            err.client_message(),
            "Audio stream failed. Please restart recording."
        );
    }
}
