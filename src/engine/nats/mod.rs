//! Streaming recognizer backed by an STT service on NATS
//!
//! Audio goes out on `audio.frame.<session>`; partial and final transcripts
//! come back on `stt.text.>` and failures on `stt.error.>`, both filtered by
//! the `session_id` in the payload.

pub mod client;
pub mod messages;
mod recognizer;

pub use client::NatsClient;
pub use messages::{AudioFrameMessage, SttErrorMessage, TranscriptMessage};
pub use recognizer::NatsRecognizerFactory;
