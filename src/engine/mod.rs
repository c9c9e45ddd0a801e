//! External engine seams
//!
//! The relay never talks to a concrete speech or language service directly.
//! It consumes these traits:
//! - [`RecognizerFactory`] / [`Recognizer`] / [`AudioSink`]: continuous streaming ASR
//! - [`Translator`]: text + target language → translated text
//! - [`Synthesizer`]: text + language → encoded audio bytes
//! - [`TextModel`]: free-form generation used for translation prompts and batch reports
//!
//! Concrete adapters live in the submodules.

pub mod gemini;
pub mod nats;
pub mod prompts;
pub mod synthesis;
pub mod translation;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use gemini::GeminiTextModel;
pub use nats::NatsRecognizerFactory;
pub use synthesis::RestSynthesizer;
pub use translation::PromptTranslator;

/// Why a final recognition result was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalReason {
    /// Speech was recognized
    Recognized,
    /// Audio was processed but no speech matched
    NoMatch,
    Canceled(CancellationReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationReason {
    EndOfStream,
    /// Engine failure with its detail message
    Error(String),
}

/// Asynchronous event raised by one recognizer instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Interim(String),
    Final { text: String, reason: FinalReason },
    Canceled(CancellationReason),
    SessionStopped,
}

/// Write end of the audio stream bound to one recognizer
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    /// Push raw audio (16-bit little-endian PCM) to the recognizer
    async fn write(&self, audio: &[u8]) -> Result<()>;

    /// Close the stream; subsequent writes fail
    async fn close(&self) -> Result<()>;
}

/// One live continuous-recognition session
#[async_trait::async_trait]
pub trait Recognizer: Send + Sync {
    /// Begin continuous recognition
    async fn start(&mut self) -> Result<()>;

    /// Request a graceful stop
    ///
    /// A final result still in flight may be delivered after this returns;
    /// `SessionStopped` is always the last event.
    async fn stop(&mut self) -> Result<()>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Everything produced when a recognizer is constructed
pub struct RecognizerParts {
    pub recognizer: Box<dyn Recognizer>,
    pub sink: Arc<dyn AudioSink>,
    pub events: mpsc::UnboundedReceiver<RecognitionEvent>,
}

#[async_trait::async_trait]
pub trait RecognizerFactory: Send + Sync {
    /// Construct a recognizer for `language`, identified by `session_id`
    async fn create(&self, session_id: &str, language: &str) -> Result<RecognizerParts>;
}

#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String>;
}

#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    /// Returns `Ok(None)` when no voice is available for `language`
    async fn synthesize(&self, text: &str, language: &str) -> Result<Option<Vec<u8>>>;
}

#[async_trait::async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// The full set of engines handed to the relay
#[derive(Clone)]
pub struct Engines {
    pub recognizers: Arc<dyn RecognizerFactory>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub text_model: Arc<dyn TextModel>,
}
