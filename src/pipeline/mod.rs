//! Audio pipeline: one connection bound to one live recognizer
//!
//! A pipeline exclusively owns its recognizer and the write end of the audio
//! stream. Recognition events arrive on a separate channel and are forwarded
//! by a task spawned by the relay; the pipeline only keeps that task's abort
//! handle so a hard shutdown can detach it before releasing the engine.
//!
//! Stopping is split in two. [`AudioPipeline::begin_stop`] flips the state
//! and is cheap enough to call under the relay's state lock; the returned
//! [`StopHandle`] does the engine I/O once that lock is released.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::engine::{AudioSink, RecognitionEvent, Recognizer, RecognizerFactory};
use crate::error::RelayError;
use crate::protocol::ConnectionId;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one recognizer instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(u64);

impl PipelineId {
    fn next() -> Self {
        Self(NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Language and voice settings a pipeline was started with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Recognition language
    pub language: String,
    /// Translation target (solo sessions only)
    pub target_language: Option<String>,
    pub tts_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Recognizing,
    Canceled,
    Stopping,
    Stopped,
}

/// Lifecycle signal applied to a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Start,
    Cancel,
    Stop,
    Stopped,
}

impl PipelineState {
    /// `Created → Recognizing → {Stopping → Stopped}` or
    /// `{Canceled → Stopping → Stopped}`; `Stopped` is terminal.
    pub fn next(self, signal: Signal) -> Option<Self> {
        use PipelineState::*;
        match (self, signal) {
            (Created, Signal::Start) => Some(Recognizing),
            (Recognizing, Signal::Cancel) => Some(Canceled),
            (Created | Recognizing | Canceled, Signal::Stop) => Some(Stopping),
            (Recognizing | Canceled | Stopping, Signal::Stopped) => Some(Stopped),
            _ => None,
        }
    }

    /// Whether recognition events may still be processed
    pub fn accepts_events(self) -> bool {
        !matches!(self, PipelineState::Created | PipelineState::Stopped)
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<RecognitionEvent>;

type SharedRecognizer = Arc<Mutex<Box<dyn Recognizer>>>;

pub struct AudioPipeline {
    id: PipelineId,
    recognizer: SharedRecognizer,
    sink: Arc<dyn AudioSink>,
    settings: PipelineSettings,
    state: PipelineState,
    forwarder: Option<AbortHandle>,
}

impl AudioPipeline {
    /// Construct and start a recognizer for `settings.language`
    ///
    /// Nothing is registered anywhere on failure.
    pub async fn open(
        factory: &dyn RecognizerFactory,
        connection: &ConnectionId,
        settings: PipelineSettings,
    ) -> Result<(Self, EventReceiver), RelayError> {
        let id = PipelineId::next();
        let session_id = format!("{}-{}", connection, id);

        let parts = factory
            .create(&session_id, &settings.language)
            .await
            .map_err(|e| RelayError::EngineInit(format!("{:#}", e)))?;

        let mut recognizer = parts.recognizer;
        if let Err(e) = recognizer.start().await {
            if let Err(stop_err) = recognizer.stop().await {
                warn!(pipeline = %id, "Failed to stop recognizer: {:#}", stop_err);
            }
            let _ = parts.sink.close().await;
            return Err(RelayError::EngineInit(format!("{:#}", e)));
        }

        debug!(
            pipeline = %id,
            backend = recognizer.name(),
            language = %settings.language,
            "Pipeline recognizing"
        );

        let mut pipeline = Self {
            id,
            recognizer: Arc::new(Mutex::new(recognizer)),
            sink: parts.sink,
            settings,
            state: PipelineState::Created,
            forwarder: None,
        };
        pipeline.apply(Signal::Start);

        Ok((pipeline, parts.events))
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn sink(&self) -> Arc<dyn AudioSink> {
        Arc::clone(&self.sink)
    }

    pub fn attach_forwarder(&mut self, handle: AbortHandle) {
        self.forwarder = Some(handle);
    }

    /// Apply a lifecycle signal; invalid transitions are ignored
    pub fn apply(&mut self, signal: Signal) -> bool {
        match self.state.next(signal) {
            Some(next) => {
                self.state = next;
                true
            }
            None => {
                debug!(pipeline = %self.id, state = ?self.state, ?signal, "Ignoring lifecycle signal");
                false
            }
        }
    }

    /// Detach the forwarder so no further event from this pipeline is routed
    pub fn detach(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }

    /// Move to `Stopping` and hand back the engine half of the stop
    ///
    /// Returns `None` when the pipeline is already stopping or stopped.
    pub fn begin_stop(&mut self) -> Option<StopHandle> {
        if !self.apply(Signal::Stop) {
            return None;
        }
        let recognizer = Arc::clone(&self.recognizer).try_lock_owned().ok()?;
        Some(StopHandle {
            pipeline: self.id,
            recognizer,
            sink: Arc::clone(&self.sink),
        })
    }

    /// Graceful stop: end recognition and close the sink
    ///
    /// The forwarder stays attached so a final result already in flight and
    /// the closing `SessionStopped` are still delivered. If another stop is
    /// already running, waits for it to release the engine.
    pub async fn stop(&mut self) {
        match self.begin_stop() {
            Some(handle) => handle.finish().await,
            None => {
                let _settled = self.recognizer.lock().await;
            }
        }
    }

    /// Hard stop: detach the forwarder first so no further event can fire,
    /// then release the engine.
    pub async fn shutdown(mut self) {
        self.detach();
        self.stop().await;
    }
}

/// Engine side of a stop started with [`AudioPipeline::begin_stop`]
pub struct StopHandle {
    pipeline: PipelineId,
    recognizer: OwnedMutexGuard<Box<dyn Recognizer>>,
    sink: Arc<dyn AudioSink>,
}

impl StopHandle {
    pub async fn finish(mut self) {
        if let Err(e) = self.recognizer.stop().await {
            warn!(pipeline = %self.pipeline, "Failed to stop recognizer: {:#}", e);
        }
        if let Err(e) = self.sink.close().await {
            warn!(pipeline = %self.pipeline, "Failed to close audio stream: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let state = PipelineState::Created;
        let state = state.next(Signal::Start).unwrap();
        assert_eq!(state, PipelineState::Recognizing);
        let state = state.next(Signal::Stop).unwrap();
        assert_eq!(state, PipelineState::Stopping);
        let state = state.next(Signal::Stopped).unwrap();
        assert_eq!(state, PipelineState::Stopped);
    }

    #[test]
    fn test_cancel_path_transitions() {
        let state = PipelineState::Recognizing.next(Signal::Cancel).unwrap();
        assert_eq!(state, PipelineState::Canceled);
        assert_eq!(state.next(Signal::Stop), Some(PipelineState::Stopping));
        assert_eq!(state.next(Signal::Stopped), Some(PipelineState::Stopped));
    }

    #[test]
    fn test_stopped_is_terminal() {
        for signal in [Signal::Start, Signal::Cancel, Signal::Stop, Signal::Stopped] {
            assert_eq!(PipelineState::Stopped.next(signal), None);
        }
        assert!(!PipelineState::Stopped.accepts_events());
        assert!(!PipelineState::Created.accepts_events());
        assert!(PipelineState::Stopping.accepts_events());
    }

    #[test]
    fn test_pipeline_ids_are_unique() {
        let a = PipelineId::next();
        let b = PipelineId::next();
        assert_ne!(a, b);
    }
}
