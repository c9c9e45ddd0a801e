//! In-memory engines for driving the relay in tests
#![allow(dead_code)]

use anyhow::{bail, Result};
use speech_relay::engine::{
    AudioSink, Engines, RecognitionEvent, Recognizer, RecognizerFactory, RecognizerParts,
    Synthesizer, TextModel, Translator,
};
use speech_relay::pipeline::PipelineId;
use speech_relay::{ConnectionId, Relay, RelayOptions, ServerMessage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Test-side view of one recognizer the factory created
#[derive(Clone)]
pub struct MockHandle {
    pub session_id: String,
    pub language: String,
    events: mpsc::UnboundedSender<RecognitionEvent>,
    pub stopped: Arc<AtomicBool>,
    pub written: Arc<AtomicUsize>,
}

impl MockHandle {
    /// Raise an engine event as if the recognizer produced it
    pub fn emit(&self, event: RecognitionEvent) {
        let _ = self.events.send(event);
    }

    pub fn recognized(&self, text: &str) {
        self.emit(RecognitionEvent::Final {
            text: text.to_string(),
            reason: speech_relay::engine::FinalReason::Recognized,
        });
    }
}

#[derive(Default)]
pub struct MockRecognizerFactory {
    handles: Mutex<Vec<MockHandle>>,
    /// "create:<session>" / "stop:<session>" in call order
    log: Arc<Mutex<Vec<String>>>,
    live: Arc<AtomicUsize>,
    pub fail_create: AtomicBool,
    pub fail_writes: Arc<AtomicBool>,
    /// When set, stop() does not raise `SessionStopped` by itself
    pub hold_session_stopped: Arc<AtomicBool>,
    /// Milliseconds create() takes, simulating a slow speech service
    pub create_delay_ms: AtomicU64,
}

impl MockRecognizerFactory {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn handle(&self, pipeline: PipelineId) -> MockHandle {
        let suffix = format!("-{}", pipeline);
        self.handles
            .lock()
            .unwrap()
            .iter()
            .find(|h| h.session_id.ends_with(&suffix))
            .cloned()
            .expect("no recognizer for pipeline")
    }
}

#[async_trait::async_trait]
impl RecognizerFactory for MockRecognizerFactory {
    async fn create(&self, session_id: &str, language: &str) -> Result<RecognizerParts> {
        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("speech service unreachable");
        }

        self.log.lock().unwrap().push(format!("create:{}", session_id));

        let (tx, events) = mpsc::unbounded_channel();
        let handle = MockHandle {
            session_id: session_id.to_string(),
            language: language.to_string(),
            events: tx.clone(),
            stopped: Arc::new(AtomicBool::new(false)),
            written: Arc::new(AtomicUsize::new(0)),
        };
        self.handles.lock().unwrap().push(handle.clone());

        Ok(RecognizerParts {
            recognizer: Box::new(MockRecognizer {
                handle: handle.clone(),
                events: tx,
                log: self.log.clone(),
                live: self.live.clone(),
                hold_session_stopped: self.hold_session_stopped.clone(),
            }),
            sink: Arc::new(MockSink {
                written: handle.written.clone(),
                fail: self.fail_writes.clone(),
                closed: AtomicBool::new(false),
            }),
            events,
        })
    }
}

struct MockRecognizer {
    handle: MockHandle,
    events: mpsc::UnboundedSender<RecognitionEvent>,
    log: Arc<Mutex<Vec<String>>>,
    live: Arc<AtomicUsize>,
    hold_session_stopped: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Recognizer for MockRecognizer {
    async fn start(&mut self) -> Result<()> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.handle.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push(format!("stop:{}", self.handle.session_id));

        if !self.hold_session_stopped.load(Ordering::SeqCst) {
            let _ = self.events.send(RecognitionEvent::SessionStopped);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Rejects writes once closed, like the real push stream
struct MockSink {
    written: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl AudioSink for MockSink {
    async fn write(&self, audio: &[u8]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            bail!("push stream closed");
        }
        self.written.fetch_add(audio.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Appends the target language; fails for languages in `failing`
#[derive(Default)]
pub struct MockTranslator {
    calls: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
}

impl MockTranslator {
    pub fn fail_for(&self, language: &str) {
        self.failing.lock().unwrap().insert(language.to_string());
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), target_language.to_string()));

        if self.failing.lock().unwrap().contains(target_language) {
            bail!("translation backend rejected {}", target_language);
        }
        Ok(format!("{} [{}]", text, target_language))
    }
}

/// Returns the text bytes as "audio"; no voice for `xx-XX`
#[derive(Default)]
pub struct MockSynthesizer {
    pub calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Option<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if language == "xx-XX" {
            return Ok(None);
        }
        Ok(Some(text.as_bytes().to_vec()))
    }
}

#[derive(Default)]
pub struct MockTextModel {
    pub fail: AtomicBool,
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl TextModel for MockTextModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail.load(Ordering::SeqCst) {
            bail!("quota exceeded");
        }
        Ok("  Key decisions: ship it.  ".to_string())
    }
}

pub struct Harness {
    pub relay: Relay,
    pub recognizers: Arc<MockRecognizerFactory>,
    pub translator: Arc<MockTranslator>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub text_model: Arc<MockTextModel>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(RelayOptions::default())
    }

    pub fn with_options(options: RelayOptions) -> Self {
        let recognizers = Arc::new(MockRecognizerFactory::default());
        let translator = Arc::new(MockTranslator::default());
        let synthesizer = Arc::new(MockSynthesizer::default());
        let text_model = Arc::new(MockTextModel::default());

        let engines = Engines {
            recognizers: recognizers.clone(),
            translator: translator.clone(),
            synthesizer: synthesizer.clone(),
            text_model: text_model.clone(),
        };

        Self {
            relay: Relay::new(engines, options),
            recognizers,
            translator,
            synthesizer,
            text_model,
        }
    }

    pub async fn connect(&self) -> Client {
        let (id, outbound) = self.relay.connect().await;
        Client { id, outbound }
    }
}

/// A connected test client and its outbound queue
pub struct Client {
    pub id: ConnectionId,
    pub outbound: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Client {
    /// Everything queued for this client so far
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn errors(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::ServerError { error } => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn chat_messages(&mut self) -> Vec<(String, String, String, Option<String>)> {
        self.drain()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::ChatMessage {
                    sender_id,
                    original,
                    translated,
                    audio,
                } => Some((sender_id, original, translated, audio)),
                _ => None,
            })
            .collect()
    }
}

/// Let spawned forwarders run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}
