use anyhow::{bail, Result};
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::{FrameFormat, NatsClient};
use super::messages::{SttErrorMessage, TranscriptMessage};
use crate::config::RecognitionConfig;
use crate::engine::{
    AudioSink, CancellationReason, FinalReason, RecognitionEvent, Recognizer, RecognizerFactory,
    RecognizerParts,
};

/// Builds one NATS-backed recognizer per pipeline over a shared connection
pub struct NatsRecognizerFactory {
    client: NatsClient,
    sample_rate: u32,
    channels: u16,
    drain_timeout: Duration,
}

impl NatsRecognizerFactory {
    pub fn new(client: NatsClient, config: &RecognitionConfig) -> Self {
        Self {
            client,
            sample_rate: config.sample_rate,
            channels: config.channels,
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
        }
    }
}

#[async_trait::async_trait]
impl RecognizerFactory for NatsRecognizerFactory {
    async fn create(&self, session_id: &str, language: &str) -> Result<RecognizerParts> {
        let format = FrameFormat {
            session_id: session_id.to_string(),
            language: language.to_string(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        };

        // Subscribe before any audio is published so no transcript is missed
        let transcripts = self.client.subscribe_transcripts().await?;
        let errors = self.client.subscribe_errors().await?;

        let (events_tx, events) = mpsc::unbounded_channel();

        let sink = Arc::new(NatsAudioSink {
            client: self.client.clone(),
            format,
            sequence: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        });

        let recognizer = NatsRecognizer {
            session_id: session_id.to_string(),
            drain_timeout: self.drain_timeout,
            subscriptions: Some((transcripts, errors)),
            events_tx: Some(events_tx),
            stop_tx: None,
            task: None,
        };

        Ok(RecognizerParts {
            recognizer: Box::new(recognizer),
            sink,
            events,
        })
    }
}

struct NatsAudioSink {
    client: NatsClient,
    format: FrameFormat,
    sequence: AtomicU32,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl AudioSink for NatsAudioSink {
    async fn write(&self, audio: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("audio stream for {} is closed", self.format.session_id);
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.client
            .publish_audio_frame(&self.format, audio, seq, false)
            .await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Final marker tells the STT service to flush the current utterance
        let seq = self.sequence.load(Ordering::SeqCst);
        self.client
            .publish_audio_frame(&self.format, &[], seq, true)
            .await
    }
}

struct NatsRecognizer {
    session_id: String,
    drain_timeout: Duration,
    subscriptions: Option<(async_nats::Subscriber, async_nats::Subscriber)>,
    events_tx: Option<mpsc::UnboundedSender<RecognitionEvent>>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl Recognizer for NatsRecognizer {
    async fn start(&mut self) -> Result<()> {
        let (Some((transcripts, errors)), Some(events_tx)) =
            (self.subscriptions.take(), self.events_tx.take())
        else {
            bail!("recognizer {} already started", self.session_id);
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        info!("Starting continuous recognition for {}", self.session_id);

        self.task = Some(tokio::spawn(listen(
            self.session_id.clone(),
            transcripts,
            errors,
            events_tx,
            stop_rx,
            self.drain_timeout,
        )));

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        match self.stop_tx.take() {
            Some(stop_tx) => {
                debug!("Stopping recognition for {}", self.session_id);
                let _ = stop_tx.send(());
            }
            None => {
                // Never started: report the session as stopped right away
                self.subscriptions = None;
                if let Some(events_tx) = self.events_tx.take() {
                    let _ = events_tx.send(RecognitionEvent::SessionStopped);
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "nats"
    }
}

impl Drop for NatsRecognizer {
    fn drop(&mut self) {
        // A stopped listener drains on its own; an unstopped one is cut off
        if self.stop_tx.is_some() {
            if let Some(task) = self.task.take() {
                task.abort();
            }
        }
    }
}

/// Listener loop for one recognition session
async fn listen(
    session_id: String,
    mut transcripts: async_nats::Subscriber,
    mut errors: async_nats::Subscriber,
    events_tx: mpsc::UnboundedSender<RecognitionEvent>,
    mut stop_rx: oneshot::Receiver<()>,
    drain_timeout: Duration,
) {
    let drain = tokio::time::sleep(drain_timeout);
    tokio::pin!(drain);
    let mut stopping = false;

    loop {
        tokio::select! {
            msg = transcripts.next() => {
                let Some(msg) = msg else { break };
                let transcript = match serde_json::from_slice::<TranscriptMessage>(&msg.payload) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Failed to parse transcript message: {}", e);
                        continue;
                    }
                };
                if transcript.session_id != session_id {
                    continue;
                }

                let is_final = !transcript.partial;
                let _ = events_tx.send(transcript_event(transcript));

                // The trailing final of a stopping session ends the drain
                if stopping && is_final {
                    break;
                }
            }
            msg = errors.next() => {
                let Some(msg) = msg else { break };
                match serde_json::from_slice::<SttErrorMessage>(&msg.payload) {
                    Ok(err) if err.session_id == session_id => {
                        let _ = events_tx.send(RecognitionEvent::Canceled(
                            CancellationReason::Error(err.detail),
                        ));
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Failed to parse STT error message: {}", e),
                }
            }
            _ = &mut stop_rx, if !stopping => {
                stopping = true;
                drain
                    .as_mut()
                    .reset(tokio::time::Instant::now() + drain_timeout);
            }
            _ = &mut drain, if stopping => {
                debug!("Drain timeout elapsed for {}", session_id);
                break;
            }
        }
    }

    info!("Recognition session stopped for {}", session_id);
    let _ = events_tx.send(RecognitionEvent::SessionStopped);
}

fn transcript_event(transcript: TranscriptMessage) -> RecognitionEvent {
    if transcript.partial {
        RecognitionEvent::Interim(transcript.text)
    } else if transcript.text.trim().is_empty() {
        RecognitionEvent::Final {
            text: String::new(),
            reason: FinalReason::NoMatch,
        }
    } else {
        RecognitionEvent::Final {
            text: transcript.text,
            reason: FinalReason::Recognized,
        }
    }
}
