use anyhow::{Context, Result};
use async_nats::Client;
use base64::Engine;
use tracing::{debug, info};

use super::messages::AudioFrameMessage;

/// Shared NATS connection; cheap to clone
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

/// Format of the PCM published for one session
#[derive(Debug, Clone)]
pub struct FrameFormat {
    pub session_id: String,
    pub language: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }

    /// Publish audio frame to NATS
    pub async fn publish_audio_frame(
        &self,
        format: &FrameFormat,
        pcm_bytes: &[u8],
        sequence: u32,
        is_final: bool,
    ) -> Result<()> {
        let subject = format!("audio.frame.{}", format.session_id);

        let message = AudioFrameMessage {
            session_id: format.session_id.clone(),
            sequence,
            pcm: base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
            sample_rate: format.sample_rate,
            channels: format.channels,
            language: format.language.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            final_frame: is_final,
        };

        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish audio frame")?;

        debug!(
            "Published audio frame to {} (seq={}, bytes={}, final={})",
            subject,
            sequence,
            pcm_bytes.len(),
            is_final
        );

        Ok(())
    }

    /// Subscribe to transcript messages (partial and final) for all sessions
    pub async fn subscribe_transcripts(&self) -> Result<async_nats::Subscriber> {
        self.subscribe("stt.text.>").await
    }

    /// Subscribe to STT failure reports for all sessions
    pub async fn subscribe_errors(&self) -> Result<async_nats::Subscriber> {
        self.subscribe("stt.error.>").await
    }

    async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .with_context(|| format!("Failed to subscribe to {}", subject))?;

        debug!("Subscribed to {}", subject);

        Ok(subscriber)
    }
}
