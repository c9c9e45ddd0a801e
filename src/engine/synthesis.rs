use anyhow::{anyhow, Context, Result};
use quick_xml::escape::escape;
use reqwest::Client;
use std::collections::HashMap;
use tracing::{info, warn};

use super::Synthesizer;
use crate::config::SynthesisConfig;

/// Neural TTS over the cognitive-services REST endpoint
pub struct RestSynthesizer {
    client: Client,
    url: String,
    api_key: String,
    output_format: String,
    voices: HashMap<String, String>,
}

impl RestSynthesizer {
    pub fn new(config: &SynthesisConfig, voices: HashMap<String, String>) -> Self {
        Self {
            client: Client::new(),
            url: format!(
                "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
                config.region
            ),
            api_key: config.api_key.clone(),
            output_format: config.output_format.clone(),
            voices,
        }
    }
}

#[async_trait::async_trait]
impl Synthesizer for RestSynthesizer {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Option<Vec<u8>>> {
        let Some(voice) = self.voices.get(language) else {
            warn!("No voice configured for language {}", language);
            return Ok(None);
        };

        let res = self
            .client
            .post(&self.url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", &self.output_format)
            .body(ssml(text, language, voice))
            .send()
            .await
            .context("Failed to send synthesis request")?;

        if !res.status().is_success() {
            let status = res.status();
            let error_text = res.text().await.unwrap_or_default();
            return Err(anyhow!("Synthesis API error ({}): {}", status, error_text));
        }

        let audio = res.bytes().await?.to_vec();
        info!("Synthesized {} bytes of {} audio", audio.len(), language);

        Ok(Some(audio))
    }
}

fn ssml(text: &str, language: &str, voice: &str) -> String {
    format!(
        "<speak version='1.0' xml:lang='{}'><voice name='{}'>{}</voice></speak>",
        language,
        voice,
        escape(text)
    )
}
