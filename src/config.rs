use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub recognition: RecognitionConfig,
    pub translation: TranslationConfig,
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub room: RoomConfig,
    #[serde(default)]
    pub languages: LanguageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// Streaming STT bridge over NATS
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    pub nats_url: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// How long a stopping recognizer waits for a trailing final transcript
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslationConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisConfig {
    pub region: String,
    #[serde(default)]
    pub api_key: String,
    pub output_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    /// Deliver a speaker's own final transcript back to them as a chat message
    pub echo_to_speaker: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            echo_to_speaker: true,
        }
    }
}

/// Per-language display names (used in prompts) and synthesis voices
#[derive(Debug, Clone, Deserialize)]
pub struct LanguageConfig {
    pub names: HashMap<String, String>,
    pub voices: HashMap<String, String>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        let names = [
            ("en-US", "English"),
            ("zh-TW", "Traditional Chinese"),
            ("ja-JP", "Japanese"),
            ("fr-FR", "French"),
        ];
        let voices = [
            ("en-US", "en-US-JennyNeural"),
            ("zh-TW", "zh-TW-HsiaoChenNeural"),
            ("ja-JP", "ja-JP-NanamiNeural"),
            ("fr-FR", "fr-FR-DeniseNeural"),
        ];

        Self {
            names: names
                .iter()
                .map(|(code, name)| (code.to_string(), name.to_string()))
                .collect(),
            voices: voices
                .iter()
                .map(|(code, voice)| (code.to_string(), voice.to_string()))
                .collect(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (extension optional), then overlay
    /// `RELAY__SECTION__KEY` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("RELAY").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        let mut cfg: Self = settings
            .try_deserialize()
            .context("Invalid relay configuration")?;

        cfg.languages.names = canonical_keys(cfg.languages.names);
        cfg.languages.voices = canonical_keys(cfg.languages.voices);
        Ok(cfg)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }
}

/// Map keys may come back lowercased from the config source; restore
/// `ll-RR` casing so lookups by client-sent tags still match.
fn canonical_keys(map: HashMap<String, String>) -> HashMap<String, String> {
    map.into_iter()
        .map(|(tag, value)| (canonical_tag(&tag), value))
        .collect()
}

fn canonical_tag(tag: &str) -> String {
    match tag.split_once('-') {
        Some((language, region)) if region.len() == 2 => {
            format!("{}-{}", language.to_lowercase(), region.to_uppercase())
        }
        _ => tag.to_string(),
    }
}
