use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::json;

use super::TextModel;
use crate::config::TranslationConfig;

/// `generateContent` REST client for a hosted generative model
pub struct GeminiTextModel {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiTextModel {
    pub fn new(config: &TranslationConfig) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait::async_trait]
impl TextModel for GeminiTextModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let res = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .context("Failed to send generation request")?;

        if !res.status().is_success() {
            let status = res.status();
            let error_text = res.text().await.unwrap_or_default();
            return Err(anyhow!("Generation API error ({}): {}", status, error_text));
        }

        let json: serde_json::Value = res.json().await?;
        json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|text| text.trim().to_string())
            .ok_or_else(|| anyhow!("Generation response carried no text"))
    }
}
