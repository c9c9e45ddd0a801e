use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::prompts::translation_prompt;
use super::{TextModel, Translator};

/// Translator that prompts a generative text model
pub struct PromptTranslator {
    model: Arc<dyn TextModel>,
    language_names: HashMap<String, String>,
}

impl PromptTranslator {
    pub fn new(model: Arc<dyn TextModel>, language_names: HashMap<String, String>) -> Self {
        Self {
            model,
            language_names,
        }
    }
}

#[async_trait::async_trait]
impl Translator for PromptTranslator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String> {
        let prompt = translation_prompt(text, target_language, &self.language_names);
        let translated = self.model.generate(&prompt).await?;
        let translated = translated.trim();

        if translated.is_empty() {
            bail!("text model returned an empty translation");
        }

        debug!("Translated into {}: '{}'", target_language, translated);
        Ok(translated.to_string())
    }
}
