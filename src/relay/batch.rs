use tracing::info;

use super::{required, Relay};
use crate::engine::prompts::{batch_prompt, coaching_prompt, summary_prompt, BatchMode};
use crate::error::RelayError;
use crate::protocol::{BatchRequest, ConnectionId, ServerMessage, SuggestionRequest};

impl Relay {
    /// Generate a summary or interview report over a finished transcript
    pub async fn process_batch(&self, id: &ConnectionId, req: &BatchRequest) -> Result<(), RelayError> {
        let (Some(transcript), Some(mode), Some(source_language)) = (
            required(&req.transcript),
            required(&req.mode),
            required(&req.source_language),
        ) else {
            return Err(RelayError::Validation(
                "Incomplete data received for batch processing.".to_string(),
            ));
        };

        let mode = BatchMode::parse(mode).ok_or_else(|| {
            RelayError::Validation(format!("Unknown batch processing mode '{}'.", mode))
        })?;

        info!(connection = %id, ?mode, "Processing batch request");

        let prompt = batch_prompt(
            transcript,
            mode,
            source_language,
            &self.inner.options.language_names,
        );
        let report = self.generate(&prompt).await?;

        info!(connection = %id, "Generated report");
        self.send(id, ServerMessage::BatchResult { report }).await;
        Ok(())
    }

    /// Short interview coaching over the transcript so far
    pub async fn ai_suggestion(&self, id: &ConnectionId, req: &SuggestionRequest) -> Result<(), RelayError> {
        let (Some(transcript), Some(source_language)) =
            (required(&req.transcript), required(&req.source_language))
        else {
            return Err(RelayError::Validation(
                "Incomplete data for AI suggestion.".to_string(),
            ));
        };

        info!(connection = %id, "Generating AI suggestion");

        let language = self.language_name(source_language);
        let report = self.generate(&coaching_prompt(transcript, language)).await?;
        self.send(id, ServerMessage::AiSuggestionResult { report }).await;
        Ok(())
    }

    /// Summarize a transcript in its own language; serves `POST /summarize_transcript`
    pub async fn summarize(&self, text: &str, language: &str) -> Result<String, RelayError> {
        if text.trim().is_empty() || language.trim().is_empty() {
            return Err(RelayError::Validation(
                "Missing text or language in request.".to_string(),
            ));
        }

        let summary = self
            .generate(&summary_prompt(text, self.language_name(language)))
            .await?;
        info!("Generated transcript summary");
        Ok(summary)
    }

    async fn generate(&self, prompt: &str) -> Result<String, RelayError> {
        let text = self
            .inner
            .engines
            .text_model
            .generate(prompt)
            .await
            .map_err(|e| RelayError::Generation(format!("{:#}", e)))?;
        Ok(text.trim().to_string())
    }

    fn language_name<'a>(&'a self, language: &'a str) -> &'a str {
        self.inner
            .options
            .language_names
            .get(language)
            .map(String::as_str)
            .unwrap_or(language)
    }
}
