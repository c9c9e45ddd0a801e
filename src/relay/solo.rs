use tracing::{debug, error, info, warn};

use super::router::{self, EventOrigin, Scope};
use super::{release, required, retire, Relay, RelayState};
use crate::error::RelayError;
use crate::pipeline::{AudioPipeline, PipelineSettings, PipelineState, StopHandle};
use crate::protocol::{encode_audio, ConnectionId, ServerMessage, SoloSettings};

const DEFAULT_SOURCE_LANGUAGE: &str = "en-US";
const DEFAULT_TARGET_LANGUAGE: &str = "zh-TW";

impl Relay {
    /// Start a solo translation session, replacing any existing one
    pub async fn start_solo(
        &self,
        id: &ConnectionId,
        settings: &SoloSettings,
    ) -> Result<(), RelayError> {
        let settings = PipelineSettings {
            language: required(&settings.source_language)
                .unwrap_or(DEFAULT_SOURCE_LANGUAGE)
                .to_string(),
            target_language: Some(
                required(&settings.target_language)
                    .unwrap_or(DEFAULT_TARGET_LANGUAGE)
                    .to_string(),
            ),
            tts_enabled: settings.tts_enabled,
        };

        // A connection is either solo or in a room, never both
        self.install_solo(id, settings, true, "Translation started.")
            .await
    }

    /// Restart an in-progress session with new language / TTS settings
    pub async fn update_solo(
        &self,
        id: &ConnectionId,
        settings: &SoloSettings,
    ) -> Result<(), RelayError> {
        let (Some(source), Some(target)) = (
            required(&settings.source_language),
            required(&settings.target_language),
        ) else {
            warn!(connection = %id, "Incomplete settings received; ignoring settings change");
            return Ok(());
        };

        let settings = PipelineSettings {
            language: source.to_string(),
            target_language: Some(target.to_string()),
            tts_enabled: settings.tts_enabled,
        };

        info!(
            connection = %id,
            source = %settings.language,
            target_language = target,
            tts = settings.tts_enabled,
            "Applying new settings"
        );

        self.install_solo(id, settings, false, "Settings updated.").await
    }

    /// Tear down the current pipeline (if any), then open and register a new one
    ///
    /// The old recognizer is stopped before the new one is created. Neither
    /// happens under the state lock.
    async fn install_solo(
        &self,
        id: &ConnectionId,
        settings: PipelineSettings,
        leave_room: bool,
        status: &str,
    ) -> Result<(), RelayError> {
        let Some(_lifecycle) = self.lifecycle(id).await else {
            return Ok(());
        };

        let mut retired = Vec::new();
        let previous = {
            let mut state = self.inner.state.lock().await;
            if !state.is_connected(id) {
                return Ok(());
            }
            if leave_room && Self::depart(&mut state, id, &mut retired) {
                info!(connection = %id, "Left room to start a solo session");
            }
            state.sessions.remove(id)
        };
        release(retired).await;

        if let Some(mut old) = previous {
            warn!(
                connection = %id,
                pipeline = %old.id(),
                "Found existing solo session; stopping it before starting a new one"
            );
            old.stop().await;
        }

        info!(
            connection = %id,
            source = %settings.language,
            target_language = settings.target_language.as_deref().unwrap_or_default(),
            tts = settings.tts_enabled,
            "Starting translation"
        );

        let (mut pipeline, events) =
            AudioPipeline::open(self.inner.engines.recognizers.as_ref(), id, settings.clone())
                .await?;

        let mut state = self.inner.state.lock().await;
        if !state.is_connected(id) {
            drop(state);
            info!(connection = %id, pipeline = %pipeline.id(), "Connection closed while the recognizer was starting");
            pipeline.shutdown().await;
            return Ok(());
        }

        let origin = EventOrigin {
            pipeline: pipeline.id(),
            scope: Scope::Solo,
            settings,
        };
        pipeline.attach_forwarder(router::spawn_forwarder(
            self.clone(),
            id.clone(),
            origin,
            events,
        ));

        let mut retired = Vec::new();
        if let Some(displaced) = state.sessions.install(id.clone(), pipeline) {
            retire(&mut retired, displaced);
        }
        state.send(id, ServerMessage::status(status));
        drop(state);

        release(retired).await;
        Ok(())
    }

    /// Feed audio to whichever pipeline the connection owns
    ///
    /// The write happens outside the state lock. Audio for a pipeline that is
    /// no longer recognizing is dropped. On failure the pipeline is
    /// hard-stopped, unless it was stopped or replaced while the write was in
    /// flight.
    pub async fn write_audio(&self, id: &ConnectionId, audio: &[u8]) -> Result<(), RelayError> {
        let target = {
            let state = self.inner.state.lock().await;
            if !state.is_connected(id) {
                return Ok(());
            }
            let in_room = state.rooms.participant(id).is_some();
            Self::audio_pipeline(&state, id).map(|p| (in_room, p.id(), p.state(), p.sink()))
        };

        let Some((in_room, pipeline_id, pipeline_state, sink)) = target else {
            warn!(connection = %id, "Audio data received for a connection without an active stream");
            return Ok(());
        };
        if pipeline_state != PipelineState::Recognizing {
            debug!(connection = %id, pipeline = %pipeline_id, state = ?pipeline_state, "Dropping audio for a pipeline that is not recognizing");
            return Ok(());
        }

        let Err(e) = sink.write(audio).await else {
            return Ok(());
        };

        let failed = {
            let mut state = self.inner.state.lock().await;
            let still_recognizing = Self::audio_pipeline(&state, id).is_some_and(|p| {
                p.id() == pipeline_id && p.state() == PipelineState::Recognizing
            });
            if !still_recognizing {
                // Stopped or replaced mid-write; the failure belongs to a closed stream
                debug!(connection = %id, pipeline = %pipeline_id, "Write failed on a stream that is no longer live: {:#}", e);
                return Ok(());
            }

            let failed = if in_room {
                state
                    .rooms
                    .participant_mut(id)
                    .and_then(|p| p.take_pipeline_if(pipeline_id))
            } else {
                state.sessions.remove_if_current(id, pipeline_id)
            };
            failed.map(|mut pipeline| {
                pipeline.detach();
                pipeline
            })
        };

        error!(connection = %id, pipeline = %pipeline_id, "Error writing to speech stream: {:#}", e);
        if let Some(pipeline) = failed {
            pipeline.shutdown().await;
        }
        Err(RelayError::StreamWrite(format!("{:#}", e)))
    }

    /// The pipeline audio from `id` is routed to
    fn audio_pipeline<'a>(state: &'a RelayState, id: &ConnectionId) -> Option<&'a AudioPipeline> {
        match state.rooms.participant(id) {
            Some(participant) => participant.pipeline.as_ref(),
            None => state.sessions.get(id),
        }
    }

    /// Graceful stop; the registry entry goes away with `SessionStopped`
    pub(super) fn stop_solo(state: &mut RelayState, id: &ConnectionId) -> Option<StopHandle> {
        let pipeline = state.sessions.get_mut(id)?;
        info!(connection = %id, pipeline = %pipeline.id(), "Gracefully stopping solo recognizer");
        pipeline.begin_stop()
    }

    /// Hard stop on disconnect: detach events and drop the entry
    pub(super) fn disconnect_solo(
        state: &mut RelayState,
        id: &ConnectionId,
        retired: &mut Vec<AudioPipeline>,
    ) {
        if let Some(pipeline) = state.sessions.remove(id) {
            info!(connection = %id, pipeline = %pipeline.id(), "Hard-cleaned disconnected solo client");
            retire(retired, pipeline);
        }
    }

    /// Translate and optionally synthesize a solo final transcript
    ///
    /// Uses the settings of the pipeline that produced the transcript, not
    /// whatever settings the connection holds by the time it arrives.
    pub(super) async fn deliver_solo_final(
        &self,
        id: &ConnectionId,
        origin: &EventOrigin,
        text: &str,
    ) {
        let outbox = {
            let state = self.inner.state.lock().await;
            state.outbox(id)
        };
        let Some(outbox) = outbox else {
            warn!(connection = %id, "Received recognition result for an already cleaned-up client");
            return;
        };

        let settings = &origin.settings;
        let target = settings
            .target_language
            .as_deref()
            .unwrap_or(&settings.language);

        let refined = match self.inner.engines.translator.translate(text, target).await {
            Ok(refined) => {
                info!(connection = %id, "Translated text: '{}'", refined);
                refined
            }
            Err(e) => {
                let err = RelayError::Translation(format!("{:#}", e));
                warn!(connection = %id, "{}", err);
                format!("Translation error: {}", text)
            }
        };

        let _ = outbox.send(ServerMessage::FinalResult {
            original: text.to_string(),
            refined: refined.clone(),
        });

        if !settings.tts_enabled {
            return;
        }

        match self
            .inner
            .engines
            .synthesizer
            .synthesize(&refined, target)
            .await
        {
            Ok(Some(audio)) => {
                let _ = outbox.send(ServerMessage::SynthesisResult {
                    audio: encode_audio(&audio),
                });
            }
            Ok(None) => debug!(connection = %id, "No voice available for {}", target),
            Err(e) => {
                let err = RelayError::Synthesis(format!("{:#}", e));
                warn!(connection = %id, "{}", err);
            }
        }
    }

    /// Synthesize a report in the solo session's source language
    pub(super) async fn report_audio(&self, id: &ConnectionId, text: &str) {
        if text.trim().is_empty() {
            return;
        }

        let (language, outbox) = {
            let state = self.inner.state.lock().await;
            let Some(pipeline) = state.sessions.get(id) else {
                warn!(connection = %id, "No solo session to synthesize report for");
                return;
            };
            (pipeline.settings().language.clone(), state.outbox(id))
        };
        let Some(outbox) = outbox else { return };

        info!(connection = %id, language = %language, "Synthesizing report");

        match self
            .inner
            .engines
            .synthesizer
            .synthesize(text, &language)
            .await
        {
            Ok(Some(audio)) => {
                let _ = outbox.send(ServerMessage::ReportAudio {
                    audio: encode_audio(&audio),
                });
            }
            Ok(None) => warn!(connection = %id, "No voice configured for {}", language),
            Err(e) => {
                let err = RelayError::Synthesis(format!("{:#}", e));
                warn!(connection = %id, "{}", err);
            }
        }
    }
}
