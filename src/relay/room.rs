use tracing::{info, warn};

use super::fanout::{self, Recipient, Speaker};
use super::router::{self, EventOrigin, Scope};
use super::{release, required, retire, Relay, RelayState};
use crate::error::RelayError;
use crate::pipeline::{AudioPipeline, PipelineSettings, StopHandle};
use crate::protocol::{ConnectionId, JoinRoomRequest, ServerMessage, StartChatRequest, UserSettings};
use crate::room::Participant;

impl Relay {
    /// Join (or re-join) a room; recognition starts separately
    pub async fn join_room(&self, id: &ConnectionId, req: &JoinRoomRequest) -> Result<(), RelayError> {
        let (Some(room_id), Some(user_id), Some(language)) = (
            required(&req.room_id),
            required(&req.user_id),
            required(&req.language),
        ) else {
            return Err(RelayError::Validation(
                "Room ID, User ID, and Language are required to join a room.".to_string(),
            ));
        };

        let Some(_lifecycle) = self.lifecycle(id).await else {
            return Ok(());
        };

        let mut retired = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            if !state.is_connected(id) {
                return Ok(());
            }

            if let Some(solo) = state.sessions.remove(id) {
                info!(connection = %id, pipeline = %solo.id(), "Ending solo session to join a room");
                retire(&mut retired, solo);
            }

            if state.rooms.room_of(id).is_some_and(|current| current != room_id) {
                Self::depart(&mut state, id, &mut retired);
            }

            let participant = Participant::new(
                id.clone(),
                user_id.to_string(),
                language.to_string(),
                req.tts_enabled,
            );
            if let Some(pipeline) = state
                .rooms
                .insert(room_id, participant)
                .and_then(|replaced| replaced.pipeline)
            {
                retire(&mut retired, pipeline);
            }

            info!(
                connection = %id,
                room = %room_id,
                user = %user_id,
                language = %language,
                "Client joined room"
            );

            state.broadcast_room_update(room_id);
            state.send(
                id,
                ServerMessage::status(format!("Joined room {}. Start speaking!", room_id)),
            );
        }

        release(retired).await;
        Ok(())
    }

    /// Remove `id` from its room and tell the remaining members
    ///
    /// The departing pipeline is detached and pushed onto `retired`. Returns
    /// whether the connection was in a room.
    pub(super) fn depart(
        state: &mut RelayState,
        id: &ConnectionId,
        retired: &mut Vec<AudioPipeline>,
    ) -> bool {
        let Some(mut departure) = state.rooms.remove(id) else {
            return false;
        };

        if let Some(pipeline) = departure.participant.pipeline.take() {
            retire(retired, pipeline);
        }

        info!(
            connection = %id,
            room = %departure.room_id,
            user = %departure.participant.user_id,
            "Client left room"
        );

        if departure.room_deleted() {
            info!(room = %departure.room_id, "Room is empty and has been deleted");
        } else {
            state.broadcast_room_update(&departure.room_id);
        }
        true
    }

    /// Change language / TTS for the next transcript; the pipeline is untouched
    pub async fn update_settings(&self, id: &ConnectionId, settings: &UserSettings) {
        let mut state = self.inner.state.lock().await;

        let Some(participant) = state.rooms.participant_mut(id) else {
            warn!(connection = %id, "Settings update from a connection that is not in any room");
            return;
        };

        if let Some(language) = required(&settings.language) {
            participant.language = language.to_string();
        }
        participant.tts_enabled = settings.tts_enabled;

        info!(
            connection = %id,
            user = %participant.user_id,
            language = %participant.language,
            tts = participant.tts_enabled,
            "Participant updated settings"
        );
    }

    /// Start (or restart) recognition for a room participant
    pub async fn start_participant_recognition(
        &self,
        id: &ConnectionId,
        req: &StartChatRequest,
    ) -> Result<(), RelayError> {
        let room_id = required(&req.room_id).ok_or(RelayError::NotInRoom)?;

        let Some(_lifecycle) = self.lifecycle(id).await else {
            return Ok(());
        };

        let (previous, settings) = {
            let mut state = self.inner.state.lock().await;
            if !state.is_connected(id) {
                return Ok(());
            }
            if state.rooms.room_of(id) != Some(room_id) {
                return Err(RelayError::NotInRoom);
            }

            let participant = state
                .rooms
                .participant_mut(id)
                .ok_or(RelayError::NotInRoom)?;

            let previous = participant.pipeline.take();

            if let Some(language) = required(&req.language) {
                participant.language = language.to_string();
            }
            participant.tts_enabled = req.tts_enabled;

            let settings = PipelineSettings {
                language: participant.language.clone(),
                target_language: None,
                tts_enabled: participant.tts_enabled,
            };

            info!(
                connection = %id,
                room = %room_id,
                user = %participant.user_id,
                language = %settings.language,
                tts = settings.tts_enabled,
                "Starting chat translation"
            );
            (previous, settings)
        };

        if let Some(mut old) = previous {
            warn!(
                connection = %id,
                pipeline = %old.id(),
                "Found existing recognizer for participant; stopping it first"
            );
            old.stop().await;
        }

        let (mut pipeline, events) =
            AudioPipeline::open(self.inner.engines.recognizers.as_ref(), id, settings.clone())
                .await?;

        let mut state = self.inner.state.lock().await;
        let member = state.is_connected(id) && state.rooms.room_of(id) == Some(room_id);
        let Some(participant) = state.rooms.participant_mut(id).filter(|_| member) else {
            drop(state);
            info!(connection = %id, room = %room_id, "Participant left while the recognizer was starting");
            pipeline.shutdown().await;
            return Ok(());
        };

        let origin = EventOrigin {
            pipeline: pipeline.id(),
            scope: Scope::Room(room_id.to_string()),
            settings,
        };
        pipeline.attach_forwarder(router::spawn_forwarder(
            self.clone(),
            id.clone(),
            origin,
            events,
        ));

        let mut retired = Vec::new();
        if let Some(displaced) = participant.pipeline.replace(pipeline) {
            retire(&mut retired, displaced);
        }
        state.send(id, ServerMessage::status("Translation started."));
        drop(state);

        release(retired).await;
        Ok(())
    }

    /// Graceful stop of a participant's pipeline; membership is kept
    pub(super) fn stop_participant(state: &mut RelayState, id: &ConnectionId) -> Option<StopHandle> {
        let pipeline = state.rooms.participant_mut(id)?.pipeline.as_mut()?;
        info!(connection = %id, pipeline = %pipeline.id(), "Gracefully stopping participant recognizer");
        pipeline.begin_stop()
    }

    /// Explicit `leave_room`
    pub async fn leave(&self, id: &ConnectionId) {
        let Some(_lifecycle) = self.lifecycle(id).await else {
            return;
        };

        let mut retired = Vec::new();
        let departed = {
            let mut state = self.inner.state.lock().await;
            Self::depart(&mut state, id, &mut retired)
        };

        if !departed {
            warn!(connection = %id, "Leave requested by a connection that is not in any room");
        }
        release(retired).await;
    }

    /// Fan a participant's final transcript out to the room
    ///
    /// Recipients are snapshotted under the lock; translation and synthesis
    /// run after it is released.
    pub(super) async fn deliver_room_final(
        &self,
        id: &ConnectionId,
        origin: &EventOrigin,
        room_id: &str,
        text: &str,
    ) {
        let (speaker, recipients) = {
            let state = self.inner.state.lock().await;

            if state.rooms.room_of(id) != Some(room_id) {
                warn!(connection = %id, room = %room_id, "Final transcript for a connection no longer in the room");
                return;
            }
            let Some(sender) = state.rooms.participant(id) else {
                return;
            };

            let speaker = Speaker {
                user_id: sender.user_id.clone(),
                language: origin.settings.language.clone(),
            };

            let recipients: Vec<Recipient> = state
                .rooms
                .members(room_id)
                .iter()
                .filter(|member| self.inner.options.echo_to_speaker || &member.connection != id)
                .filter_map(|member| {
                    Some(Recipient {
                        connection: member.connection.clone(),
                        user_id: member.user_id.clone(),
                        language: member.language.clone(),
                        tts_enabled: member.tts_enabled,
                        outbox: state.outbox(&member.connection)?,
                    })
                })
                .collect();

            (speaker, recipients)
        };

        info!(
            connection = %id,
            room = %room_id,
            recipients = recipients.len(),
            "Fanning out transcript"
        );

        fanout::fan_out(
            self.inner.engines.translator.as_ref(),
            self.inner.engines.synthesizer.as_ref(),
            &speaker,
            text,
            recipients,
        )
        .await;
    }
}
