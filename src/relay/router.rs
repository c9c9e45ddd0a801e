use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::Relay;
use crate::engine::{CancellationReason, FinalReason, RecognitionEvent};
use crate::error::{CancellationCategory, RelayError};
use crate::pipeline::{EventReceiver, PipelineId, PipelineSettings, Signal};
use crate::protocol::{ConnectionId, ServerMessage};

/// Where a pipeline's final transcripts are delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Solo,
    Room(String),
}

/// Identity of the pipeline that raised an event, captured when it was opened
#[derive(Debug, Clone)]
pub struct EventOrigin {
    pub pipeline: PipelineId,
    pub scope: Scope,
    pub settings: PipelineSettings,
}

/// Forward one pipeline's events to the relay, in arrival order
pub(crate) fn spawn_forwarder(
    relay: Relay,
    id: ConnectionId,
    origin: EventOrigin,
    mut events: EventReceiver,
) -> AbortHandle {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            relay.route_event(&id, &origin, event).await;
        }
        debug!(connection = %id, pipeline = %origin.pipeline, "Event stream closed");
    })
    .abort_handle()
}

impl Relay {
    /// Dispatch one recognition event raised by pipeline `origin.pipeline`
    ///
    /// Registry state is only ever mutated when `origin.pipeline` is still the
    /// pipeline installed for `id`.
    pub async fn route_event(&self, id: &ConnectionId, origin: &EventOrigin, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Interim(text) => self.route_interim(id, origin, text).await,
            RecognitionEvent::Final { text, reason } => {
                self.route_final(id, origin, text, reason).await
            }
            RecognitionEvent::Canceled(reason) => self.route_canceled(id, origin, reason).await,
            RecognitionEvent::SessionStopped => self.route_stopped(id, origin).await,
        }
    }

    async fn route_interim(&self, id: &ConnectionId, origin: &EventOrigin, text: String) {
        if text.is_empty() {
            return;
        }

        let state = self.inner.state.lock().await;
        let active = match &origin.scope {
            Scope::Solo => state.sessions.contains(id),
            Scope::Room(room_id) => state.rooms.room_of(id) == Some(room_id.as_str()),
        };
        if active && self.accepts_events(&state, id, origin) {
            state.send(id, ServerMessage::InterimResult { text });
        }
    }

    async fn route_final(
        &self,
        id: &ConnectionId,
        origin: &EventOrigin,
        text: String,
        reason: FinalReason,
    ) {
        match reason {
            FinalReason::Recognized if text.trim().is_empty() => {
                debug!(connection = %id, "Empty final transcript");
            }
            FinalReason::Recognized => {
                info!(connection = %id, pipeline = %origin.pipeline, "Recognized: '{}'", text);
                match &origin.scope {
                    Scope::Solo => self.deliver_solo_final(id, origin, &text).await,
                    Scope::Room(room_id) => self.deliver_room_final(id, origin, room_id, &text).await,
                }
            }
            FinalReason::NoMatch => {
                info!(connection = %id, "No speech could be recognized");
            }
            FinalReason::Canceled(reason) => self.route_canceled(id, origin, reason).await,
        }
    }

    /// Cancellation is reported, never acted on; `SessionStopped` follows
    async fn route_canceled(&self, id: &ConnectionId, origin: &EventOrigin, reason: CancellationReason) {
        let mut state = self.inner.state.lock().await;

        let current = match &origin.scope {
            Scope::Solo => state.sessions.current_mut(id, origin.pipeline),
            Scope::Room(_) => state
                .rooms
                .participant_mut(id)
                .and_then(|p| p.pipeline.as_mut())
                .filter(|p| p.id() == origin.pipeline),
        };
        if let Some(pipeline) = current {
            pipeline.apply(Signal::Cancel);
        }

        match reason {
            CancellationReason::EndOfStream => {
                info!(connection = %id, pipeline = %origin.pipeline, "Recognition reached end of stream");
            }
            CancellationReason::Error(detail) => {
                error!(connection = %id, pipeline = %origin.pipeline, "Recognition canceled: {}", detail);
                let err = RelayError::RecognitionCanceled(CancellationCategory::classify(&detail));
                state.send(id, ServerMessage::error(&err));
            }
        }
    }

    async fn route_stopped(&self, id: &ConnectionId, origin: &EventOrigin) {
        let mut state = self.inner.state.lock().await;

        let stopped = match &origin.scope {
            Scope::Solo => state.sessions.remove_if_current(id, origin.pipeline),
            Scope::Room(_) => state
                .rooms
                .participant_mut(id)
                .and_then(|p| p.take_pipeline_if(origin.pipeline)),
        };

        match stopped {
            Some(mut pipeline) => {
                pipeline.apply(Signal::Stopped);
                info!(connection = %id, pipeline = %origin.pipeline, "Recognition session stopped; pipeline removed");
            }
            None => {
                warn!(
                    connection = %id,
                    pipeline = %origin.pipeline,
                    "Session stopped for a recognizer that was already replaced or cleaned up"
                );
            }
        }
    }

    /// False only when the installed pipeline is `origin` and has left the event-accepting states
    fn accepts_events(&self, state: &super::RelayState, id: &ConnectionId, origin: &EventOrigin) -> bool {
        let current = match &origin.scope {
            Scope::Solo => state.sessions.get(id),
            Scope::Room(_) => state.rooms.participant(id).and_then(|p| p.pipeline.as_ref()),
        };
        match current {
            Some(pipeline) if pipeline.id() == origin.pipeline => pipeline.state().accepts_events(),
            _ => true,
        }
    }
}
