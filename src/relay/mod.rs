//! Session and room lifecycle orchestrator
//!
//! The [`Relay`] owns every piece of pipeline state, guarded by one async
//! mutex:
//! - connections: identity → outbound queue
//! - solo sessions: identity → pipeline ([`SessionRegistry`])
//! - rooms: room → ordered participants ([`RoomRegistry`])
//!
//! Client messages enter through [`Relay::handle`]. Recognizer events enter
//! through one forwarder task per pipeline ([`Relay::route_event`]), so a slow
//! translation for one connection never holds up another. Disconnect removes
//! the connection first, which turns every later operation for it into a no-op.
//!
//! Engine I/O (creating, starting and stopping recognizers) never runs under
//! the state lock. Operations that replace a connection's pipeline are instead
//! serialized per connection by a lifecycle lock, always taken before the
//! state lock. Pipelines taken out of the registries are detached while the
//! state lock is held and released once it is dropped.

mod batch;
pub mod fanout;
mod room;
mod router;
mod solo;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

pub use router::{EventOrigin, Scope};

use crate::config::Config;
use crate::engine::Engines;
use crate::error::RelayError;
use crate::pipeline::{AudioPipeline, PipelineId};
use crate::protocol::{ClientMessage, ConnectionId, ServerMessage};
use crate::room::RoomRegistry;
use crate::session::SessionRegistry;

/// Outbound queue for one connection
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Behavioral knobs for the relay
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Deliver a speaker's own final transcript back to them
    pub echo_to_speaker: bool,
    /// Display names used when prompting the text model
    pub language_names: HashMap<String, String>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            echo_to_speaker: true,
            language_names: crate::config::LanguageConfig::default().names,
        }
    }
}

impl RelayOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            echo_to_speaker: config.room.echo_to_speaker,
            language_names: config.languages.names.clone(),
        }
    }
}

struct Connection {
    outbox: Outbox,
    lifecycle: Arc<Mutex<()>>,
}

#[derive(Default)]
struct RelayState {
    connections: HashMap<ConnectionId, Connection>,
    sessions: SessionRegistry,
    rooms: RoomRegistry,
}

impl RelayState {
    fn is_connected(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    fn outbox(&self, id: &ConnectionId) -> Option<Outbox> {
        self.connections.get(id).map(|c| c.outbox.clone())
    }

    fn send(&self, id: &ConnectionId, message: ServerMessage) {
        if let Some(connection) = self.connections.get(id) {
            if connection.outbox.send(message).is_err() {
                debug!(connection = %id, "Outbound queue closed");
            }
        }
    }

    /// Send the current membership list to every member of `room_id`
    fn broadcast_room_update(&self, room_id: &str) {
        let users = self.rooms.users(room_id);
        for member in self.rooms.members(room_id) {
            self.send(
                &member.connection,
                ServerMessage::RoomUpdate {
                    users: users.clone(),
                },
            );
        }
    }
}

struct RelayInner {
    engines: Engines,
    options: RelayOptions,
    state: Mutex<RelayState>,
}

/// Cheaply cloneable handle to the orchestrator
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Relay {
    pub fn new(engines: Engines, options: RelayOptions) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                engines,
                options,
                state: Mutex::new(RelayState::default()),
            }),
        }
    }

    /// Register a new connection and return its outbound queue
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = ConnectionId::new();
        let (outbox, rx) = mpsc::unbounded_channel();

        self.inner
            .state
            .lock()
            .await
            .connections
            .insert(
                id.clone(),
                Connection {
                    outbox,
                    lifecycle: Arc::default(),
                },
            );

        info!(connection = %id, "Client connected");
        (id, rx)
    }

    /// Dispatch one inbound message; failures are reported to the sender only
    pub async fn handle(&self, id: &ConnectionId, message: ClientMessage) {
        let event = message.event();
        if !matches!(message, ClientMessage::AudioData(_)) {
            debug!(connection = %id, event, "Message received");
        }

        let result = match message {
            ClientMessage::JoinRoom(req) => self.join_room(id, &req).await,
            ClientMessage::StartTranslation(settings) => self.start_solo(id, &settings).await,
            ClientMessage::SettingsChanged(settings) => self.update_solo(id, &settings).await,
            ClientMessage::StartChatTranslation(req) => {
                self.start_participant_recognition(id, &req).await
            }
            ClientMessage::UpdateUserSettings(settings) => {
                self.update_settings(id, &settings).await;
                Ok(())
            }
            ClientMessage::AudioData(audio) => self.write_audio(id, &audio).await,
            ClientMessage::StopTranslation => {
                self.stop_translation(id).await;
                Ok(())
            }
            ClientMessage::LeaveRoom => {
                self.leave(id).await;
                Ok(())
            }
            ClientMessage::RequestReportAudio { text } => {
                self.report_audio(id, text.as_deref().unwrap_or_default()).await;
                Ok(())
            }
            ClientMessage::ProcessBatch(req) => self.process_batch(id, &req).await,
            ClientMessage::GetAiSuggestion(req) => self.ai_suggestion(id, &req).await,
            ClientMessage::Ping => {
                self.send(id, ServerMessage::Pong).await;
                Ok(())
            }
        };

        if let Err(err) = result {
            warn!(connection = %id, event, "{}", err);
            self.send(id, ServerMessage::error(&err)).await;
        }
    }

    /// Report a malformed inbound frame to its sender
    pub async fn reject(&self, id: &ConnectionId, err: RelayError) {
        warn!(connection = %id, "{}", err);
        self.send(id, ServerMessage::error(&err)).await;
    }

    /// Transport disconnect: drop the connection, then hard-stop everything it owns
    ///
    /// Does not wait for the connection's lifecycle lock; an open still in
    /// flight finds the connection gone and releases its own recognizer.
    pub async fn disconnect(&self, id: &ConnectionId) {
        let mut retired = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            if state.connections.remove(id).is_none() {
                return;
            }
            info!(connection = %id, "Client disconnected");

            Self::disconnect_solo(&mut state, id, &mut retired);
            if Self::depart(&mut state, id, &mut retired) {
                info!(connection = %id, "Cleaned up disconnected chat client");
            }
        }
        release(retired).await;
    }

    /// `stop_translation`: stop whichever pipeline the connection is running
    async fn stop_translation(&self, id: &ConnectionId) {
        let Some(_lifecycle) = self.lifecycle(id).await else {
            return;
        };

        let stopping = {
            let mut state = self.inner.state.lock().await;
            if !state.is_connected(id) {
                return;
            }
            info!(connection = %id, "Client requested to stop translation");

            let stopping = if state.rooms.room_of(id).is_some() {
                Self::stop_participant(&mut state, id)
            } else {
                Self::stop_solo(&mut state, id)
            };
            if stopping.is_some() {
                state.send(id, ServerMessage::status("Translation stopped."));
            }
            stopping
        };

        if let Some(handle) = stopping {
            handle.finish().await;
        }
    }

    /// Wait for exclusive use of the connection's pipeline lifecycle
    ///
    /// `None` once the connection is gone.
    async fn lifecycle(&self, id: &ConnectionId) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let state = self.inner.state.lock().await;
            Arc::clone(&state.connections.get(id)?.lifecycle)
        };
        Some(lock.lock_owned().await)
    }

    async fn send(&self, id: &ConnectionId, message: ServerMessage) {
        self.inner.state.lock().await.send(id, message);
    }

    pub async fn is_connected(&self, id: &ConnectionId) -> bool {
        self.inner.state.lock().await.is_connected(id)
    }

    /// Pipeline currently installed for a solo session
    pub async fn solo_pipeline(&self, id: &ConnectionId) -> Option<PipelineId> {
        let state = self.inner.state.lock().await;
        state.sessions.get(id).map(|p| p.id())
    }

    /// Pipeline currently installed for a room participant
    pub async fn participant_pipeline(&self, id: &ConnectionId) -> Option<PipelineId> {
        let state = self.inner.state.lock().await;
        state
            .rooms
            .participant(id)
            .and_then(|p| p.pipeline.as_ref())
            .map(|p| p.id())
    }

    pub async fn room_of(&self, id: &ConnectionId) -> Option<String> {
        let state = self.inner.state.lock().await;
        state.rooms.room_of(id).map(str::to_string)
    }

    /// Display identities in `room_id`, in join order
    pub async fn room_members(&self, room_id: &str) -> Vec<String> {
        let state = self.inner.state.lock().await;
        state
            .rooms
            .members(room_id)
            .iter()
            .map(|p| p.user_id.clone())
            .collect()
    }

    pub async fn room_exists(&self, room_id: &str) -> bool {
        self.inner.state.lock().await.rooms.contains_room(room_id)
    }
}

/// Detach a pipeline taken out of a registry; the engine is released by [`release`]
fn retire(retired: &mut Vec<AudioPipeline>, mut pipeline: AudioPipeline) {
    pipeline.detach();
    retired.push(pipeline);
}

/// Hard-stop retired pipelines; call only after the state lock is dropped
async fn release(retired: Vec<AudioPipeline>) {
    for pipeline in retired {
        let pipeline_id = pipeline.id();
        pipeline.shutdown().await;
        debug!(pipeline = %pipeline_id, "Released recognizer");
    }
}

/// A required text field: present and not blank
fn required(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
