use std::collections::HashMap;

use crate::pipeline::{AudioPipeline, PipelineId};
use crate::protocol::{ConnectionId, RoomUser};

/// One member of a room
pub struct Participant {
    pub connection: ConnectionId,
    /// Display identity shown to other members
    pub user_id: String,
    pub language: String,
    pub tts_enabled: bool,
    pub pipeline: Option<AudioPipeline>,
}

impl Participant {
    pub fn new(connection: ConnectionId, user_id: String, language: String, tts_enabled: bool) -> Self {
        Self {
            connection,
            user_id,
            language,
            tts_enabled,
            pipeline: None,
        }
    }

    /// Take the pipeline out if it is `pipeline`
    pub fn take_pipeline_if(&mut self, pipeline: PipelineId) -> Option<AudioPipeline> {
        match &self.pipeline {
            Some(current) if current.id() == pipeline => self.pipeline.take(),
            _ => None,
        }
    }
}

/// Result of removing a connection from its room
pub struct Departure {
    pub room_id: String,
    pub participant: Participant,
    /// Members left behind, in join order; empty when the room was deleted
    pub remaining: Vec<ConnectionId>,
}

impl Departure {
    pub fn room_deleted(&self) -> bool {
        self.remaining.is_empty()
    }
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Vec<Participant>>,
    membership: HashMap<ConnectionId, String>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `participant` into `room_id`, creating the room if needed
    ///
    /// The connection must not be a member of another room. Re-joining the
    /// same room replaces the record in place, keeping its position, and
    /// hands back the old record.
    pub fn insert(&mut self, room_id: &str, participant: Participant) -> Option<Participant> {
        debug_assert!(self
            .membership
            .get(&participant.connection)
            .map_or(true, |current| current == room_id));

        self.membership
            .insert(participant.connection.clone(), room_id.to_string());

        let members = self.rooms.entry(room_id.to_string()).or_default();
        match members
            .iter_mut()
            .find(|p| p.connection == participant.connection)
        {
            Some(slot) => Some(std::mem::replace(slot, participant)),
            None => {
                members.push(participant);
                None
            }
        }
    }

    /// Remove `id` from whatever room it is in, deleting the room if it empties
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Departure> {
        let room_id = self.membership.remove(id)?;
        let members = self.rooms.get_mut(&room_id)?;

        let index = members.iter().position(|p| &p.connection == id)?;
        let participant = members.remove(index);
        let remaining: Vec<ConnectionId> = members.iter().map(|p| p.connection.clone()).collect();

        if remaining.is_empty() {
            self.rooms.remove(&room_id);
        }

        Some(Departure {
            room_id,
            participant,
            remaining,
        })
    }

    pub fn room_of(&self, id: &ConnectionId) -> Option<&str> {
        self.membership.get(id).map(String::as_str)
    }

    pub fn participant(&self, id: &ConnectionId) -> Option<&Participant> {
        let room_id = self.membership.get(id)?;
        self.rooms
            .get(room_id)?
            .iter()
            .find(|p| &p.connection == id)
    }

    pub fn participant_mut(&mut self, id: &ConnectionId) -> Option<&mut Participant> {
        let room_id = self.membership.get(id)?;
        self.rooms
            .get_mut(room_id)?
            .iter_mut()
            .find(|p| &p.connection == id)
    }

    /// Participants of `room_id` in join order
    pub fn members(&self, room_id: &str) -> &[Participant] {
        self.rooms.get(room_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Membership payload broadcast to the room
    pub fn users(&self, room_id: &str) -> Vec<RoomUser> {
        self.members(room_id)
            .iter()
            .map(|p| RoomUser {
                user_id: p.user_id.clone(),
            })
            .collect()
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(conn: &ConnectionId, user: &str, lang: &str) -> Participant {
        Participant::new(conn.clone(), user.to_string(), lang.to_string(), false)
    }

    #[test]
    fn test_members_keep_join_order() {
        let mut rooms = RoomRegistry::new();
        let (a, b, c) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());

        rooms.insert("R1", participant(&a, "alice", "en-US"));
        rooms.insert("R1", participant(&b, "bob", "zh-TW"));
        rooms.insert("R1", participant(&c, "carol", "ja-JP"));

        let users: Vec<String> = rooms.users("R1").into_iter().map(|u| u.user_id).collect();
        assert_eq!(users, vec!["alice", "bob", "carol"]);
        assert_eq!(rooms.room_of(&b), Some("R1"));
    }

    #[test]
    fn test_rejoin_same_room_replaces_in_place() {
        let mut rooms = RoomRegistry::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());

        rooms.insert("R1", participant(&a, "alice", "en-US"));
        rooms.insert("R1", participant(&b, "bob", "zh-TW"));
        let old = rooms.insert("R1", participant(&a, "alice2", "fr-FR")).unwrap();

        assert_eq!(old.user_id, "alice");
        let users: Vec<String> = rooms.users("R1").into_iter().map(|u| u.user_id).collect();
        assert_eq!(users, vec!["alice2", "bob"]);
    }

    #[test]
    fn test_last_departure_deletes_room() {
        let mut rooms = RoomRegistry::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());

        rooms.insert("R1", participant(&a, "alice", "en-US"));
        rooms.insert("R1", participant(&b, "bob", "zh-TW"));

        let departure = rooms.remove(&a).unwrap();
        assert_eq!(departure.remaining, vec![b.clone()]);
        assert!(!departure.room_deleted());
        assert!(rooms.contains_room("R1"));

        let departure = rooms.remove(&b).unwrap();
        assert!(departure.room_deleted());
        assert!(!rooms.contains_room("R1"));
        assert!(rooms.members("R1").is_empty());
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn test_remove_unknown_connection() {
        let mut rooms = RoomRegistry::new();
        assert!(rooms.remove(&ConnectionId::new()).is_none());
    }
}
