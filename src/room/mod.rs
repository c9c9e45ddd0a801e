//! Chat rooms
//!
//! A room is an ordered set of participants whose final transcripts are
//! translated and fanned out to each other. A connection belongs to at most
//! one room, and a room with no participants does not exist.

mod registry;

pub use registry::{Departure, Participant, RoomRegistry};
