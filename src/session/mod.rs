//! Solo session management
//!
//! A solo session is a connection translating on its own, outside any room.
//! The registry maps each connection to at most one live pipeline.

mod registry;

pub use registry::SessionRegistry;
