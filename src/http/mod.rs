//! HTTP surface for browser clients
//!
//! - GET /health - Health check
//! - POST /summarize_transcript - `{text, language}` → `{summary}`
//! - GET /ws - WebSocket carrying JSON `{"event", "data"}` frames; binary
//!   frames are raw PCM audio

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
