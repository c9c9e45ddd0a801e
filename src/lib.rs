pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod protocol;
pub mod relay;
pub mod room;
pub mod session;

pub use config::Config;
pub use engine::{Engines, RecognitionEvent};
pub use error::{CancellationCategory, RelayError};
pub use http::{create_router, AppState};
pub use protocol::{ClientMessage, ConnectionId, ServerMessage};
pub use relay::{Relay, RelayOptions};
