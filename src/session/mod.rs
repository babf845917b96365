//! # Live Translation Sessions
//!
//! One session per WebSocket connection. A session negotiates the language
//! pair, owns at most one recognizer, and turns recognition results into
//! client events (translating finals on the way out).
//!
//! ## Key Components:
//! - **protocol**: Client and server event types and their JSON envelope
//! - **state**: The per-connection [`Session`] and its Idle/Streaming state machine
//! - **router**: Per-recognizer task forwarding results and translations
//! - **registry**: Connection id → session map, event dispatch and teardown

pub mod protocol;
pub mod registry;
pub mod router;
pub mod state;

pub use protocol::parse_client_event;
pub use registry::{RegistrySummary, SessionRegistry};
