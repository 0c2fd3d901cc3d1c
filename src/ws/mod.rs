// =============================================================================
// WebSocket subsystem — hub, envelope, and connection handling
// =============================================================================

pub mod handler;
pub mod hub;
pub mod message;

pub use hub::Hub;
pub use message::{WsMessage, WsPayload};
