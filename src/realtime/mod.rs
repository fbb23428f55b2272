//! Realtime push to connected map and dashboard clients.

pub mod dispatch;
pub mod events;

pub use dispatch::{Connection, ConnectionId, Delivery, Dispatcher, Envelope};
pub use events::{ClientMessage, RealtimeEvent};
