//! Real-time conversation engine
//!
//! Provides WebSocket infrastructure for the handover chat between matched
//! parties, including:
//! - User presence tracking (online/last-seen)
//! - Conversation rooms with ordered fan-out
//! - Typing indicators
//! - Real-time message delivery and read receipts
//!
//! # Architecture
//!
//! - **Connection**: Represents an authenticated WebSocket connection
//! - **RoomRegistry**: Conversation-based pub/sub for broadcasting events
//! - **PresenceTracker**: Per-identity online/offline state
//! - **ChatState**: Global state shared across all connections
//! - **Handler**: Axum WebSocket route handler and per-connection event loop
//! - **Events**: Type-safe event definitions for client/server communication

pub mod connection;
pub mod events;
pub mod handler;
pub mod presence;
pub mod room;
pub mod state;

pub use handler::ws_handler;
pub use state::ChatState;
