//! Durable conversation and message storage
//!
//! The source of truth for chat history, independent of who is online.
//! Conversations are append-only threads between a fixed participant set;
//! messages are immutable except for their read-set. The chat engine calls
//! into this module before any fan-out, so a message is never broadcast
//! before it is durably stored.

pub mod conversations;
pub mod messages;

pub use conversations::{Conversation, NewConversation};
pub use messages::{Cursor, Message, MessagePage};
