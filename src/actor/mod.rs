//! Actor-based inbound delivery
//!
//! Inbound frames are funnelled through a single Ractor actor per session,
//! which gives arrival-order dispatch without making the webhook wait on
//! workflow code.

pub mod inbound;
pub mod message;

pub use inbound::*;
pub use message::*;
