//! Implementations of the routing core and its transport adapters

pub mod codec;
pub mod dispatcher;
pub mod loopback;
pub mod registry;
pub mod step;
pub mod terminal;
