//! Seams between the routing core and the outside world

pub mod codec;
pub mod handler;
pub mod transport;
