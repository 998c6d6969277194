//! Domain types shared by every layer

pub mod constant;
pub mod context;
pub mod envelope;
pub mod error;
pub mod protocol;
