//! Typed messages for actor communication

use ractor::{Message, RpcReplyPort};

use crate::{adapter::dispatcher::DispatchReport, domain::error::FlowError};

/// Messages for the InboundRouter actor
#[derive(Debug)]
pub enum InboundMessage {
    /// Decode and dispatch a frame, reporting the outcome to the caller
    Deliver { frame: Vec<u8>, reply: RpcReplyPort<Result<DispatchReport, FlowError>> },
    /// Decode and dispatch a frame without waiting for the outcome
    Push { frame: Vec<u8> },
    /// Delivery counters
    GetStats { reply: RpcReplyPort<InboundStats> }
}

/// Delivery statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboundStats {
    pub delivered: u64,
    pub unhandled: u64,
    pub failed:    u64
}

// Implement Message trait for Ractor
impl Message for InboundMessage {}
