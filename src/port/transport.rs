use async_trait::async_trait;

use crate::domain::{context::AgentContext, envelope::Envelope, error::FlowError};

/// Outbound side of the transport boundary
///
/// Implementations own serialization, encryption and network delivery.
/// Replies never come back through `send`; they arrive later as inbound frames.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one envelope to the remote agent described by `context`
    async fn send(&self, envelope: &Envelope, context: &AgentContext) -> Result<(), FlowError>;

    /// Get the transport name for identification
    fn transport_name(&self) -> &'static str;
}
