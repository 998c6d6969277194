use crate::domain::{envelope::Envelope, error::FlowError};

/// Turns raw inbound frames into envelopes and back
pub trait FrameCodec: Send + Sync {
    /// Decode one raw frame received on the webhook
    fn decode(&self, frame: &[u8]) -> Result<Envelope, FlowError>;

    /// Encode an envelope into a raw frame
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, FlowError>;
}
