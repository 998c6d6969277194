//! JSON framing for inbound webhook bodies and loopback replies
//!
//! A frame is a JSON object whose `@type` field carries the fully qualified
//! message type. The object itself, `@type` included, becomes the payload.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    domain::{
        envelope::{EVERNYM_QUALIFIER, Envelope, MessageType},
        error::FlowError
    },
    port::codec::FrameCodec
};

pub const TYPE_FIELD: &str = "@type";
pub const ID_FIELD: &str = "@id";

#[derive(Debug, Clone)]
pub struct JsonFrameCodec {
    /// Qualifier written into `@type` for envelopes that carry none
    qualifier: String
}

impl JsonFrameCodec {
    pub fn new() -> Self {
        Self::with_qualifier(EVERNYM_QUALIFIER)
    }

    pub fn with_qualifier(qualifier: impl Into<String>) -> Self {
        Self { qualifier: qualifier.into() }
    }

    /// Message type of a decoded payload, if it carries one
    pub fn message_type(payload: &Value) -> Result<MessageType, FlowError> {
        payload
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::Decode(format!("message has no '{}' field", TYPE_FIELD)))?
            .parse()
    }
}

impl Default for JsonFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec for JsonFrameCodec {
    fn decode(&self, frame: &[u8]) -> Result<Envelope, FlowError> {
        let payload: Value =
            serde_json::from_slice(frame).map_err(|e| FlowError::Decode(format!("invalid JSON frame: {}", e)))?;

        if !payload.is_object() {
            return Err(FlowError::Decode("frame is not a JSON object".to_string()));
        }

        let msg_type = Self::message_type(&payload)?;
        Ok(Envelope::new(msg_type.family, msg_type.version, msg_type.name, payload).with_qualifier(msg_type.qualifier))
    }

    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, FlowError> {
        let mut message = match envelope.payload() {
            Value::Object(fields) => fields.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(FlowError::Serialization(format!(
                    "payload of '{}' must be a JSON object, got {}",
                    envelope.name(),
                    other
                )));
            }
        };

        let qualifier = envelope.qualifier().unwrap_or(&self.qualifier);
        let msg_type = MessageType::new(qualifier, envelope.family(), envelope.version(), envelope.name());
        message.insert(TYPE_FIELD.to_string(), Value::String(msg_type.to_string()));
        message.entry(ID_FIELD.to_string()).or_insert_with(|| Value::String(Uuid::new_v4().to_string()));

        Ok(serde_json::to_vec(&Value::Object(message))?)
    }
}
