//! Message envelopes and routing keys
//!
//! An [`Envelope`] is the normalized form of a protocol message once the
//! transport has decoded it. Routing only looks at the [`HandlerKey`]
//! (family + version); the message name and payload travel to whichever
//! handler entries are registered on that key.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::FlowError;

/// Qualifier used by Evernym-specific protocol families
pub const EVERNYM_QUALIFIER: &str = "did:sov:123456789abcdefghi1234;spec";

/// Qualifier used by community (Aries) protocol families
pub const COMMUNITY_QUALIFIER: &str = "https://didcomm.org";

/// Routing bucket identifier: exact, case-sensitive `(family, version)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerKey {
    pub family:  String,
    pub version: String
}

impl HandlerKey {
    pub fn new(family: impl Into<String>, version: impl Into<String>) -> Self {
        Self { family: family.into(), version: version.into() }
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.version)
    }
}

/// Name and payload handed to the waiter that a reply resolves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub name:    String,
    pub payload: Value
}

/// A decoded protocol message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    family:    String,
    version:   String,
    name:      String,
    payload:   Value,
    /// Message type qualifier; codecs fall back to their own when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qualifier: Option<String>
}

impl Envelope {
    pub fn new(family: impl Into<String>, version: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self { family: family.into(), version: version.into(), name: name.into(), payload, qualifier: None }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Build an envelope addressed to the bucket `key`
    pub fn for_key(key: &HandlerKey, name: impl Into<String>, payload: Value) -> Self {
        Self::new(key.family.clone(), key.version.clone(), name, payload)
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    pub fn key(&self) -> HandlerKey {
        HandlerKey::new(self.family.clone(), self.version.clone())
    }

    pub fn to_reply(&self) -> Reply {
        Reply { name: self.name.clone(), payload: self.payload.clone() }
    }
}

/// Fully qualified message type: `<qualifier>/<family>/<version>/<name>`
///
/// ```
/// use verity_flow::domain::envelope::MessageType;
///
/// let msg_type: MessageType = "did:sov:123456789abcdefghi1234;spec/connecting/0.6/CONN_REQUEST_RESP".parse().unwrap();
/// assert_eq!(msg_type.family, "connecting");
/// assert_eq!(msg_type.version, "0.6");
/// assert_eq!(msg_type.name, "CONN_REQUEST_RESP");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageType {
    pub qualifier: String,
    pub family:    String,
    pub version:   String,
    pub name:      String
}

impl MessageType {
    pub fn new(
        qualifier: impl Into<String>,
        family: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>
    ) -> Self {
        Self { qualifier: qualifier.into(), family: family.into(), version: version.into(), name: name.into() }
    }

    pub fn key(&self) -> HandlerKey {
        HandlerKey::new(self.family.clone(), self.version.clone())
    }
}

impl FromStr for MessageType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(4, '/');
        let name = parts.next().unwrap_or_default();
        let version = parts.next().unwrap_or_default();
        let family = parts.next().unwrap_or_default();
        let qualifier = parts.next().unwrap_or_default();

        if [qualifier, family, version, name].iter().any(|part| part.is_empty()) {
            return Err(FlowError::Decode(format!("malformed message type '{}'", s)));
        }

        Ok(Self::new(qualifier, family, version, name))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.qualifier, self.family, self.version, self.name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_keys_are_case_sensitive() {
        let lower = HandlerKey::new("connecting", "0.6");
        let upper = HandlerKey::new("Connecting", "0.6");
        assert_ne!(lower, upper);
        assert_eq!(lower, Envelope::new("connecting", "0.6", "STATUS", json!({})).key());
    }

    #[test]
    fn test_parse_evernym_message_type() {
        let msg_type: MessageType =
            "did:sov:123456789abcdefghi1234;spec/connecting/0.6/CONN_REQUEST_RESP".parse().unwrap();

        assert_eq!(msg_type.qualifier, EVERNYM_QUALIFIER);
        assert_eq!(msg_type.key(), HandlerKey::new("connecting", "0.6"));
        assert_eq!(msg_type.name, "CONN_REQUEST_RESP");
    }

    #[test]
    fn test_parse_community_message_type() {
        let msg_type: MessageType = "https://didcomm.org/present-proof/1.0/presentation-result".parse().unwrap();

        assert_eq!(msg_type.qualifier, COMMUNITY_QUALIFIER);
        assert_eq!(msg_type.family, "present-proof");
        assert_eq!(msg_type.version, "1.0");
        assert_eq!(msg_type.to_string(), "https://didcomm.org/present-proof/1.0/presentation-result");
    }

    #[test]
    fn test_reject_incomplete_message_type() {
        assert!("connecting/0.6/STATUS".parse::<MessageType>().is_err());
        assert!("did:sov:x;spec/connecting//STATUS".parse::<MessageType>().is_err());
        assert!("".parse::<MessageType>().is_err());
    }
}
