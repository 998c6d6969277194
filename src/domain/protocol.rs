//! Protocol families used by the issuer workflow
//!
//! Each family is identified by its routing key plus the message names the
//! workflow sends and expects back. Payload shapes are left to the caller.

use serde_json::Value;

use crate::domain::envelope::{COMMUNITY_QUALIFIER, EVERNYM_QUALIFIER, Envelope, HandlerKey, MessageType};

/// Name every family uses to signal a failed request
pub const PROBLEM_REPORT: &str = "problem-report";

/// Static descriptor of a protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolFamily {
    pub qualifier: &'static str,
    pub family:    &'static str,
    pub version:   &'static str
}

impl ProtocolFamily {
    pub const fn new(qualifier: &'static str, family: &'static str, version: &'static str) -> Self {
        Self { qualifier, family, version }
    }

    pub fn key(&self) -> HandlerKey {
        HandlerKey::new(self.family, self.version)
    }

    pub fn message_type(&self, name: &str) -> MessageType {
        MessageType::new(self.qualifier, self.family, self.version, name)
    }

    /// Message of this family, typed under the family's own qualifier
    pub fn envelope(&self, name: &str, payload: Value) -> Envelope {
        Envelope::new(self.family, self.version, name, payload).with_qualifier(self.qualifier)
    }
}

pub mod issuer_setup {
    use super::*;

    pub const FAMILY: ProtocolFamily = ProtocolFamily::new(EVERNYM_QUALIFIER, "issuer-setup", "0.6");
    pub const CREATE: &str = "create";
    pub const CURRENT_PUBLIC_IDENTIFIER: &str = "current-public-identifier";
    pub const PUBLIC_IDENTIFIER_CREATED: &str = "public-identifier-created";
    pub const PUBLIC_IDENTIFIER: &str = "public-identifier";
}

pub mod update_configs {
    use super::*;

    pub const FAMILY: ProtocolFamily = ProtocolFamily::new(EVERNYM_QUALIFIER, "update-configs", "0.6");
    pub const UPDATE: &str = "update";
    pub const STATUS_REPORT: &str = "status-report";
}

pub mod update_endpoint {
    use super::*;

    pub const FAMILY: ProtocolFamily = ProtocolFamily::new(EVERNYM_QUALIFIER, "configs", "0.6");
    pub const UPDATE_COM_METHOD: &str = "UPDATE_COM_METHOD";
}

pub mod connecting {
    use super::*;

    pub const FAMILY: ProtocolFamily = ProtocolFamily::new(EVERNYM_QUALIFIER, "connecting", "0.6");
    pub const CREATE_CONNECTION: &str = "CREATE_CONNECTION";
    pub const INVITE_DETAIL: &str = "CONN_REQUEST_RESP";
    pub const CONN_REQ_ACCEPTED: &str = "CONN_REQ_ACCEPTED";
}

pub mod write_schema {
    use super::*;

    pub const FAMILY: ProtocolFamily = ProtocolFamily::new(EVERNYM_QUALIFIER, "write-schema", "0.6");
    pub const WRITE: &str = "write";
    pub const STATUS_REPORT: &str = "status-report";
}

pub mod write_cred_def {
    use super::*;

    pub const FAMILY: ProtocolFamily = ProtocolFamily::new(EVERNYM_QUALIFIER, "write-cred-def", "0.6");
    pub const WRITE: &str = "write";
    pub const STATUS_REPORT: &str = "status-report";
}

pub mod issue_credential {
    use super::*;

    pub const FAMILY: ProtocolFamily = ProtocolFamily::new(COMMUNITY_QUALIFIER, "issue-credential", "1.0");
    pub const OFFER: &str = "offer";
    pub const ISSUE: &str = "issue";
    pub const ASK_ACCEPT: &str = "ask-accept";
    pub const SENT: &str = "sent";
}

pub mod present_proof {
    use super::*;

    pub const FAMILY: ProtocolFamily = ProtocolFamily::new(COMMUNITY_QUALIFIER, "present-proof", "1.0");
    pub const REQUEST: &str = "request";
    pub const PRESENTATION_RESULT: &str = "presentation-result";
}
