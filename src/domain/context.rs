//! Destination context handed to the transport with every outbound envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection metadata for the remote agent
///
/// Persisted as JSON so a provisioned agent can be reused across runs.
/// Key material lives with the transport; this only carries identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    /// Unique session identifier
    pub session_id:          String,
    /// Base URL of the remote agent service
    pub verity_url:          String,
    /// Webhook the remote agent pushes replies to
    #[serde(default)]
    pub endpoint_url:        Option<String>,
    /// DID of the domain provisioned for this agent
    #[serde(default, rename = "domainDID")]
    pub domain_did:          Option<String>,
    /// Verkey of the remote agent
    #[serde(default)]
    pub verity_agent_verkey: Option<String>,
    /// Verkey identifier used by this side
    #[serde(default)]
    pub sdk_verkey_id:       Option<String>,
    /// Context creation timestamp
    pub created_at:          DateTime<Utc>
}

impl AgentContext {
    pub fn new(verity_url: impl Into<String>) -> Self {
        Self {
            session_id:          Uuid::new_v4().to_string(),
            verity_url:          verity_url.into(),
            endpoint_url:        None,
            domain_did:          None,
            verity_agent_verkey: None,
            sdk_verkey_id:       None,
            created_at:          Utc::now()
        }
    }

    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    pub fn with_domain_did(mut self, domain_did: impl Into<String>) -> Self {
        self.domain_did = Some(domain_did.into());
        self
    }
}
