//! Issuer workflow
//!
//! Walks an issuer through its first credential exchange: make sure the
//! agent has a public issuer identifier, connect to a holder, put a schema
//! and credential definition on the ledger, issue a credential and ask for
//! a proof of it.
//!
//! Every step registers its reply waiter before the request goes out, then
//! suspends until the remote agent answers on the step's key.

use std::{fmt, time::Duration};

use serde_json::{Value, json};
use tracing::{Level, event};
use uuid::Uuid;

use crate::{
    domain::{
        constant::workflow,
        error::FlowError,
        protocol::{
            PROBLEM_REPORT, connecting, issue_credential, issuer_setup, present_proof, update_configs,
            update_endpoint, write_cred_def, write_schema
        }
    },
    service::session::{AgentSession, check_reply}
};

/// Deadline for steps that wait on a subscription rather than a pending step
const SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    UpdateEndpoint,
    UpdateConfigs,
    IssuerIdentifier,
    SetupIssuer,
    AwaitInvite,
    AwaitConnection,
    WriteSchema,
    WriteCredDef,
    OfferCredential,
    IssueCredential,
    RequestProof
}

impl FlowStep {
    /// What the user is waiting for while the step runs
    pub fn description(&self) -> &'static str {
        match self {
            FlowStep::UpdateEndpoint => "Registering webhook endpoint",
            FlowStep::UpdateConfigs => "Updating institution configs",
            FlowStep::IssuerIdentifier => "Waiting for current issuer DID",
            FlowStep::SetupIssuer => "Waiting for issuer setup to complete",
            FlowStep::AwaitInvite => "Waiting to start connection",
            FlowStep::AwaitConnection => "Waiting for the holder to accept the connection",
            FlowStep::WriteSchema => "Waiting to write schema to ledger",
            FlowStep::WriteCredDef => "Waiting to write cred def to ledger",
            FlowStep::OfferCredential => "Waiting for the holder to accept the credential offer",
            FlowStep::IssueCredential => "Waiting for the credential to be sent",
            FlowStep::RequestProof => "Waiting for proof presentation"
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Receives progress of a running [`IssuerFlow`]
pub trait FlowObserver: Send + Sync {
    fn on_step_started(&self, _step: FlowStep) {}

    fn on_step_completed(&self, _step: FlowStep, _succeeded: bool) {}
}

/// Observer that ignores everything
pub struct SilentObserver;

impl FlowObserver for SilentObserver {}

/// Inputs of the issuer workflow
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub institution_name: String,
    pub logo_url:         String,
    pub schema_name:      String,
    pub schema_version:   String,
    pub schema_attrs:     Vec<String>,
    pub cred_def_name:    String,
    pub cred_def_tag:     String,
    pub credential_name:  String,
    pub credential_data:  Value,
    pub proof_name:       String
}

impl Default for IssuerSettings {
    fn default() -> Self {
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        Self {
            institution_name: "Faber College".to_string(),
            logo_url:         "http://robohash.org/235".to_string(),
            schema_name:      format!("Diploma {}", suffix),
            schema_version:   "0.1".to_string(),
            schema_attrs:     vec!["name".to_string(), "degree".to_string()],
            cred_def_name:    "Trinity College Diplomas".to_string(),
            cred_def_tag:     "latest".to_string(),
            credential_name:  "Degree".to_string(),
            credential_data:  json!({ "name": "Joe Smith", "degree": "Bachelors" }),
            proof_name:       format!("Proof of Degree {}", suffix)
        }
    }
}

/// Issuer public identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerIdentity {
    pub did:    String,
    pub verkey: String
}

/// Everything the workflow produced
#[derive(Debug, Clone)]
pub struct IssuanceOutcome {
    pub issuer:           IssuerIdentity,
    pub relationship_did: String,
    pub schema_id:        String,
    pub cred_def_id:      String,
    pub proof:            Value
}

pub struct IssuerFlow<'a> {
    session:  &'a AgentSession,
    settings: IssuerSettings,
    observer: &'a dyn FlowObserver
}

impl<'a> IssuerFlow<'a> {
    pub fn new(session: &'a AgentSession, settings: IssuerSettings, observer: &'a dyn FlowObserver) -> Self {
        Self { session, settings, observer }
    }

    /// Run every step in order, stopping at the first failure
    pub async fn run(&self) -> Result<IssuanceOutcome, FlowError> {
        let session_id = &self.session.context().session_id;
        event!(Level::INFO, event = workflow::FLOW_STARTED, session_id = %session_id);

        let result = self.run_steps().await;
        match &result {
            Ok(outcome) => event!(Level::INFO, event = workflow::FLOW_COMPLETED,
                                  session_id = %session_id, cred_def_id = %outcome.cred_def_id),
            Err(e) => event!(Level::ERROR, event = workflow::FLOW_FAILED,
                             session_id = %session_id, key = ?e.key(), error = %e)
        }
        result
    }

    async fn run_steps(&self) -> Result<IssuanceOutcome, FlowError> {
        self.observed(FlowStep::UpdateEndpoint, self.update_endpoint()).await?;
        self.observed(FlowStep::UpdateConfigs, self.update_configs()).await?;

        let issuer = match self.observed(FlowStep::IssuerIdentifier, self.issuer_identifier()).await? {
            Some(issuer) => issuer,
            None => self.observed(FlowStep::SetupIssuer, self.setup_issuer()).await?
        };

        let relationship_did = self.create_connection().await?;
        let schema_id = self.observed(FlowStep::WriteSchema, self.write_schema()).await?;
        let cred_def_id = self.observed(FlowStep::WriteCredDef, self.write_cred_def(&schema_id)).await?;
        self.issue_credential(&relationship_did, &cred_def_id).await?;
        let proof = self.observed(FlowStep::RequestProof, self.request_proof(&relationship_did, &issuer)).await?;

        Ok(IssuanceOutcome { issuer, relationship_did, schema_id, cred_def_id, proof })
    }

    async fn observed<T>(
        &self,
        step: FlowStep,
        future: impl Future<Output = Result<T, FlowError>>
    ) -> Result<T, FlowError> {
        event!(Level::DEBUG, event = workflow::STEP_STARTED, step = %step);
        self.observer.on_step_started(step);

        let result = future.await;

        event!(Level::DEBUG, event = workflow::STEP_COMPLETED, step = %step, succeeded = result.is_ok());
        self.observer.on_step_completed(step, result.is_ok());
        result
    }

    async fn update_endpoint(&self) -> Result<(), FlowError> {
        let context = self.session.context();
        let url = context
            .endpoint_url
            .clone()
            .ok_or_else(|| FlowError::Configuration("context has no endpoint url".to_string()))?;

        let payload = json!({ "comMethod": { "id": "webhook", "type": 2, "value": url } });
        self.session
            .send(&update_endpoint::FAMILY.envelope(update_endpoint::UPDATE_COM_METHOD, payload))
            .await
    }

    async fn update_configs(&self) -> Result<(), FlowError> {
        let payload = json!({
            "configs": [
                { "name": "name", "value": self.settings.institution_name },
                { "name": "logoUrl", "value": self.settings.logo_url }
            ]
        });
        self.session
            .request_expecting(
                &update_configs::FAMILY.envelope(update_configs::UPDATE, payload),
                update_configs::FAMILY.key(),
                update_configs::STATUS_REPORT
            )
            .await
            .map(|_| ())
    }

    /// Current issuer identifier, `None` when the agent has not been set up
    async fn issuer_identifier(&self) -> Result<Option<IssuerIdentity>, FlowError> {
        let key = issuer_setup::FAMILY.key();
        let request = issuer_setup::FAMILY.envelope(issuer_setup::CURRENT_PUBLIC_IDENTIFIER, json!({}));

        let reply = self.session.request(&request, key.clone()).await?;
        match reply.name.as_str() {
            issuer_setup::PUBLIC_IDENTIFIER => Ok(Some(IssuerIdentity {
                did:    payload_str(&reply.payload, "/did")?,
                verkey: payload_str(&reply.payload, "/verKey")?
            })),
            PROBLEM_REPORT => Ok(None),
            _ => Err(FlowError::UnexpectedMessage {
                key,
                expected: issuer_setup::PUBLIC_IDENTIFIER.to_string(),
                actual: reply.name
            })
        }
    }

    async fn setup_issuer(&self) -> Result<IssuerIdentity, FlowError> {
        let key = issuer_setup::FAMILY.key();
        let payload = self
            .session
            .request_expecting(
                &issuer_setup::FAMILY.envelope(issuer_setup::CREATE, json!({})),
                key,
                issuer_setup::PUBLIC_IDENTIFIER_CREATED
            )
            .await?;

        let identity = IssuerIdentity {
            did:    payload_str(&payload, "/identifier/did")?,
            verkey: payload_str(&payload, "/identifier/verKey")?
        };
        event!(Level::INFO, issuer_did = %identity.did, issuer_verkey = %identity.verkey,
               "issuer DID and verkey must be written to the ledger");
        Ok(identity)
    }

    /// Invite then acceptance, both arriving on the connecting key
    async fn create_connection(&self) -> Result<String, FlowError> {
        let key = connecting::FAMILY.key();
        let mut replies = self.session.subscribe(key.clone());
        let limit = self.session.steps().default_timeout().unwrap_or(SUBSCRIPTION_TIMEOUT);

        let request = connecting::FAMILY.envelope(
            connecting::CREATE_CONNECTION,
            json!({ "sourceId": Uuid::new_v4().to_string(), "includePublicDID": true })
        );

        let relationship_did = self
            .observed(FlowStep::AwaitInvite, async {
                self.session.send(&request).await?;
                let invite = check_reply(&key, replies.next_within(limit).await?, connecting::INVITE_DETAIL)?;
                payload_str(&invite, "/inviteDetail/senderDetail/DID")
            })
            .await?;

        self.observed(FlowStep::AwaitConnection, async {
            check_reply(&key, replies.next_within(limit).await?, connecting::CONN_REQ_ACCEPTED).map(|_| ())
        })
        .await?;

        Ok(relationship_did)
    }

    async fn write_schema(&self) -> Result<String, FlowError> {
        let key = write_schema::FAMILY.key();
        let request = write_schema::FAMILY.envelope(
            write_schema::WRITE,
            json!({
                "name": self.settings.schema_name,
                "version": self.settings.schema_version,
                "attrNames": self.settings.schema_attrs
            })
        );

        let payload = self.session.request_expecting(&request, key, write_schema::STATUS_REPORT).await?;
        payload_str(&payload, "/schemaId")
    }

    async fn write_cred_def(&self, schema_id: &str) -> Result<String, FlowError> {
        let key = write_cred_def::FAMILY.key();
        let request = write_cred_def::FAMILY.envelope(
            write_cred_def::WRITE,
            json!({
                "name": self.settings.cred_def_name,
                "schemaId": schema_id,
                "tag": self.settings.cred_def_tag
            })
        );

        let payload = self.session.request_expecting(&request, key, write_cred_def::STATUS_REPORT).await?;
        payload_str(&payload, "/credDefId")
    }

    async fn issue_credential(&self, relationship_did: &str, cred_def_id: &str) -> Result<(), FlowError> {
        let key = issue_credential::FAMILY.key();
        let thread_id = Uuid::new_v4().to_string();

        let offer = issue_credential::FAMILY.envelope(
            issue_credential::OFFER,
            json!({
                "~for_relationship": relationship_did,
                "~thread": { "thid": thread_id },
                "cred_def_id": cred_def_id,
                "credential_values": self.settings.credential_data,
                "comment": self.settings.credential_name,
                "price": 0
            })
        );
        self.observed(
            FlowStep::OfferCredential,
            self.session.request_expecting(&offer, key.clone(), issue_credential::ASK_ACCEPT)
        )
        .await?;

        let issue = issue_credential::FAMILY.envelope(
            issue_credential::ISSUE,
            json!({ "~for_relationship": relationship_did, "~thread": { "thid": thread_id } })
        );
        self.observed(
            FlowStep::IssueCredential,
            self.session.request_expecting(&issue, key, issue_credential::SENT)
        )
        .await?;
        Ok(())
    }

    async fn request_proof(&self, relationship_did: &str, issuer: &IssuerIdentity) -> Result<Value, FlowError> {
        let key = present_proof::FAMILY.key();
        let proof_attrs: Vec<Value> = self
            .settings
            .schema_attrs
            .iter()
            .map(|name| json!({ "name": name, "restrictions": [{ "issuer_did": issuer.did }] }))
            .collect();

        let request = present_proof::FAMILY.envelope(
            present_proof::REQUEST,
            json!({
                "~for_relationship": relationship_did,
                "name": self.settings.proof_name,
                "proof_attrs": proof_attrs
            })
        );

        self.session.request_expecting(&request, key, present_proof::PRESENTATION_RESULT).await
    }
}

fn payload_str(payload: &Value, pointer: &str) -> Result<String, FlowError> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FlowError::Decode(format!("reply has no string at '{}'", pointer)))
}
