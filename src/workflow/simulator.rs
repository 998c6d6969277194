//! Scripted stand-in for a remote Verity agent
//!
//! Answers every request the issuer workflow makes, the way a provisioned
//! agent with a cooperative holder on the other side would.

use serde_json::{Value, json};

use crate::{
    adapter::loopback::ScriptedRemote,
    domain::{
        envelope::Envelope,
        protocol::{
            PROBLEM_REPORT, ProtocolFamily, connecting, issue_credential, issuer_setup, present_proof,
            update_configs, write_cred_def, write_schema
        }
    }
};

pub const ISSUER_DID: &str = "Vnrr9bRq5H4fJRTA6zJ5Kd";
pub const ISSUER_VERKEY: &str = "6kHJUnafJ8gNHQFxXyoaJ2gZrgQEgaA7HSSnG7nCaLoG";
pub const RELATIONSHIP_DID: &str = "PsAvPXMzUKdbNtAYqjyEsU";
pub const SCHEMA_ID: &str = "Vnrr9bRq5H4fJRTA6zJ5Kd:2:Diploma:0.1";
pub const CRED_DEF_ID: &str = "Vnrr9bRq5H4fJRTA6zJ5Kd:3:CL:1342:latest";

fn reply(family: ProtocolFamily, name: &str, payload: Value) -> Envelope {
    family.envelope(name, payload)
}

/// Append the scripted answers to `base`
///
/// Rules already in `base` take precedence, which lets callers override
/// a single answer. The identifier lookup reports a problem, so the
/// workflow goes through issuer setup unless `base` says otherwise.
pub fn simulated_verity(base: ScriptedRemote) -> ScriptedRemote {
    base.on(update_configs::FAMILY.key(), update_configs::UPDATE, vec![reply(
        update_configs::FAMILY,
        update_configs::STATUS_REPORT,
        json!({ "configs": [{ "name": "name" }, { "name": "logoUrl" }] })
    )])
    .on(issuer_setup::FAMILY.key(), issuer_setup::CURRENT_PUBLIC_IDENTIFIER, vec![reply(
        issuer_setup::FAMILY,
        PROBLEM_REPORT,
        json!({ "description": { "en": "Issuer Identifier has not been created yet", "code": "issuer-not-created" } })
    )])
    .on(issuer_setup::FAMILY.key(), issuer_setup::CREATE, vec![reply(
        issuer_setup::FAMILY,
        issuer_setup::PUBLIC_IDENTIFIER_CREATED,
        json!({ "identifier": { "did": ISSUER_DID, "verKey": ISSUER_VERKEY } })
    )])
    .on(connecting::FAMILY.key(), connecting::CREATE_CONNECTION, vec![
        reply(
            connecting::FAMILY,
            connecting::INVITE_DETAIL,
            json!({ "inviteDetail": { "connReqId": "9b2a1f0e", "senderDetail": { "DID": RELATIONSHIP_DID } } })
        ),
        reply(connecting::FAMILY, connecting::CONN_REQ_ACCEPTED, json!({ "@msg": "connection accepted" }))
    ])
    .on(write_schema::FAMILY.key(), write_schema::WRITE, vec![reply(
        write_schema::FAMILY,
        write_schema::STATUS_REPORT,
        json!({ "schemaId": SCHEMA_ID })
    )])
    .on(write_cred_def::FAMILY.key(), write_cred_def::WRITE, vec![reply(
        write_cred_def::FAMILY,
        write_cred_def::STATUS_REPORT,
        json!({ "credDefId": CRED_DEF_ID })
    )])
    .on(issue_credential::FAMILY.key(), issue_credential::OFFER, vec![reply(
        issue_credential::FAMILY,
        issue_credential::ASK_ACCEPT,
        json!({})
    )])
    .on(issue_credential::FAMILY.key(), issue_credential::ISSUE, vec![reply(
        issue_credential::FAMILY,
        issue_credential::SENT,
        json!({})
    )])
    .on(present_proof::FAMILY.key(), present_proof::REQUEST, vec![reply(
        present_proof::FAMILY,
        present_proof::PRESENTATION_RESULT,
        json!({
            "verification_result": "ProofValidated",
            "requested_presentation": {
                "revealed_attrs": { "name": { "value": "Joe Smith" }, "degree": { "value": "Bachelors" } }
            }
        })
    )])
}
