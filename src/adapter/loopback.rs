//! Loopback Transport - in-process remote agent for development and testing
//!
//! Outbound envelopes are recorded and answered by a [`Responder`]. Replies
//! are encoded through the codec and pushed onto a frame channel that plays
//! the role of the webhook, so they travel the same inbound path real
//! replies take.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{
    domain::{
        context::AgentContext,
        envelope::{Envelope, HandlerKey},
        error::FlowError
    },
    port::{codec::FrameCodec, transport::Transport}
};

/// Decides what the simulated remote agent answers to a request
pub trait Responder: Send + Sync {
    fn respond(&self, request: &Envelope, context: &AgentContext) -> Vec<Envelope>;
}

struct ScriptRule {
    key:     HandlerKey,
    request: String,
    replies: Vec<Envelope>
}

/// Responder answering from a fixed table of `(key, request name) -> replies`
///
/// Requests without a rule get no answer at all, like a remote agent that
/// never calls back.
#[derive(Default)]
pub struct ScriptedRemote {
    rules: Vec<ScriptRule>
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `request` on `key` with `replies`, in order
    pub fn on(mut self, key: HandlerKey, request: impl Into<String>, replies: Vec<Envelope>) -> Self {
        self.rules.push(ScriptRule { key, request: request.into(), replies });
        self
    }
}

impl Responder for ScriptedRemote {
    fn respond(&self, request: &Envelope, _context: &AgentContext) -> Vec<Envelope> {
        let key = request.key();
        self.rules
            .iter()
            .find(|rule| rule.key == key && rule.request == request.name())
            .map(|rule| rule.replies.clone())
            .unwrap_or_default()
    }
}

pub struct LoopbackTransport {
    responder:   Arc<dyn Responder>,
    codec:       Arc<dyn FrameCodec>,
    webhook:     mpsc::UnboundedSender<Vec<u8>>,
    sent:        Mutex<Vec<Envelope>>,
    reply_delay: Duration
}

impl LoopbackTransport {
    /// Create the transport and the receiving end of its webhook channel
    pub fn new(responder: Arc<dyn Responder>, codec: Arc<dyn FrameCodec>) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (webhook, frames) = mpsc::unbounded_channel();
        let transport = Self { responder, codec, webhook, sent: Mutex::new(Vec::new()), reply_delay: Duration::ZERO };
        (transport, frames)
    }

    /// Delay replies, as a remote agent and a human on the other side would
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    /// Every envelope sent so far, in order
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, envelope: &Envelope, context: &AgentContext) -> Result<(), FlowError> {
        self.sent.lock().push(envelope.clone());

        let frames = self
            .responder
            .respond(envelope, context)
            .iter()
            .map(|reply| self.codec.encode(reply))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| FlowError::Transport(format!("failed to encode reply: {}", e)))?;

        if self.webhook.is_closed() {
            return Err(FlowError::Transport("webhook channel is closed".to_string()));
        }

        let webhook = self.webhook.clone();
        let delay = self.reply_delay;
        tokio::spawn(async move {
            for frame in frames {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if webhook.send(frame).is_err() {
                    break;
                }
            }
        });

        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "loopback"
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::adapter::codec::JsonFrameCodec;

    fn schema_key() -> HandlerKey {
        HandlerKey::new("write-schema", "0.6")
    }

    #[tokio::test]
    async fn test_scripted_reply_arrives_as_encoded_frame() {
        let codec = Arc::new(JsonFrameCodec::new());
        let remote = ScriptedRemote::new().on(
            schema_key(),
            "write",
            vec![Envelope::for_key(&schema_key(), "status-report", json!({"schemaId": "s1"}))]
        );
        let (transport, mut frames) = LoopbackTransport::new(Arc::new(remote), codec.clone());
        let context = AgentContext::new("http://localhost:9000");

        transport.send(&Envelope::for_key(&schema_key(), "write", json!({})), &context).await.unwrap();

        let reply = codec.decode(&frames.recv().await.unwrap()).unwrap();
        assert_eq!(reply.name(), "status-report");
        assert_eq!(reply.payload()["schemaId"], "s1");
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unscripted_request_gets_no_reply() {
        let (transport, mut frames) =
            LoopbackTransport::new(Arc::new(ScriptedRemote::new()), Arc::new(JsonFrameCodec::new()));
        let context = AgentContext::new("http://localhost:9000");

        transport.send(&Envelope::for_key(&schema_key(), "write", json!({})), &context).await.unwrap();

        let next = tokio::time::timeout(Duration::from_millis(20), frames.recv()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_send_fails_once_webhook_is_gone() {
        let (transport, frames) =
            LoopbackTransport::new(Arc::new(ScriptedRemote::new()), Arc::new(JsonFrameCodec::new()));
        drop(frames);

        let result = transport
            .send(&Envelope::for_key(&schema_key(), "write", json!({})), &AgentContext::new("http://localhost:9000"))
            .await;

        assert!(matches!(result, Err(FlowError::Transport(_))));
    }
}
