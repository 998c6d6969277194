//! Agent Session - one connection to a remote agent
//!
//! The session owns its own handler registry, so two sessions in the same
//! process never see each other's replies. Workflow code talks to the
//! session; the inbound path feeds it raw frames through [`AgentSession::deliver`].

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tracing::{Level, event};

use crate::{
    adapter::{
        dispatcher::{DispatchReport, Dispatcher},
        registry::{EntryId, HandlerRegistry},
        step::{PendingStep, StepController, Subscription}
    },
    domain::{
        constant::session,
        context::AgentContext,
        envelope::{Envelope, HandlerKey, Reply},
        error::FlowError,
        protocol::PROBLEM_REPORT
    },
    port::{codec::FrameCodec, handler::MessageHandler, transport::Transport}
};

pub struct AgentSession {
    context:    AgentContext,
    registry:   Arc<HandlerRegistry>,
    dispatcher: Dispatcher,
    steps:      StepController,
    transport:  Arc<dyn Transport>,
    codec:      Arc<dyn FrameCodec>,
    /// Receives envelopes no entry accepted
    fallback:   Option<Arc<dyn MessageHandler>>
}

impl AgentSession {
    pub fn new(context: AgentContext, transport: Arc<dyn Transport>, codec: Arc<dyn FrameCodec>) -> Self {
        let registry = Arc::new(HandlerRegistry::new());

        event!(Level::DEBUG, event = session::SESSION_OPENED,
               session_id = %context.session_id, transport = transport.transport_name());

        Self {
            context,
            dispatcher: Dispatcher::new(registry.clone()),
            steps: StepController::new(registry.clone()),
            registry,
            transport,
            codec,
            fallback: None
        }
    }

    /// Default deadline for every [`AgentSession::await_reply`]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.steps = self.steps.with_default_timeout(timeout);
        self
    }

    /// Handler for envelopes that match no registered entry
    pub fn with_fallback(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn steps(&self) -> &StepController {
        &self.steps
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Decode a raw frame and dispatch it
    pub async fn deliver(&self, frame: &[u8]) -> Result<DispatchReport, FlowError> {
        let envelope = self.codec.decode(frame)?;
        self.dispatch(&envelope).await
    }

    /// Dispatch an already decoded envelope, falling back if nothing matched
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<DispatchReport, FlowError> {
        match self.dispatcher.dispatch(envelope).await {
            Err(FlowError::UnhandledMessage { key, name }) => match &self.fallback {
                Some(fallback) => {
                    event!(Level::INFO, event = session::FALLBACK_INVOKED,
                           key = %key, name = %name, handler = fallback.handler_name());
                    fallback.handle(&name, envelope.payload()).await.map_err(|e| FlowError::CallbackFailure {
                        key:    key.clone(),
                        name:   name.clone(),
                        reason: e.to_string()
                    })?;
                    Ok(DispatchReport {
                        key,
                        name,
                        listeners: 0,
                        resolved_steps: 0,
                        stream_messages: 0,
                        fallback: true
                    })
                }
                None => Err(FlowError::UnhandledMessage { key, name })
            },
            other => other
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    pub async fn send(&self, envelope: &Envelope) -> Result<(), FlowError> {
        self.transport.send(envelope, &self.context).await?;

        event!(Level::DEBUG, event = session::ENVELOPE_SENT,
               session_id = %self.context.session_id, key = %envelope.key(), name = %envelope.name());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn register(&self, key: HandlerKey, handler: Arc<dyn MessageHandler>) -> EntryId {
        self.registry.register(key, handler)
    }

    pub fn unregister(&self, id: EntryId) -> bool {
        self.registry.unregister(id)
    }

    pub fn await_reply(&self, key: HandlerKey) -> PendingStep {
        self.steps.await_reply(key)
    }

    pub fn await_reply_within(&self, key: HandlerKey, timeout: Duration) -> PendingStep {
        self.steps.await_reply_within(key, timeout)
    }

    pub fn subscribe(&self, key: HandlerKey) -> Subscription {
        self.steps.subscribe(key)
    }

    // ------------------------------------------------------------------
    // Request / reply
    // ------------------------------------------------------------------

    /// Send `envelope` and wait for the next reply on `reply_key`
    ///
    /// The waiter is registered before sending so a fast reply cannot slip
    /// past it. If the send fails the waiter is withdrawn.
    pub async fn request(&self, envelope: &Envelope, reply_key: HandlerKey) -> Result<Reply, FlowError> {
        let pending = self.steps.await_reply(reply_key);
        self.send(envelope).await?;
        pending.wait().await
    }

    /// Resolve `step` and require the reply to be named `expected`
    ///
    /// Returns the reply payload. A problem report becomes `ProblemReport`,
    /// any other name `UnexpectedMessage`.
    pub async fn expect(&self, step: PendingStep, expected: &str) -> Result<Value, FlowError> {
        let key = step.key().clone();
        let reply = step.wait().await?;
        check_reply(&key, reply, expected)
    }

    /// Send `envelope` and require the reply on `reply_key` to be named `expected`
    pub async fn request_expecting(
        &self,
        envelope: &Envelope,
        reply_key: HandlerKey,
        expected: &str
    ) -> Result<Value, FlowError> {
        let step = self.steps.await_reply(reply_key);
        self.send(envelope).await?;
        self.expect(step, expected).await
    }

    /// Drop every registered entry, cancelling all outstanding steps
    pub fn close(&self) {
        let removed = self.registry.clear();
        event!(Level::DEBUG, event = session::SESSION_CLOSED,
               session_id = %self.context.session_id, removed = removed);
    }
}

/// Check a reply's name against the one a step expects
pub fn check_reply(key: &HandlerKey, reply: Reply, expected: &str) -> Result<Value, FlowError> {
    if reply.name == expected {
        return Ok(reply.payload);
    }

    if reply.name == PROBLEM_REPORT {
        let description = problem_description(&reply.payload);
        event!(Level::WARN, event = session::PROBLEM_REPORTED, key = %key, description = %description);
        return Err(FlowError::ProblemReport { key: key.clone(), description });
    }

    Err(FlowError::UnexpectedMessage { key: key.clone(), expected: expected.to_string(), actual: reply.name })
}

fn problem_description(payload: &Value) -> String {
    payload
        .pointer("/description/en")
        .or_else(|| payload.pointer("/description/code"))
        .or_else(|| payload.get("description"))
        .or_else(|| payload.get("comment"))
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string()
        })
        .unwrap_or_else(|| payload.to_string())
}
