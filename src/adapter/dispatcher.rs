//! Dispatcher - hands one decoded envelope to every matching entry
//!
//! The bucket is snapshotted first and walked without holding the registry
//! lock. One-shot waiters are removed from the registry before they are
//! resolved, so a waiter can only ever be resolved by a single dispatch.

use std::sync::Arc;

use tracing::{Level, event};

use crate::{
    adapter::registry::{Callback, HandlerAction, HandlerRegistry},
    domain::{
        constant::dispatcher,
        envelope::{Envelope, HandlerKey},
        error::FlowError
    }
};

/// Outcome of a successful dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub key:             HandlerKey,
    pub name:            String,
    /// Listeners invoked
    pub listeners:       usize,
    /// One-shot waiters resolved
    pub resolved_steps:  usize,
    /// Multi-shot subscriptions fed
    pub stream_messages: usize,
    /// Whether a fallback handler took the envelope instead
    pub fallback:        bool
}

impl DispatchReport {
    fn new(envelope: &Envelope) -> Self {
        Self {
            key:             envelope.key(),
            name:            envelope.name().to_string(),
            listeners:       0,
            resolved_steps:  0,
            stream_messages: 0,
            fallback:        false
        }
    }

    /// Total number of entries that accepted the envelope
    pub fn fired(&self) -> usize {
        self.listeners + self.resolved_steps + self.stream_messages
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Invoke every entry registered on the envelope's key, in order
    ///
    /// Returns `UnhandledMessage` when nothing accepted the envelope. That
    /// includes a bucket whose only waiters were consumed by a concurrent
    /// dispatch between snapshot and invocation. A failing listener does not
    /// stop the walk; the first failure is returned once the bucket is done.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<DispatchReport, FlowError> {
        let key = envelope.key();
        let callbacks = self.registry.lookup(&key);

        event!(Level::DEBUG, event = dispatcher::ENVELOPE_RECEIVED,
               key = %key, name = %envelope.name(), entries = callbacks.len());

        let mut report = DispatchReport::new(envelope);
        let mut failure: Option<FlowError> = None;

        for callback in callbacks {
            match callback {
                Callback::Waiter { id } => {
                    let Some(entry) = self.registry.take(id) else {
                        event!(Level::DEBUG, event = dispatcher::WAITER_STALE, key = %key, entry_id = %id);
                        continue;
                    };
                    if let HandlerAction::Waiter(sender) = entry.action {
                        if sender.send(envelope.to_reply()).is_ok() {
                            report.resolved_steps += 1;
                        } else {
                            event!(Level::DEBUG, event = dispatcher::WAITER_STALE,
                                   key = %key, entry_id = %id, message = "receiver_dropped");
                        }
                    }
                }
                Callback::Stream { id, sender } => {
                    if sender.send(envelope.to_reply()).is_ok() {
                        report.stream_messages += 1;
                    } else {
                        event!(Level::DEBUG, event = dispatcher::STREAM_CLOSED, key = %key, entry_id = %id);
                        self.registry.unregister(id);
                    }
                }
                Callback::Listener { id, handler } => {
                    report.listeners += 1;
                    if let Err(e) = handler.handle(envelope.name(), envelope.payload()).await {
                        event!(Level::ERROR, event = dispatcher::CALLBACK_FAILED,
                               key = %key, name = %envelope.name(), entry_id = %id,
                               handler = handler.handler_name(), error = %e);
                        failure.get_or_insert_with(|| FlowError::CallbackFailure {
                            key:    key.clone(),
                            name:   envelope.name().to_string(),
                            reason: e.to_string()
                        });
                    }
                }
            }
        }

        if let Some(failure) = failure {
            return Err(failure);
        }

        if report.fired() == 0 {
            event!(Level::WARN, event = dispatcher::ENVELOPE_UNHANDLED, key = %key, name = %envelope.name());
            return Err(FlowError::UnhandledMessage { key, name: envelope.name().to_string() });
        }

        event!(Level::DEBUG, event = dispatcher::ENVELOPE_DISPATCHED,
               key = %key, name = %envelope.name(), fired = report.fired());
        Ok(report)
    }
}
