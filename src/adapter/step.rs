//! Step Controller - lets sequential workflow code await a future inbound reply
//!
//! A workflow step registers a waiter on the key it expects the reply on,
//! sends its request, and then suspends on the returned [`PendingStep`].
//! The inbound path resolves the waiter from another task through the
//! dispatcher.
//!
//! Every waiter goes `Awaiting` -> one of `Resolved`, `TimedOut`,
//! `Cancelled`. The terminal states are exclusive: whichever side removes
//! the entry from the registry first decides the outcome, and the loser
//! of that race observes the winner's result instead of producing its own.

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

use crate::{
    adapter::registry::{EntryId, HandlerAction, HandlerRegistry},
    domain::{
        constant::step,
        envelope::{HandlerKey, Reply},
        error::FlowError
    }
};

/// Lifecycle of a single exchange step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// No waiter registered yet
    Idle,
    /// Waiter registered, reply pending
    Awaiting,
    /// Reply arrived, entry consumed
    Resolved,
    /// Deadline passed, entry removed
    TimedOut,
    /// Cancelled or abandoned, entry removed
    Cancelled
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepState::Resolved | StepState::TimedOut | StepState::Cancelled)
    }
}

/// Creates pending steps and subscriptions on a registry
#[derive(Clone)]
pub struct StepController {
    registry:        Arc<HandlerRegistry>,
    default_timeout: Option<Duration>
}

impl StepController {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry, default_timeout: None }
    }

    /// Apply `timeout` to every step created with [`StepController::await_reply`]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Register a one-shot waiter on `key` using the default timeout
    pub fn await_reply(&self, key: HandlerKey) -> PendingStep {
        self.register_step(key, self.default_timeout)
    }

    /// Register a one-shot waiter on `key` that gives up after `timeout`
    pub fn await_reply_within(&self, key: HandlerKey, timeout: Duration) -> PendingStep {
        self.register_step(key, Some(timeout))
    }

    /// Register a multi-shot waiter receiving every envelope on `key`
    pub fn subscribe(&self, key: HandlerKey) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.registry.register_action(key.clone(), HandlerAction::Stream(sender));

        event!(Level::DEBUG, event = step::SUBSCRIPTION_OPENED, key = %key, entry_id = %id);
        Subscription { id, key, receiver, registry: self.registry.clone() }
    }

    fn register_step(&self, key: HandlerKey, timeout: Option<Duration>) -> PendingStep {
        let (sender, receiver) = oneshot::channel();
        let id = self.registry.register_action(key.clone(), HandlerAction::Waiter(sender));

        event!(Level::DEBUG, event = step::STEP_AWAITING, key = %key, entry_id = %id, timeout = ?timeout);
        PendingStep { id, key, timeout, receiver, registry: self.registry.clone(), state: StepState::Awaiting }
    }
}

/// A suspended workflow continuation waiting for exactly one reply
///
/// Dropping a step that has not reached a terminal state removes its entry.
#[must_use = "a pending step does nothing unless waited on"]
pub struct PendingStep {
    id:       EntryId,
    key:      HandlerKey,
    timeout:  Option<Duration>,
    receiver: oneshot::Receiver<Reply>,
    registry: Arc<HandlerRegistry>,
    state:    StepState
}

impl PendingStep {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn key(&self) -> &HandlerKey {
        &self.key
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    /// Handle that cancels this step from another task
    pub fn canceller(&self) -> StepCanceller {
        StepCanceller { id: self.id, key: self.key.clone(), registry: self.registry.clone() }
    }

    /// Suspend until the reply arrives, the deadline passes, or the step is cancelled
    pub async fn wait(mut self) -> Result<Reply, FlowError> {
        self.resolve().await
    }

    /// Like [`PendingStep::wait`], but also gives up when `token` is cancelled
    pub async fn wait_or_cancel(mut self, token: &CancellationToken) -> Result<Reply, FlowError> {
        tokio::select! {
            biased;
            result = self.resolve() => return result,
            _ = token.cancelled() => {}
        }

        if self.registry.unregister(self.id) {
            return Err(self.mark_cancelled());
        }
        let outcome = (&mut self.receiver).await;
        self.finish(outcome)
    }

    /// Withdraw the waiter without waiting
    ///
    /// Returns false when a reply already consumed the entry; that reply is
    /// discarded with the step.
    pub fn cancel(mut self) -> bool {
        let removed = self.registry.unregister(self.id);
        if removed {
            self.mark_cancelled();
        } else {
            self.state = StepState::Resolved;
        }
        removed
    }

    async fn resolve(&mut self) -> Result<Reply, FlowError> {
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.receiver).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    if self.registry.unregister(self.id) {
                        self.state = StepState::TimedOut;
                        event!(Level::WARN, event = step::STEP_TIMED_OUT, key = %self.key, entry_id = %self.id,
                               after = ?limit);
                        return Err(FlowError::Timeout { key: self.key.clone(), after: limit });
                    }
                    // A dispatch took the entry first, its reply is already on the way
                    (&mut self.receiver).await
                }
            },
            None => (&mut self.receiver).await
        };

        self.finish(outcome)
    }

    fn finish(&mut self, outcome: Result<Reply, oneshot::error::RecvError>) -> Result<Reply, FlowError> {
        match outcome {
            Ok(reply) => {
                self.state = StepState::Resolved;
                event!(Level::DEBUG, event = step::STEP_RESOLVED, key = %self.key, entry_id = %self.id,
                       name = %reply.name);
                Ok(reply)
            }
            // Sender dropped without a reply: removed by a canceller or a registry clear
            Err(_) => Err(self.mark_cancelled())
        }
    }

    fn mark_cancelled(&mut self) -> FlowError {
        self.state = StepState::Cancelled;
        event!(Level::DEBUG, event = step::STEP_CANCELLED, key = %self.key, entry_id = %self.id);
        FlowError::Cancelled { key: self.key.clone() }
    }
}

impl Drop for PendingStep {
    fn drop(&mut self) {
        if !self.state.is_terminal() && self.registry.unregister(self.id) {
            event!(Level::DEBUG, event = step::STEP_ABANDONED, key = %self.key, entry_id = %self.id);
        }
    }
}

/// Cloneable handle that cancels a pending step from anywhere
#[derive(Clone)]
pub struct StepCanceller {
    id:       EntryId,
    key:      HandlerKey,
    registry: Arc<HandlerRegistry>
}

impl StepCanceller {
    /// Remove the waiter. The step then resolves to `Cancelled`.
    ///
    /// No-op returning false once a reply has consumed the entry.
    pub fn cancel(&self) -> bool {
        let removed = self.registry.unregister(self.id);
        if removed {
            event!(Level::DEBUG, event = step::STEP_CANCELLED, key = %self.key, entry_id = %self.id);
        }
        removed
    }
}

/// Multi-shot waiter: receives every envelope on its key until dropped
pub struct Subscription {
    id:       EntryId,
    key:      HandlerKey,
    receiver: mpsc::UnboundedReceiver<Reply>,
    registry: Arc<HandlerRegistry>
}

impl Subscription {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn key(&self) -> &HandlerKey {
        &self.key
    }

    /// Next reply, or `None` once the registry dropped the entry
    pub async fn next(&mut self) -> Option<Reply> {
        self.receiver.recv().await
    }

    /// Next reply within `limit`. The subscription stays registered on timeout.
    pub async fn next_within(&mut self, limit: Duration) -> Result<Reply, FlowError> {
        match tokio::time::timeout(limit, self.receiver.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(FlowError::Cancelled { key: self.key.clone() }),
            Err(_) => Err(FlowError::Timeout { key: self.key.clone(), after: limit })
        }
    }

    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.registry.unregister(self.id) {
            event!(Level::DEBUG, event = step::SUBSCRIPTION_CLOSED, key = %self.key, entry_id = %self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{adapter::dispatcher::Dispatcher, domain::envelope::Envelope};

    fn setup() -> (Arc<HandlerRegistry>, StepController, Dispatcher) {
        let registry = Arc::new(HandlerRegistry::new());
        (registry.clone(), StepController::new(registry.clone()), Dispatcher::new(registry))
    }

    fn key() -> HandlerKey {
        HandlerKey::new("proto-x", "1.0")
    }

    fn envelope(name: &str, seq: u64) -> Envelope {
        Envelope::new("proto-x", "1.0", name, json!({ "seq": seq }))
    }

    #[test]
    fn test_only_finished_states_are_terminal() {
        assert!(!StepState::Idle.is_terminal());
        assert!(!StepState::Awaiting.is_terminal());
        assert!(StepState::Resolved.is_terminal());
        assert!(StepState::TimedOut.is_terminal());
        assert!(StepState::Cancelled.is_terminal());
    }

    #[tokio::test]
    async fn test_reply_resumes_step_with_name_and_payload() {
        let (registry, steps, dispatcher) = setup();

        let pending = steps.await_reply(key());
        let id = pending.id();
        assert_eq!(pending.state(), StepState::Awaiting);

        let report = dispatcher.dispatch(&Envelope::new("proto-x", "1.0", "STATUS", json!({"id": "abc"}))).await.unwrap();
        assert_eq!(report.resolved_steps, 1);

        let reply = pending.wait().await.unwrap();
        assert_eq!(reply.name, "STATUS");
        assert_eq!(reply.payload, json!({"id": "abc"}));
        assert!(registry.lookup(&key()).iter().all(|cb| cb.id() != id));
    }

    #[tokio::test]
    async fn test_reply_before_wait_is_not_lost() {
        let (_registry, steps, dispatcher) = setup();

        let pending = steps.await_reply_within(key(), Duration::from_millis(50));
        dispatcher.dispatch(&envelope("STATUS", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(pending.wait().await.unwrap().payload, json!({"seq": 1}));
    }

    #[tokio::test]
    async fn test_second_reply_after_resolution_is_unhandled() {
        let (_registry, steps, dispatcher) = setup();

        let pending = steps.await_reply(key());
        dispatcher.dispatch(&envelope("STATUS", 1)).await.unwrap();
        let err = dispatcher.dispatch(&envelope("STATUS", 2)).await.unwrap_err();

        assert!(err.is_unhandled());
        assert_eq!(pending.wait().await.unwrap().payload, json!({"seq": 1}));
    }

    #[tokio::test]
    async fn test_sequential_steps_bind_replies_in_order() {
        let (_registry, steps, dispatcher) = setup();
        let dispatcher = Arc::new(dispatcher);

        let remote = {
            let dispatcher = dispatcher.clone();
            let registry = steps.registry().clone();
            tokio::spawn(async move {
                for seq in 1..=3 {
                    // The remote answers in order, once the workflow is listening
                    while registry.bucket_len(&key()) == 0 {
                        tokio::task::yield_now().await;
                    }
                    dispatcher.dispatch(&envelope("STATUS", seq)).await.unwrap();
                }
            })
        };

        let mut seen = Vec::new();
        for _ in 1..=3 {
            let reply = steps.await_reply_within(key(), Duration::from_secs(2)).wait().await.unwrap();
            seen.push(reply.payload["seq"].as_u64().unwrap());
        }
        remote.await.unwrap();

        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_timeout_removes_entry_and_later_reply_is_unhandled() {
        let (registry, steps, dispatcher) = setup();

        let pending = steps.await_reply_within(key(), Duration::from_millis(50));
        let err = pending.wait().await.unwrap_err();

        assert!(err.is_timeout());
        assert!(registry.is_empty());
        assert!(dispatcher.dispatch(&envelope("STATUS", 1)).await.unwrap_err().is_unhandled());
    }

    #[tokio::test]
    async fn test_default_timeout_applies_to_await_reply() {
        let registry = Arc::new(HandlerRegistry::new());
        let steps = StepController::new(registry.clone()).with_default_timeout(Duration::from_millis(20));

        let pending = steps.await_reply(key());
        assert_eq!(pending.timeout(), Some(Duration::from_millis(20)));
        assert!(matches!(pending.wait().await, Err(FlowError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_canceller_rejects_step_and_frees_entry() {
        let (registry, steps, dispatcher) = setup();

        let pending = steps.await_reply(key());
        let canceller = pending.canceller();

        assert!(canceller.cancel());
        assert!(!canceller.cancel());
        assert!(matches!(pending.wait().await, Err(FlowError::Cancelled { .. })));
        assert!(registry.is_empty());
        assert!(dispatcher.dispatch(&envelope("STATUS", 1)).await.unwrap_err().is_unhandled());
    }

    #[tokio::test]
    async fn test_cancel_after_reply_is_noop() {
        let (_registry, steps, dispatcher) = setup();

        let pending = steps.await_reply(key());
        let canceller = pending.canceller();
        dispatcher.dispatch(&envelope("STATUS", 7)).await.unwrap();

        assert!(!canceller.cancel());
        assert_eq!(pending.wait().await.unwrap().payload, json!({"seq": 7}));
    }

    #[tokio::test]
    async fn test_cancellation_token_stops_wait() {
        let (registry, steps, _dispatcher) = setup();
        let token = CancellationToken::new();

        let pending = steps.await_reply(key());
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        assert!(matches!(pending.wait_or_cancel(&token).await, Err(FlowError::Cancelled { .. })));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_pending_step_unregisters() {
        let (registry, steps, _dispatcher) = setup();

        let pending = steps.await_reply(key());
        assert_eq!(registry.len(), 1);
        drop(pending);

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_cancel_reports_whether_entry_was_removed() {
        let (registry, steps, dispatcher) = setup();

        assert!(steps.await_reply(key()).cancel());
        assert!(registry.is_empty());

        let pending = steps.await_reply(key());
        dispatcher.dispatch(&envelope("STATUS", 1)).await.unwrap();
        assert!(!pending.cancel());
    }

    #[tokio::test]
    async fn test_subscription_receives_every_reply_until_dropped() {
        let (registry, steps, dispatcher) = setup();

        let mut subscription = steps.subscribe(key());
        for seq in 1..=3 {
            dispatcher.dispatch(&envelope("STATUS", seq)).await.unwrap();
        }
        for seq in 1..=3 {
            assert_eq!(subscription.next().await.unwrap().payload, json!({ "seq": seq }));
        }

        assert!(subscription.next_within(Duration::from_millis(20)).await.unwrap_err().is_timeout());
        assert_eq!(registry.len(), 1);

        subscription.close();
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_near_simultaneous_replies_resolve_step_once() {
        for _ in 0..50 {
            let (registry, steps, dispatcher) = setup();
            let pending = steps.await_reply(key());

            let first = {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.dispatch(&envelope("STATUS", 1)).await })
            };
            let second = {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.dispatch(&envelope("STATUS", 2)).await })
            };
            let results = [first.await.unwrap(), second.await.unwrap()];

            let resolved: usize = results.iter().filter_map(|r| r.as_ref().ok()).map(|r| r.resolved_steps).sum();
            assert_eq!(resolved, 1);
            assert_eq!(results.iter().filter(|r| matches!(r, Err(e) if e.is_unhandled())).count(), 1);

            let reply = pending.wait().await.unwrap();
            assert!(reply.payload == json!({"seq": 1}) || reply.payload == json!({"seq": 2}));
            assert!(registry.is_empty());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_and_dispatch_lose_nothing() {
        const STEPS: usize = 200;
        let (registry, steps, dispatcher) = setup();

        let registrations: Vec<_> = (0..STEPS)
            .map(|_| {
                let steps = steps.clone();
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    steps.await_reply(key())
                })
            })
            .collect();
        let dispatches: Vec<_> = (0..STEPS as u64)
            .map(|seq| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.dispatch(&envelope("STATUS", seq)).await })
            })
            .collect();

        let mut pending = Vec::with_capacity(STEPS);
        for registration in registrations {
            pending.push(registration.await.unwrap());
        }
        let mut resolved = 0;
        for dispatch in dispatches {
            match dispatch.await.unwrap() {
                Ok(report) => resolved += report.resolved_steps,
                Err(e) => assert!(e.is_unhandled())
            }
        }

        // Whatever is still registered is exactly what has not been resolved
        assert_eq!(registry.len(), STEPS - resolved);
        if let Ok(report) = dispatcher.dispatch(&envelope("STATUS", u64::MAX)).await {
            resolved += report.resolved_steps;
        }
        assert_eq!(resolved, STEPS);
        assert!(registry.is_empty());

        for step in pending {
            let reply = tokio::time::timeout(Duration::from_secs(1), step.wait()).await.unwrap().unwrap();
            assert_eq!(reply.name, "STATUS");
        }
    }
}
