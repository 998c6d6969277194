//! InboundRouter Actor - serializes inbound deliveries for one session
//!
//! The webhook hands every raw frame to this actor. Frames are decoded and
//! dispatched one at a time, in arrival order, so replies on the same key
//! reach their waiters in the order the remote agent sent them.
//!
//! A listener must not wait on another inbound frame from inside its
//! callback: the actor is busy running that callback.

use std::{sync::Arc, time::Duration};

use ractor::{
    Actor, ActorProcessingErr, ActorRef, SpawnErr,
    rpc::{CallResult, call}
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Level, event};

use crate::{
    actor::message::{InboundMessage, InboundStats},
    adapter::dispatcher::DispatchReport,
    domain::{constant::inbound, error::FlowError},
    service::session::AgentSession
};

/// InboundRouter Actor State
pub struct InboundRouterState {
    session: Arc<AgentSession>,
    stats:   InboundStats
}

/// InboundRouter Actor - feeds frames to a session's dispatcher
pub struct InboundRouter;

#[async_trait::async_trait]
impl Actor for InboundRouter {
    type Arguments = Arc<AgentSession>;
    type Msg = InboundMessage;
    type State = InboundRouterState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        session: Self::Arguments
    ) -> Result<Self::State, ActorProcessingErr> {
        event!(Level::DEBUG, event = inbound::ROUTER_STARTED, session_id = %session.context().session_id);

        Ok(InboundRouterState { session, stats: InboundStats::default() })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State
    ) -> Result<(), ActorProcessingErr> {
        match message {
            InboundMessage::Deliver { frame, reply } => {
                let result = self.handle_frame(&frame, state).await;
                if let Err(e) = reply.send(result) {
                    event!(Level::ERROR, event = inbound::REPLY_FAILED, error = %e);
                }
            }
            InboundMessage::Push { frame } => {
                // Outcome is already logged and counted
                let _ = self.handle_frame(&frame, state).await;
            }
            InboundMessage::GetStats { reply } => {
                if let Err(e) = reply.send(state.stats) {
                    event!(Level::ERROR, event = inbound::REPLY_FAILED, error = %e);
                }
            }
        }

        // Delivery failures belong to the sender, never to the actor
        Ok(())
    }
}

impl InboundRouter {
    /// Spawn a router for `session`
    pub async fn spawn(session: Arc<AgentSession>) -> Result<ActorRef<InboundMessage>, SpawnErr> {
        let name = format!("inbound_router_{}", session.context().session_id);
        let (router_ref, _handle) = Actor::spawn(Some(name), InboundRouter, session).await?;
        Ok(router_ref)
    }

    /// Deliver a frame and wait for the dispatch outcome
    pub async fn deliver(
        router: &ActorRef<InboundMessage>,
        frame: Vec<u8>,
        timeout: Duration
    ) -> Result<DispatchReport, FlowError> {
        match call(router, |reply| InboundMessage::Deliver { frame, reply }, Some(timeout)).await {
            Ok(CallResult::Success(result)) => result,
            Ok(CallResult::Timeout) => {
                Err(FlowError::Generic(format!("inbound delivery timed out after {:?}", timeout)))
            }
            Ok(CallResult::SenderError) => Err(FlowError::Generic("inbound router dropped the reply".to_string())),
            Err(e) => Err(FlowError::Generic(format!("failed to reach inbound router: {:?}", e)))
        }
    }

    /// Queue a frame without waiting, as a webhook would
    pub fn push(router: &ActorRef<InboundMessage>, frame: Vec<u8>) -> Result<(), FlowError> {
        router
            .cast(InboundMessage::Push { frame })
            .map_err(|e| FlowError::Generic(format!("failed to reach inbound router: {:?}", e)))
    }

    pub async fn stats(router: &ActorRef<InboundMessage>) -> Result<InboundStats, FlowError> {
        match call(router, |reply| InboundMessage::GetStats { reply }, None).await {
            Ok(CallResult::Success(stats)) => Ok(stats),
            Ok(_) => Err(FlowError::Generic("inbound router did not report stats".to_string())),
            Err(e) => Err(FlowError::Generic(format!("failed to reach inbound router: {:?}", e)))
        }
    }

    /// Forward every frame arriving on `frames` to the router until either side closes
    pub fn pump(router: ActorRef<InboundMessage>, mut frames: mpsc::UnboundedReceiver<Vec<u8>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if Self::push(&router, frame).is_err() {
                    break;
                }
            }
        })
    }

    async fn handle_frame(&self, frame: &[u8], state: &mut InboundRouterState) -> Result<DispatchReport, FlowError> {
        event!(Level::DEBUG, event = inbound::FRAME_RECEIVED, bytes = frame.len());

        let result = state.session.deliver(frame).await;
        match &result {
            Ok(report) => {
                state.stats.delivered += 1;
                event!(Level::DEBUG, event = inbound::FRAME_DELIVERED,
                       key = %report.key, name = %report.name, fired = report.fired(), fallback = report.fallback);
            }
            Err(e) if e.is_unhandled() => {
                state.stats.unhandled += 1;
                event!(Level::WARN, event = inbound::FRAME_FAILED, error = %e);
            }
            Err(e) => {
                state.stats.failed += 1;
                event!(Level::ERROR, event = inbound::FRAME_FAILED, error = %e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        adapter::{
            codec::JsonFrameCodec,
            loopback::{LoopbackTransport, ScriptedRemote}
        },
        domain::{
            context::AgentContext,
            envelope::{Envelope, HandlerKey}
        },
        port::codec::FrameCodec
    };

    fn key() -> HandlerKey {
        HandlerKey::new("proto-x", "1.0")
    }

    fn frame(name: &str, seq: u64) -> Vec<u8> {
        JsonFrameCodec::new().encode(&Envelope::for_key(&key(), name, json!({ "seq": seq }))).unwrap()
    }

    async fn router() -> (Arc<AgentSession>, ActorRef<InboundMessage>) {
        let codec = Arc::new(JsonFrameCodec::new());
        let (transport, _frames) = LoopbackTransport::new(Arc::new(ScriptedRemote::new()), codec.clone());
        let session = Arc::new(AgentSession::new(AgentContext::new("http://localhost:9000"), Arc::new(transport), codec));
        let router = InboundRouter::spawn(session.clone()).await.unwrap();
        (session, router)
    }

    #[tokio::test]
    async fn test_deliver_resolves_waiting_step() {
        let (session, router) = router().await;
        let pending = session.await_reply(key());

        let report = InboundRouter::deliver(&router, frame("STATUS", 1), Duration::from_secs(1)).await.unwrap();

        assert_eq!(report.resolved_steps, 1);
        assert_eq!(pending.wait().await.unwrap().payload["seq"], 1);
        router.stop(None);
    }

    #[tokio::test]
    async fn test_failures_are_reported_and_counted() {
        let (_session, router) = router().await;

        let unhandled = InboundRouter::deliver(&router, frame("STATUS", 1), Duration::from_secs(1)).await;
        let garbled = InboundRouter::deliver(&router, b"{".to_vec(), Duration::from_secs(1)).await;

        assert!(unhandled.unwrap_err().is_unhandled());
        assert!(matches!(garbled, Err(FlowError::Decode(_))));

        let stats = InboundRouter::stats(&router).await.unwrap();
        assert_eq!(stats, InboundStats { delivered: 0, unhandled: 1, failed: 1 });
        router.stop(None);
    }

    #[tokio::test]
    async fn test_pushed_frames_dispatch_in_arrival_order() {
        let (session, router) = router().await;
        let mut subscription = session.subscribe(key());

        for seq in 0..20 {
            InboundRouter::push(&router, frame("STATUS", seq)).unwrap();
        }

        for seq in 0..20 {
            let reply = subscription.next_within(Duration::from_secs(1)).await.unwrap();
            assert_eq!(reply.payload["seq"], seq);
        }
        assert_eq!(InboundRouter::stats(&router).await.unwrap().delivered, 20);
        router.stop(None);
    }

    #[tokio::test]
    async fn test_pump_forwards_webhook_frames() {
        let (session, router) = router().await;
        let (webhook, frames) = mpsc::unbounded_channel();
        let pump = InboundRouter::pump(router.clone(), frames);
        let pending = session.await_reply_within(key(), Duration::from_secs(1));

        webhook.send(frame("STATUS", 9)).unwrap();

        assert_eq!(pending.wait().await.unwrap().payload["seq"], 9);
        drop(webhook);
        pump.await.unwrap();
        router.stop(None);
    }
}
