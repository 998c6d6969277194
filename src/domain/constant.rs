//! Domain Events - Structured events for internal monitoring and debugging

/// Handler Registry Events
pub mod registry {
    pub const ENTRY_REGISTERED: &str = "entry.registered";
    pub const ENTRY_REMOVED: &str = "entry.removed";
    pub const REGISTRY_CLEARED: &str = "registry.cleared";
}

/// Dispatcher Events
pub mod dispatcher {
    pub const ENVELOPE_RECEIVED: &str = "envelope.received";
    pub const ENVELOPE_DISPATCHED: &str = "envelope.dispatched";
    pub const ENVELOPE_UNHANDLED: &str = "envelope.unhandled";
    pub const CALLBACK_FAILED: &str = "callback.failed";
    pub const WAITER_STALE: &str = "waiter.stale";
    pub const STREAM_CLOSED: &str = "stream.closed";
}

/// Step Controller Events
pub mod step {
    pub const STEP_AWAITING: &str = "step.awaiting";
    pub const STEP_RESOLVED: &str = "step.resolved";
    pub const STEP_TIMED_OUT: &str = "step.timed_out";
    pub const STEP_CANCELLED: &str = "step.cancelled";
    pub const STEP_ABANDONED: &str = "step.abandoned";
    pub const SUBSCRIPTION_OPENED: &str = "subscription.opened";
    pub const SUBSCRIPTION_CLOSED: &str = "subscription.closed";
}

/// InboundRouter Actor Events
pub mod inbound {
    pub const ROUTER_STARTED: &str = "router.started";
    pub const FRAME_RECEIVED: &str = "frame.received";
    pub const FRAME_DELIVERED: &str = "frame.delivered";
    pub const FRAME_FAILED: &str = "frame.failed";
    pub const REPLY_FAILED: &str = "reply.failed";
}

/// AgentSession Events
pub mod session {
    pub const SESSION_OPENED: &str = "session.opened";
    pub const SESSION_CLOSED: &str = "session.closed";
    pub const ENVELOPE_SENT: &str = "envelope.sent";
    pub const FALLBACK_INVOKED: &str = "fallback.invoked";
    pub const PROBLEM_REPORTED: &str = "problem.reported";
    pub const CONTEXT_LOADED: &str = "context.loaded";
    pub const CONTEXT_SAVED: &str = "context.saved";
}

/// IssuerFlow Events
pub mod workflow {
    pub const FLOW_STARTED: &str = "flow.started";
    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const FLOW_COMPLETED: &str = "flow.completed";
    pub const FLOW_FAILED: &str = "flow.failed";
}
