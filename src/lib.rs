//! # Verity Flow
//!
//! Routes inbound protocol messages from a remote agent to the code waiting
//! for them, and drives multi-step protocol workflows on top of that routing.
//!
//! - Handlers, one-shot waiters and subscriptions register against a
//!   `(family, version)` key in a per-session registry
//! - The dispatcher fans each inbound envelope out to every live entry on
//!   its key, resolving each waiter at most once
//! - Workflow steps suspend on a reply with an optional deadline and can be
//!   cancelled from outside
//! - An actor serializes inbound frames so each key sees replies in arrival order

pub mod actor;
pub mod adapter;
pub mod domain;
pub mod port;
pub mod service;
pub mod workflow;

pub use adapter::{
    dispatcher::{DispatchReport, Dispatcher},
    registry::{EntryId, HandlerRegistry},
    step::{PendingStep, StepCanceller, StepController, StepState, Subscription}
};
pub use domain::{
    envelope::{Envelope, HandlerKey, MessageType, Reply},
    error::FlowError
};
pub use port::handler::MessageHandler;
pub use service::session::AgentSession;
