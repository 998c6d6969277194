//! Workflows driven over an agent session

pub mod issuer;
pub mod simulator;

pub use issuer::{FlowObserver, FlowStep, IssuanceOutcome, IssuerFlow, IssuerIdentity, IssuerSettings, SilentObserver};
pub use simulator::simulated_verity;
