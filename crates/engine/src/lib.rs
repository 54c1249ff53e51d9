//! Delivery orchestration engine.
//!
//! Accepted requests become pending deliveries; the orchestrator resolves
//! each one into terminal history rows, rerouting generic messages and
//! letters on the way.

pub mod archiver;
pub mod batch;
pub mod capability;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod letter_routing;
pub mod message_routing;
pub mod orchestrator;
pub mod repository;
pub mod status;
