//! Restaurant orders domain module.
//!
//! This crate contains the order model and the rules for the three supported
//! commands, implemented purely as deterministic domain logic (no IO, no async,
//! no storage). Serialising those rules per order id is the job of the entity
//! in `orderdesk-infra`.

pub mod error;
pub mod order;

pub use error::{OrderError, OrderResult};
pub use order::{Decision, Order, OrderCommand, OrderItem, ServerId, TableNumber};
