//! Routing primitives: command envelopes and deterministic shard assignment.
//!
//! Every request for one order id must land on the same partition; that is
//! what lets the host keep exactly one live entity per id.

pub mod envelope;
pub mod shard;

pub use envelope::CommandEnvelope;
pub use shard::{DEFAULT_SHARD_COUNT, ShardId, ShardRouter, ShardRouterError};
