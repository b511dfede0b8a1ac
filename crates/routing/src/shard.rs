//! Deterministic shard assignment.
//!
//! `shard = H(order_id) mod shard_count`, where `H` is the first eight bytes of
//! SHA-256 over the id's 16 raw bytes. The hash is fixed across processes,
//! platforms and releases, unlike `std`'s randomly seeded hasher.
//!
//! Changing `shard_count` moves almost every id to a different shard. Treat it
//! as a maintenance event: drain all entities first.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use orderdesk_core::OrderId;

use crate::envelope::CommandEnvelope;

/// Partition count used when none is configured.
pub const DEFAULT_SHARD_COUNT: u32 = 30;

/// Partition number in `0..shard_count`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub u32);

impl ShardId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for ShardId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShardRouterError {
    #[error("shard count must be greater than zero")]
    ZeroShards,
}

/// Maps order ids to shards for a fixed shard count.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShardRouter {
    shard_count: u32,
}

impl ShardRouter {
    pub fn new(shard_count: u32) -> Result<Self, ShardRouterError> {
        if shard_count == 0 {
            return Err(ShardRouterError::ZeroShards);
        }
        Ok(Self { shard_count })
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn shard_for(&self, order_id: &OrderId) -> ShardId {
        let digest = Sha256::digest(order_id.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let value = u64::from_be_bytes(prefix);
        ShardId((value % u64::from(self.shard_count)) as u32)
    }

    /// Only the envelope's id is read; the command is never inspected.
    pub fn route<C>(&self, envelope: &CommandEnvelope<C>) -> ShardId {
        self.shard_for(&envelope.order_id())
    }
}

impl Default for ShardRouter {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
        }
    }
}
