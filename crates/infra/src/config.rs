//! Runtime configuration for order hosting.

use std::time::Duration;

use thiserror::Error;

use orderdesk_routing::DEFAULT_SHARD_COUNT;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("shard count must be greater than zero")]
    InvalidShardCount,

    #[error("{0} must be greater than zero")]
    InvalidTimeout(&'static str),
}

/// Order hosting configuration.
///
/// Built once at startup and handed to [`crate::OrderShards::new`]. The shard
/// count cannot change while entities are live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdersConfig {
    shard_count: u32,
    /// How long a caller waits for a reply.
    ask_timeout: Duration,
    /// Idle period after which an entity stops; `None` keeps entities forever.
    passivation: Option<Duration>,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            ask_timeout: Duration::from_secs(5),
            passivation: None,
        }
    }
}

impl OrdersConfig {
    pub fn with_shard_count(mut self, shard_count: u32) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn with_ask_timeout(mut self, timeout: Duration) -> Self {
        self.ask_timeout = timeout;
        self
    }

    pub fn with_passivation(mut self, idle: Duration) -> Self {
        self.passivation = Some(idle);
        self
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn ask_timeout(&self) -> Duration {
        self.ask_timeout
    }

    pub fn passivation(&self) -> Option<Duration> {
        self.passivation
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_count == 0 {
            return Err(ConfigError::InvalidShardCount);
        }
        if self.ask_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("ask timeout"));
        }
        if self.passivation.is_some_and(|idle| idle.is_zero()) {
            return Err(ConfigError::InvalidTimeout("passivation idle period"));
        }
        Ok(())
    }
}
