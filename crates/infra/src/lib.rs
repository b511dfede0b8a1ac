//! Infrastructure layer: order store boundary, per-order entities, shard hosting.

pub mod config;
pub mod entity;
pub mod repository;
pub mod sharding;

pub use config::{ConfigError, OrdersConfig};
pub use entity::{EntityExit, EntityHandle, OrderEntity};
pub use repository::{InMemoryOrderRepository, OrderRepository, RepositoryError};
pub use sharding::OrderShards;
