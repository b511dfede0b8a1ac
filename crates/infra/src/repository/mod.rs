//! Durable order store boundary.
//!
//! The entity for an order id is the only writer of that id's record, so the
//! store needs no locking or transactions of its own.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryOrderRepository;
pub use r#trait::{OrderRepository, RepositoryError};
