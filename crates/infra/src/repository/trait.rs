use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use orderdesk_core::OrderId;
use orderdesk_orders::{Order, OrderError};

/// Order store operation error.
///
/// Any of these is fatal for the entity that receives it; the entity never
/// retries against possibly inconsistent state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("order store unavailable: {0}")]
    Unavailable(String),

    #[error("order store lock poisoned")]
    Poisoned,
}

impl RepositoryError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn into_order_error(self, order_id: OrderId) -> OrderError {
        OrderError::store_failure(order_id, self.to_string())
    }
}

/// Asynchronous key/value store of orders, keyed by order id.
///
/// - `find` returns `None` for an id that was never written.
/// - `update` upserts and returns the value **as stored**. Backends may
///   transform it (e.g. assign a version); callers must adopt the returned value.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn update(&self, order: Order) -> Result<Order, RepositoryError>;
}

#[async_trait]
impl<R> OrderRepository for Arc<R>
where
    R: OrderRepository + ?Sized,
{
    async fn find(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
        (**self).find(order_id).await
    }

    async fn update(&self, order: Order) -> Result<Order, RepositoryError> {
        (**self).update(order).await
    }
}
