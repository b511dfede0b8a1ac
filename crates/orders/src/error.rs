use thiserror::Error;

use orderdesk_core::OrderId;

pub type OrderResult<T> = Result<T, OrderError>;

/// Outcome of an order command that did not produce an `Order`.
///
/// `DuplicateOrder` and `OrderNotFound` are business rejections: the entity
/// stays healthy. `StoreFailure` is fatal for the entity that hit it.
/// `Unavailable` and `Timeout` describe delivery, not business state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("order {0} already exists")]
    DuplicateOrder(OrderId),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order store failed for {order_id}: {reason}")]
    StoreFailure { order_id: OrderId, reason: String },

    /// The entity stopped before it could answer (failure or shutdown).
    #[error("order {0} is unavailable")]
    Unavailable(OrderId),

    /// The caller stopped waiting. The command may still be applied.
    #[error("timed out waiting for order {0}")]
    Timeout(OrderId),
}

impl OrderError {
    pub fn store_failure(order_id: OrderId, reason: impl Into<String>) -> Self {
        Self::StoreFailure {
            order_id,
            reason: reason.into(),
        }
    }
}
