use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use orderdesk_core::OrderId;
use orderdesk_orders::Order;

use super::r#trait::{OrderRepository, RepositoryError};

/// In-memory order store.
///
/// Intended for tests/dev. Assigns `version = stored + 1` on every update.
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, RepositoryError> {
        let orders = self.orders.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(orders.len())
    }

    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(orders.get(&order_id).cloned())
    }

    async fn update(&self, order: Order) -> Result<Order, RepositoryError> {
        let mut orders = self.orders.write().map_err(|_| RepositoryError::Poisoned)?;

        let current = orders.get(&order.id()).map(Order::version).unwrap_or(0);
        let stored = order.with_version(current + 1);
        orders.insert(stored.id(), stored.clone());

        Ok(stored)
    }
}
