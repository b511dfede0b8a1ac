use serde::{Deserialize, Serialize};

use orderdesk_core::OrderId;

/// Routing wrapper: the order a command targets, plus the command itself.
///
/// Transient. The router only reads `order_id`; the destination entity
/// strips the id and dispatches the bare command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope<C> {
    order_id: OrderId,
    command: C,
}

impl<C> CommandEnvelope<C> {
    pub fn new(order_id: OrderId, command: C) -> Self {
        Self { order_id, command }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn command(&self) -> &C {
        &self.command
    }

    pub fn into_parts(self) -> (OrderId, C) {
        (self.order_id, self.command)
    }
}
