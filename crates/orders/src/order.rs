use serde::{Deserialize, Serialize};

use orderdesk_core::{DomainError, DomainResult, OrderId};

use crate::error::OrderError;

/// Server (waiter) responsible for an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("server name must not be empty"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ServerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Table the order is served at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableNumber(pub u32);

impl core::fmt::Display for TableNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "table {}", self.0)
    }
}

/// Item appended to an order. No identity beyond its value and position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub special_instructions: String,
}

impl OrderItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            special_instructions: String::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.special_instructions = instructions.into();
        self
    }
}

/// An open restaurant order.
///
/// Server and table are fixed once opened; `items` is append-only.
/// `version` is assigned by the store and is 0 until first persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    server: ServerId,
    table: TableNumber,
    items: Vec<OrderItem>,
    #[serde(default)]
    version: u64,
}

impl Order {
    /// A freshly opened order with no items.
    pub fn open(id: OrderId, server: ServerId, table: TableNumber) -> Self {
        Self {
            id,
            server,
            table,
            items: Vec::new(),
            version: 0,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn table(&self) -> TableNumber {
        self.table
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Copy of this order with `item` appended at the end.
    pub fn with_item(&self, item: OrderItem) -> Self {
        let mut next = self.clone();
        next.items.push(item);
        next
    }

    /// Copy of this order stamped with a store-assigned version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

/// Commands accepted by an order entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    OpenOrder { server: ServerId, table: TableNumber },
    AddItemToOrder { item: OrderItem },
    GetOrder,
}

impl OrderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::OpenOrder { .. } => "open_order",
            OrderCommand::AddItemToOrder { .. } => "add_item_to_order",
            OrderCommand::GetOrder => "get_order",
        }
    }

    /// Decide what a command does against the cached state of `order_id`.
    ///
    /// Pure: never touches the store. A `Persist` decision must be written
    /// before the caller sees it; a `Reply` can be answered immediately.
    pub fn decide(&self, order_id: OrderId, state: Option<&Order>) -> Result<Decision, OrderError> {
        match (self, state) {
            (OrderCommand::OpenOrder { .. }, Some(_)) => Err(OrderError::DuplicateOrder(order_id)),
            (OrderCommand::OpenOrder { server, table }, None) => Ok(Decision::Persist(
                Order::open(order_id, server.clone(), *table),
            )),
            (OrderCommand::AddItemToOrder { item }, Some(order)) => {
                Ok(Decision::Persist(order.with_item(item.clone())))
            }
            (OrderCommand::GetOrder, Some(order)) => Ok(Decision::Reply(order.clone())),
            (OrderCommand::AddItemToOrder { .. } | OrderCommand::GetOrder, None) => {
                Err(OrderError::OrderNotFound(order_id))
            }
        }
    }
}

/// Result of deciding a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Write this order to the store, then answer with what the store returns.
    Persist(Order),
    /// Answer with this order; nothing changes.
    Reply(Order),
}
