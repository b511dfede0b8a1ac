//! Entity hosting: one live [`OrderEntity`] per order id, grouped by shard.
//!
//! ```text
//! ask(envelope)
//!     ├─ 1. Router picks the shard from the order id
//!     ├─ 2. Lock the shard, locate (or spawn) the entity for the id
//!     ├─ 3. Enqueue the command while still holding the lock
//!     └─ 4. Release the lock, await the reply (bounded by the ask timeout)
//! ```
//!
//! Enqueueing under the shard lock makes lock acquisition order the entity's
//! processing order. A stopped entity (failure or passivation) is replaced on
//! the next command for its id; the successor does not hydrate until the
//! predecessor task has finished, so two entities never touch one id's record
//! at the same time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, warn};

use orderdesk_core::OrderId;
use orderdesk_orders::{Order, OrderCommand, OrderError, OrderItem, OrderResult, ServerId, TableNumber};
use orderdesk_routing::{CommandEnvelope, ShardId, ShardRouter};

use crate::config::{ConfigError, OrdersConfig};
use crate::entity::{EntityExit, EntityHandle, OrderEntity};
use crate::repository::OrderRepository;

#[derive(Debug)]
struct EntityRef {
    incarnation: u64,
    handle: EntityHandle,
    task: Option<JoinHandle<EntityExit>>,
}

#[derive(Debug)]
struct Shard {
    id: ShardId,
    entities: Mutex<HashMap<OrderId, EntityRef>>,
}

impl Shard {
    /// Forget the entity for `order_id` unless it was already replaced.
    fn unregister(&self, order_id: OrderId, incarnation: u64) {
        let Ok(mut entities) = self.entities.lock() else {
            return;
        };
        if entities
            .get(&order_id)
            .is_some_and(|entity| entity.incarnation == incarnation)
        {
            entities.remove(&order_id);
        }
    }
}

/// In-process placement layer for order entities.
#[derive(Debug)]
pub struct OrderShards<R> {
    router: ShardRouter,
    shards: Vec<Arc<Shard>>,
    repository: Arc<R>,
    config: OrdersConfig,
    next_incarnation: AtomicU64,
}

impl<R> OrderShards<R>
where
    R: OrderRepository + 'static,
{
    pub fn new(repository: Arc<R>, config: OrdersConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let router =
            ShardRouter::new(config.shard_count()).map_err(|_| ConfigError::InvalidShardCount)?;

        let shards = (0..config.shard_count())
            .map(|n| {
                Arc::new(Shard {
                    id: ShardId(n),
                    entities: Mutex::new(HashMap::new()),
                })
            })
            .collect();

        Ok(Self {
            router,
            shards,
            repository,
            config,
            next_incarnation: AtomicU64::new(1),
        })
    }

    pub fn shard_for(&self, order_id: &OrderId) -> ShardId {
        self.router.shard_for(order_id)
    }

    /// Number of entities currently registered across all shards.
    pub fn live_entities(&self) -> usize {
        self.shards
            .iter()
            .filter_map(|shard| shard.entities.lock().ok().map(|entities| entities.len()))
            .sum()
    }

    pub fn is_live(&self, order_id: &OrderId) -> bool {
        let shard = &self.shards[self.shard_for(order_id).index()];
        shard
            .entities
            .lock()
            .map(|entities| entities.contains_key(order_id))
            .unwrap_or(false)
    }

    pub async fn open_order(
        &self,
        order_id: OrderId,
        server: ServerId,
        table: TableNumber,
    ) -> OrderResult<Order> {
        self.ask(CommandEnvelope::new(
            order_id,
            OrderCommand::OpenOrder { server, table },
        ))
        .await
    }

    pub async fn add_item(&self, order_id: OrderId, item: OrderItem) -> OrderResult<Order> {
        self.ask(CommandEnvelope::new(
            order_id,
            OrderCommand::AddItemToOrder { item },
        ))
        .await
    }

    pub async fn get_order(&self, order_id: OrderId) -> OrderResult<Order> {
        self.ask(CommandEnvelope::new(order_id, OrderCommand::GetOrder))
            .await
    }

    /// Deliver a command to the entity owning its order id and await the answer.
    ///
    /// On `Timeout` the command stays queued and may still be applied.
    pub async fn ask(&self, envelope: CommandEnvelope<OrderCommand>) -> OrderResult<Order> {
        let shard_id = self.router.route(&envelope);
        let (order_id, command) = envelope.into_parts();
        let reply = self.deliver(shard_id, order_id, command)?;

        match tokio::time::timeout(self.config.ask_timeout(), reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OrderError::Unavailable(order_id)),
            Err(_) => {
                warn!(order_id = %order_id, shard = %shard_id, "order ask timed out");
                Err(OrderError::Timeout(order_id))
            }
        }
    }

    fn deliver(
        &self,
        shard_id: ShardId,
        order_id: OrderId,
        command: OrderCommand,
    ) -> OrderResult<oneshot::Receiver<OrderResult<Order>>> {
        let shard = &self.shards[shard_id.index()];
        let mut entities = shard
            .entities
            .lock()
            .map_err(|_| OrderError::Unavailable(order_id))?;

        let command = match entities.get(&order_id) {
            Some(entity) => match entity.handle.send(command) {
                Ok(reply) => return Ok(reply),
                Err(command) => command,
            },
            None => command,
        };

        let predecessor = entities
            .remove(&order_id)
            .and_then(|mut stopped| stopped.task.take());
        let (entity, reply) = self.spawn_entity(shard, order_id, command, predecessor)?;
        entities.insert(order_id, entity);

        Ok(reply)
    }

    /// Start a new incarnation with `first` already in its mailbox.
    fn spawn_entity(
        &self,
        shard: &Arc<Shard>,
        order_id: OrderId,
        first: OrderCommand,
        predecessor: Option<JoinHandle<EntityExit>>,
    ) -> OrderResult<(EntityRef, oneshot::Receiver<OrderResult<Order>>)> {
        let incarnation = self.next_incarnation.fetch_add(1, Ordering::Relaxed);
        let (entity, handle) = OrderEntity::new(
            order_id,
            Arc::clone(&self.repository),
            self.config.passivation(),
        );
        // Queued before the task exists, so a missing order is not released
        // before its first command is read.
        let reply = handle
            .send(first)
            .map_err(|_| OrderError::Unavailable(order_id))?;

        let span = tracing::debug_span!(
            "order_entity",
            order_id = %order_id,
            shard = %shard.id,
            incarnation
        );
        let registry = Arc::clone(shard);
        let task = tokio::spawn(
            async move {
                if let Some(previous) = predecessor {
                    // Fence: the old incarnation must be gone before we read the store.
                    if let Err(err) = previous.await {
                        warn!(error = %err, "previous order entity did not stop cleanly");
                    }
                }
                debug!("order entity started");
                let exit = entity.run().await;
                debug!(?exit, "order entity stopped");
                registry.unregister(order_id, incarnation);
                exit
            }
            .instrument(span),
        );

        let entity = EntityRef {
            incarnation,
            handle,
            task: Some(task),
        };
        Ok((entity, reply))
    }
}
