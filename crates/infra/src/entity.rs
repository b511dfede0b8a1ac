//! Per-order entity: the single writer for one order id.
//!
//! ```text
//! Loading ──find ok──▶ Running ──mutation──▶ Waiting ──update ok──▶ Running
//!    │                                          │
//!    └──find err──▶ Failed ◀──update err────────┘
//! ```
//!
//! While `Loading` or `Waiting`, every incoming command is appended to a FIFO
//! stash. The stash is drained oldest-first before the mailbox is read again,
//! so commands for one id are applied strictly in arrival order.
//!
//! An entity whose order does not exist stops once nothing is queued for it.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use orderdesk_core::OrderId;
use orderdesk_orders::{Decision, Order, OrderCommand, OrderError, OrderResult};

use crate::repository::OrderRepository;

/// A command plus the channel its single answer is written to.
#[derive(Debug)]
pub(crate) struct Request {
    command: OrderCommand,
    reply: oneshot::Sender<OrderResult<Order>>,
}

/// Why an entity task ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntityExit {
    /// Idle for the passivation period; mailbox drained.
    Passivated,
    /// The order does not exist and nothing was left to serve.
    Vacant,
    /// Every handle was dropped.
    MailboxClosed,
    /// A store call failed; the entity must be rebuilt from the store.
    Failed,
}

/// Sending side of an entity's mailbox.
#[derive(Debug, Clone)]
pub struct EntityHandle {
    order_id: OrderId,
    mailbox: mpsc::UnboundedSender<Request>,
}

impl EntityHandle {
    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// Enqueue a command without waiting for its answer.
    ///
    /// Gives the command back if the entity has stopped accepting work.
    pub fn send(
        &self,
        command: OrderCommand,
    ) -> Result<oneshot::Receiver<OrderResult<Order>>, OrderCommand> {
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(Request { command, reply })
            .map_err(|rejected| rejected.0.command)?;
        Ok(rx)
    }

    /// Enqueue a command and wait for its answer.
    pub async fn ask(&self, command: OrderCommand) -> OrderResult<Order> {
        let rx = self
            .send(command)
            .map_err(|_| OrderError::Unavailable(self.order_id))?;
        rx.await
            .unwrap_or(Err(OrderError::Unavailable(self.order_id)))
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

/// State machine for one order id. Consumed by [`OrderEntity::run`].
#[derive(Debug)]
pub struct OrderEntity<R> {
    order_id: OrderId,
    repository: Arc<R>,
    state: Option<Order>,
    stash: VecDeque<Request>,
    mailbox: mpsc::UnboundedReceiver<Request>,
    passivate_after: Option<Duration>,
    stopping: Option<EntityExit>,
}

impl<R> OrderEntity<R>
where
    R: OrderRepository + 'static,
{
    pub fn new(
        order_id: OrderId,
        repository: Arc<R>,
        passivate_after: Option<Duration>,
    ) -> (Self, EntityHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let entity = Self {
            order_id,
            repository,
            state: None,
            stash: VecDeque::new(),
            mailbox: rx,
            passivate_after,
            stopping: None,
        };
        let handle = EntityHandle {
            order_id,
            mailbox: tx,
        };
        (entity, handle)
    }

    /// Hydrate, then serve commands until the entity stops.
    pub async fn run(mut self) -> EntityExit {
        let repository = Arc::clone(&self.repository);
        let order_id = self.order_id;
        let hydrated = self
            .stash_until(async move { repository.find(order_id).await })
            .await;

        match hydrated {
            Ok(state) => {
                debug!(
                    found = state.is_some(),
                    stashed = self.stash.len(),
                    "order hydrated"
                );
                self.state = state;
            }
            Err(err) => {
                error!(error = %err, "order hydration failed");
                let failure = err.into_order_error(self.order_id);
                self.fail(&failure);
                return EntityExit::Failed;
            }
        }

        loop {
            let request = match self.stash.pop_front() {
                Some(request) => request,
                None => match self.next_request().await {
                    Some(request) => request,
                    None => break,
                },
            };

            if self.handle(request).await.is_err() {
                return EntityExit::Failed;
            }
        }

        self.stopping.unwrap_or(EntityExit::MailboxClosed)
    }

    /// Apply one command against cached state. `Err` means the entity failed.
    async fn handle(&mut self, request: Request) -> Result<(), ()> {
        let Request { command, reply } = request;

        match command.decide(self.order_id, self.state.as_ref()) {
            Ok(Decision::Reply(order)) => {
                let _ = reply.send(Ok(order));
                Ok(())
            }
            Err(rejection) => {
                debug!(command = command.name(), error = %rejection, "command rejected");
                let _ = reply.send(Err(rejection));
                Ok(())
            }
            Ok(Decision::Persist(order)) => {
                let repository = Arc::clone(&self.repository);
                let persisted = self
                    .stash_until(async move { repository.update(order).await })
                    .await;

                match persisted {
                    Ok(stored) => {
                        self.state = Some(stored.clone());
                        let _ = reply.send(Ok(stored));
                        Ok(())
                    }
                    Err(err) => {
                        error!(command = command.name(), error = %err, "order update failed");
                        // Close before answering: once the caller sees the failure,
                        // its next command must reach a fresh entity.
                        self.fail(&OrderError::Unavailable(self.order_id));
                        let _ = reply.send(Err(err.into_order_error(self.order_id)));
                        Err(())
                    }
                }
            }
        }
    }

    /// Await `fut` while stashing whatever arrives in the mailbox meanwhile.
    async fn stash_until<F>(&mut self, fut: F) -> F::Output
    where
        F: Future,
    {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                output = &mut fut => return output,
                Some(request) = self.mailbox.recv() => self.stash.push_back(request),
            }
        }
    }

    async fn next_request(&mut self) -> Option<Request> {
        if self.stopping.is_some() {
            return self.mailbox.recv().await;
        }

        if self.state.is_none() {
            // Nothing is cached for a missing order, so keep it only while busy.
            return match self.mailbox.try_recv() {
                Ok(request) => Some(request),
                Err(_) => {
                    debug!("releasing entity for missing order");
                    self.stop(EntityExit::Vacant).await
                }
            };
        }

        match self.passivate_after {
            Some(idle) => match tokio::time::timeout(idle, self.mailbox.recv()).await {
                Ok(request) => request,
                Err(_) => {
                    debug!(idle_ms = idle.as_millis() as u64, "passivating idle order entity");
                    self.stop(EntityExit::Passivated).await
                }
            },
            None => self.mailbox.recv().await,
        }
    }

    /// Close the mailbox; anything already queued is still served.
    async fn stop(&mut self, reason: EntityExit) -> Option<Request> {
        self.stopping = Some(reason);
        self.mailbox.close();
        self.mailbox.recv().await
    }

    /// Stop accepting work and answer everything still pending with `failure`.
    fn fail(&mut self, failure: &OrderError) {
        self.mailbox.close();

        let mut abandoned = 0usize;
        while let Some(request) = self.stash.pop_front() {
            let _ = request.reply.send(Err(failure.clone()));
            abandoned += 1;
        }
        while let Ok(request) = self.mailbox.try_recv() {
            let _ = request.reply.send(Err(failure.clone()));
            abandoned += 1;
        }

        warn!(abandoned, "order entity stopped after store failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Semaphore;
    use tokio::task::JoinHandle;

    use orderdesk_orders::{OrderItem, ServerId, TableNumber};

    use crate::repository::{InMemoryOrderRepository, RepositoryError};

    /// Store whose calls block until the test hands out permits.
    struct GatedRepository {
        inner: InMemoryOrderRepository,
        find_gate: Semaphore,
        update_gate: Semaphore,
        fail_find: AtomicBool,
        fail_update: AtomicBool,
        finds: AtomicUsize,
    }

    impl Default for GatedRepository {
        fn default() -> Self {
            Self {
                inner: InMemoryOrderRepository::new(),
                find_gate: Semaphore::new(0),
                update_gate: Semaphore::new(0),
                fail_find: AtomicBool::new(false),
                fail_update: AtomicBool::new(false),
                finds: AtomicUsize::new(0),
            }
        }
    }

    impl GatedRepository {
        fn open_gates() -> Self {
            let repo = Self::default();
            repo.find_gate.add_permits(1_000);
            repo.update_gate.add_permits(1_000);
            repo
        }

        fn closed_find() -> Self {
            let repo = Self::default();
            repo.update_gate.add_permits(1_000);
            repo
        }

        fn closed_update() -> Self {
            let repo = Self::default();
            repo.find_gate.add_permits(1_000);
            repo
        }
    }

    #[async_trait]
    impl OrderRepository for GatedRepository {
        async fn find(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            self.find_gate
                .acquire()
                .await
                .map_err(|_| RepositoryError::unavailable("gate closed"))?
                .forget();
            if self.fail_find.load(Ordering::SeqCst) {
                return Err(RepositoryError::unavailable("find refused"));
            }
            self.inner.find(order_id).await
        }

        async fn update(&self, order: Order) -> Result<Order, RepositoryError> {
            self.update_gate
                .acquire()
                .await
                .map_err(|_| RepositoryError::unavailable("gate closed"))?
                .forget();
            if self.fail_update.load(Ordering::SeqCst) {
                return Err(RepositoryError::unavailable("update refused"));
            }
            self.inner.update(order).await
        }
    }

    fn spawn(
        repo: &Arc<GatedRepository>,
        passivate_after: Option<Duration>,
    ) -> (EntityHandle, JoinHandle<EntityExit>) {
        spawn_for(OrderId::new(), repo, passivate_after)
    }

    fn spawn_for(
        order_id: OrderId,
        repo: &Arc<GatedRepository>,
        passivate_after: Option<Duration>,
    ) -> (EntityHandle, JoinHandle<EntityExit>) {
        let (entity, handle) = OrderEntity::new(order_id, Arc::clone(repo), passivate_after);
        (handle, tokio::spawn(entity.run()))
    }

    /// Spawn with `first` already queued, as the host does.
    fn start(
        repo: &Arc<GatedRepository>,
        passivate_after: Option<Duration>,
        first: OrderCommand,
    ) -> (
        EntityHandle,
        oneshot::Receiver<OrderResult<Order>>,
        JoinHandle<EntityExit>,
    ) {
        let (entity, handle) = OrderEntity::new(OrderId::new(), Arc::clone(repo), passivate_after);
        let reply = handle.send(first).unwrap();
        (handle, reply, tokio::spawn(entity.run()))
    }

    fn open(table: u32) -> OrderCommand {
        OrderCommand::OpenOrder {
            server: ServerId::new("Carol").unwrap(),
            table: TableNumber(table),
        }
    }

    fn add(name: &str) -> OrderCommand {
        OrderCommand::AddItemToOrder {
            item: OrderItem::new(name),
        }
    }

    fn names(order: &Order) -> Vec<&str> {
        order.items().iter().map(|i| i.name.as_str()).collect()
    }

    #[tokio::test]
    async fn commands_during_hydration_replay_in_arrival_order() {
        let repo = Arc::new(GatedRepository::closed_find());
        let (handle, _task) = spawn(&repo, None);

        let opened = handle.send(open(5)).unwrap();
        let burger = handle.send(add("Burger")).unwrap();
        let duplicate = handle.send(open(5)).unwrap();
        let fries = handle.send(add("Fries")).unwrap();
        let read = handle.send(OrderCommand::GetOrder).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        repo.find_gate.add_permits(1);

        let opened = opened.await.unwrap().unwrap();
        assert!(opened.items().is_empty());
        assert_eq!(opened.table(), TableNumber(5));

        assert_eq!(names(&burger.await.unwrap().unwrap()), ["Burger"]);
        assert_eq!(
            duplicate.await.unwrap(),
            Err(OrderError::DuplicateOrder(handle.order_id()))
        );
        assert_eq!(names(&fries.await.unwrap().unwrap()), ["Burger", "Fries"]);

        let read = read.await.unwrap().unwrap();
        assert_eq!(names(&read), ["Burger", "Fries"]);
        assert_eq!(read.version(), 3);
    }

    #[tokio::test]
    async fn open_on_a_stored_order_is_rejected_before_hydration_completes() {
        let repo = Arc::new(GatedRepository::closed_find());
        let id = OrderId::new();
        let stored = repo
            .inner
            .update(Order::open(id, ServerId::new("Carol").unwrap(), TableNumber(2)))
            .await
            .unwrap();
        let (handle, _task) = spawn_for(id, &repo, None);

        let reopened = handle.send(open(2)).unwrap();
        let added = handle.send(add("Tea")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        repo.find_gate.add_permits(1);

        assert_eq!(reopened.await.unwrap(), Err(OrderError::DuplicateOrder(id)));
        let added = added.await.unwrap().unwrap();
        assert_eq!(names(&added), ["Tea"]);
        assert_eq!(added.version(), stored.version() + 1);
    }

    #[tokio::test]
    async fn reads_wait_behind_an_in_flight_mutation() {
        let repo = Arc::new(GatedRepository::closed_update());
        let (handle, opened, _task) = start(&repo, None, open(1));
        let mut read = handle.send(OrderCommand::GetOrder).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(read.try_recv().is_err(), "read overtook the pending open");

        repo.update_gate.add_permits(1);
        let opened = opened.await.unwrap().unwrap();
        assert_eq!(opened.version(), 1);
        assert_eq!(read.await.unwrap(), Ok(opened));
    }

    #[tokio::test]
    async fn rejections_keep_the_entity_running() {
        let repo = Arc::new(GatedRepository::open_gates());
        let (handle, opened, task) = start(&repo, None, open(3));
        let id = handle.order_id();

        opened.await.unwrap().unwrap();
        assert_eq!(handle.ask(open(3)).await, Err(OrderError::DuplicateOrder(id)));
        assert_eq!(names(&handle.ask(add("Soup")).await.unwrap()), ["Soup"]);
        assert!(!handle.is_closed());

        drop(handle);
        assert_eq!(task.await.unwrap(), EntityExit::MailboxClosed);
    }

    #[tokio::test]
    async fn missing_order_entity_stops_once_idle() {
        let repo = Arc::new(GatedRepository::closed_find());
        let (handle, task) = spawn(&repo, None);
        let id = handle.order_id();

        let read = handle.send(OrderCommand::GetOrder).unwrap();
        let soup = handle.send(add("Soup")).unwrap();
        repo.find_gate.add_permits(1);

        assert_eq!(read.await.unwrap(), Err(OrderError::OrderNotFound(id)));
        assert_eq!(soup.await.unwrap(), Err(OrderError::OrderNotFound(id)));
        assert_eq!(task.await.unwrap(), EntityExit::Vacant);
        assert!(handle.is_closed());
        assert!(handle.send(OrderCommand::GetOrder).is_err());
    }

    #[tokio::test]
    async fn open_queued_behind_a_miss_keeps_the_entity() {
        let repo = Arc::new(GatedRepository::closed_find());
        let (handle, _task) = spawn(&repo, None);
        let id = handle.order_id();

        let read = handle.send(OrderCommand::GetOrder).unwrap();
        let opened = handle.send(open(6)).unwrap();
        repo.find_gate.add_permits(1);

        assert_eq!(read.await.unwrap(), Err(OrderError::OrderNotFound(id)));
        let opened = opened.await.unwrap().unwrap();
        assert!(!handle.is_closed());
        assert_eq!(handle.ask(OrderCommand::GetOrder).await, Ok(opened));
    }

    #[tokio::test]
    async fn hydration_failure_fails_every_stashed_command() {
        let repo = Arc::new(GatedRepository::closed_find());
        repo.fail_find.store(true, Ordering::SeqCst);
        let (handle, task) = spawn(&repo, None);
        let id = handle.order_id();

        let first = handle.send(OrderCommand::GetOrder).unwrap();
        let second = handle.send(open(9)).unwrap();
        repo.find_gate.add_permits(1);

        assert!(matches!(
            first.await.unwrap(),
            Err(OrderError::StoreFailure { order_id, .. }) if order_id == id
        ));
        assert!(matches!(
            second.await.unwrap(),
            Err(OrderError::StoreFailure { .. })
        ));
        assert_eq!(task.await.unwrap(), EntityExit::Failed);
        assert!(handle.is_closed());
        assert_eq!(handle.ask(OrderCommand::GetOrder).await, Err(OrderError::Unavailable(id)));
    }

    #[tokio::test]
    async fn update_failure_is_fatal_and_stash_is_not_salvaged() {
        let repo = Arc::new(GatedRepository::closed_update());
        repo.fail_update.store(true, Ordering::SeqCst);
        let (handle, opened, task) = start(&repo, None, open(4));
        let id = handle.order_id();

        let queued = handle.send(OrderCommand::GetOrder).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        repo.update_gate.add_permits(1);

        assert!(matches!(
            opened.await.unwrap(),
            Err(OrderError::StoreFailure { .. })
        ));
        assert_eq!(queued.await.unwrap(), Err(OrderError::Unavailable(id)));
        assert_eq!(task.await.unwrap(), EntityExit::Failed);
        assert_eq!(repo.inner.len(), Ok(0));
    }

    #[tokio::test]
    async fn idle_entity_passivates() {
        let repo = Arc::new(GatedRepository::open_gates());
        let (handle, opened, task) = start(&repo, Some(Duration::from_millis(30)), open(2));

        opened.await.unwrap().unwrap();

        assert_eq!(task.await.unwrap(), EntityExit::Passivated);
        assert!(handle.is_closed());
        assert!(handle.send(OrderCommand::GetOrder).is_err());
        assert_eq!(repo.finds.load(Ordering::SeqCst), 1);
    }
}
