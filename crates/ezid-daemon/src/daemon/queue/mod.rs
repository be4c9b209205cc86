//! Destination queue draining.
//!
//! One [`QueueService`] runs per enabled destination. Its coordinator claims
//! batches of ready rows from the store (at most one row per identifier, so
//! rows for the same identifier never run concurrently) and hands them to a
//! [`WorkerPool`]; each worker dispatches a row to the destination handler
//! and writes the result back before taking the next one.
//!
//! Destinations that answer asynchronously (Crossref) leave rows submitted
//! under a batch id; the coordinator polls those every poll interval.

pub mod coordinator;
pub mod processor;
pub mod request;
#[cfg(test)]
pub(crate) mod testing;

use crate::daemon::{
    config::QueueConfig,
    pool::{manager::WorkerPool, worker::worker_loop},
};
use ezid::{Destination, Store, TimeSource};
use ezid_daemon_core::{Handler, Result};
use processor::RowContext;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct QueueService {
    destination: Destination,
    polls: bool,
    pool: WorkerPool,
    ctx: RowContext,
    config: QueueConfig,
}

impl QueueService {
    /// Spawns `config.workers` workers for `handler`. Must be called inside a
    /// Tokio runtime.
    pub fn new(
        handler: Arc<dyn Handler>,
        store: Arc<dyn Store>,
        clock: Arc<dyn TimeSource>,
        config: QueueConfig,
    ) -> Self {
        let destination = handler.destination();
        let polls = handler.polls();
        let ctx = RowContext {
            handler,
            store,
            clock,
        };

        let mut workers = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(worker_loop(worker_id, rx, ctx.clone()));
            workers.push(tx);
        }
        let pool = WorkerPool::new(workers, CancellationToken::new(), config.shutdown_timeout);

        Self {
            destination,
            polls,
            pool,
            ctx,
            config,
        }
    }

    pub const fn destination(&self) -> Destination {
        self.destination
    }

    /// Drains the queue until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        coordinator::run(self, token).await;
    }

    /// Stops the workers after their current rows.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(destination = %self.destination, "shutting down queue workers");
        self.pool.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::queue::testing::{ScriptedHandler, Step, seeded_store};
    use ezid::{ClaimPolicy, Identifier, IdentifierName, ManualClock, Operation, QueueStatus};
    use std::time::Duration;

    fn config() -> QueueConfig {
        QueueConfig {
            workers: 3,
            batch_size: 10,
            idle_sleep: Duration::from_millis(10),
            policy: ClaimPolicy::default(),
            poll_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(1),
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn drains_queue_in_per_identifier_order() {
        let store = seeded_store(&["ark:/99999/fk4a", "ark:/99999/fk4b", "ark:/99999/fk4c"]);
        let name = IdentifierName::parse("ark:/99999/fk4a").unwrap();
        let mut record = Identifier::new(&name, 1_000);
        record.target = "http://example.com/changed".into();
        store
            .insert_identifier_and_enqueue_all(&record, Operation::Update, 1_001)
            .unwrap();

        let handler = Arc::new(ScriptedHandler::always(Step::Succeed));
        let service = Arc::new(QueueService::new(
            Arc::clone(&handler) as Arc<dyn Handler>,
            Arc::clone(&store),
            Arc::new(ManualClock::new(2_000)),
            config(),
        ));
        let token = CancellationToken::new();
        let task = tokio::spawn({
            let service = Arc::clone(&service);
            let token = token.clone();
            async move { service.run(token).await }
        });

        wait_until(|| {
            store
                .list_queue(Destination::Binder)
                .unwrap()
                .iter()
                .all(|row| row.status == QueueStatus::Success)
        })
        .await;
        token.cancel();
        task.await.unwrap();
        service.shutdown().await.unwrap();

        let calls = handler.calls();
        assert_eq!(calls.len(), 4);
        let for_a: Vec<_> = calls
            .iter()
            .filter(|(id, _)| id == "ark:/99999/fk4a")
            .map(|(_, op)| *op)
            .collect();
        assert_eq!(for_a, vec![Operation::Create, Operation::Update]);
    }

    #[tokio::test]
    async fn awaiting_rows_are_polled_to_completion() {
        let store = seeded_store(&["doi:10.5072/FK2A"]);
        let handler = Arc::new(ScriptedHandler::sequence([Step::Await, Step::Succeed]));
        let service = Arc::new(QueueService::new(
            handler as Arc<dyn Handler>,
            Arc::clone(&store),
            Arc::new(ManualClock::new(2_000)),
            config(),
        ));
        let token = CancellationToken::new();
        let task = tokio::spawn({
            let service = Arc::clone(&service);
            let token = token.clone();
            async move { service.run(token).await }
        });

        wait_until(|| {
            store.list_queue(Destination::Binder).unwrap()[0].status == QueueStatus::Success
        })
        .await;
        token.cancel();
        task.await.unwrap();
        service.shutdown().await.unwrap();
    }
}
