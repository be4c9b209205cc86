use crate::daemon::telemetry::record_queue_row;
use core::{any::Any, future::Future, panic::AssertUnwindSafe};
use ezid::{QueueEntry, QueueStatus, StatusUpdate, Store, TimeSource};
use ezid_daemon_core::{Disposition, Error, Handler, Result, dispatch, excerpt, status_update};
use futures::FutureExt;
use std::sync::Arc;

/// What a worker needs to finish a row.
#[derive(Clone)]
pub struct RowContext {
    pub handler: Arc<dyn Handler>,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn TimeSource>,
}

/// Dispatches a claimed row and writes back its status.
///
/// A missing snapshot, a local error or a panicking handler becomes a
/// retryable failure on the row; only a failed status write is returned as
/// an error.
pub async fn process_row(ctx: &RowContext, entry: QueueEntry) -> Result<QueueStatus> {
    let result = match ctx.store.get_ref_identifier(entry.ref_id) {
        Ok(Some(snapshot)) => {
            guarded(dispatch(ctx.handler.as_ref(), entry.operation, &snapshot)).await
        }
        Ok(None) => Err(Error::local(format!("snapshot {} is missing", entry.ref_id))),
        Err(e) => Err(e.into()),
    };
    log_result(&entry, &result);
    let update = status_update(&result, ctx.clock.now_secs());
    write(ctx, &entry, &update)
}

/// Asks the destination about a row awaiting a result.
///
/// A transient error keeps the row waiting under its batch id instead of
/// failing it, so a flaky results endpoint never causes a second deposit.
pub async fn poll_row(ctx: &RowContext, entry: QueueEntry) -> Result<QueueStatus> {
    let result = match ctx.store.get_ref_identifier(entry.ref_id) {
        Ok(Some(snapshot)) => guarded(ctx.handler.poll(&entry, &snapshot)).await,
        Ok(None) => Err(Error::local(format!("snapshot {} is missing", entry.ref_id))),
        Err(e) => Err(e.into()),
    };
    log_result(&entry, &result);
    let now = ctx.clock.now_secs();
    let update = match (&result, &entry.batch_id) {
        (Err(e), Some(batch_id)) if !e.is_permanent() => {
            StatusUpdate::awaiting(now, batch_id.clone(), excerpt(&e.to_string()))
        }
        _ => status_update(&result, now),
    };
    write(ctx, &entry, &update)
}

/// Runs a handler future, turning a panic into a local error.
async fn guarded<F>(fut: F) -> Result<Disposition>
where
    F: Future<Output = Result<Disposition>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(Error::local(format!(
            "handler panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

fn log_result(entry: &QueueEntry, result: &Result<Disposition>) {
    match result {
        Ok(disposition) => tracing::debug!(
            destination = %entry.destination,
            seq = entry.seq,
            identifier = %entry.identifier,
            ?disposition,
            "row processed"
        ),
        Err(e) => tracing::warn!(
            destination = %entry.destination,
            seq = entry.seq,
            identifier = %entry.identifier,
            permanent = e.is_permanent(),
            error = %e,
            "row failed"
        ),
    }
}

fn write(ctx: &RowContext, entry: &QueueEntry, update: &StatusUpdate) -> Result<QueueStatus> {
    ctx.store
        .update_status(entry.destination, entry.seq, update)
        .inspect_err(|e| {
            tracing::error!(
                destination = %entry.destination,
                seq = entry.seq,
                error = %e,
                "could not record row status"
            );
        })?;
    record_queue_row(entry.destination.as_str(), outcome_label(update.status));
    Ok(update.status)
}

const fn outcome_label(status: QueueStatus) -> &'static str {
    match status {
        QueueStatus::Success => "success",
        QueueStatus::Warning => "warning",
        QueueStatus::Failure => "failure",
        QueueStatus::Ignored => "ignored",
        QueueStatus::Submitted => "awaiting",
        QueueStatus::Unsubmitted => "unsubmitted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::queue::testing::{ScriptedHandler, Step, seeded_store};
    use ezid::{ClaimPolicy, Destination, ManualClock};

    fn context(handler: ScriptedHandler, store: &Arc<dyn Store>) -> RowContext {
        RowContext {
            handler: Arc::new(handler),
            store: Arc::clone(store),
            clock: Arc::new(ManualClock::new(2_000)),
        }
    }

    fn claim_one(store: &Arc<dyn Store>) -> QueueEntry {
        let claim = store
            .claim_batch(Destination::Binder, &ClaimPolicy::default(), 1_500, 1)
            .unwrap();
        claim.entries.into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn success_is_recorded() {
        let store = seeded_store(&["ark:/99999/fk4a"]);
        let ctx = context(ScriptedHandler::always(Step::Succeed), &store);
        let entry = claim_one(&store);
        assert_eq!(process_row(&ctx, entry).await.unwrap(), QueueStatus::Success);
        let row = &store.list_queue(Destination::Binder).unwrap()[0];
        assert_eq!(row.status, QueueStatus::Success);
        assert_eq!(row.submit_time, Some(2_000));
    }

    #[tokio::test]
    async fn permanent_and_transient_failures() {
        let store = seeded_store(&["ark:/99999/fk4a", "ark:/99999/fk4b"]);
        let ctx = context(
            ScriptedHandler::sequence([Step::Reject, Step::Unavailable]),
            &store,
        );
        let first = claim_one(&store);
        assert_eq!(process_row(&ctx, first).await.unwrap(), QueueStatus::Failure);
        let second = claim_one(&store);
        assert_eq!(process_row(&ctx, second).await.unwrap(), QueueStatus::Failure);

        let rows = store.list_queue(Destination::Binder).unwrap();
        assert!(rows[0].error_is_permanent);
        assert!(!rows[1].error_is_permanent);
        assert!(rows[1].error.contains("unavailable"));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_a_local_failure() {
        let store = seeded_store(&["ark:/99999/fk4a"]);
        let ctx = context(ScriptedHandler::always(Step::Panic), &store);
        let entry = claim_one(&store);
        assert_eq!(process_row(&ctx, entry).await.unwrap(), QueueStatus::Failure);
        let row = &store.list_queue(Destination::Binder).unwrap()[0];
        assert!(!row.error_is_permanent);
        assert!(row.error.contains("handler panicked"));
    }

    #[tokio::test]
    async fn transient_poll_errors_keep_waiting() {
        let store = seeded_store(&["doi:10.5072/FK2A"]);
        let ctx = context(
            ScriptedHandler::sequence([Step::Await, Step::Unavailable, Step::Succeed]),
            &store,
        );
        let entry = claim_one(&store);
        assert_eq!(process_row(&ctx, entry).await.unwrap(), QueueStatus::Submitted);

        let awaiting = store.list_awaiting_poll(Destination::Binder, 10).unwrap();
        assert_eq!(awaiting.len(), 1);
        let batch_id = awaiting[0].batch_id.clone();
        assert_eq!(
            poll_row(&ctx, awaiting[0].clone()).await.unwrap(),
            QueueStatus::Submitted
        );

        let awaiting = store.list_awaiting_poll(Destination::Binder, 10).unwrap();
        assert_eq!(awaiting[0].batch_id, batch_id);
        assert_eq!(
            poll_row(&ctx, awaiting[0].clone()).await.unwrap(),
            QueueStatus::Success
        );
        assert!(store.list_awaiting_poll(Destination::Binder, 10).unwrap().is_empty());
    }
}
