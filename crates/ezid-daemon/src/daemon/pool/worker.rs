use crate::daemon::queue::{
    processor::{RowContext, poll_row, process_row},
    request::WorkRequest,
};
use tokio::sync::mpsc;

/// Worker task responsible for processing [`WorkRequest`] messages.
///
/// Each worker handles one row at a time: it dispatches the row, writes the
/// resulting status, and answers on the request's oneshot channel before
/// receiving the next message. It runs until a [`WorkRequest::Shutdown`]
/// arrives or every sender is dropped.
pub async fn worker_loop(worker_id: usize, mut rx: mpsc::Receiver<WorkRequest>, ctx: RowContext) {
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Process { entry, response } => {
                let outcome = process_row(&ctx, entry).await;
                if response.send(outcome).is_err() {
                    tracing::debug!("Worker {worker_id}: coordinator stopped waiting");
                }
            }
            WorkRequest::Poll { entry, response } => {
                let outcome = poll_row(&ctx, entry).await;
                if response.send(outcome).is_err() {
                    tracing::debug!("Worker {worker_id}: coordinator stopped waiting");
                }
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
