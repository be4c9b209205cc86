use super::{QueueService, request::WorkRequest};
use crate::daemon::telemetry::record_batch_duration;
use ezid::QueueEntry;
use ezid_daemon_core::{Error, Result};
use tokio::{
    sync::oneshot,
    time::{Instant, sleep},
};
use tokio_util::sync::CancellationToken;

/// Claims and dispatches batches until `token` is cancelled, sleeping when a
/// pass finds nothing to do. Store errors are logged and the pass retried
/// after the idle sleep.
pub async fn run(service: &QueueService, token: CancellationToken) {
    let destination = service.destination;
    tracing::info!(%destination, workers = service.pool.len(), "queue started");
    let mut last_poll: Option<Instant> = None;

    while !token.is_cancelled() {
        let busy = match claim_pass(service, &token).await {
            Ok(count) => count > 0,
            Err(e) => {
                tracing::error!(%destination, error = %e, "claim pass failed");
                false
            }
        };

        if service.polls
            && last_poll.is_none_or(|t| t.elapsed() >= service.config.poll_interval)
        {
            if let Err(e) = poll_pass(service, &token).await {
                tracing::error!(%destination, error = %e, "poll pass failed");
            }
            last_poll = Some(Instant::now());
        }

        if !busy {
            tokio::select! {
                () = token.cancelled() => break,
                () = sleep(service.config.idle_sleep) => {}
            }
        }
    }

    tracing::info!(%destination, "queue stopped");
}

/// Claims one batch and waits for every dispatched row. Returns the number
/// of rows claimed.
///
/// Rows still undispatched when `token` fires stay submitted and are claimed
/// again once the claim timeout passes.
async fn claim_pass(service: &QueueService, token: &CancellationToken) -> Result<usize> {
    let destination = service.destination;
    let started = Instant::now();
    let now = service.ctx.clock.now_secs();
    let claim = service.ctx.store.claim_batch(
        destination,
        &service.config.policy,
        now,
        service.config.batch_size,
    )?;

    for entry in &claim.deferred {
        let deferred = Error::ConcurrencyViolation {
            destination,
            identifier: entry.identifier.clone(),
            seq: entry.seq,
        };
        tracing::trace!("{deferred}");
    }

    let count = claim.entries.len();
    if count == 0 {
        return Ok(0);
    }
    tracing::debug!(%destination, count, deferred = claim.deferred.len(), "claimed rows");

    let pending = dispatch_all(service, token, claim.entries, |entry, response| {
        WorkRequest::Process { entry, response }
    })
    .await?;
    collect(service, pending).await;

    record_batch_duration(
        destination.as_str(),
        started.elapsed().as_secs_f64() * 1_000.0,
    );
    Ok(count)
}

async fn poll_pass(service: &QueueService, token: &CancellationToken) -> Result<()> {
    let entries = service
        .ctx
        .store
        .list_awaiting_poll(service.destination, service.config.batch_size)?;
    if entries.is_empty() {
        return Ok(());
    }
    tracing::debug!(destination = %service.destination, count = entries.len(), "polling rows");
    let pending = dispatch_all(service, token, entries, |entry, response| {
        WorkRequest::Poll { entry, response }
    })
    .await?;
    collect(service, pending).await;
    Ok(())
}

type Pending = Vec<(u64, oneshot::Receiver<super::request::RowOutcome>)>;

async fn dispatch_all(
    service: &QueueService,
    token: &CancellationToken,
    entries: Vec<QueueEntry>,
    request: fn(QueueEntry, oneshot::Sender<super::request::RowOutcome>) -> WorkRequest,
) -> Result<Pending> {
    let mut pending = Vec::with_capacity(entries.len());
    for entry in entries {
        if token.is_cancelled() {
            tracing::warn!(
                destination = %service.destination,
                seq = entry.seq,
                "shutting down with claimed rows left undispatched"
            );
            break;
        }
        let seq = entry.seq;
        let (tx, rx) = oneshot::channel();
        if let Err(e) = service.pool.send_to_next_worker(request(entry, tx)).await {
            // Rows already sent still get recorded.
            collect(service, pending).await;
            return Err(e);
        }
        pending.push((seq, rx));
    }
    Ok(pending)
}

async fn collect(service: &QueueService, pending: Pending) {
    let outcomes = futures::future::join_all(
        pending
            .into_iter()
            .map(|(seq, rx)| async move { (seq, rx.await) }),
    )
    .await;
    for (seq, outcome) in outcomes {
        match outcome {
            Ok(Ok(status)) => tracing::trace!(destination = %service.destination, seq, %status),
            Ok(Err(e)) => tracing::error!(destination = %service.destination, seq, error = %e),
            Err(_) => tracing::error!(
                destination = %service.destination,
                seq,
                "worker dropped the row without answering"
            ),
        }
    }
}
