//! Periodic sweepers.
//!
//! [`expunge`] removes expired test identifiers; [`cleanup`] deletes
//! finished queue rows and the snapshots nothing references any more. Both
//! only touch terminal rows or rows no worker can hold, so they run next to
//! the queue workers without coordination.

pub mod cleanup;
pub mod expunge;

use ezid::{Store, TimeSource};
use ezid_daemon_core::Result;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Calls `pass` every `interval` until `token` is cancelled. A failed pass
/// is logged and retried on the next tick.
pub async fn run_every<F>(
    name: &'static str,
    interval: Duration,
    store: Arc<dyn Store>,
    clock: Arc<dyn TimeSource>,
    token: CancellationToken,
    pass: F,
) where
    F: Fn(&dyn Store, u64) -> Result<usize>,
{
    tracing::info!(sweeper = name, ?interval, "sweeper started");
    loop {
        match pass(store.as_ref(), clock.now_secs()) {
            Ok(0) => tracing::debug!(sweeper = name, "nothing to sweep"),
            Ok(count) => tracing::info!(sweeper = name, count, "sweep finished"),
            Err(e) => tracing::error!(sweeper = name, error = %e, "sweep failed"),
        }
        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    tracing::info!(sweeper = name, "sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezid::{ManualClock, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn runs_each_interval_until_cancelled() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock: Arc<dyn TimeSource> = Arc::new(ManualClock::new(0));
        let token = CancellationToken::new();
        let passes = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn({
            let token = token.clone();
            let passes = Arc::clone(&passes);
            run_every("test", Duration::from_secs(60), store, clock, token, move |_, _| {
                passes.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            })
        });

        tokio::time::sleep(Duration::from_secs(150)).await;
        token.cancel();
        task.await.unwrap();
        assert_eq!(passes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn expunged_identifiers_leave_nothing_behind() {
        use crate::daemon::{
            config::{CleanupConfig, ExpungeConfig},
            queue::{
                processor::{RowContext, process_row},
                testing::{ScriptedHandler, Step, seeded_store},
            },
        };
        use ezid::{ClaimPolicy, Destination};

        const DAY: u64 = 86_400;
        let store = seeded_store(&["ark:/99999/fk4a", "doi:10.5072/FK2B", "ark:/13030/keep"]);
        let clock = Arc::new(ManualClock::new(30 * DAY));
        let expunge_config = ExpungeConfig {
            interval: Duration::from_secs(3_600),
            batch_size: 10,
            max_age: 14 * DAY,
            window: 0,
            test_prefixes: vec!["ark:/99999/fk4".into(), "doi:10.5072/FK2".into()],
        };
        assert_eq!(
            expunge::run_once(store.as_ref(), &expunge_config, clock.now_secs()).unwrap(),
            2
        );

        let ctx = RowContext {
            handler: Arc::new(ScriptedHandler::always(Step::Succeed)),
            store: Arc::clone(&store),
            clock: Arc::clone(&clock) as Arc<dyn ezid::TimeSource>,
        };
        for destination in Destination::ALL {
            loop {
                let claim = store
                    .claim_batch(destination, &ClaimPolicy::default(), clock.now_secs(), 10)
                    .unwrap();
                if claim.entries.is_empty() {
                    break;
                }
                for entry in claim.entries {
                    process_row(&ctx, entry).await.unwrap();
                }
            }
        }

        let cleanup_config = CleanupConfig {
            interval: Duration::from_secs(3_600),
            min_age: 3_600,
            batch_size: 2,
        };
        clock.advance(2 * 3_600);
        let deleted = cleanup::run_once(store.as_ref(), &cleanup_config, clock.now_secs()).unwrap();
        assert_eq!(deleted, 5 * Destination::ALL.len());

        for id in ["ark:/99999/fk4a", "doi:10.5072/FK2B"] {
            assert!(store.get_identifier(id).unwrap().is_none(), "{id}");
        }
        assert!(store.get_identifier("ark:/13030/keep").unwrap().is_some());
        for destination in Destination::ALL {
            assert!(store.list_queue(destination).unwrap().is_empty(), "{destination}");
        }
        assert_eq!(store.count_ref_identifiers().unwrap(), 0);
    }
}
