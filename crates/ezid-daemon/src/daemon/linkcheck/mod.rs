//! Target URL checking.
//!
//! The checker keeps its own table of identifiers to check, rebuilt from the
//! identifier store every table update cycle. Each round it builds a
//! [`Workset`](workset::Workset) of due rows per owner and runs `workers`
//! concurrent checkers over it. Every results upload cycle it copies
//! sustained failures back onto the identifiers.

pub mod exclusions;
pub mod feedback;
pub mod probe;
pub mod table;
pub mod workset;

use crate::daemon::{config::LinkCheckConfig, telemetry::increment_links_checked};
use exclusions::ExclusionFile;
use ezid::{Store, TimeSource};
use ezid_daemon_core::Result;
use parking_lot::Mutex;
use probe::LinkProbe;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use workset::{Next, Workset, build_workset};

pub struct LinkChecker {
    store: Arc<dyn Store>,
    clock: Arc<dyn TimeSource>,
    config: LinkCheckConfig,
    probe: LinkProbe,
    exclusions: ExclusionFile,
}

impl LinkChecker {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn TimeSource>,
        config: LinkCheckConfig,
    ) -> anyhow::Result<Self> {
        let probe = LinkProbe::new(&config)?;
        let exclusions = ExclusionFile::new(config.exclusion_file.clone());
        Ok(Self {
            store,
            clock,
            config,
            probe,
            exclusions,
        })
    }

    /// Runs rounds until `token` is cancelled. Checks in progress finish
    /// first; nothing new starts after cancellation.
    pub async fn run(mut self, token: CancellationToken) {
        tracing::info!(workers = self.config.workers, "link checker started");
        let mut last_refresh: Option<u64> = None;
        let mut last_upload: Option<u64> = None;

        while !token.is_cancelled() {
            if let Err(e) = self.exclusions.refresh() {
                tracing::warn!(error = %e, "keeping previous link check exclusions");
            }

            let now = self.clock.now_secs();
            if is_due(last_refresh, self.config.table_update_cycle, now) {
                match table::refresh_table(self.store.as_ref(), self.exclusions.list()) {
                    Ok(stats) => {
                        tracing::info!(?stats, "link check table refreshed");
                        last_refresh = Some(now);
                    }
                    Err(e) => tracing::error!(error = %e, "link check table refresh failed"),
                }
            }

            let checked = match self.round(&token).await {
                Ok(checked) => checked,
                Err(e) => {
                    tracing::error!(error = %e, "link check round failed");
                    0
                }
            };

            let now = self.clock.now_secs();
            if is_due(last_upload, self.config.results_upload_cycle, now) {
                match feedback::upload_results(
                    self.store.as_ref(),
                    self.config.notification_threshold,
                ) {
                    Ok(stats) => {
                        tracing::info!(?stats, "link check results uploaded");
                        last_upload = Some(now);
                    }
                    Err(e) => tracing::error!(error = %e, "link check results upload failed"),
                }
            }

            if checked == 0 {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = sleep(self.config.idle_sleep) => {}
                }
            }
        }

        tracing::info!("link checker stopped");
    }

    /// Checks every row due now. Returns how many were checked.
    pub async fn round(&self, token: &CancellationToken) -> Result<usize> {
        let workset = build_workset(
            self.store.as_ref(),
            self.exclusions.list(),
            &self.config,
            self.clock.now_secs(),
        )?;
        if workset.is_empty() {
            return Ok(0);
        }
        tracing::info!(
            owners = workset.owners(),
            rows = workset.remaining(),
            "link check round started"
        );

        let workset = Mutex::new(workset);
        let checked = AtomicUsize::new(0);
        futures::future::join_all(
            (0..self.config.workers).map(|id| self.check_worker(id, &workset, &checked, token)),
        )
        .await;
        Ok(checked.into_inner())
    }

    async fn check_worker(
        &self,
        worker_id: usize,
        workset: &Mutex<Workset>,
        checked: &AtomicUsize,
        token: &CancellationToken,
    ) {
        tracing::trace!("Link check worker {worker_id} started");
        while !token.is_cancelled() {
            let next = workset.lock().next(Instant::now());
            let job = match next {
                Next::Done => break,
                Next::Wait(wait) => {
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = sleep(wait) => continue,
                    }
                }
                Next::Check(job) => job,
            };

            let check = &job.check;
            let result = self.probe.check(&check.target).await;
            increment_links_checked(if result.success { "good" } else { "bad" });
            match self.store.record_link_check(
                &check.identifier,
                &check.target,
                &result,
                self.clock.now_secs(),
            ) {
                Ok(true) => {}
                Ok(false) => tracing::debug!(
                    identifier = %check.identifier,
                    "row changed during the check; result dropped"
                ),
                Err(e) => tracing::error!(
                    identifier = %check.identifier,
                    error = %e,
                    "could not record link check"
                ),
            }
            checked.fetch_add(1, Ordering::Relaxed);
            workset.lock().finish(job.slot, Instant::now());
        }
        tracing::trace!("Link check worker {worker_id} stopped");
    }
}

fn is_due(last: Option<u64>, cycle: u64, now: u64) -> bool {
    last.is_none_or(|t| now.saturating_sub(t) >= cycle)
}
