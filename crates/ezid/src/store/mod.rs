//! Persistence boundary for identifiers, snapshots and queues.
//!
//! Every method is one atomic unit: backends run each call in a single
//! transaction (or under a single lock), so callers never observe an
//! identifier without its snapshot and queue rows, or a claimed row that is
//! not marked submitted.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::*;
#[cfg(feature = "sqlite")]
pub use sqlite::*;


use crate::{
    CheckResult, Destination, DownloadEntry, DownloadRequest, Identifier, LinkCheck, Operation,
    OwnerId, QueueEntry, QueueStatus, RefIdentifier, SearchDocument, Shoulder, StatusUpdate,
    StoreError,
};
use std::collections::HashSet;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A half-open range of Unix seconds, `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: u64,
    pub end: u64,
}

impl TimeWindow {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Everything strictly before `end`.
    pub const fn before(end: u64) -> Self {
        Self { start: 0, end }
    }

    pub const fn contains(&self, t: u64) -> bool {
        self.start <= t && t < self.end
    }

    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Rules deciding which queue rows a worker may pick up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClaimPolicy {
    /// Minimum seconds between two attempts at a failed row.
    pub retry_interval: u64,
    /// Failed rows enqueued longer ago than this are no longer retried.
    pub max_retry_age: u64,
    /// A submitted row with no batch id older than this is assumed orphaned
    /// by a crashed worker and is claimed again.
    pub claim_timeout: u64,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            retry_interval: 300,
            max_retry_age: 86_400,
            claim_timeout: 3_600,
        }
    }
}

impl ClaimPolicy {
    /// Latest enqueue time of a failed row that is past `max_retry_age` at
    /// `now`; `None` while nothing can be that old.
    pub const fn retry_cutoff(&self, now: u64) -> Option<u64> {
        now.checked_sub(self.max_retry_age)
    }

    /// True if `entry` is a failure no claim will pick up again: permanent,
    /// or enqueued too long ago to retry.
    pub fn is_parked_failure(&self, entry: &QueueEntry, now: u64) -> bool {
        entry.status == QueueStatus::Failure
            && (entry.error_is_permanent
                || self
                    .retry_cutoff(now)
                    .is_some_and(|cutoff| entry.enqueue_time <= cutoff))
    }
}

/// Rows handed out by [`Store::claim_batch`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Claim {
    /// Now marked submitted; the caller owns them until it writes a result.
    pub entries: Vec<QueueEntry>,
    /// Ready rows held back because an earlier row for the same identifier
    /// is still in flight or waiting for a retry.
    pub deferred: Vec<QueueEntry>,
}

/// Storage for everything the back end persists.
pub trait Store: Send + Sync {
    // Shoulders.

    fn put_shoulder(&self, shoulder: &Shoulder) -> StoreResult<()>;

    fn get_shoulder(&self, prefix: &str) -> StoreResult<Option<Shoulder>>;

    fn list_shoulders(&self) -> StoreResult<Vec<Shoulder>>;

    // Identifiers.

    fn get_identifier(&self, identifier: &str) -> StoreResult<Option<Identifier>>;

    /// Up to `limit` identifiers ordered by identifier string, starting after
    /// `after`.
    fn list_identifiers(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<Identifier>>;

    /// Writes `record`, snapshots it and enqueues `operation` for every
    /// destination. Returns the snapshot id.
    ///
    /// `Create` fails if the identifier exists, `Update` if it does not, and
    /// `Delete` behaves like [`Store::delete_identifier_and_enqueue_all`].
    fn insert_identifier_and_enqueue_all(
        &self,
        record: &Identifier,
        operation: Operation,
        now: u64,
    ) -> StoreResult<u64>;

    /// Snapshots the current record, enqueues a delete for every destination
    /// and removes the identifier. `None` if it did not exist.
    fn delete_identifier_and_enqueue_all(
        &self,
        identifier: &str,
        now: u64,
    ) -> StoreResult<Option<u64>>;

    /// Applies `f` to the current record and saves it if `f` returns true.
    /// Nothing is enqueued. Returns whether a write happened.
    fn update_identifier_with(
        &self,
        identifier: &str,
        f: &mut dyn FnMut(&mut Identifier) -> bool,
    ) -> StoreResult<bool>;

    /// Identifiers starting with one of `prefixes` created inside `window`,
    /// oldest first.
    fn find_expirable(
        &self,
        prefixes: &[String],
        window: TimeWindow,
        limit: usize,
    ) -> StoreResult<Vec<String>>;

    // Snapshots and queues.

    fn get_ref_identifier(&self, id: u64) -> StoreResult<Option<RefIdentifier>>;

    fn count_ref_identifiers(&self) -> StoreResult<usize>;

    /// Claims up to `limit` ready rows, oldest first, at most one per
    /// identifier, and marks them submitted.
    fn claim_batch(
        &self,
        destination: Destination,
        policy: &ClaimPolicy,
        now: u64,
        limit: usize,
    ) -> StoreResult<Claim>;

    /// Writes a worker result. Fails with
    /// [`StoreError::InvalidTransition`] if the row cannot move to the new
    /// status.
    fn update_status(
        &self,
        destination: Destination,
        seq: u64,
        update: &StatusUpdate,
    ) -> StoreResult<()>;

    /// All rows of one queue in sequence order.
    fn list_queue(&self, destination: Destination) -> StoreResult<Vec<QueueEntry>>;

    /// Submitted rows carrying a batch id, oldest first.
    fn list_awaiting_poll(
        &self,
        destination: Destination,
        limit: usize,
    ) -> StoreResult<Vec<QueueEntry>>;

    /// Makes a permanently failed row retryable again, restarting its retry
    /// window at `now`. Returns false if the row is not a permanent failure.
    fn clear_permanent_failure(
        &self,
        destination: Destination,
        seq: u64,
        now: u64,
    ) -> StoreResult<bool>;

    /// Deletes up to `limit` terminal rows whose last update lies in
    /// `window`, then any snapshot left unreferenced. Returns the number of
    /// rows deleted.
    fn delete_terminal(
        &self,
        destination: Destination,
        window: TimeWindow,
        limit: usize,
    ) -> StoreResult<usize>;

    /// Deletes snapshots no queue row references.
    fn delete_unreferenced_ref_identifiers(&self) -> StoreResult<usize>;

    // Search-index mirror.

    fn get_search_document(&self, identifier: &str) -> StoreResult<Option<SearchDocument>>;

    fn put_search_document(&self, document: &SearchDocument) -> StoreResult<()>;

    fn delete_search_document(&self, identifier: &str) -> StoreResult<bool>;

    // Link checks.

    fn get_link_check(&self, identifier: &str) -> StoreResult<Option<LinkCheck>>;

    fn list_link_checks(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<LinkCheck>>;

    fn upsert_link_check(&self, check: &LinkCheck) -> StoreResult<()>;

    fn delete_link_check(&self, identifier: &str) -> StoreResult<bool>;

    fn mark_link_checks_unvisited(&self) -> StoreResult<usize>;

    fn delete_unvisited_link_checks(&self) -> StoreResult<usize>;

    fn link_check_owners(&self) -> StoreResult<Vec<OwnerId>>;

    /// Up to `limit` rows for `owner` due for a check: bad rows last checked
    /// at or before `bad_before` first, then good rows last checked at or
    /// before `good_before`. Each group is ordered by last check time.
    fn select_link_checks(
        &self,
        owner: &OwnerId,
        bad_before: u64,
        good_before: u64,
        limit: usize,
    ) -> StoreResult<Vec<LinkCheck>>;

    /// Records a check result if the row still exists and still points at
    /// `target`. Returns whether it was recorded.
    fn record_link_check(
        &self,
        identifier: &str,
        target: &str,
        result: &CheckResult,
        now: u64,
    ) -> StoreResult<bool>;

    /// Identifiers currently flagged with a broken link.
    fn list_link_broken_identifiers(&self) -> StoreResult<Vec<String>>;

    // Download queue.

    fn enqueue_download(&self, request: &DownloadRequest, now: u64) -> StoreResult<u64>;

    /// The oldest unfinished download.
    fn next_download(&self) -> StoreResult<Option<DownloadEntry>>;

    fn finish_download(&self, seq: u64) -> StoreResult<bool>;
}

enum Readiness {
    /// May be claimed now.
    Ready,
    /// Blocks later rows for the same identifier.
    InFlight,
    /// Waits for manual intervention and blocks nothing.
    Parked,
}

fn readiness(entry: &QueueEntry, policy: &ClaimPolicy, now: u64) -> Readiness {
    match entry.status {
        QueueStatus::Unsubmitted => Readiness::Ready,
        QueueStatus::Submitted => {
            let stale = entry
                .submit_time
                .is_none_or(|t| now >= t.saturating_add(policy.claim_timeout));
            if entry.batch_id.is_none() && stale {
                Readiness::Ready
            } else {
                Readiness::InFlight
            }
        }
        QueueStatus::Failure => {
            if policy.is_parked_failure(entry, now) {
                Readiness::Parked
            } else if entry
                .submit_time
                .is_none_or(|t| now >= t.saturating_add(policy.retry_interval))
            {
                Readiness::Ready
            } else {
                Readiness::InFlight
            }
        }
        QueueStatus::Warning | QueueStatus::Ignored | QueueStatus::Success => Readiness::Parked,
    }
}

/// Picks the rows to claim from `rows`, which must be the destination's
/// pending rows in sequence order. Stores may leave out parked failures. Returned entries are already marked
/// submitted at `now`.
///
/// An identifier with any row in flight gets nothing new, and at most one of
/// its ready rows (the oldest) is handed out per call.
pub(crate) fn select_claimable(
    rows: &[QueueEntry],
    policy: &ClaimPolicy,
    now: u64,
    limit: usize,
) -> Claim {
    let mut claim = Claim::default();
    if limit == 0 {
        return claim;
    }

    let ready: Vec<bool> = rows
        .iter()
        .map(|entry| match readiness(entry, policy, now) {
            Readiness::Ready => true,
            Readiness::InFlight | Readiness::Parked => false,
        })
        .collect();
    let mut busy: HashSet<&str> = rows
        .iter()
        .filter(|entry| matches!(readiness(entry, policy, now), Readiness::InFlight))
        .map(|entry| entry.identifier.as_str())
        .collect();

    for (entry, ready) in rows.iter().zip(ready) {
        if !ready {
            continue;
        }
        if busy.insert(entry.identifier.as_str()) {
            let mut claimed = entry.clone();
            claimed.mark_submitted(now);
            claim.entries.push(claimed);
            if claim.entries.len() == limit {
                break;
            }
        } else {
            claim.deferred.push(entry.clone());
        }
    }
    claim
}

/// Checks that a status update is legal for `entry`.
pub(crate) fn check_transition(entry: &QueueEntry, update: &StatusUpdate) -> StoreResult<()> {
    if entry.status.can_transition(update.status) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            destination: entry.destination,
            seq: entry.seq,
            from: entry.status,
            to: update.status,
        })
    }
}

/// True if `identifier` starts with any of `prefixes`.
pub(crate) fn has_prefix(identifier: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| identifier.starts_with(p.as_str()))
}
