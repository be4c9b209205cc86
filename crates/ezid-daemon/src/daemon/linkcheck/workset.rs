//! Per-round work for the link checker.
//!
//! A [`Workset`] holds one list of due rows per owner. Workers take rows
//! round-robin across owners; an owner is handed out to one worker at a time
//! and not again until `owner_revisit_min_interval` after that worker's check
//! finished. This bounds the load a round puts on any one owner's servers.

use super::exclusions::ExclusionList;
use crate::daemon::config::LinkCheckConfig;
use ezid::{LinkCheck, OwnerId, Store};
use ezid_daemon_core::Result;
use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

/// How long to wait when every owner with work left is being checked.
const LOCKED_WAIT: Duration = Duration::from_millis(100);

/// A row handed to a worker. Return it with [`Workset::finish`].
#[derive(Debug)]
pub struct Job {
    pub slot: usize,
    pub check: LinkCheck,
}

#[derive(Debug)]
pub enum Next {
    Check(Job),
    /// Nothing can be handed out yet; ask again after this long.
    Wait(Duration),
    /// Every row has been handed out.
    Done,
}

#[derive(Debug)]
struct OwnerSlot {
    owner: OwnerId,
    pending: VecDeque<LinkCheck>,
    locked: bool,
    last_finished: Option<Instant>,
}

#[derive(Debug)]
pub struct Workset {
    slots: Vec<OwnerSlot>,
    cursor: usize,
    revisit: Duration,
}

impl Workset {
    pub fn new(lists: Vec<(OwnerId, Vec<LinkCheck>)>, revisit: Duration) -> Self {
        let slots = lists
            .into_iter()
            .filter(|(_, checks)| !checks.is_empty())
            .map(|(owner, checks)| OwnerSlot {
                owner,
                pending: checks.into(),
                locked: false,
                last_finished: None,
            })
            .collect();
        Self {
            slots,
            cursor: 0,
            revisit,
        }
    }

    /// Rows not yet handed out.
    pub fn remaining(&self) -> usize {
        self.slots.iter().map(|s| s.pending.len()).sum()
    }

    pub fn owners(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Hands out the next row, starting after the owner served last.
    pub fn next(&mut self, now: Instant) -> Next {
        if self.is_empty() {
            return Next::Done;
        }
        let n = self.slots.len();
        let mut wait: Option<Duration> = None;
        for i in 0..n {
            let idx = (self.cursor + i) % n;
            let slot = &mut self.slots[idx];
            if slot.locked || slot.pending.is_empty() {
                continue;
            }
            if let Some(finished) = slot.last_finished {
                let ready = finished + self.revisit;
                if now < ready {
                    let left = ready - now;
                    wait = Some(wait.map_or(left, |w| w.min(left)));
                    continue;
                }
            }
            let Some(check) = slot.pending.pop_front() else {
                continue;
            };
            slot.locked = true;
            self.cursor = idx + 1;
            return Next::Check(Job { slot: idx, check });
        }
        Next::Wait(wait.unwrap_or(LOCKED_WAIT))
    }

    /// Releases the owner of a finished job.
    pub fn finish(&mut self, slot: usize, now: Instant) {
        if let Some(slot) = self.slots.get_mut(slot) {
            slot.locked = false;
            slot.last_finished = Some(now);
        }
    }

    pub fn owner(&self, slot: usize) -> Option<&OwnerId> {
        self.slots.get(slot).map(|s| &s.owner)
    }
}

/// Selects this round's rows: for each owner not excluded, up to
/// `owner_max_links` due bad rows, then due good rows.
pub fn build_workset(
    store: &dyn Store,
    exclusions: &ExclusionList,
    config: &LinkCheckConfig,
    now: u64,
) -> Result<Workset> {
    let bad_before = now.saturating_sub(config.bad_recheck_min_interval);
    let good_before = now.saturating_sub(config.good_recheck_min_interval);

    let mut lists = Vec::new();
    for owner in store.link_check_owners()? {
        if exclusions.is_excluded(&owner) {
            continue;
        }
        let checks =
            store.select_link_checks(&owner, bad_before, good_before, config.owner_max_links)?;
        if !checks.is_empty() {
            lists.push((owner, checks));
        }
    }
    Ok(Workset::new(lists, config.owner_revisit_min_interval))
}
