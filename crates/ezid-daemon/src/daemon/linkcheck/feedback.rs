//! Copies link state into the identifier store.

use ezid::Store;
use ezid_daemon_core::Result;
use std::collections::BTreeSet;

const PAGE_SIZE: usize = 1_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedbackStats {
    pub flagged: usize,
    pub cleared: usize,
}

/// Sets `link_is_broken` on identifiers whose consecutive failures reached
/// `threshold` and clears it on the rest, recomputing `has_issues` with it.
///
/// Each change re-reads the identifier inside its own store transaction, so
/// edits made since the check are kept.
pub fn upload_results(store: &dyn Store, threshold: u32) -> Result<FeedbackStats> {
    let mut broken = BTreeSet::new();
    let mut after: Option<String> = None;
    loop {
        let page = store.list_link_checks(after.as_deref(), PAGE_SIZE)?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.identifier.clone());
        broken.extend(
            page.iter()
                .filter(|c| c.num_failures >= threshold)
                .map(|c| c.identifier.clone()),
        );
        if page.len() < PAGE_SIZE {
            break;
        }
    }

    let flagged: BTreeSet<String> = store.list_link_broken_identifiers()?.into_iter().collect();
    let mut stats = FeedbackStats::default();
    for identifier in broken.difference(&flagged) {
        if set_link_broken(store, identifier, true)? {
            stats.flagged += 1;
        }
    }
    for identifier in flagged.difference(&broken) {
        if set_link_broken(store, identifier, false)? {
            stats.cleared += 1;
        }
    }
    Ok(stats)
}

fn set_link_broken(store: &dyn Store, identifier: &str, broken: bool) -> Result<bool> {
    Ok(store.update_identifier_with(identifier, &mut |record| {
        if record.link_is_broken == broken {
            return false;
        }
        record.link_is_broken = broken;
        record.refresh_has_issues();
        true
    })?)
}
