//! Synchronization of the link check table with the identifier store.

use super::exclusions::ExclusionList;
use ezid::{Identifier, LinkCheck, OwnerId, Store};
use ezid_daemon_core::Result;

/// Identifiers read per store call while scanning.
const PAGE_SIZE: usize = 1_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub scanned: usize,
    pub added: usize,
    pub reset: usize,
    pub removed: usize,
}

/// The owner to check `record` under, or `None` if its target should not be
/// checked.
pub fn qualifies<'a>(record: &'a Identifier, exclusions: &ExclusionList) -> Option<&'a OwnerId> {
    let owner = record.owner.as_ref()?;
    let checkable = record.is_public()
        && !record.is_test
        && !record.uses_default_target()
        && !exclusions.is_permanent(owner)
        && (record.target.starts_with("http://") || record.target.starts_with("https://"));
    checkable.then_some(owner)
}

/// Brings the table in line with the store.
///
/// Rows are added for newly qualifying identifiers and dropped for those
/// gone or no longer qualifying. A row whose owner or target changed starts
/// over with no history.
pub fn refresh_table(store: &dyn Store, exclusions: &ExclusionList) -> Result<RefreshStats> {
    let mut stats = RefreshStats::default();
    store.mark_link_checks_unvisited()?;

    let mut after: Option<String> = None;
    loop {
        let page = store.list_identifiers(after.as_deref(), PAGE_SIZE)?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.identifier.clone());
        stats.scanned += page.len();

        for record in &page {
            let Some(owner) = qualifies(record, exclusions) else {
                continue;
            };
            let check = match store.get_link_check(&record.identifier)? {
                Some(mut check) => {
                    if &check.owner != owner || check.target != record.target {
                        check.reset(owner.clone(), record.target.clone());
                        stats.reset += 1;
                    }
                    check.is_visited = true;
                    check
                }
                None => {
                    stats.added += 1;
                    LinkCheck::new(record.identifier.clone(), owner.clone(), record.target.clone())
                }
            };
            store.upsert_link_check(&check)?;
        }

        if page.len() < PAGE_SIZE {
            break;
        }
    }

    stats.removed = store.delete_unvisited_link_checks()?;
    Ok(stats)
}
