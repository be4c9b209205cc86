use crate::daemon::{config::CleanupConfig, telemetry::increment_rows_cleaned};
use ezid::{Destination, Store, TimeWindow};
use ezid_daemon_core::Result;

/// Deletes terminal queue rows last updated more than `min_age` seconds
/// before `now`, then any snapshot no queue row still references. Returns
/// the number of queue rows deleted.
pub fn run_once(store: &dyn Store, config: &CleanupConfig, now: u64) -> Result<usize> {
    let window = TimeWindow::before(now.saturating_sub(config.min_age));
    let mut total = 0;
    for destination in Destination::ALL {
        let mut deleted = 0;
        loop {
            let n = store.delete_terminal(destination, window, config.batch_size)?;
            deleted += n;
            if n < config.batch_size {
                break;
            }
        }
        if deleted > 0 {
            tracing::debug!(%destination, deleted, "deleted finished queue rows");
            increment_rows_cleaned(destination.as_str(), deleted as u64);
        }
        total += deleted;
    }

    let snapshots = store.delete_unreferenced_ref_identifiers()?;
    if snapshots > 0 {
        tracing::debug!(snapshots, "deleted unreferenced snapshots");
    }
    Ok(total)
}
