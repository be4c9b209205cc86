use crate::daemon::{config::ExpungeConfig, telemetry::increment_identifiers_expunged};
use ezid::{Store, TimeWindow};
use ezid_daemon_core::Result;

/// Creation times eligible at `now`: older than `max_age`, and no older
/// than `max_age + window` unless `window` is zero.
pub fn expiry_window(config: &ExpungeConfig, now: u64) -> TimeWindow {
    let end = now.saturating_sub(config.max_age);
    if config.window == 0 {
        TimeWindow::before(end)
    } else {
        TimeWindow::new(end.saturating_sub(config.window), end)
    }
}

/// Deletes every expired test identifier, a batch at a time, enqueueing a
/// delete for each destination in the same transaction. Returns how many
/// were deleted.
pub fn run_once(store: &dyn Store, config: &ExpungeConfig, now: u64) -> Result<usize> {
    let window = expiry_window(config, now);
    if window.is_empty() || config.test_prefixes.is_empty() {
        return Ok(0);
    }

    let mut total = 0;
    loop {
        let batch = store.find_expirable(&config.test_prefixes, window, config.batch_size)?;
        for identifier in &batch {
            if store.delete_identifier_and_enqueue_all(identifier, now)?.is_some() {
                tracing::debug!(identifier = %identifier, "expunged test identifier");
                total += 1;
            }
        }
        if batch.len() < config.batch_size {
            break;
        }
    }
    increment_identifiers_expunged(total as u64);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezid::{Destination, Identifier, IdentifierName, MemoryStore, Operation};
    use std::time::Duration;

    const DAY: u64 = 86_400;

    fn config(window: u64) -> ExpungeConfig {
        ExpungeConfig {
            interval: Duration::from_secs(3_600),
            batch_size: 2,
            max_age: 14 * DAY,
            window,
            test_prefixes: vec!["ark:/99999/fk4".into(), "doi:10.5072/FK2".into()],
        }
    }

    fn create(store: &MemoryStore, id: &str, created: u64) {
        let name = IdentifierName::parse(id).unwrap();
        let record = Identifier::new(&name, created);
        store
            .insert_identifier_and_enqueue_all(&record, Operation::Create, created)
            .unwrap();
    }

    #[test]
    fn window_bounds() {
        let now = 100 * DAY;
        assert_eq!(expiry_window(&config(0), now), TimeWindow::before(86 * DAY));
        assert_eq!(
            expiry_window(&config(DAY), now),
            TimeWindow::new(85 * DAY, 86 * DAY)
        );
        assert!(expiry_window(&config(0), DAY).is_empty());
    }

    #[test]
    fn deletes_only_expired_test_identifiers() {
        let store = MemoryStore::new();
        let now = 100 * DAY;
        for i in 0..5 {
            create(&store, &format!("ark:/99999/fk4old{i}"), DAY + i);
        }
        create(&store, "doi:10.5072/FK2OLD", 2 * DAY);
        create(&store, "ark:/99999/fk4new", now - DAY);
        create(&store, "ark:/13030/real", DAY);

        assert_eq!(run_once(&store, &config(0), now).unwrap(), 6);
        assert!(store.get_identifier("ark:/99999/fk4old0").unwrap().is_none());
        assert!(store.get_identifier("doi:10.5072/FK2OLD").unwrap().is_none());
        assert!(store.get_identifier("ark:/99999/fk4new").unwrap().is_some());
        assert!(store.get_identifier("ark:/13030/real").unwrap().is_some());

        for destination in Destination::ALL {
            let deletes = store
                .list_queue(destination)
                .unwrap()
                .into_iter()
                .filter(|e| e.operation == Operation::Delete)
                .count();
            assert_eq!(deletes, 6, "{destination}");
        }

        assert_eq!(run_once(&store, &config(0), now).unwrap(), 0);
    }

    #[test]
    fn strict_window_leaves_older_rows() {
        let store = MemoryStore::new();
        let now = 100 * DAY;
        create(&store, "ark:/99999/fk4ancient", DAY);
        create(&store, "ark:/99999/fk4recent", 85 * DAY + 10);

        assert_eq!(run_once(&store, &config(DAY), now).unwrap(), 1);
        assert!(store.get_identifier("ark:/99999/fk4ancient").unwrap().is_some());
        assert!(store.get_identifier("ark:/99999/fk4recent").unwrap().is_none());
    }
}
