use super::{check_transition, has_prefix, select_claimable};
use crate::{
    CheckResult, Claim, ClaimPolicy, Destination, DownloadEntry, DownloadRequest, DownloadStage,
    Identifier, LinkCheck, Operation, OwnerId, QueueEntry, QueueStatus, RefIdentifier,
    SearchDocument, Shoulder, StatusUpdate, Store, StoreError, StoreResult, TimeWindow,
    ValidationError,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
struct Tables {
    shoulders: BTreeMap<String, Shoulder>,
    identifiers: BTreeMap<String, Identifier>,
    refs: BTreeMap<u64, RefIdentifier>,
    last_ref_id: u64,
    queues: BTreeMap<Destination, BTreeMap<u64, QueueEntry>>,
    last_seq: BTreeMap<Destination, u64>,
    search: BTreeMap<String, SearchDocument>,
    link_checks: BTreeMap<String, LinkCheck>,
    downloads: BTreeMap<u64, DownloadEntry>,
    last_download: u64,
}

impl Tables {
    fn snapshot_and_enqueue(&mut self, record: &Identifier, operation: Operation, now: u64) -> u64 {
        self.last_ref_id += 1;
        let ref_id = self.last_ref_id;
        self.refs.insert(
            ref_id,
            RefIdentifier {
                id: ref_id,
                record: record.clone(),
            },
        );
        for destination in Destination::ALL {
            let seq = self.last_seq.entry(destination).or_default();
            *seq += 1;
            let entry = QueueEntry::new(
                destination,
                *seq,
                ref_id,
                record.identifier.clone(),
                operation,
                now,
            );
            self.queues
                .entry(destination)
                .or_default()
                .insert(entry.seq, entry);
        }
        ref_id
    }

    fn delete_identifier(&mut self, identifier: &str, now: u64) -> Option<u64> {
        let record = self.identifiers.remove(identifier)?;
        Some(self.snapshot_and_enqueue(&record, Operation::Delete, now))
    }

    fn queue_mut(&mut self, destination: Destination, seq: u64) -> StoreResult<&mut QueueEntry> {
        self.queues
            .get_mut(&destination)
            .and_then(|q| q.get_mut(&seq))
            .ok_or(StoreError::RowNotFound { destination, seq })
    }

    fn drop_unreferenced_refs(&mut self) -> usize {
        let referenced: BTreeSet<u64> = self
            .queues
            .values()
            .flat_map(|q| q.values().map(|e| e.ref_id))
            .collect();
        let before = self.refs.len();
        self.refs.retain(|id, _| referenced.contains(id));
        before - self.refs.len()
    }
}

/// A [`Store`] kept entirely in memory. Every call holds one lock for its
/// whole duration, which makes each call atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<'a, T: Clone + 'a>(
    rows: impl Iterator<Item = (&'a String, &'a T)>,
    after: Option<&str>,
    limit: usize,
) -> Vec<T> {
    rows.filter(|(k, _)| after.is_none_or(|a| k.as_str() > a))
        .take(limit)
        .map(|(_, v)| v.clone())
        .collect()
}

impl Store for MemoryStore {
    fn put_shoulder(&self, shoulder: &Shoulder) -> StoreResult<()> {
        self.tables
            .lock()
            .shoulders
            .insert(shoulder.prefix.clone(), shoulder.clone());
        Ok(())
    }

    fn get_shoulder(&self, prefix: &str) -> StoreResult<Option<Shoulder>> {
        Ok(self.tables.lock().shoulders.get(prefix).cloned())
    }

    fn list_shoulders(&self) -> StoreResult<Vec<Shoulder>> {
        Ok(self.tables.lock().shoulders.values().cloned().collect())
    }

    fn get_identifier(&self, identifier: &str) -> StoreResult<Option<Identifier>> {
        Ok(self.tables.lock().identifiers.get(identifier).cloned())
    }

    fn list_identifiers(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<Identifier>> {
        Ok(page(self.tables.lock().identifiers.iter(), after, limit))
    }

    fn insert_identifier_and_enqueue_all(
        &self,
        record: &Identifier,
        operation: Operation,
        now: u64,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let exists = tables.identifiers.contains_key(&record.identifier);
        match operation {
            Operation::Create if exists => {
                return Err(ValidationError::AlreadyExists(record.identifier.clone()).into());
            }
            Operation::Update if !exists => {
                return Err(ValidationError::NotFound(record.identifier.clone()).into());
            }
            Operation::Delete => {
                return tables
                    .delete_identifier(&record.identifier, now)
                    .ok_or_else(|| ValidationError::NotFound(record.identifier.clone()).into());
            }
            _ => {}
        }
        tables
            .identifiers
            .insert(record.identifier.clone(), record.clone());
        Ok(tables.snapshot_and_enqueue(record, operation, now))
    }

    fn delete_identifier_and_enqueue_all(
        &self,
        identifier: &str,
        now: u64,
    ) -> StoreResult<Option<u64>> {
        Ok(self.tables.lock().delete_identifier(identifier, now))
    }

    fn update_identifier_with(
        &self,
        identifier: &str,
        f: &mut dyn FnMut(&mut Identifier) -> bool,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        let Some(record) = tables.identifiers.get_mut(identifier) else {
            return Ok(false);
        };
        let mut updated = record.clone();
        if f(&mut updated) {
            *record = updated;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn find_expirable(
        &self,
        prefixes: &[String],
        window: TimeWindow,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        let tables = self.tables.lock();
        let mut found: Vec<&Identifier> = tables
            .identifiers
            .values()
            .filter(|r| has_prefix(&r.identifier, prefixes) && window.contains(r.create_time))
            .collect();
        found.sort_by(|a, b| {
            (a.create_time, &a.identifier).cmp(&(b.create_time, &b.identifier))
        });
        Ok(found
            .into_iter()
            .take(limit)
            .map(|r| r.identifier.clone())
            .collect())
    }

    fn get_ref_identifier(&self, id: u64) -> StoreResult<Option<RefIdentifier>> {
        Ok(self.tables.lock().refs.get(&id).cloned())
    }

    fn count_ref_identifiers(&self) -> StoreResult<usize> {
        Ok(self.tables.lock().refs.len())
    }

    fn claim_batch(
        &self,
        destination: Destination,
        policy: &ClaimPolicy,
        now: u64,
        limit: usize,
    ) -> StoreResult<Claim> {
        let mut tables = self.tables.lock();
        let Some(queue) = tables.queues.get_mut(&destination) else {
            return Ok(Claim::default());
        };
        let pending: Vec<QueueEntry> = queue
            .values()
            .filter(|e| e.status.is_pending() && !policy.is_parked_failure(e, now))
            .cloned()
            .collect();
        let claim = select_claimable(&pending, policy, now, limit);
        for entry in &claim.entries {
            queue.insert(entry.seq, entry.clone());
        }
        Ok(claim)
    }

    fn update_status(
        &self,
        destination: Destination,
        seq: u64,
        update: &StatusUpdate,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let entry = tables.queue_mut(destination, seq)?;
        check_transition(entry, update)?;
        entry.apply(update);
        Ok(())
    }

    fn list_queue(&self, destination: Destination) -> StoreResult<Vec<QueueEntry>> {
        Ok(self
            .tables
            .lock()
            .queues
            .get(&destination)
            .map(|q| q.values().cloned().collect())
            .unwrap_or_default())
    }

    fn list_awaiting_poll(
        &self,
        destination: Destination,
        limit: usize,
    ) -> StoreResult<Vec<QueueEntry>> {
        Ok(self
            .tables
            .lock()
            .queues
            .get(&destination)
            .map(|q| {
                q.values()
                    .filter(|e| e.status == QueueStatus::Submitted && e.batch_id.is_some())
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn clear_permanent_failure(
        &self,
        destination: Destination,
        seq: u64,
        now: u64,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        let entry = tables.queue_mut(destination, seq)?;
        if entry.status != QueueStatus::Failure || !entry.error_is_permanent {
            return Ok(false);
        }
        entry.error_is_permanent = false;
        entry.enqueue_time = now;
        entry.submit_time = None;
        Ok(true)
    }

    fn delete_terminal(
        &self,
        destination: Destination,
        window: TimeWindow,
        limit: usize,
    ) -> StoreResult<usize> {
        let mut tables = self.tables.lock();
        let Some(queue) = tables.queues.get_mut(&destination) else {
            return Ok(0);
        };
        let doomed: Vec<u64> = queue
            .values()
            .filter(|e| e.status.is_terminal() && e.submit_time.is_some_and(|t| window.contains(t)))
            .take(limit)
            .map(|e| e.seq)
            .collect();
        for seq in &doomed {
            queue.remove(seq);
        }
        tables.drop_unreferenced_refs();
        Ok(doomed.len())
    }

    fn delete_unreferenced_ref_identifiers(&self) -> StoreResult<usize> {
        Ok(self.tables.lock().drop_unreferenced_refs())
    }

    fn get_search_document(&self, identifier: &str) -> StoreResult<Option<SearchDocument>> {
        Ok(self.tables.lock().search.get(identifier).cloned())
    }

    fn put_search_document(&self, document: &SearchDocument) -> StoreResult<()> {
        self.tables
            .lock()
            .search
            .insert(document.identifier.clone(), document.clone());
        Ok(())
    }

    fn delete_search_document(&self, identifier: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().search.remove(identifier).is_some())
    }

    fn get_link_check(&self, identifier: &str) -> StoreResult<Option<LinkCheck>> {
        Ok(self.tables.lock().link_checks.get(identifier).cloned())
    }

    fn list_link_checks(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<LinkCheck>> {
        Ok(page(self.tables.lock().link_checks.iter(), after, limit))
    }

    fn upsert_link_check(&self, check: &LinkCheck) -> StoreResult<()> {
        self.tables
            .lock()
            .link_checks
            .insert(check.identifier.clone(), check.clone());
        Ok(())
    }

    fn delete_link_check(&self, identifier: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().link_checks.remove(identifier).is_some())
    }

    fn mark_link_checks_unvisited(&self) -> StoreResult<usize> {
        let mut tables = self.tables.lock();
        for check in tables.link_checks.values_mut() {
            check.is_visited = false;
        }
        Ok(tables.link_checks.len())
    }

    fn delete_unvisited_link_checks(&self) -> StoreResult<usize> {
        let mut tables = self.tables.lock();
        let before = tables.link_checks.len();
        tables.link_checks.retain(|_, c| c.is_visited);
        Ok(before - tables.link_checks.len())
    }

    fn link_check_owners(&self) -> StoreResult<Vec<OwnerId>> {
        let tables = self.tables.lock();
        let owners: BTreeSet<&OwnerId> = tables.link_checks.values().map(|c| &c.owner).collect();
        Ok(owners.into_iter().cloned().collect())
    }

    fn select_link_checks(
        &self,
        owner: &OwnerId,
        bad_before: u64,
        good_before: u64,
        limit: usize,
    ) -> StoreResult<Vec<LinkCheck>> {
        let tables = self.tables.lock();
        let checks = &tables.link_checks;
        let due = |bad: bool, before: u64| {
            let mut rows: Vec<&LinkCheck> = checks
                .values()
                .filter(|c| &c.owner == owner && c.is_bad == bad && c.last_check_time <= before)
                .collect();
            rows.sort_by(|a, b| {
                (a.last_check_time, &a.identifier).cmp(&(b.last_check_time, &b.identifier))
            });
            rows
        };
        Ok(due(true, bad_before)
            .into_iter()
            .chain(due(false, good_before))
            .take(limit)
            .cloned()
            .collect())
    }

    fn record_link_check(
        &self,
        identifier: &str,
        target: &str,
        result: &CheckResult,
        now: u64,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        match tables.link_checks.get_mut(identifier) {
            Some(check) if check.target == target => {
                check.apply(result, now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_link_broken_identifiers(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .tables
            .lock()
            .identifiers
            .values()
            .filter(|r| r.link_is_broken)
            .map(|r| r.identifier.clone())
            .collect())
    }

    fn enqueue_download(&self, request: &DownloadRequest, now: u64) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        tables.last_download += 1;
        let seq = tables.last_download;
        tables.downloads.insert(
            seq,
            DownloadEntry {
                seq,
                request_time: now,
                filename: format!("{}-{seq}.{}", request.requestor, request.format),
                stage: DownloadStage::Created,
                request: request.clone(),
            },
        );
        Ok(seq)
    }

    fn next_download(&self) -> StoreResult<Option<DownloadEntry>> {
        Ok(self.tables.lock().downloads.values().next().cloned())
    }

    fn finish_download(&self, seq: u64) -> StoreResult<bool> {
        Ok(self.tables.lock().downloads.remove(&seq).is_some())
    }
}
