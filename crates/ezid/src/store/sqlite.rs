use super::{check_transition, has_prefix, select_claimable};
use crate::{
    CheckResult, Claim, ClaimPolicy, Destination, DownloadEntry, DownloadRequest, DownloadStage,
    Identifier, LinkCheck, Operation, OwnerId, QueueEntry, QueueStatus, RefIdentifier,
    SearchDocument, Shoulder, StatusUpdate, Store, StoreError, StoreResult, TimeWindow,
    ValidationError,
};
use parking_lot::Mutex;
use rusqlite::{
    Connection, OptionalExtension, Params, Row, Statement, Transaction, TransactionBehavior, params,
};
use serde::de::DeserializeOwned;
use std::{path::Path, time::Duration};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS shoulder (
    prefix TEXT PRIMARY KEY,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS identifier (
    identifier TEXT PRIMARY KEY,
    create_time INTEGER NOT NULL,
    link_is_broken INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS identifier_create_time ON identifier (create_time);
CREATE TABLE IF NOT EXISTS ref_identifier (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS queue_seq (
    destination TEXT PRIMARY KEY,
    last INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS queue (
    destination TEXT NOT NULL,
    seq INTEGER NOT NULL,
    ref_id INTEGER NOT NULL REFERENCES ref_identifier (id),
    identifier TEXT NOT NULL,
    operation TEXT NOT NULL,
    status TEXT NOT NULL,
    enqueue_time INTEGER NOT NULL,
    submit_time INTEGER,
    message TEXT NOT NULL,
    batch_id TEXT,
    error TEXT NOT NULL,
    error_is_permanent INTEGER NOT NULL,
    PRIMARY KEY (destination, seq)
);
CREATE INDEX IF NOT EXISTS queue_status ON queue (destination, status, seq);
CREATE INDEX IF NOT EXISTS queue_ref ON queue (ref_id);
CREATE TABLE IF NOT EXISTS search_identifier (
    identifier TEXT PRIMARY KEY,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS link_checker (
    identifier TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    target TEXT NOT NULL,
    last_check_time INTEGER NOT NULL,
    is_bad INTEGER NOT NULL,
    num_failures INTEGER NOT NULL,
    return_code INTEGER,
    mime_type TEXT NOT NULL,
    content_sample BLOB NOT NULL,
    error TEXT NOT NULL,
    is_visited INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS link_checker_owner ON link_checker (owner, is_bad, last_check_time);
CREATE TABLE IF NOT EXISTS download_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL
);
";

const QUEUE_COLUMNS: &str = "destination, seq, ref_id, identifier, operation, status, \
     enqueue_time, submit_time, message, batch_id, error, error_is_permanent";

const LINK_CHECK_COLUMNS: &str = "identifier, owner, target, last_check_time, is_bad, \
     num_failures, return_code, mime_type, content_sample, error, is_visited";

/// A [`Store`] backed by a single SQLite database.
///
/// Writes run in `IMMEDIATE` transactions so that concurrent processes
/// sharing the file serialize on the write lock instead of failing at commit.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn uint(v: i64, column: &str) -> StoreResult<u64> {
    u64::try_from(v).map_err(|_| StoreError::Corrupt(format!("negative {column}: {v}")))
}

fn sql_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn json_rows<T: DeserializeOwned>(stmt: &mut Statement<'_>, params: impl Params) -> StoreResult<Vec<T>> {
    stmt.query_map(params, |row| row.get::<_, String>(0))?
        .map(|body| -> StoreResult<T> { Ok(serde_json::from_str(&body?)?) })
        .collect()
}

fn json_row<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: impl Params,
) -> StoreResult<Option<T>> {
    conn.query_row(sql, params, |row| row.get::<_, String>(0))
        .optional()?
        .map(|body| -> StoreResult<T> { Ok(serde_json::from_str(&body)?) })
        .transpose()
}

struct RawEntry {
    destination: String,
    seq: i64,
    ref_id: i64,
    identifier: String,
    operation: String,
    status: String,
    enqueue_time: i64,
    submit_time: Option<i64>,
    message: String,
    batch_id: Option<String>,
    error: String,
    error_is_permanent: bool,
}

impl RawEntry {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            destination: row.get(0)?,
            seq: row.get(1)?,
            ref_id: row.get(2)?,
            identifier: row.get(3)?,
            operation: row.get(4)?,
            status: row.get(5)?,
            enqueue_time: row.get(6)?,
            submit_time: row.get(7)?,
            message: row.get(8)?,
            batch_id: row.get(9)?,
            error: row.get(10)?,
            error_is_permanent: row.get(11)?,
        })
    }
}

impl TryFrom<RawEntry> for QueueEntry {
    type Error = StoreError;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            destination: raw.destination.parse()?,
            seq: uint(raw.seq, "seq")?,
            ref_id: uint(raw.ref_id, "ref_id")?,
            identifier: raw.identifier,
            operation: Operation::from_code(&raw.operation)?,
            status: QueueStatus::from_code(&raw.status)?,
            enqueue_time: uint(raw.enqueue_time, "enqueue_time")?,
            submit_time: raw
                .submit_time
                .map(|t| uint(t, "submit_time"))
                .transpose()?,
            message: raw.message,
            batch_id: raw.batch_id,
            error: raw.error,
            error_is_permanent: raw.error_is_permanent,
        })
    }
}

fn queue_rows(stmt: &mut Statement<'_>, params: impl Params) -> StoreResult<Vec<QueueEntry>> {
    stmt.query_map(params, RawEntry::read)?
        .map(|raw| QueueEntry::try_from(raw?))
        .collect()
}

fn queue_row(tx: &Transaction<'_>, destination: Destination, seq: u64) -> StoreResult<QueueEntry> {
    let raw = tx
        .query_row(
            &format!("SELECT {QUEUE_COLUMNS} FROM queue WHERE destination = ?1 AND seq = ?2"),
            params![destination.as_str(), int(seq)],
            RawEntry::read,
        )
        .optional()?
        .ok_or(StoreError::RowNotFound { destination, seq })?;
    QueueEntry::try_from(raw)
}

fn save_entry(tx: &Transaction<'_>, entry: &QueueEntry) -> StoreResult<()> {
    tx.execute(
        "UPDATE queue SET status = ?3, enqueue_time = ?4, submit_time = ?5, message = ?6, \
         batch_id = ?7, error = ?8, error_is_permanent = ?9 \
         WHERE destination = ?1 AND seq = ?2",
        params![
            entry.destination.as_str(),
            int(entry.seq),
            entry.status.code(),
            int(entry.enqueue_time),
            entry.submit_time.map(int),
            entry.message,
            entry.batch_id,
            entry.error,
            entry.error_is_permanent,
        ],
    )?;
    Ok(())
}

fn put_identifier(tx: &Transaction<'_>, record: &Identifier) -> StoreResult<()> {
    tx.execute(
        "INSERT OR REPLACE INTO identifier (identifier, create_time, link_is_broken, body) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            record.identifier,
            int(record.create_time),
            record.link_is_broken,
            serde_json::to_string(record)?,
        ],
    )?;
    Ok(())
}

fn snapshot_and_enqueue(
    tx: &Transaction<'_>,
    record: &Identifier,
    operation: Operation,
    now: u64,
) -> StoreResult<u64> {
    tx.execute(
        "INSERT INTO ref_identifier (body) VALUES (?1)",
        params![serde_json::to_string(record)?],
    )?;
    let ref_id = tx.last_insert_rowid();
    for destination in Destination::ALL {
        let seq: i64 = tx.query_row(
            "INSERT INTO queue_seq (destination, last) VALUES (?1, 1) \
             ON CONFLICT (destination) DO UPDATE SET last = last + 1 \
             RETURNING last",
            params![destination.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            &format!(
                "INSERT INTO queue ({QUEUE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, '', NULL, '', 0)"
            ),
            params![
                destination.as_str(),
                seq,
                ref_id,
                record.identifier,
                operation.code(),
                QueueStatus::Unsubmitted.code(),
                int(now),
            ],
        )?;
    }
    uint(ref_id, "ref_identifier.id")
}

fn delete_identifier(tx: &Transaction<'_>, identifier: &str, now: u64) -> StoreResult<Option<u64>> {
    let Some(record) = json_row::<Identifier>(
        tx,
        "SELECT body FROM identifier WHERE identifier = ?1",
        params![identifier],
    )?
    else {
        return Ok(None);
    };
    let ref_id = snapshot_and_enqueue(tx, &record, Operation::Delete, now)?;
    tx.execute(
        "DELETE FROM identifier WHERE identifier = ?1",
        params![identifier],
    )?;
    Ok(Some(ref_id))
}

fn drop_unreferenced_refs(tx: &Transaction<'_>) -> StoreResult<usize> {
    Ok(tx.execute(
        "DELETE FROM ref_identifier WHERE id NOT IN (SELECT ref_id FROM queue)",
        [],
    )?)
}

fn read_link_check(row: &Row<'_>) -> rusqlite::Result<(LinkCheck, i64)> {
    let check = LinkCheck {
        identifier: row.get(0)?,
        owner: OwnerId::new(row.get::<_, String>(1)?),
        target: row.get(2)?,
        last_check_time: 0,
        is_bad: row.get(4)?,
        num_failures: row.get(5)?,
        return_code: row.get(6)?,
        mime_type: row.get(7)?,
        content_sample: row.get(8)?,
        error: row.get(9)?,
        is_visited: row.get(10)?,
    };
    Ok((check, row.get(3)?))
}

fn link_check_rows(stmt: &mut Statement<'_>, params: impl Params) -> StoreResult<Vec<LinkCheck>> {
    stmt.query_map(params, read_link_check)?
        .map(|row| -> StoreResult<LinkCheck> {
            let (mut check, last) = row?;
            check.last_check_time = uint(last, "last_check_time")?;
            Ok(check)
        })
        .collect()
}

fn put_link_check(conn: &Connection, check: &LinkCheck) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO link_checker ({LINK_CHECK_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            check.identifier,
            check.owner.as_str(),
            check.target,
            int(check.last_check_time),
            check.is_bad,
            check.num_failures,
            check.return_code,
            check.mime_type,
            check.content_sample,
            check.error,
            check.is_visited,
        ],
    )?;
    Ok(())
}

impl Store for SqliteStore {
    fn put_shoulder(&self, shoulder: &Shoulder) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO shoulder (prefix, body) VALUES (?1, ?2)",
            params![shoulder.prefix, serde_json::to_string(shoulder)?],
        )?;
        Ok(())
    }

    fn get_shoulder(&self, prefix: &str) -> StoreResult<Option<Shoulder>> {
        json_row(
            &self.conn.lock(),
            "SELECT body FROM shoulder WHERE prefix = ?1",
            params![prefix],
        )
    }

    fn list_shoulders(&self) -> StoreResult<Vec<Shoulder>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT body FROM shoulder ORDER BY prefix")?;
        json_rows(&mut stmt, [])
    }

    fn get_identifier(&self, identifier: &str) -> StoreResult<Option<Identifier>> {
        json_row(
            &self.conn.lock(),
            "SELECT body FROM identifier WHERE identifier = ?1",
            params![identifier],
        )
    }

    fn list_identifiers(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<Identifier>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT body FROM identifier WHERE ?1 IS NULL OR identifier > ?1 \
             ORDER BY identifier LIMIT ?2",
        )?;
        json_rows(&mut stmt, params![after, sql_limit(limit)])
    }

    fn insert_identifier_and_enqueue_all(
        &self,
        record: &Identifier,
        operation: Operation,
        now: u64,
    ) -> StoreResult<u64> {
        self.write(|tx| {
            let exists = tx
                .query_row(
                    "SELECT 1 FROM identifier WHERE identifier = ?1",
                    params![record.identifier],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            match operation {
                Operation::Create if exists => {
                    return Err(ValidationError::AlreadyExists(record.identifier.clone()).into());
                }
                Operation::Update if !exists => {
                    return Err(ValidationError::NotFound(record.identifier.clone()).into());
                }
                Operation::Delete => {
                    return delete_identifier(tx, &record.identifier, now)?.ok_or_else(|| {
                        ValidationError::NotFound(record.identifier.clone()).into()
                    });
                }
                _ => {}
            }
            put_identifier(tx, record)?;
            snapshot_and_enqueue(tx, record, operation, now)
        })
    }

    fn delete_identifier_and_enqueue_all(
        &self,
        identifier: &str,
        now: u64,
    ) -> StoreResult<Option<u64>> {
        self.write(|tx| delete_identifier(tx, identifier, now))
    }

    fn update_identifier_with(
        &self,
        identifier: &str,
        f: &mut dyn FnMut(&mut Identifier) -> bool,
    ) -> StoreResult<bool> {
        self.write(|tx| {
            let Some(mut record) = json_row::<Identifier>(
                tx,
                "SELECT body FROM identifier WHERE identifier = ?1",
                params![identifier],
            )?
            else {
                return Ok(false);
            };
            if !f(&mut record) {
                return Ok(false);
            }
            put_identifier(tx, &record)?;
            Ok(true)
        })
    }

    fn find_expirable(
        &self,
        prefixes: &[String],
        window: TimeWindow,
        limit: usize,
    ) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT identifier FROM identifier WHERE create_time >= ?1 AND create_time < ?2 \
             ORDER BY create_time, identifier",
        )?;
        let rows = stmt.query_map(params![int(window.start), int(window.end)], |row| {
            row.get::<_, String>(0)
        })?;
        let mut found = Vec::new();
        for identifier in rows {
            let identifier = identifier?;
            if has_prefix(&identifier, prefixes) {
                found.push(identifier);
                if found.len() == limit {
                    break;
                }
            }
        }
        Ok(found)
    }

    fn get_ref_identifier(&self, id: u64) -> StoreResult<Option<RefIdentifier>> {
        let record = json_row(
            &self.conn.lock(),
            "SELECT body FROM ref_identifier WHERE id = ?1",
            params![int(id)],
        )?;
        Ok(record.map(|record| RefIdentifier { id, record }))
    }

    fn count_ref_identifiers(&self) -> StoreResult<usize> {
        let n: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM ref_identifier", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    fn claim_batch(
        &self,
        destination: Destination,
        policy: &ClaimPolicy,
        now: u64,
        limit: usize,
    ) -> StoreResult<Claim> {
        self.write(|tx| {
            // Parked failures never become claimable, so they stay out of the scan.
            let mut stmt = tx.prepare(&format!(
                "SELECT {QUEUE_COLUMNS} FROM queue \
                 WHERE destination = ?1 AND status IN ('U', 'S', 'F') \
                 AND NOT (status = 'F' AND (error_is_permanent <> 0 OR enqueue_time <= ?2)) \
                 ORDER BY seq"
            ))?;
            let cutoff = policy.retry_cutoff(now).map_or(-1, int);
            let pending = queue_rows(&mut stmt, params![destination.as_str(), cutoff])?;
            let claim = select_claimable(&pending, policy, now, limit);
            for entry in &claim.entries {
                save_entry(tx, entry)?;
            }
            Ok(claim)
        })
    }

    fn update_status(
        &self,
        destination: Destination,
        seq: u64,
        update: &StatusUpdate,
    ) -> StoreResult<()> {
        self.write(|tx| {
            let mut entry = queue_row(tx, destination, seq)?;
            check_transition(&entry, update)?;
            entry.apply(update);
            save_entry(tx, &entry)
        })
    }

    fn list_queue(&self, destination: Destination) -> StoreResult<Vec<QueueEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queue WHERE destination = ?1 ORDER BY seq"
        ))?;
        queue_rows(&mut stmt, params![destination.as_str()])
    }

    fn list_awaiting_poll(
        &self,
        destination: Destination,
        limit: usize,
    ) -> StoreResult<Vec<QueueEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queue WHERE destination = ?1 AND status = 'S' \
             AND batch_id IS NOT NULL ORDER BY seq LIMIT ?2"
        ))?;
        queue_rows(&mut stmt, params![destination.as_str(), sql_limit(limit)])
    }

    fn clear_permanent_failure(
        &self,
        destination: Destination,
        seq: u64,
        now: u64,
    ) -> StoreResult<bool> {
        self.write(|tx| {
            let mut entry = queue_row(tx, destination, seq)?;
            if entry.status != QueueStatus::Failure || !entry.error_is_permanent {
                return Ok(false);
            }
            entry.error_is_permanent = false;
            entry.enqueue_time = now;
            entry.submit_time = None;
            save_entry(tx, &entry)?;
            Ok(true)
        })
    }

    fn delete_terminal(
        &self,
        destination: Destination,
        window: TimeWindow,
        limit: usize,
    ) -> StoreResult<usize> {
        self.write(|tx| {
            let deleted = tx.execute(
                "DELETE FROM queue WHERE destination = ?1 AND seq IN ( \
                     SELECT seq FROM queue WHERE destination = ?1 AND status IN ('O', 'I') \
                     AND submit_time >= ?2 AND submit_time < ?3 ORDER BY seq LIMIT ?4)",
                params![
                    destination.as_str(),
                    int(window.start),
                    int(window.end),
                    sql_limit(limit)
                ],
            )?;
            drop_unreferenced_refs(tx)?;
            Ok(deleted)
        })
    }

    fn delete_unreferenced_ref_identifiers(&self) -> StoreResult<usize> {
        self.write(drop_unreferenced_refs)
    }

    fn get_search_document(&self, identifier: &str) -> StoreResult<Option<SearchDocument>> {
        json_row(
            &self.conn.lock(),
            "SELECT body FROM search_identifier WHERE identifier = ?1",
            params![identifier],
        )
    }

    fn put_search_document(&self, document: &SearchDocument) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO search_identifier (identifier, body) VALUES (?1, ?2)",
            params![document.identifier, serde_json::to_string(document)?],
        )?;
        Ok(())
    }

    fn delete_search_document(&self, identifier: &str) -> StoreResult<bool> {
        let n = self.conn.lock().execute(
            "DELETE FROM search_identifier WHERE identifier = ?1",
            params![identifier],
        )?;
        Ok(n > 0)
    }

    fn get_link_check(&self, identifier: &str) -> StoreResult<Option<LinkCheck>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LINK_CHECK_COLUMNS} FROM link_checker WHERE identifier = ?1"
        ))?;
        Ok(link_check_rows(&mut stmt, params![identifier])?.pop())
    }

    fn list_link_checks(&self, after: Option<&str>, limit: usize) -> StoreResult<Vec<LinkCheck>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LINK_CHECK_COLUMNS} FROM link_checker \
             WHERE ?1 IS NULL OR identifier > ?1 ORDER BY identifier LIMIT ?2"
        ))?;
        link_check_rows(&mut stmt, params![after, sql_limit(limit)])
    }

    fn upsert_link_check(&self, check: &LinkCheck) -> StoreResult<()> {
        put_link_check(&self.conn.lock(), check)
    }

    fn delete_link_check(&self, identifier: &str) -> StoreResult<bool> {
        let n = self.conn.lock().execute(
            "DELETE FROM link_checker WHERE identifier = ?1",
            params![identifier],
        )?;
        Ok(n > 0)
    }

    fn mark_link_checks_unvisited(&self) -> StoreResult<usize> {
        Ok(self
            .conn
            .lock()
            .execute("UPDATE link_checker SET is_visited = 0", [])?)
    }

    fn delete_unvisited_link_checks(&self) -> StoreResult<usize> {
        Ok(self
            .conn
            .lock()
            .execute("DELETE FROM link_checker WHERE is_visited = 0", [])?)
    }

    fn link_check_owners(&self) -> StoreResult<Vec<OwnerId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT owner FROM link_checker ORDER BY owner")?;
        let owners = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|owner| -> StoreResult<OwnerId> { Ok(OwnerId::new(owner?)) })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(owners)
    }

    fn select_link_checks(
        &self,
        owner: &OwnerId,
        bad_before: u64,
        good_before: u64,
        limit: usize,
    ) -> StoreResult<Vec<LinkCheck>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LINK_CHECK_COLUMNS} FROM link_checker \
             WHERE owner = ?1 AND is_bad = ?2 AND last_check_time <= ?3 \
             ORDER BY last_check_time, identifier LIMIT ?4"
        ))?;
        let mut rows = link_check_rows(
            &mut stmt,
            params![owner.as_str(), true, int(bad_before), sql_limit(limit)],
        )?;
        let remaining = limit.saturating_sub(rows.len());
        if remaining > 0 {
            rows.extend(link_check_rows(
                &mut stmt,
                params![owner.as_str(), false, int(good_before), sql_limit(remaining)],
            )?);
        }
        Ok(rows)
    }

    fn record_link_check(
        &self,
        identifier: &str,
        target: &str,
        result: &CheckResult,
        now: u64,
    ) -> StoreResult<bool> {
        self.write(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {LINK_CHECK_COLUMNS} FROM link_checker WHERE identifier = ?1"
            ))?;
            let Some(mut check) = link_check_rows(&mut stmt, params![identifier])?.pop() else {
                return Ok(false);
            };
            if check.target != target {
                return Ok(false);
            }
            check.apply(result, now);
            put_link_check(tx, &check)?;
            Ok(true)
        })
    }

    fn list_link_broken_identifiers(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT identifier FROM identifier WHERE link_is_broken = 1 ORDER BY identifier",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn enqueue_download(&self, request: &DownloadRequest, now: u64) -> StoreResult<u64> {
        self.write(|tx| {
            tx.execute("INSERT INTO download_queue (body) VALUES ('')", [])?;
            let seq = uint(tx.last_insert_rowid(), "download_queue.seq")?;
            let entry = DownloadEntry {
                seq,
                request_time: now,
                filename: format!("{}-{seq}.{}", request.requestor, request.format),
                stage: DownloadStage::Created,
                request: request.clone(),
            };
            tx.execute(
                "UPDATE download_queue SET body = ?2 WHERE seq = ?1",
                params![int(seq), serde_json::to_string(&entry)?],
            )?;
            Ok(seq)
        })
    }

    fn next_download(&self) -> StoreResult<Option<DownloadEntry>> {
        json_row(
            &self.conn.lock(),
            "SELECT body FROM download_queue ORDER BY seq LIMIT 1",
            [],
        )
    }

    fn finish_download(&self, seq: u64) -> StoreResult<bool> {
        let n = self
            .conn
            .lock()
            .execute("DELETE FROM download_queue WHERE seq = ?1", params![int(seq)])?;
        Ok(n > 0)
    }
}
