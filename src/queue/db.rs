//! Per-queue schema and the transactional primitives that operate on it.
//!
//! One database file holds exactly one queue row (`id` is pinned to `1` by a
//! `CHECK` constraint) and any number of request rows. A partial index over
//! `(queueId, orderNo)` restricted to non-null `orderNo` answers "head of
//! queue" without ever touching handled rows, and three triggers keep the
//! queue row's `modifiedAt`/`accessedAt` timestamps in lockstep with every
//! insert, update, and delete on `requests` so callers never have to
//! remember to bump them by hand.

use chrono::{DateTime, Utc};
use rusqlite::{named_params, Connection, OptionalExtension};

use crate::error::{StorageError, StorageResult};

const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%f";

#[derive(Debug, Clone, PartialEq)]
pub struct QueueRow {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub total_request_count: i64,
    pub handled_request_count: i64,
}

impl QueueRow {
    pub fn pending_request_count(&self) -> i64 {
        self.total_request_count - self.handled_request_count
    }
}

/// A fully materialized request row, as needed by head listings and locking.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRow {
    pub id: String,
    pub order_no: Option<i64>,
    pub json: String,
}

/// A request as it is about to be written: all of the indexed columns plus
/// the canonical JSON blob.
#[derive(Debug, Clone)]
pub struct RequestModel {
    pub id: String,
    pub order_no: Option<i64>,
    pub url: String,
    pub unique_key: String,
    pub method: String,
    pub retry_count: i64,
    pub json: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddRequestOutcome {
    pub request_id: String,
    pub was_already_present: bool,
    pub was_already_handled: bool,
}

/// Idempotently creates the queue/request tables, the partial head index,
/// and the bookkeeping triggers. Safe to call on every connection open.
pub fn ensure_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS queues(
          id INTEGER PRIMARY KEY CHECK (id = 1),
          name TEXT NOT NULL UNIQUE,
          createdAt TIMESTAMP NOT NULL DEFAULT (STRFTIME('{fmt}', 'NOW')),
          modifiedAt TIMESTAMP NOT NULL DEFAULT (STRFTIME('{fmt}', 'NOW')),
          accessedAt TIMESTAMP NOT NULL DEFAULT (STRFTIME('{fmt}', 'NOW')),
          totalRequestCount INTEGER NOT NULL DEFAULT 0,
          handledRequestCount INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS requests(
          queueId INTEGER NOT NULL REFERENCES queues(id) ON DELETE CASCADE,
          id TEXT NOT NULL,
          orderNo INTEGER,
          url TEXT NOT NULL,
          uniqueKey TEXT NOT NULL,
          method TEXT NOT NULL,
          retryCount INTEGER NOT NULL,
          json TEXT NOT NULL,
          PRIMARY KEY (queueId, id, uniqueKey)
        );

        CREATE INDEX IF NOT EXISTS requests_order_no_idx
          ON requests(queueId, orderNo)
          WHERE orderNo IS NOT NULL;

        CREATE TRIGGER IF NOT EXISTS requests_after_insert AFTER INSERT ON requests
        BEGIN
          UPDATE queues
          SET modifiedAt = STRFTIME('{fmt}', 'NOW'), accessedAt = STRFTIME('{fmt}', 'NOW')
          WHERE id = new.queueId;
        END;

        CREATE TRIGGER IF NOT EXISTS requests_after_update AFTER UPDATE ON requests
        BEGIN
          UPDATE queues
          SET modifiedAt = STRFTIME('{fmt}', 'NOW'), accessedAt = STRFTIME('{fmt}', 'NOW')
          WHERE id = new.queueId;
        END;

        CREATE TRIGGER IF NOT EXISTS requests_after_delete AFTER DELETE ON requests
        BEGIN
          UPDATE queues
          SET modifiedAt = STRFTIME('{fmt}', 'NOW'), accessedAt = STRFTIME('{fmt}', 'NOW')
          WHERE id = old.queueId;
        END;
        "#,
        fmt = TIMESTAMP_FMT,
    ))?;
    Ok(())
}

fn row_to_queue(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueRow> {
    Ok(QueueRow {
        id: row.get("id")?,
        name: row.get("name")?,
        created_at: row.get("createdAt")?,
        modified_at: row.get("modifiedAt")?,
        accessed_at: row.get("accessedAt")?,
        total_request_count: row.get("totalRequestCount")?,
        handled_request_count: row.get("handledRequestCount")?,
    })
}

pub fn select_by_id(conn: &Connection, id: i64) -> StorageResult<Option<QueueRow>> {
    conn.query_row(
        "SELECT * FROM queues WHERE id = :id",
        named_params! {":id": id},
        row_to_queue,
    )
    .optional()
    .map_err(StorageError::from)
}

pub fn select_by_name(conn: &Connection, name: &str) -> StorageResult<Option<QueueRow>> {
    conn.query_row(
        "SELECT * FROM queues WHERE name = :name",
        named_params! {":name": name},
        row_to_queue,
    )
    .optional()
    .map_err(StorageError::from)
}

/// Returns the existing queue row for `name`, or inserts (and returns) a
/// fresh one. There is at most one queue row per database file, so this is
/// really "insert the row if the file was just created".
pub fn select_or_insert_by_name(conn: &mut Connection, name: &str) -> StorageResult<QueueRow> {
    let tx = conn.transaction()?;
    if let Some(row) = select_by_name(&tx, name)? {
        tx.commit()?;
        return Ok(row);
    }
    tx.execute(
        "INSERT INTO queues(id, name) VALUES (1, :name)",
        named_params! {":name": name},
    )?;
    let row = select_by_id(&tx, 1)?.expect("row just inserted");
    tx.commit()?;
    Ok(row)
}

pub fn update_accessed_at_by_id(conn: &Connection, id: i64) -> StorageResult<()> {
    conn.execute(
        &format!("UPDATE queues SET accessedAt = STRFTIME('{TIMESTAMP_FMT}', 'NOW') WHERE id = :id"),
        named_params! {":id": id},
    )?;
    Ok(())
}

pub fn update_modified_at_by_id(conn: &Connection, id: i64) -> StorageResult<()> {
    conn.execute(
        &format!("UPDATE queues SET modifiedAt = STRFTIME('{TIMESTAMP_FMT}', 'NOW') WHERE id = :id"),
        named_params! {":id": id},
    )?;
    Ok(())
}

pub fn update_name_by_id(conn: &Connection, id: i64, name: &str) -> StorageResult<()> {
    conn.execute(
        "UPDATE queues SET name = :name WHERE id = :id",
        named_params! {":id": id, ":name": name},
    )?;
    Ok(())
}

/// Counter maintenance. Only ever called from inside the composite
/// transactions below — never on its own from client code.
fn adjust_counts(conn: &Connection, id: i64, delta_total: i64, delta_handled: i64) -> StorageResult<()> {
    conn.execute(
        "UPDATE queues
         SET totalRequestCount = totalRequestCount + :dt,
             handledRequestCount = handledRequestCount + :dh
         WHERE id = :id",
        named_params! {":id": id, ":dt": delta_total, ":dh": delta_handled},
    )?;
    Ok(())
}

pub fn select_request_order_no(
    conn: &Connection,
    queue_id: i64,
    request_id: &str,
) -> StorageResult<Option<Option<i64>>> {
    conn.query_row(
        "SELECT orderNo FROM requests WHERE queueId = :q AND id = :id",
        named_params! {":q": queue_id, ":id": request_id},
        |row| row.get::<_, Option<i64>>(0),
    )
    .optional()
    .map_err(StorageError::from)
}

pub fn select_request_json(conn: &Connection, queue_id: i64, request_id: &str) -> StorageResult<Option<String>> {
    conn.query_row(
        "SELECT json FROM requests WHERE queueId = :q AND id = :id",
        named_params! {":q": queue_id, ":id": request_id},
        |row| row.get(0),
    )
    .optional()
    .map_err(StorageError::from)
}

pub fn select_request_jsons_head(conn: &Connection, queue_id: i64, limit: i64) -> StorageResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT json FROM requests
         WHERE queueId = :q AND orderNo IS NOT NULL
         ORDER BY orderNo ASC
         LIMIT :limit",
    )?;
    let rows = stmt.query_map(named_params! {":q": queue_id, ":limit": limit}, |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn insert_request_row(tx: &rusqlite::Transaction<'_>, queue_id: i64, model: &RequestModel) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO requests(queueId, id, orderNo, url, uniqueKey, method, retryCount, json)
         VALUES (:q, :id, :orderNo, :url, :uniqueKey, :method, :retryCount, :json)",
        named_params! {
            ":q": queue_id,
            ":id": model.id,
            ":orderNo": model.order_no,
            ":url": model.url,
            ":uniqueKey": model.unique_key,
            ":method": model.method,
            ":retryCount": model.retry_count,
            ":json": model.json,
        },
    )?;
    Ok(())
}

/// Extended SQLite result codes for constraint violations, used to tell a
/// primary-key collision apart from a foreign-key one.
mod sqlite_codes {
    pub const CONSTRAINT_PRIMARYKEY: i32 = 1555;
    pub const CONSTRAINT_FOREIGNKEY: i32 = 787;
}

fn extended_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(ffi_err, _) => Some(ffi_err.extended_code),
        _ => None,
    }
}

/// `addRequest` transaction (§4.4): insert, or on primary-key conflict
/// report the existing row's state without touching it.
pub fn add_request(conn: &mut Connection, queue_id: i64, model: &RequestModel) -> StorageResult<AddRequestOutcome> {
    let tx = conn.transaction()?;
    let outcome = add_request_in_tx(&tx, queue_id, model)?;
    tx.commit()?;
    Ok(outcome)
}

fn add_request_in_tx(
    tx: &rusqlite::Transaction<'_>,
    queue_id: i64,
    model: &RequestModel,
) -> StorageResult<AddRequestOutcome> {
    match insert_request_row(tx, queue_id, model) {
        Ok(()) => {
            let delta_handled = if model.order_no.is_none() { 1 } else { 0 };
            adjust_counts(tx, queue_id, 1, delta_handled)?;
            Ok(AddRequestOutcome {
                request_id: model.id.clone(),
                was_already_present: false,
                was_already_handled: false,
            })
        }
        Err(err) => match extended_code(&err) {
            Some(sqlite_codes::CONSTRAINT_PRIMARYKEY) => {
                let existing_order_no = select_request_order_no(tx, queue_id, &model.id)?
                    .expect("row must exist after a primary-key conflict");
                Ok(AddRequestOutcome {
                    request_id: model.id.clone(),
                    was_already_present: true,
                    was_already_handled: existing_order_no.is_none(),
                })
            }
            Some(sqlite_codes::CONSTRAINT_FOREIGNKEY) => {
                Err(StorageError::QueueNotFound(queue_id.to_string()))
            }
            _ => Err(StorageError::from(err)),
        },
    }
}

#[derive(Debug, Clone)]
pub struct BatchAddOutcome {
    pub processed: Vec<AddRequestOutcome>,
}

/// `batchAddRequests` transaction: same per-item logic as `addRequest`, but
/// a foreign-key failure (queue missing) aborts the whole batch.
pub fn batch_add_requests(
    conn: &mut Connection,
    queue_id: i64,
    models: &[RequestModel],
) -> StorageResult<BatchAddOutcome> {
    let tx = conn.transaction()?;
    let mut processed = Vec::with_capacity(models.len());
    for model in models {
        processed.push(add_request_in_tx(&tx, queue_id, model)?);
    }
    tx.commit()?;
    Ok(BatchAddOutcome { processed })
}

/// `updateRequest` transaction (§4.4). Delegates to `addRequest` when the
/// row is absent; otherwise rewrites it in place and adjusts
/// `handledRequestCount` by the composite `(wasHandled, isHandled)` delta.
pub fn update_request(conn: &mut Connection, queue_id: i64, model: &RequestModel) -> StorageResult<AddRequestOutcome> {
    let tx = conn.transaction()?;
    let existing_order_no = select_request_order_no(&tx, queue_id, &model.id)?;

    let outcome = match existing_order_no {
        None => add_request_in_tx(&tx, queue_id, model)?,
        Some(old_order_no) => {
            tx.execute(
                "UPDATE requests
                 SET orderNo = :orderNo, url = :url, uniqueKey = :uniqueKey,
                     method = :method, retryCount = :retryCount, json = :json
                 WHERE queueId = :q AND id = :id",
                named_params! {
                    ":q": queue_id,
                    ":id": model.id,
                    ":orderNo": model.order_no,
                    ":url": model.url,
                    ":uniqueKey": model.unique_key,
                    ":method": model.method,
                    ":retryCount": model.retry_count,
                    ":json": model.json,
                },
            )?;

            let was_handled = old_order_no.is_none();
            let is_handled = model.order_no.is_none();
            let delta_handled = match (was_handled, is_handled) {
                (false, true) => 1,
                (true, false) => -1,
                _ => 0,
            };
            if delta_handled != 0 {
                adjust_counts(&tx, queue_id, 0, delta_handled)?;
            }

            AddRequestOutcome {
                request_id: model.id.clone(),
                was_already_present: true,
                was_already_handled: was_handled,
            }
        }
    };

    tx.commit()?;
    Ok(outcome)
}

/// `listAndLockHead` transaction (§4.5): select the first `limit` available
/// (unlocked, unhandled) rows and push their `orderNo` past the new lock
/// expiry, preserving sign.
pub fn list_and_lock_head(
    conn: &mut Connection,
    queue_id: i64,
    limit: i64,
    lock_secs: i64,
    now_ms: i64,
) -> StorageResult<Vec<RequestRow>> {
    let tx = conn.transaction()?;
    let mut stmt = tx.prepare(
        "SELECT id, json, orderNo FROM requests
         WHERE queueId = :q AND orderNo IS NOT NULL AND orderNo BETWEEN :neg_t AND :t
         ORDER BY orderNo ASC
         LIMIT :limit",
    )?;
    let rows: Vec<RequestRow> = stmt
        .query_map(
            named_params! {":q": queue_id, ":neg_t": -now_ms, ":t": now_ms, ":limit": limit},
            |row| {
                Ok(RequestRow {
                    id: row.get(0)?,
                    json: row.get(1)?,
                    order_no: row.get(2)?,
                })
            },
        )?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    let unlock = now_ms + lock_secs * 1000;
    for row in &rows {
        let old = row.order_no.expect("filtered to non-null above");
        let new_order_no = old.signum() * unlock;
        tx.execute(
            "UPDATE requests SET orderNo = :orderNo WHERE queueId = :q AND id = :id",
            named_params! {":q": queue_id, ":id": row.id, ":orderNo": new_order_no},
        )?;
    }
    tx.commit()?;
    Ok(rows)
}

/// `prolongRequestLock`: extend a held lock, failing if the row is absent
/// or unlocked (handled rows have `orderNo IS NULL`, which this also
/// rejects per the "locked or missing" contract the public op enforces).
pub fn prolong_request_lock(
    conn: &Connection,
    queue_id: i64,
    id: &str,
    lock_secs: i64,
    forefront: bool,
) -> StorageResult<i64> {
    let order_no = select_request_order_no(conn, queue_id, id)?
        .flatten()
        .ok_or_else(|| StorageError::NotLockedOrMissing(id.to_string()))?;

    let unlock = order_no.abs() + lock_secs * 1000;
    let new_order_no = if forefront { -unlock } else { unlock };
    conn.execute(
        "UPDATE requests SET orderNo = :orderNo WHERE queueId = :q AND id = :id",
        named_params! {":q": queue_id, ":id": id, ":orderNo": new_order_no},
    )?;
    Ok(unlock)
}

/// `deleteRequestLock`: release a held lock before expiry, failing if the
/// row is absent, handled, or not currently locked (`|orderNo| <= now`).
pub fn delete_request_lock(
    conn: &Connection,
    queue_id: i64,
    id: &str,
    forefront: bool,
    now_ms: i64,
) -> StorageResult<()> {
    let order_no = select_request_order_no(conn, queue_id, id)?
        .flatten()
        .ok_or_else(|| StorageError::NotLockedOrMissing(id.to_string()))?;

    if order_no.abs() <= now_ms {
        return Err(StorageError::NotLockedOrMissing(id.to_string()));
    }

    let new_order_no = if forefront { -now_ms } else { now_ms };
    conn.execute(
        "UPDATE requests SET orderNo = :orderNo WHERE queueId = :q AND id = :id",
        named_params! {":q": queue_id, ":id": id, ":orderNo": new_order_no},
    )?;
    Ok(())
}

pub fn delete_request_by_id(conn: &Connection, queue_id: i64, id: &str) -> StorageResult<()> {
    conn.execute(
        "DELETE FROM requests WHERE queueId = :q AND id = :id",
        named_params! {":q": queue_id, ":id": id},
    )?;
    Ok(())
}

/// Used by `purge`: empties a queue back to zero requests and resets its
/// counters, without touching the queue row's name or creation time.
pub fn clear_all_requests(conn: &mut Connection, queue_id: i64) -> StorageResult<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM requests WHERE queueId = :q", named_params! {":q": queue_id})?;
    tx.execute(
        "UPDATE queues SET totalRequestCount = 0, handledRequestCount = 0 WHERE id = :q",
        named_params! {":q": queue_id},
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", true).unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    fn model(unique_key: &str, order_no: Option<i64>) -> RequestModel {
        RequestModel {
            id: crate::request::derive_request_id(unique_key),
            order_no,
            url: format!("https://example.com/{unique_key}"),
            unique_key: unique_key.to_string(),
            method: "GET".to_string(),
            retry_count: 0,
            json: format!("{{\"url\":\"https://example.com/{unique_key}\"}}"),
        }
    }

    #[test]
    fn add_request_is_idempotent_and_first_write_wins() {
        let mut conn = open_test_conn();
        select_or_insert_by_name(&mut conn, "q1").unwrap();

        let m = model("k1", Some(1000));
        let first = add_request(&mut conn, 1, &m).unwrap();
        assert!(!first.was_already_present);
        assert!(!first.was_already_handled);

        let mut m2 = m.clone();
        m2.method = "POST".to_string();
        m2.order_no = None;
        let second = add_request(&mut conn, 1, &m2).unwrap();
        assert!(second.was_already_present);
        assert!(!second.was_already_handled);

        let json = select_request_json(&conn, 1, &m.id).unwrap().unwrap();
        assert!(json.contains("example.com/k1"));

        let row = select_by_id(&conn, 1).unwrap().unwrap();
        assert_eq!(row.total_request_count, 1);
        assert_eq!(row.handled_request_count, 0);
    }

    #[test]
    fn add_request_missing_queue_is_foreign_key_violation() {
        let mut conn = open_test_conn();
        let m = model("k1", Some(1));
        let err = add_request(&mut conn, 1, &m).unwrap_err();
        assert!(matches!(err, StorageError::QueueNotFound(_)));
    }

    #[test]
    fn update_request_adjusts_handled_count_by_transition() {
        let mut conn = open_test_conn();
        select_or_insert_by_name(&mut conn, "q1").unwrap();
        let m = model("k1", Some(1000));
        add_request(&mut conn, 1, &m).unwrap();

        let mut handled = m.clone();
        handled.order_no = None;
        update_request(&mut conn, 1, &handled).unwrap();
        let row = select_by_id(&conn, 1).unwrap().unwrap();
        assert_eq!(row.handled_request_count, 1);

        let mut pending_again = m.clone();
        pending_again.order_no = Some(2000);
        update_request(&mut conn, 1, &pending_again).unwrap();
        let row = select_by_id(&conn, 1).unwrap().unwrap();
        assert_eq!(row.handled_request_count, 0);
    }

    #[test]
    fn list_and_lock_head_hides_locked_rows_until_expiry() {
        let mut conn = open_test_conn();
        select_or_insert_by_name(&mut conn, "q1").unwrap();
        add_request(&mut conn, 1, &model("k1", Some(1000))).unwrap();
        add_request(&mut conn, 1, &model("k2", Some(2000))).unwrap();

        let locked = list_and_lock_head(&mut conn, 1, 10, 60, 5000).unwrap();
        assert_eq!(locked.len(), 2);

        let head = select_request_jsons_head(&conn, 1, 10).unwrap();
        assert!(head.is_empty(), "locked rows must not appear in the head");

        // Advance past expiry: 5000 + 60_000 = 65000.
        let head_after_expiry = list_and_lock_head(&mut conn, 1, 10, 60, 70_000).unwrap();
        assert_eq!(head_after_expiry.len(), 2);
    }

    #[test]
    fn prolong_and_delete_lock_round_trip() {
        let mut conn = open_test_conn();
        select_or_insert_by_name(&mut conn, "q1").unwrap();
        let m = model("k1", Some(1000));
        add_request(&mut conn, 1, &m).unwrap();
        list_and_lock_head(&mut conn, 1, 10, 60, 1000).unwrap();

        let unlock = prolong_request_lock(&conn, 1, &m.id, 30, false).unwrap();
        assert_eq!(unlock, 61_000 + 30_000);

        delete_request_lock(&conn, 1, &m.id, false, 2000).unwrap();
        let order_no = select_request_order_no(&conn, 1, &m.id).unwrap().unwrap();
        assert_eq!(order_no, Some(2000));
    }

    #[test]
    fn prolong_missing_row_fails() {
        let mut conn = open_test_conn();
        select_or_insert_by_name(&mut conn, "q1").unwrap();
        let err = prolong_request_lock(&conn, 1, "missing", 10, false).unwrap_err();
        assert!(matches!(err, StorageError::NotLockedOrMissing(_)));
    }
}
