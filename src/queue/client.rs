use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::cache::ConnectionCache;
use crate::error::{StorageError, StorageResult};
use crate::request::{compute_order_no, Request};

use super::db::{self, RequestModel};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub total_request_count: i64,
    pub handled_request_count: i64,
    pub pending_request_count: i64,
}

impl From<db::QueueRow> for QueueInfo {
    fn from(row: db::QueueRow) -> Self {
        Self {
            id: row.name.clone(),
            name: row.name,
            created_at: row.created_at,
            modified_at: row.modified_at,
            accessed_at: row.accessed_at,
            total_request_count: row.total_request_count,
            handled_request_count: row.handled_request_count,
            pending_request_count: row.pending_request_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadListing {
    pub items: Vec<Request>,
    pub limit: usize,
    pub queue_modified_at: DateTime<Utc>,
    pub had_multiple_clients: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddRequestResult {
    pub request_id: String,
    pub was_already_present: bool,
    pub was_already_handled: bool,
}

impl From<db::AddRequestOutcome> for AddRequestResult {
    fn from(o: db::AddRequestOutcome) -> Self {
        Self {
            request_id: o.request_id,
            was_already_present: o.was_already_present,
            was_already_handled: o.was_already_handled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRequest {
    pub request_id: String,
    pub unique_key: String,
    pub was_already_present: bool,
    pub was_already_handled: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchAddResult {
    pub processed_requests: Vec<ProcessedRequest>,
    /// Always empty in this implementation; kept for API parity (§9).
    pub unprocessed_requests: Vec<serde_json::Value>,
}

/// Public operations on a single request queue.
pub struct RequestQueueClient {
    pub(crate) cache: Arc<ConnectionCache>,
    pub(crate) queues_dir: PathBuf,
    pub(crate) name: String,
    pub(crate) conn: Arc<AsyncMutex<Connection>>,
}

impl RequestQueueClient {
    const QUEUE_ID: i64 = 1;

    fn db_path(&self) -> PathBuf {
        self.queues_dir.join(&self.name).join("db.sqlite")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get(&self) -> StorageResult<QueueInfo> {
        let conn = self.conn.lock().await;
        db::update_accessed_at_by_id(&conn, Self::QUEUE_ID)?;
        let row = db::select_by_id(&conn, Self::QUEUE_ID)?
            .ok_or_else(|| StorageError::QueueNotFound(self.name.clone()))?;
        Ok(row.into())
    }

    /// Renames the queue: disconnects the handle, renames the directory,
    /// reconnects, and updates the row. Fails with `NameConflict` if the
    /// target directory already exists.
    pub async fn update(&mut self, new_name: &str) -> StorageResult<QueueInfo> {
        let old_dir = self.queues_dir.join(&self.name);
        let new_dir = self.queues_dir.join(new_name);
        if new_dir.exists() {
            return Err(StorageError::NameConflict(new_name.to_string()));
        }

        self.cache.close(&self.db_path()).await;
        std::fs::rename(&old_dir, &new_dir)?;

        let new_path = new_dir.join("db.sqlite");
        let conn_arc = self.cache.open(&new_path).await?;
        {
            let conn = conn_arc.lock().await;
            db::update_name_by_id(&conn, Self::QUEUE_ID, new_name)?;
        }

        self.conn = conn_arc;
        self.name = new_name.to_string();
        self.get().await
    }

    pub async fn delete(self) -> StorageResult<()> {
        self.cache.close(&self.db_path()).await;
        let dir = self.queues_dir.join(&self.name);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    pub async fn list_head(&self, limit: usize) -> StorageResult<HeadListing> {
        let conn = self.conn.lock().await;
        let jsons = db::select_request_jsons_head(&conn, Self::QUEUE_ID, limit as i64)?;
        let items = jsons
            .iter()
            .map(|j| serde_json::from_str(j))
            .collect::<Result<Vec<Request>, _>>()?;
        db::update_accessed_at_by_id(&conn, Self::QUEUE_ID)?;
        let row = db::select_by_id(&conn, Self::QUEUE_ID)?
            .ok_or_else(|| StorageError::QueueNotFound(self.name.clone()))?;

        Ok(HeadListing {
            items,
            limit,
            queue_modified_at: row.modified_at,
            had_multiple_clients: false,
        })
    }

    fn build_model(req: &mut Request, forefront: bool) -> StorageResult<RequestModel> {
        req.validate()?;
        req.finalize_id()?;
        let order_no = compute_order_no(req.handled_at, forefront, now_ms());
        let json = serde_json::to_string(req)?;
        Ok(RequestModel {
            id: req.id.clone().expect("finalize_id populates id"),
            order_no,
            url: req.url.clone(),
            unique_key: req.unique_key.clone(),
            method: req.method.clone(),
            retry_count: req.retry_count,
            json,
        })
    }

    pub async fn add_request(&self, mut req: Request, forefront: bool) -> StorageResult<AddRequestResult> {
        if req.id.is_some() {
            return Err(StorageError::InvalidArgument(
                "Request must not have an \"id\" when adding it.".to_string(),
            ));
        }
        let model = Self::build_model(&mut req, forefront)?;
        let mut conn = self.conn.lock().await;
        let outcome = db::add_request(&mut conn, Self::QUEUE_ID, &model)?;
        debug!(queue = %self.name, id = %outcome.request_id, "added request");
        Ok(outcome.into())
    }

    pub async fn batch_add_requests(
        &self,
        reqs: Vec<Request>,
        forefront: bool,
    ) -> StorageResult<BatchAddResult> {
        let mut models = Vec::with_capacity(reqs.len());
        let mut unique_keys = Vec::with_capacity(reqs.len());
        for mut req in reqs {
            if req.id.is_some() {
                return Err(StorageError::InvalidArgument(
                    "Request must not have an \"id\" when adding it.".to_string(),
                ));
            }
            unique_keys.push(req.unique_key.clone());
            models.push(Self::build_model(&mut req, forefront)?);
        }

        let mut conn = self.conn.lock().await;
        let outcome = db::batch_add_requests(&mut conn, Self::QUEUE_ID, &models)?;
        let processed_requests = outcome
            .processed
            .into_iter()
            .zip(unique_keys)
            .map(|(o, unique_key)| ProcessedRequest {
                request_id: o.request_id,
                unique_key,
                was_already_present: o.was_already_present,
                was_already_handled: o.was_already_handled,
            })
            .collect();

        Ok(BatchAddResult {
            processed_requests,
            unprocessed_requests: Vec::new(),
        })
    }

    pub async fn get_request(&self, id: &str) -> StorageResult<Option<Request>> {
        let conn = self.conn.lock().await;
        let json = db::select_request_json(&conn, Self::QUEUE_ID, id)?;
        db::update_accessed_at_by_id(&conn, Self::QUEUE_ID)?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    pub async fn update_request(&self, mut req: Request, forefront: bool) -> StorageResult<AddRequestResult> {
        if req.id.is_none() {
            return Err(StorageError::InvalidArgument(
                "Request is missing required field \"id\".".to_string(),
            ));
        }
        req.validate()?;
        req.finalize_id()?;
        let order_no = compute_order_no(req.handled_at, forefront, now_ms());
        let json = serde_json::to_string(&req)?;
        let model = RequestModel {
            id: req.id.clone().expect("checked above"),
            order_no,
            url: req.url.clone(),
            unique_key: req.unique_key.clone(),
            method: req.method.clone(),
            retry_count: req.retry_count,
            json,
        };

        let mut conn = self.conn.lock().await;
        let outcome = db::update_request(&mut conn, Self::QUEUE_ID, &model)?;
        Ok(outcome.into())
    }

    pub async fn list_and_lock_head(&self, limit: usize, lock_secs: i64) -> StorageResult<Vec<Request>> {
        let mut conn = self.conn.lock().await;
        let rows = db::list_and_lock_head(&mut conn, Self::QUEUE_ID, limit as i64, lock_secs, now_ms())?;
        debug!(queue = %self.name, count = rows.len(), "locked head requests");
        rows.iter()
            .map(|r| serde_json::from_str(&r.json).map_err(StorageError::from))
            .collect()
    }

    pub async fn prolong_request_lock(
        &self,
        id: &str,
        lock_secs: i64,
        forefront: bool,
    ) -> StorageResult<DateTime<Utc>> {
        let conn = self.conn.lock().await;
        let unlock_ms = db::prolong_request_lock(&conn, Self::QUEUE_ID, id, lock_secs, forefront)?;
        Ok(Utc.timestamp_millis_opt(unlock_ms).single().expect("valid timestamp"))
    }

    pub async fn delete_request_lock(&self, id: &str, forefront: bool) -> StorageResult<()> {
        let conn = self.conn.lock().await;
        db::delete_request_lock(&conn, Self::QUEUE_ID, id, forefront, now_ms())
    }

    /// Empties the queue back to zero requests, used by `StorageRoot::purge`.
    pub async fn clear(&self) -> StorageResult<()> {
        let mut conn = self.conn.lock().await;
        db::clear_all_requests(&mut conn, Self::QUEUE_ID)
    }
}
