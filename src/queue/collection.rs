use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::cache::ConnectionCache;
use crate::error::StorageResult;

use super::client::RequestQueueClient;
use super::db;

/// `getOrCreate(name)` for request queues: ensures the per-queue directory
/// and database file exist, then hands back a client bound to that file's
/// cached connection.
pub struct RequestQueueCollectionClient {
    cache: Arc<ConnectionCache>,
    root: PathBuf,
}

impl RequestQueueCollectionClient {
    pub fn new(cache: Arc<ConnectionCache>, root: PathBuf) -> Self {
        Self { cache, root }
    }

    pub async fn get_or_create(&self, name: &str) -> StorageResult<RequestQueueClient> {
        let dir = self.root.join(name);
        if !dir.exists() {
            info!(queue = name, "creating request queue directory");
            std::fs::create_dir_all(&dir)?;
        }

        let db_path = dir.join("db.sqlite");
        let conn_arc = self.cache.open(&db_path).await?;
        {
            let mut conn = conn_arc.lock().await;
            db::ensure_schema(&conn)?;
            db::select_or_insert_by_name(&mut conn, name)?;
        }

        Ok(RequestQueueClient {
            cache: self.cache.clone(),
            queues_dir: self.root.clone(),
            name: name.to_string(),
            conn: conn_arc,
        })
    }
}
