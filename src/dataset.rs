use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::error::StorageResult;

const ITEM_INDEX_WIDTH: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub id: String,
    pub name: String,
    pub item_count: usize,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

fn is_item_file(path: &std::path::Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
        && path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.len() == ITEM_INDEX_WIDTH && s.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
}

fn item_paths(dir: &std::path::Path) -> StorageResult<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_item_file(p))
        .collect();
    paths.sort();
    Ok(paths)
}

fn read_json_file(path: &std::path::Path) -> StorageResult<serde_json::Value> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// File-per-item append-only log. Indices are scanned lazily from disk on
/// first write per client instance, then tracked in memory, matching the
/// single-writer-per-process discipline the request queue uses for its
/// database file.
pub struct DatasetClient {
    dir: PathBuf,
    name: String,
    next_index: AsyncMutex<Option<u64>>,
}

impl DatasetClient {
    pub(crate) fn new(dir: PathBuf, name: String) -> Self {
        Self {
            dir,
            name,
            next_index: AsyncMutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn item_paths(&self) -> StorageResult<Vec<PathBuf>> {
        item_paths(&self.dir)
    }

    async fn take_next_index(&self) -> StorageResult<u64> {
        let mut guard = self.next_index.lock().await;
        if let Some(next) = *guard {
            *guard = Some(next + 1);
            return Ok(next);
        }

        let highest = item_paths(&self.dir)?
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u64>().ok()))
            .max();
        let next = highest.map(|h| h + 1).unwrap_or(0);
        *guard = Some(next + 1);
        Ok(next)
    }

    pub async fn push_item(&self, item: serde_json::Value) -> StorageResult<()> {
        let index = self.take_next_index().await?;
        let filename = format!("{index:0width$}.json", width = ITEM_INDEX_WIDTH);
        std::fs::write(self.dir.join(filename), serde_json::to_vec(&item)?)?;
        Ok(())
    }

    pub async fn list_items(&self, offset: usize, limit: Option<usize>) -> StorageResult<Vec<serde_json::Value>> {
        let paths = item_paths(&self.dir)?;
        let iter = paths.into_iter().skip(offset);
        let items: Vec<serde_json::Value> = match limit {
            Some(l) => iter.take(l).map(|p| read_json_file(&p)).collect::<StorageResult<_>>()?,
            None => iter.map(|p| read_json_file(&p)).collect::<StorageResult<_>>()?,
        };
        Ok(items)
    }

    pub async fn get(&self) -> StorageResult<DatasetInfo> {
        let item_count = item_paths(&self.dir)?.len();
        let meta = std::fs::metadata(&self.dir)?;
        let created_at = meta.created().unwrap_or_else(|_| meta.modified().expect("modified time available")).into();
        let modified_at: DateTime<Utc> = meta.modified()?.into();
        let accessed_at: DateTime<Utc> = meta.accessed().unwrap_or_else(|_| meta.modified().expect("modified time available")).into();

        Ok(DatasetInfo {
            id: self.name.clone(),
            name: self.name.clone(),
            item_count,
            created_at,
            modified_at,
            accessed_at,
        })
    }

    pub async fn delete(self) -> StorageResult<()> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

pub struct DatasetCollectionClient {
    root: PathBuf,
}

impl DatasetCollectionClient {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn get_or_create(&self, name: &str) -> StorageResult<DatasetClient> {
        let dir = self.root.join(name);
        if !dir.exists() {
            info!(dataset = name, "creating dataset directory");
            std::fs::create_dir_all(&dir)?;
        }
        Ok(DatasetClient::new(dir, name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn push_item_assigns_increasing_indices() {
        let dir = tempdir().unwrap();
        let collection = DatasetCollectionClient::new(dir.path().to_path_buf());
        let client = collection.get_or_create("d1").await.unwrap();

        client.push_item(serde_json::json!({"n": 1})).await.unwrap();
        client.push_item(serde_json::json!({"n": 2})).await.unwrap();

        let items = client.list_items(0, None).await.unwrap();
        assert_eq!(items, vec![serde_json::json!({"n": 1}), serde_json::json!({"n": 2})]);

        let info = client.get().await.unwrap();
        assert_eq!(info.item_count, 2);
    }

    #[tokio::test]
    async fn push_item_resumes_numbering_from_existing_files() {
        let dir = tempdir().unwrap();
        let collection = DatasetCollectionClient::new(dir.path().to_path_buf());
        let client = collection.get_or_create("d1").await.unwrap();
        client.push_item(serde_json::json!({"n": 1})).await.unwrap();

        // A second client instance over the same directory must not reuse index 0.
        let client2 = collection.get_or_create("d1").await.unwrap();
        client2.push_item(serde_json::json!({"n": 2})).await.unwrap();

        let items = client2.list_items(0, None).await.unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn list_items_honors_offset_and_limit() {
        let dir = tempdir().unwrap();
        let collection = DatasetCollectionClient::new(dir.path().to_path_buf());
        let client = collection.get_or_create("d1").await.unwrap();
        for n in 0..5 {
            client.push_item(serde_json::json!({"n": n})).await.unwrap();
        }

        let items = client.list_items(2, Some(2)).await.unwrap();
        assert_eq!(items, vec![serde_json::json!({"n": 2}), serde_json::json!({"n": 3})]);
    }
}
