use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::content_type::{content_type_for, extension_for};
use crate::error::StorageResult;

pub const INPUT_KEY: &str = "INPUT";

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValueRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValueStoreInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

fn find_record_file(dir: &std::path::Path, key: &str) -> StorageResult<Option<PathBuf>> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.file_stem().and_then(|s| s.to_str()) == Some(key) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// File-per-key blob storage: one file named `<key>.<ext>`, where `ext` is
/// derived from the content-type at write time and inverted back to a
/// content-type string at read time.
pub struct KeyValueStoreClient {
    dir: PathBuf,
    name: String,
}

impl KeyValueStoreClient {
    pub(crate) fn new(dir: PathBuf, name: String) -> Self {
        Self { dir, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn set_record(&self, key: &str, value: &[u8], content_type: &str) -> StorageResult<()> {
        if let Some(existing) = find_record_file(&self.dir, key)? {
            std::fs::remove_file(existing)?;
        }
        let ext = extension_for(content_type);
        std::fs::write(self.dir.join(format!("{key}.{ext}")), value)?;
        Ok(())
    }

    pub async fn get_record(&self, key: &str) -> StorageResult<Option<KeyValueRecord>> {
        let Some(path) = find_record_file(&self.dir, key)? else {
            return Ok(None);
        };
        let value = std::fs::read(&path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("bin");
        Ok(Some(KeyValueRecord {
            key: key.to_string(),
            value,
            content_type: content_type_for(ext).to_string(),
        }))
    }

    pub async fn delete_record(&self, key: &str) -> StorageResult<()> {
        if let Some(path) = find_record_file(&self.dir, key)? {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub async fn list_keys(&self, limit: Option<usize>, exclusive_start_key: Option<&str>) -> StorageResult<Vec<String>> {
        let mut keys: Vec<String> = std::fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.path().file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        keys.sort();

        let iter = keys.into_iter();
        let iter: Box<dyn Iterator<Item = String>> = match exclusive_start_key {
            Some(start) => Box::new(iter.skip_while(move |k| k.as_str() <= start)),
            None => Box::new(iter),
        };
        let keys: Vec<String> = match limit {
            Some(l) => iter.take(l).collect(),
            None => iter.collect(),
        };
        Ok(keys)
    }

    pub async fn get(&self) -> StorageResult<KeyValueStoreInfo> {
        let meta = std::fs::metadata(&self.dir)?;
        let created_at = meta.created().unwrap_or_else(|_| meta.modified().expect("modified time available")).into();
        let modified_at: DateTime<Utc> = meta.modified()?.into();
        let accessed_at: DateTime<Utc> = meta.accessed().unwrap_or_else(|_| meta.modified().expect("modified time available")).into();

        Ok(KeyValueStoreInfo {
            id: self.name.clone(),
            name: self.name.clone(),
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

pub struct KeyValueStoreCollectionClient {
    root: PathBuf,
}

impl KeyValueStoreCollectionClient {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn get_or_create(&self, name: &str) -> StorageResult<KeyValueStoreClient> {
        let dir = self.root.join(name);
        if !dir.exists() {
            info!(store = name, "creating key-value store directory");
            std::fs::create_dir_all(&dir)?;
        }
        Ok(KeyValueStoreClient::new(dir, name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn set_then_get_record_round_trips_content_type() {
        let dir = tempdir().unwrap();
        let collection = KeyValueStoreCollectionClient::new(dir.path().to_path_buf());
        let client = collection.get_or_create("kv1").await.unwrap();

        client.set_record("greeting", b"hello", "text/plain").await.unwrap();
        let record = client.get_record("greeting").await.unwrap().unwrap();
        assert_eq!(record.value, b"hello");
        assert_eq!(record.content_type, "text/plain");
    }

    #[tokio::test]
    async fn set_record_replaces_stale_extension() {
        let dir = tempdir().unwrap();
        let collection = KeyValueStoreCollectionClient::new(dir.path().to_path_buf());
        let client = collection.get_or_create("kv1").await.unwrap();

        client.set_record("k", b"{}", "application/json").await.unwrap();
        client.set_record("k", b"plain", "text/plain").await.unwrap();

        let keys = client.list_keys(None, None).await.unwrap();
        assert_eq!(keys, vec!["k".to_string()]);
        let record = client.get_record("k").await.unwrap().unwrap();
        assert_eq!(record.value, b"plain");
    }

    #[tokio::test]
    async fn delete_record_is_a_no_op_when_missing() {
        let dir = tempdir().unwrap();
        let collection = KeyValueStoreCollectionClient::new(dir.path().to_path_buf());
        let client = collection.get_or_create("kv1").await.unwrap();
        client.delete_record("missing").await.unwrap();
    }

    #[tokio::test]
    async fn list_keys_respects_exclusive_start_and_limit() {
        let dir = tempdir().unwrap();
        let collection = KeyValueStoreCollectionClient::new(dir.path().to_path_buf());
        let client = collection.get_or_create("kv1").await.unwrap();
        for k in ["a", "b", "c", "d"] {
            client.set_record(k, b"x", "text/plain").await.unwrap();
        }

        let keys = client.list_keys(Some(2), Some("a")).await.unwrap();
        assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);
    }
}
