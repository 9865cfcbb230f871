use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::ConnectionCache;
use crate::config::StorageConfig;
use crate::dataset::DatasetCollectionClient;
use crate::error::StorageResult;
use crate::key_value_store::{KeyValueStoreCollectionClient, INPUT_KEY};
use crate::queue::RequestQueueCollectionClient;

const DEFAULT_DATASET: &str = "default";
const DEFAULT_KEY_VALUE_STORE: &str = "default";
const DEFAULT_REQUEST_QUEUE: &str = "default";

/// The top-level storage directory: lazy creation of the three
/// storage-family directories, routing to per-family clients, and `purge`.
pub struct StorageRoot {
    config: StorageConfig,
    request_queues: RequestQueueCollectionClient,
    datasets: DatasetCollectionClient,
    key_value_stores: KeyValueStoreCollectionClient,
}

impl StorageRoot {
    /// Opens (creating if necessary) the three storage-family directories
    /// under `config.storage_dir`, warning about any pre-existing data
    /// found in them.
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let request_queues_dir = config.storage_dir.join("request_queues");
        let datasets_dir = config.storage_dir.join("datasets");
        let key_value_stores_dir = config.storage_dir.join("key_value_stores");

        bootstrap_family_dir("request_queues", &request_queues_dir, false)?;
        bootstrap_family_dir("datasets", &datasets_dir, false)?;
        bootstrap_family_dir("key_value_stores", &key_value_stores_dir, true)?;

        let cache = Arc::new(ConnectionCache::new(config.enable_wal_mode));
        Ok(Self {
            request_queues: RequestQueueCollectionClient::new(cache, request_queues_dir),
            datasets: DatasetCollectionClient::new(datasets_dir),
            key_value_stores: KeyValueStoreCollectionClient::new(key_value_stores_dir),
            config,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn request_queues(&self) -> &RequestQueueCollectionClient {
        &self.request_queues
    }

    pub fn datasets(&self) -> &DatasetCollectionClient {
        &self.datasets
    }

    pub fn key_value_stores(&self) -> &KeyValueStoreCollectionClient {
        &self.key_value_stores
    }

    /// Empties the three default containers; a key-value record named
    /// `INPUT` in the default key-value store survives.
    pub async fn purge(&self) -> StorageResult<()> {
        let dataset = self.datasets.get_or_create(DEFAULT_DATASET).await?;
        for item in dataset.item_paths()? {
            std::fs::remove_file(item)?;
        }

        let kv = self.key_value_stores.get_or_create(DEFAULT_KEY_VALUE_STORE).await?;
        for key in kv.list_keys(None, None).await? {
            if key != INPUT_KEY {
                kv.delete_record(&key).await?;
            }
        }

        let rq = self.request_queues.get_or_create(DEFAULT_REQUEST_QUEUE).await?;
        rq.clear().await?;

        Ok(())
    }
}

fn bootstrap_family_dir(label: &str, dir: &Path, is_key_value_family: bool) -> StorageResult<()> {
    let already_existed = dir.exists();
    std::fs::create_dir_all(dir)?;

    if !already_existed {
        info!(family = label, "created storage family directory");
        return Ok(());
    }

    let populated = populated_subdirs(dir, is_key_value_family)?;
    if !populated.is_empty() {
        warn!(family = label, directories = ?populated, "storage family directory already contains data");
    }
    Ok(())
}

fn populated_subdirs(dir: &Path, is_key_value_family: bool) -> StorageResult<Vec<String>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let mut has_unreserved_content = false;
        for item in std::fs::read_dir(&path)? {
            let item = item?;
            if is_key_value_family && item.path().file_stem().and_then(|s| s.to_str()) == Some(INPUT_KEY) {
                continue;
            }
            has_unreserved_content = true;
            break;
        }

        if has_unreserved_content {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                found.push(name.to_string());
            }
        }
    }
    Ok(found)
}
