//! Local, on-disk emulation of the Apify storage client.
//!
//! A [`StorageRoot`] lazily creates the three storage-family directories
//! (request queues, datasets, key-value stores) under a configurable root
//! and hands out per-collection clients. Datasets and key-value stores are
//! plain file-per-item / file-per-key storage; the request queue is backed
//! by a per-queue embedded SQLite database implementing deduplication,
//! ordered head listing, and wall-clock-expiry locking, so crawler code can
//! run against this local backend with the same semantics as the hosted
//! service.

pub mod cache;
pub mod config;
pub mod content_type;
pub mod dataset;
pub mod error;
pub mod key_value_store;
pub mod queue;
pub mod request;
pub mod storage;

pub use config::StorageConfig;
pub use dataset::{DatasetClient, DatasetCollectionClient, DatasetInfo};
pub use error::{StorageError, StorageResult};
pub use key_value_store::{KeyValueRecord, KeyValueStoreClient, KeyValueStoreCollectionClient, KeyValueStoreInfo};
pub use queue::{
    AddRequestResult, BatchAddResult, HeadListing, ProcessedRequest, QueueInfo, RequestQueueClient,
    RequestQueueCollectionClient,
};
pub use request::Request;
pub use storage::StorageRoot;
