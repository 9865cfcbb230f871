pub mod client;
pub mod collection;
pub mod db;

pub use client::{
    AddRequestResult, BatchAddResult, HeadListing, ProcessedRequest, QueueInfo, RequestQueueClient,
};
pub use collection::RequestQueueCollectionClient;
