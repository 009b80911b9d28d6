use crate::model::{BinaryRecord, PackageRecord, SymbolTable};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("Failed to read response body: {0}")]
    Body(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Failed to encode record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Response body, yielded in whatever chunk sizes the transport delivers.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

pub struct HttpResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issues a GET request. Non-200 statuses are returned, not turned into errors.
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

/// Persistent dedup signal shared across runs.
///
/// No transactional guarantee ties a `find_*` to a later `save_*`; saves are
/// upserts so a duplicate write from a concurrent run is harmless.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn find_package(&self, name: &str, path: &str)
        -> Result<Option<PackageRecord>, StoreError>;

    async fn save_package(&self, name: &str, path: &str) -> Result<(), StoreError>;

    async fn find_binary(&self, name: &str) -> Result<Option<BinaryRecord>, StoreError>;

    async fn save_binary(&self, name: &str, symbols: &SymbolTable) -> Result<(), StoreError>;
}
