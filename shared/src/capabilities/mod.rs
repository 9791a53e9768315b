mod http;
mod kv;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::sync::Arc;

pub use self::http::{
    HttpError, HttpRequest, HttpResponse, HttpResult, HttpTransport, ValidatedUrl,
    MAX_RESPONSE_BODY_SIZE, MAX_TIMEOUT_MS, MAX_URL_LENGTH,
};
pub use self::kv::{
    KeyNamespace, KeyValueStore, KvError, KvKey, MemoryStore, StorageErrorCode, MAX_VALUE_SIZE,
};

#[cfg(feature = "native-transport")]
pub use self::http::ReqwestTransport;

#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Storage error: {0}")]
    Kv(#[from] KvError),
}

/// The side-effecting services every consumer is handed explicitly: the
/// network transport and the shared key-value store. Cloning shares them.
#[derive(Clone)]
pub struct Capabilities {
    pub http: Arc<dyn HttpTransport>,
    pub kv: Arc<dyn KeyValueStore>,
}

impl Capabilities {
    pub fn new(http: Arc<dyn HttpTransport>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self { http, kv }
    }

    /// reqwest transport plus a SQLite store at `db_path`.
    #[cfg(all(feature = "native-transport", not(target_arch = "wasm32")))]
    pub fn native(db_path: impl AsRef<std::path::Path>) -> Result<Self, CapabilityError> {
        let http = ReqwestTransport::new()?;
        let kv = SqliteStore::open(db_path)?;
        Ok(Self::new(Arc::new(http), Arc::new(kv)))
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
