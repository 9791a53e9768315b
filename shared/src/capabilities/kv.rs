use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// The logical tables kept in the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Favorites,
    Metadata,
}

impl KeyNamespace {
    pub fn prefix(self) -> &'static str {
        match self {
            KeyNamespace::Favorites => "favorites",
            KeyNamespace::Metadata => "metadata",
        }
    }
}

/// A fixed storage key: a namespace plus a schema version. Bumping the
/// version starts a fresh table instead of decoding an incompatible one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    version: u32,
}

impl KvKey {
    /// `favorites:v1`, the ordered list of favorite ids.
    ///
    /// Earlier app builds wrote `favorites_v1` and `image_meta_v1`; those
    /// entries are not read or migrated.
    pub fn favorites() -> Self {
        Self {
            namespace: KeyNamespace::Favorites,
            version: 1,
        }
    }

    /// `metadata:v1`, the id → record table.
    pub fn metadata() -> Self {
        Self {
            namespace: KeyNamespace::Metadata,
            version: 1,
        }
    }

    pub fn raw(&self) -> String {
        format!("{}:v{}", self.namespace.prefix(), self.version)
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (code: {code:?}, retryable: {retryable})")]
    Storage {
        code: StorageErrorCode,
        message: String,
        retryable: bool,
    },

    #[error("serialization error: {message}")]
    Serialization { message: String, key: Option<String> },
}

impl KvError {
    pub fn is_retryable(&self) -> bool {
        match self {
            KvError::Storage { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        let retryable = code.is_retryable();
        Self::Storage {
            code,
            message: message.into(),
            retryable,
        }
    }

    pub fn serialization(key: &KvKey, error: &serde_json::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
            key: Some(key.raw()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorCode {
    Unknown,
    Unavailable,
    Corrupted,
    DiskFull,
    PermissionDenied,
    Busy,
    Locked,
    IoError,
}

impl StorageErrorCode {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            StorageErrorCode::Unavailable | StorageErrorCode::Busy | StorageErrorCode::Locked
        )
    }
}

/// Durable string-keyed JSON storage. Both calls may suspend on device I/O
/// and both surface failures to the caller; there is no compare-and-swap, so
/// concurrent read-modify-write cycles on one key are last-write-wins.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &KvKey) -> Result<Option<Value>, KvError>;
    async fn set(&self, key: &KvKey, value: Value) -> Result<(), KvError>;
}

fn check_size(key: &KvKey, value: &Value) -> Result<String, KvError> {
    let encoded = serde_json::to_string(value).map_err(|e| KvError::serialization(key, &e))?;
    if encoded.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: encoded.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(encoded)
}

/// Process-local store. Contents do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &KvKey) -> Result<Option<Value>, KvError> {
        Ok(self.entries.read().await.get(&key.raw()).cloned())
    }

    async fn set(&self, key: &KvKey, value: Value) -> Result<(), KvError> {
        check_size(key, &value)?;
        self.entries.write().await.insert(key.raw(), value);
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use sqlite::SqliteStore;

#[cfg(not(target_arch = "wasm32"))]
mod sqlite {
    use super::{check_size, KeyValueStore, KvError, KvKey, StorageErrorCode};
    use async_trait::async_trait;
    use rusqlite::{params, Connection, OptionalExtension};
    use serde_json::Value;
    use std::path::Path;
    use std::sync::{Arc, Mutex, PoisonError};
    use tracing::{debug, info};

    /// SQLite-backed store: one `kv_entries` row per key, JSON text values.
    pub struct SqliteStore {
        conn: Arc<Mutex<Connection>>,
    }

    fn map_sql_error(error: &rusqlite::Error) -> KvError {
        let code = match error.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) => StorageErrorCode::Busy,
            Some(rusqlite::ErrorCode::DatabaseLocked) => StorageErrorCode::Locked,
            Some(rusqlite::ErrorCode::DiskFull) => StorageErrorCode::DiskFull,
            Some(rusqlite::ErrorCode::PermissionDenied | rusqlite::ErrorCode::ReadOnly) => {
                StorageErrorCode::PermissionDenied
            }
            Some(rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase) => {
                StorageErrorCode::Corrupted
            }
            Some(rusqlite::ErrorCode::CannotOpen | rusqlite::ErrorCode::SystemIoFailure) => {
                StorageErrorCode::IoError
            }
            _ => StorageErrorCode::Unknown,
        };
        KvError::storage(code, error.to_string())
    }

    impl SqliteStore {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
            let path = path.as_ref();
            let conn = Connection::open(path).map_err(|e| map_sql_error(&e))?;
            info!(path = %path.display(), "key-value store opened");
            Self::with_connection(conn)
        }

        pub fn open_in_memory() -> Result<Self, KvError> {
            let conn = Connection::open_in_memory().map_err(|e| map_sql_error(&e))?;
            Self::with_connection(conn)
        }

        fn with_connection(conn: Connection) -> Result<Self, KvError> {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS kv_entries (
                    key         TEXT PRIMARY KEY,
                    value       TEXT NOT NULL,
                    updated_at  INTEGER NOT NULL
                )",
                [],
            )
            .map_err(|e| map_sql_error(&e))?;

            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        }

        /// Runs a blocking closure against the connection off the async thread.
        pub(super) async fn with_conn<T, F>(&self, f: F) -> Result<T, KvError>
        where
            T: Send + 'static,
            F: FnOnce(&Connection) -> Result<T, KvError> + Send + 'static,
        {
            let conn = Arc::clone(&self.conn);
            tokio::task::spawn_blocking(move || {
                let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
                f(&guard)
            })
            .await
            .map_err(|e| KvError::storage(StorageErrorCode::Unavailable, e.to_string()))?
        }
    }

    #[async_trait]
    impl KeyValueStore for SqliteStore {
        async fn get(&self, key: &KvKey) -> Result<Option<Value>, KvError> {
            let raw = key.raw();
            let text: Option<String> = self
                .with_conn(move |conn| {
                    conn.query_row(
                        "SELECT value FROM kv_entries WHERE key = ?1",
                        params![raw],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| map_sql_error(&e))
                })
                .await?;

            text.map(|t| serde_json::from_str(&t).map_err(|e| KvError::serialization(key, &e)))
                .transpose()
        }

        async fn set(&self, key: &KvKey, value: Value) -> Result<(), KvError> {
            let encoded = check_size(key, &value)?;
            let raw = key.raw();
            let now_ms = crate::get_current_time_ms();
            let size = encoded.len();

            self.with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                         value = excluded.value,
                         updated_at = excluded.updated_at",
                    params![raw, encoded, i64::try_from(now_ms).unwrap_or(i64::MAX)],
                )
                .map(|_| ())
                .map_err(|e| map_sql_error(&e))
            })
            .await?;

            debug!(key = %key.raw(), size, "kv entry written");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fixed_table_keys() {
        assert_eq!(KvKey::favorites().raw(), "favorites:v1");
        assert_eq!(KvKey::metadata().raw(), "metadata:v1");
        assert_ne!(KvKey::favorites(), KvKey::metadata());
    }

    #[test]
    fn test_error_retryable() {
        assert!(KvError::storage(StorageErrorCode::Busy, "busy").is_retryable());
        assert!(!KvError::storage(StorageErrorCode::Corrupted, "bad").is_retryable());
        assert!(!KvError::ValueTooLarge { size: 2, max: 1 }.is_retryable());
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let key = KvKey::favorites();

        assert_eq!(store.get(&key).await.unwrap(), None);
        store.set(&key, json!(["1", "2"])).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(json!(["1", "2"])));

        store.set(&key, json!([])).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(json!([])));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            assert_eq!(store.get(&KvKey::favorites()).await.unwrap(), None);
            store
                .set(&KvKey::metadata(), json!({"9": {"id": "9"}}))
                .await
                .unwrap();
            store.set(&KvKey::favorites(), json!(["9"])).await.unwrap();
            store.set(&KvKey::favorites(), json!(["9", "10"])).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get(&KvKey::favorites()).await.unwrap(),
            Some(json!(["9", "10"]))
        );
        assert_eq!(
            store.get(&KvKey::metadata()).await.unwrap(),
            Some(json!({"9": {"id": "9"}}))
        );
    }

    #[tokio::test]
    async fn test_sqlite_store_reports_corrupt_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = KvKey::favorites();
        let raw = key.raw();
        store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, 'not json', 0)",
                    rusqlite::params![raw],
                )
                .map(|_| ())
                .map_err(|e| KvError::storage(StorageErrorCode::Unknown, e.to_string()))
            })
            .await
            .unwrap();

        let err = store.get(&key).await.unwrap_err();
        assert!(matches!(err, KvError::Serialization { key: Some(ref k), .. } if k == "favorites:v1"));
    }
}
