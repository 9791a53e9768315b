//! Favorites and image metadata, layered on the shared key-value store.
//!
//! Both tables are read-modify-write over a single key with no
//! compare-and-swap underneath. Two writers racing on the same key lose one
//! update (last write wins); for favorites this means two simultaneous
//! toggles of the same id can leave either outcome. Callers that need
//! stronger guarantees must serialize their writes.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::capabilities::{KeyValueStore, KvError, KvKey};
use crate::model::{ImageId, ImageRecord};

#[derive(Clone)]
pub struct GalleryStore {
    kv: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for GalleryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GalleryStore").finish_non_exhaustive()
    }
}

/// Adds `id` when absent, removes it when present. Returns the new
/// membership. Insertion order of the remaining ids is kept.
pub fn toggle_membership(ids: &mut Vec<ImageId>, id: &ImageId) -> bool {
    if let Some(pos) = ids.iter().position(|existing| existing == id) {
        ids.remove(pos);
        false
    } else {
        ids.push(id.clone());
        true
    }
}

impl GalleryStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Favorite ids in the order they were added. Missing key reads as empty.
    pub async fn favorites(&self) -> Result<Vec<ImageId>, KvError> {
        let key = KvKey::favorites();
        match self.kv.get(&key).await? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => {
                let mut ids: Vec<ImageId> =
                    serde_json::from_value(value).map_err(|e| KvError::serialization(&key, &e))?;
                let mut seen = std::collections::HashSet::new();
                ids.retain(|id| seen.insert(id.clone()));
                Ok(ids)
            }
        }
    }

    pub async fn is_favorite(&self, id: &ImageId) -> Result<bool, KvError> {
        Ok(self.favorites().await?.contains(id))
    }

    async fn write_favorites(&self, ids: &[ImageId]) -> Result<(), KvError> {
        let key = KvKey::favorites();
        let value = serde_json::to_value(ids).map_err(|e| KvError::serialization(&key, &e))?;
        self.kv.set(&key, value).await
    }

    /// Sets membership explicitly. Writes only when membership changes.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn set_favorite(&self, id: &ImageId, favorite: bool) -> Result<(), KvError> {
        let mut ids = self.favorites().await?;
        if ids.contains(id) == favorite {
            return Ok(());
        }
        toggle_membership(&mut ids, id);
        self.write_favorites(&ids).await?;
        debug!(favorite, total = ids.len(), "favorite membership written");
        Ok(())
    }

    /// Flips membership of `id` and returns the new state.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn toggle_favorite(&self, id: &ImageId) -> Result<bool, KvError> {
        let mut ids = self.favorites().await?;
        let now_favorite = toggle_membership(&mut ids, id);
        self.write_favorites(&ids).await?;
        debug!(now_favorite, total = ids.len(), "favorite toggled");
        Ok(now_favorite)
    }

    async fn raw_metadata(&self) -> Result<Map<String, Value>, KvError> {
        let key = KvKey::metadata();
        match self.kv.get(&key).await? {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map),
            Some(other) => Err(KvError::Serialization {
                message: format!("expected a JSON object, found {}", json_type(&other)),
                key: Some(key.raw()),
            }),
        }
    }

    /// Last-seen record per id. Entries that no longer decode are skipped.
    pub async fn metadata(&self) -> Result<BTreeMap<ImageId, ImageRecord>, KvError> {
        let raw = self.raw_metadata().await?;
        let mut out = BTreeMap::new();
        for (id, value) in raw {
            match serde_json::from_value::<ImageRecord>(value) {
                Ok(record) => {
                    out.insert(ImageId::new(id), record);
                }
                Err(e) => warn!(id = %id, error = %e, "skipping undecodable metadata entry"),
            }
        }
        Ok(out)
    }

    /// Merges `records` into the metadata table, overwriting by id and
    /// keeping every other entry untouched.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn upsert_metadata(&self, records: &[ImageRecord]) -> Result<(), KvError> {
        if records.is_empty() {
            return Ok(());
        }
        let key = KvKey::metadata();
        let mut table = self.raw_metadata().await?;
        for record in records {
            let value =
                serde_json::to_value(record).map_err(|e| KvError::serialization(&key, &e))?;
            table.insert(record.id.as_str().to_string(), value);
        }
        let total = table.len();
        self.kv.set(&key, Value::Object(table)).await?;
        debug!(total, "metadata merged");
        Ok(())
    }

    /// Favorites resolved against the metadata table, in favorites order.
    /// An id with no cached record resolves to `None`.
    pub async fn favorite_records(&self) -> Result<Vec<(ImageId, Option<ImageRecord>)>, KvError> {
        let ids = self.favorites().await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut metadata = self.metadata().await?;
        Ok(ids
            .into_iter()
            .map(|id| {
                let record = metadata.remove(&id);
                (id, record)
            })
            .collect())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
