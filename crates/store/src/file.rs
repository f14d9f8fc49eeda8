use std::collections::BTreeMap;
use std::path::PathBuf;

use parcelgate_contracts::{IdentityKey, StoredFilterEntry};
use tokio::sync::Mutex;

use crate::{FilterStore, StoreError};

type FilterMap = BTreeMap<String, serde_json::Value>;

/// Whole mapping kept as one pretty-printed JSON object:
/// `{ "<identity key>": { "filters": {...}, "updatedAt": "..." } }`.
///
/// Saves are serialized per store instance and land through a sibling temp file
/// plus `rename`, so readers only ever see a complete document.
pub struct JsonFileFilterStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileFilterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "filters.json".to_string());
        self.path.with_file_name(format!(".{}.tmp", file_name))
    }

    async fn read_map(&self) -> Result<FilterMap, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(FilterMap::new()),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_slice::<FilterMap>(&bytes) {
            Ok(map) => Ok(map),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "filter store file is unreadable; treating as empty"
                );
                Ok(FilterMap::new())
            }
        }
    }

    async fn write_map(&self, map: &FilterMap) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(map)?;
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, &bytes).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl FilterStore for JsonFileFilterStore {
    async fn load_entry(&self, key: &IdentityKey) -> Result<Option<StoredFilterEntry>, StoreError> {
        let map = self.read_map().await?;
        let Some(raw) = map.get(key.as_str()) else {
            return Ok(None);
        };

        match serde_json::from_value::<StoredFilterEntry>(raw.clone()) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                tracing::warn!(error = %err, "stored filter entry is malformed; ignoring");
                Ok(None)
            }
        }
    }

    async fn upsert(&self, key: &IdentityKey, entry: StoredFilterEntry) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut map = self.read_map().await?;
        map.insert(key.as_str().to_string(), serde_json::to_value(&entry)?);
        self.write_map(&map).await
    }
}
