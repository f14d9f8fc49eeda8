use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parcelgate_contracts::{FilterBounds, IdentityKey, StoredFilterEntry};
use tokio::sync::RwLock;

mod file;
mod pg;

pub use file::JsonFileFilterStore;
pub use pg::PgFilterStore;

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    Io(std::io::Error),
    Serialize(serde_json::Error),
    Sqlx(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "filter store operation timed out"),
            StoreError::Io(err) => write!(f, "filter store io error: {}", err),
            StoreError::Serialize(err) => write!(f, "filter store encode error: {}", err),
            StoreError::Sqlx(err) => write!(f, "filter store sql error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        StoreError::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Serialize(value)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Sqlx(value)
    }
}

/// Durable identity key → last filters mapping.
///
/// Backends degrade unreadable or corrupt entries to "absent" themselves; an `Err`
/// means the medium itself failed.
#[async_trait::async_trait]
pub trait FilterStore: Send + Sync {
    async fn load_entry(&self, key: &IdentityKey) -> Result<Option<StoredFilterEntry>, StoreError>;

    /// Last write wins for the same key.
    async fn upsert(&self, key: &IdentityKey, entry: StoredFilterEntry) -> Result<(), StoreError>;
}

/// Filter memorization on top of any [`FilterStore`] backend.
#[derive(Clone)]
pub struct FilterMemory {
    store: Arc<dyn FilterStore>,
}

impl FilterMemory {
    pub fn new(store: Arc<dyn FilterStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryFilterStore::default()))
    }

    /// Records `filters` as the caller's latest. Empty filters leave prior state alone.
    pub async fn save(&self, key: &IdentityKey, filters: &FilterBounds) -> Result<(), StoreError> {
        if filters.is_empty() {
            return Ok(());
        }

        self.store
            .upsert(
                key,
                StoredFilterEntry {
                    filters: *filters,
                    updated_at: Utc::now(),
                },
            )
            .await
    }

    pub async fn load(&self, key: &IdentityKey) -> Result<Option<FilterBounds>, StoreError> {
        Ok(self.load_entry(key).await?.map(|entry| entry.filters))
    }

    pub async fn load_entry(
        &self,
        key: &IdentityKey,
    ) -> Result<Option<StoredFilterEntry>, StoreError> {
        self.store.load_entry(key).await
    }
}

#[derive(Default)]
pub struct InMemoryFilterStore {
    entries: RwLock<HashMap<IdentityKey, StoredFilterEntry>>,
}

#[async_trait::async_trait]
impl FilterStore for InMemoryFilterStore {
    async fn load_entry(&self, key: &IdentityKey) -> Result<Option<StoredFilterEntry>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn upsert(&self, key: &IdentityKey, entry: StoredFilterEntry) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.clone(), entry);
        Ok(())
    }
}
