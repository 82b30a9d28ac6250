//! Local key-value persistence
//!
//! Values are JSON documents stored under a small fixed set of keys. The
//! SQLite backend survives restarts; the in-memory backend is used for
//! ephemeral runs and tests.

use crate::config::StorageConfig;
use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Keys under which engine state is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// Swap history records
    SwapData,
    /// Last token pair and amount chosen by the user
    SwapSelection,
    Preferences,
    FavouriteTokens,
}

impl StorageKey {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::SwapData => "swap-data",
            StorageKey::SwapSelection => "swap-selection",
            StorageKey::Preferences => "preferences",
            StorageKey::FavouriteTokens => "favourite-tokens",
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: StorageKey) -> EngineResult<Option<String>>;

    async fn set(&self, key: StorageKey, value: String) -> EngineResult<()>;

    async fn remove(&self, key: StorageKey) -> EngineResult<()>;

    async fn health_check(&self) -> EngineResult<()> {
        Ok(())
    }
}

/// Read and deserialize a JSON value
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: StorageKey,
) -> EngineResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serialize and write a JSON value
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: StorageKey,
    value: &T,
) -> EngineResult<()> {
    store.set(key, serde_json::to_string(value)?).await
}

/// Open the backend named by the storage URL
pub async fn open_store(config: &StorageConfig) -> EngineResult<Arc<dyn KeyValueStore>> {
    if config.url == "memory" {
        info!("Using in-memory storage; state will not survive restarts");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = SqliteStore::connect(&config.url).await?;
    store.run_migrations().await?;
    Ok(Arc::new(store))
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<StorageKey, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: StorageKey) -> EngineResult<Option<String>> {
        Ok(self.values.get(&key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: StorageKey, value: String) -> EngineResult<()> {
        self.values.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: StorageKey) -> EngineResult<()> {
        self.values.remove(&key);
        Ok(())
    }
}

/// SQLite-backed store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> EngineResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| EngineError::Config(format!("Invalid storage URL {}: {}", url, e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        info!("Storage connection established");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Storage migrations complete");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: StorageKey) -> EngineResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, key: StorageKey, value: String) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key.as_str())
        .bind(&value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!("Stored {} ({} bytes)", key, value.len());
        Ok(())
    }

    async fn remove(&self, key: StorageKey) -> EngineResult<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> EngineResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        slippage_bps: u32,
    }

    async fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get(StorageKey::Preferences).await.unwrap(), None);

        save_json(store, StorageKey::Preferences, &Sample { slippage_bps: 50 })
            .await
            .unwrap();
        save_json(store, StorageKey::Preferences, &Sample { slippage_bps: 75 })
            .await
            .unwrap();
        let loaded: Option<Sample> = load_json(store, StorageKey::Preferences).await.unwrap();
        assert_eq!(loaded, Some(Sample { slippage_bps: 75 }));

        // Keys are independent
        assert_eq!(store.get(StorageKey::SwapData).await.unwrap(), None);

        store.remove(StorageKey::Preferences).await.unwrap();
        assert_eq!(store.get(StorageKey::Preferences).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("engine.db").display());

        let store = SqliteStore::connect(&url).await.unwrap();
        store.run_migrations().await.unwrap();
        exercise(&store).await;
        store
            .set(StorageKey::FavouriteTokens, "[]".to_string())
            .await
            .unwrap();
        store.pool.close().await;

        let reopened = SqliteStore::connect(&url).await.unwrap();
        reopened.run_migrations().await.unwrap();
        assert_eq!(
            reopened.get(StorageKey::FavouriteTokens).await.unwrap(),
            Some("[]".to_string())
        );
        reopened.health_check().await.unwrap();
    }

    #[test]
    fn test_key_names() {
        assert_eq!(StorageKey::SwapData.as_str(), "swap-data");
        assert_eq!(StorageKey::FavouriteTokens.to_string(), "favourite-tokens");
    }
}
