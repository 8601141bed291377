use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::Row;

use progress_core::model::UserRecord;

use crate::repository::{LedgerStore, PendingPatch, SnapshotStore, StorageError};

use super::SqliteStorage;

const SNAPSHOT_KEY: &str = "snapshot";
const LEDGER_KEY: &str = "ledger";

impl SqliteStorage {
    async fn read_slot<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let row = sqlx::query("SELECT payload FROM slots WHERE key = ?1")
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row
            .try_get("payload")
            .map_err(|err| StorageError::Serialization(err.to_string()))?;

        serde_json::from_str(&payload)
            .map(Some)
            .map_err(|err| StorageError::Serialization(err.to_string()))
    }

    async fn write_slot<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let payload = serde_json::to_string(value)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;

        // one upsert per slot write: the atomic unit the callers rely on
        sqlx::query(
            r"
            INSERT INTO slots (key, payload, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(payload)
        .bind(Utc::now())
        .execute(self.pool())
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteStorage {
    async fn load(&self) -> Result<Option<UserRecord>, StorageError> {
        self.read_slot(SNAPSHOT_KEY).await
    }

    async fn save(&self, record: &UserRecord) -> Result<(), StorageError> {
        self.write_slot(SNAPSHOT_KEY, record).await
    }
}

#[async_trait]
impl LedgerStore for SqliteStorage {
    async fn load(&self) -> Result<Vec<PendingPatch>, StorageError> {
        Ok(self
            .read_slot::<Vec<PendingPatch>>(LEDGER_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn replace(&self, entries: &[PendingPatch]) -> Result<(), StorageError> {
        self.write_slot(LEDGER_KEY, &entries).await
    }
}
