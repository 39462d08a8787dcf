//! 동기화 상태 저장 (SyncStateStore 포트 구현).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use healthsync_core::error::CoreError;
use healthsync_core::models::sync::SyncWatermark;
use healthsync_core::ports::storage::SyncStateStore;
use rusqlite::OptionalExtension;
use tracing::debug;

use super::{decode_instant, encode_instant, SqliteStorage};

const KEY_ENABLED: &str = "sync_enabled";
const KEY_WATERMARK: &str = "watermark";
const KEY_LAST_SYNC_AT: &str = "last_sync_at";
const KEY_LAST_SYNC_STATUS: &str = "last_sync_status";
const KEY_LAST_SENT_AT: &str = "last_sent_at";
const KEY_INITIAL_UPLOAD_DONE: &str = "initial_upload_done";

impl SqliteStorage {
    fn get_value(&self, key: &str) -> Result<Option<String>, CoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM sync_state WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CoreError::Storage(format!("상태 조회 실패 ({key}): {e}")))
    }

    fn put_values(&self, entries: &[(&str, String)]) -> Result<(), CoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| CoreError::Storage(format!("트랜잭션 시작 실패: {e}")))?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO sync_state (key, value, updated_at)
                     VALUES (?1, ?2, datetime('now'))
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                    updated_at = excluded.updated_at",
                )
                .map_err(|e| CoreError::Storage(format!("쿼리 준비 실패: {e}")))?;
            for (key, value) in entries {
                stmt.execute(rusqlite::params![key, value])
                    .map_err(|e| CoreError::Storage(format!("상태 저장 실패 ({key}): {e}")))?;
            }
        }
        tx.commit()
            .map_err(|e| CoreError::Storage(format!("트랜잭션 커밋 실패: {e}")))?;
        Ok(())
    }

    fn get_instant(&self, key: &str) -> Result<Option<DateTime<Utc>>, CoreError> {
        self.get_value(key)?
            .map(|raw| decode_instant(&raw))
            .transpose()
    }

    fn get_flag(&self, key: &str) -> Result<bool, CoreError> {
        Ok(self.get_value(key)?.as_deref() == Some("1"))
    }

    fn flag(value: bool) -> String {
        let raw = if value { "1" } else { "0" };
        raw.to_string()
    }
}

#[async_trait]
impl SyncStateStore for SqliteStorage {
    async fn is_sync_enabled(&self) -> Result<bool, CoreError> {
        self.get_flag(KEY_ENABLED)
    }

    async fn set_sync_enabled(&self, enabled: bool) -> Result<(), CoreError> {
        self.put_values(&[(KEY_ENABLED, Self::flag(enabled))])?;
        debug!("동기화 활성 플래그 저장: {enabled}");
        Ok(())
    }

    async fn watermark(&self) -> Result<Option<SyncWatermark>, CoreError> {
        Ok(self.get_instant(KEY_WATERMARK)?.map(SyncWatermark))
    }

    async fn set_watermark(&self, watermark: SyncWatermark) -> Result<(), CoreError> {
        self.put_values(&[(KEY_WATERMARK, encode_instant(watermark.instant()))])?;
        debug!("워터마크 저장: {}", watermark.instant());
        Ok(())
    }

    async fn last_sync(&self) -> Result<(Option<DateTime<Utc>>, Option<String>), CoreError> {
        Ok((
            self.get_instant(KEY_LAST_SYNC_AT)?,
            self.get_value(KEY_LAST_SYNC_STATUS)?,
        ))
    }

    async fn record_sync(&self, at: DateTime<Utc>, status: &str) -> Result<(), CoreError> {
        self.put_values(&[
            (KEY_LAST_SYNC_AT, encode_instant(at)),
            (KEY_LAST_SYNC_STATUS, status.to_string()),
        ])
    }

    async fn last_sent_at(&self) -> Result<Option<DateTime<Utc>>, CoreError> {
        self.get_instant(KEY_LAST_SENT_AT)
    }

    async fn set_last_sent_at(&self, at: DateTime<Utc>) -> Result<(), CoreError> {
        self.put_values(&[(KEY_LAST_SENT_AT, encode_instant(at))])
    }

    async fn is_initial_upload_done(&self) -> Result<bool, CoreError> {
        self.get_flag(KEY_INITIAL_UPLOAD_DONE)
    }

    async fn set_initial_upload_done(&self, done: bool) -> Result<(), CoreError> {
        self.put_values(&[(KEY_INITIAL_UPLOAD_DONE, Self::flag(done))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn fresh_store_has_defaults() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        assert!(!storage.is_sync_enabled().await.unwrap());
        assert!(storage.watermark().await.unwrap().is_none());
        assert!(storage.last_sent_at().await.unwrap().is_none());
        assert_eq!(storage.last_sync().await.unwrap(), (None, None));
        assert!(!storage.is_initial_upload_done().await.unwrap());
    }

    #[tokio::test]
    async fn read_after_write() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        storage.set_sync_enabled(true).await.unwrap();
        storage.set_watermark(SyncWatermark(at(9, 0))).await.unwrap();
        storage.set_watermark(SyncWatermark(at(10, 0))).await.unwrap();
        storage.record_sync(at(10, 1), "성공").await.unwrap();

        assert!(storage.is_sync_enabled().await.unwrap());
        assert_eq!(
            storage.watermark().await.unwrap(),
            Some(SyncWatermark(at(10, 0)))
        );
        assert_eq!(
            storage.last_sync().await.unwrap(),
            (Some(at(10, 1)), Some("성공".to_string()))
        );
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("data").join("healthsync.db");

        {
            let storage = SqliteStorage::open(&db_path).unwrap();
            storage.set_sync_enabled(true).await.unwrap();
            storage.set_watermark(SyncWatermark(at(9, 0))).await.unwrap();
            storage.set_last_sent_at(at(9, 5)).await.unwrap();
            storage.set_initial_upload_done(true).await.unwrap();
        }

        let reopened = SqliteStorage::open(&db_path).unwrap();
        assert!(reopened.is_sync_enabled().await.unwrap());
        assert_eq!(
            reopened.watermark().await.unwrap(),
            Some(SyncWatermark(at(9, 0)))
        );
        assert_eq!(reopened.last_sent_at().await.unwrap(), Some(at(9, 5)));
        assert!(reopened.is_initial_upload_done().await.unwrap());
    }
}
