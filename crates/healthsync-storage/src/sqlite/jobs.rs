//! 백그라운드 전송 작업 장부 (JobLedger 포트 구현).
//!
//! 넘긴 작업을 `pending`으로 기록하고, 완료 통지가 오면 종료 상태로 갱신한다.
//! 프로세스 재시작 시 `pending` 목록으로 완료 리스너를 다시 연결한다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use healthsync_core::error::CoreError;
use healthsync_core::models::upload::{JobHandle, JobStatus, UploadJobRecord};
use healthsync_core::ports::storage::JobLedger;
use rusqlite::{OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{decode_instant, encode_instant, SqliteStorage};

/// 조회 컬럼 순서
const JOB_COLUMNS: &str = "handle, artifact_path, status, created_at, finished_at, error";

/// DB 원시 행
struct JobRow {
    handle: String,
    artifact_path: String,
    status: String,
    created_at: String,
    finished_at: Option<String>,
    error: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            handle: row.get(0)?,
            artifact_path: row.get(1)?,
            status: row.get(2)?,
            created_at: row.get(3)?,
            finished_at: row.get(4)?,
            error: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<UploadJobRecord, CoreError> {
        Ok(UploadJobRecord {
            handle: JobHandle::from(self.handle),
            artifact_path: PathBuf::from(self.artifact_path),
            status: self.status.parse::<JobStatus>()?,
            created_at: decode_instant(&self.created_at)?,
            finished_at: self
                .finished_at
                .as_deref()
                .map(decode_instant)
                .transpose()?,
            error: self.error,
        })
    }
}

impl SqliteStorage {
    fn finish_job(
        &self,
        handle: &JobHandle,
        status: JobStatus,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE upload_jobs SET status = ?2, finished_at = ?3, error = ?4
                 WHERE handle = ?1",
                rusqlite::params![handle.as_str(), status.as_str(), encode_instant(at), error],
            )
            .map_err(|e| CoreError::Storage(format!("작업 상태 갱신 실패: {e}")))?;

        if updated == 0 {
            return Err(CoreError::NotFound {
                resource_type: "UploadJob".to_string(),
                id: handle.to_string(),
            });
        }
        debug!(%handle, status = status.as_str(), "작업 종료 기록");
        Ok(())
    }
}

#[async_trait]
impl JobLedger for SqliteStorage {
    async fn insert_pending(
        &self,
        handle: &JobHandle,
        artifact_path: &Path,
        created_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO upload_jobs (handle, artifact_path, status, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                handle.as_str(),
                artifact_path.to_string_lossy().into_owned(),
                JobStatus::Pending.as_str(),
                encode_instant(created_at)
            ],
        )
        .map_err(|e| CoreError::Storage(format!("작업 기록 실패: {e}")))?;
        debug!(%handle, "작업 장부 기록: pending");
        Ok(())
    }

    async fn mark_completed(&self, handle: &JobHandle, at: DateTime<Utc>) -> Result<(), CoreError> {
        self.finish_job(handle, JobStatus::Completed, at, None)
    }

    async fn mark_failed(
        &self,
        handle: &JobHandle,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), CoreError> {
        self.finish_job(handle, JobStatus::Failed, at, Some(error))
    }

    async fn get_job(&self, handle: &JobHandle) -> Result<Option<UploadJobRecord>, CoreError> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM upload_jobs WHERE handle = ?1"),
                [handle.as_str()],
                JobRow::from_row,
            )
            .optional()
            .map_err(|e| CoreError::Storage(format!("작업 조회 실패: {e}")))?
        };
        row.map(JobRow::into_record).transpose()
    }

    async fn pending_jobs(&self) -> Result<Vec<UploadJobRecord>, CoreError> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM upload_jobs WHERE status = ?1
                     ORDER BY created_at ASC"
                ))
                .map_err(|e| CoreError::Storage(format!("쿼리 준비 실패: {e}")))?;
            let mapped = stmt
                .query_map([JobStatus::Pending.as_str()], JobRow::from_row)
                .map_err(|e| CoreError::Storage(format!("쿼리 실행 실패: {e}")))?;
            mapped
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CoreError::Storage(format!("행 읽기 실패: {e}")))?
        };
        rows.into_iter().map(JobRow::into_record).collect()
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, CoreError> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM upload_jobs WHERE status != ?1 AND finished_at < ?2",
                rusqlite::params![JobStatus::Pending.as_str(), encode_instant(before)],
            )
            .map_err(|e| CoreError::Storage(format!("작업 장부 정리 실패: {e}")))?;
        if deleted > 0 {
            info!("종료된 작업 {deleted}건 정리");
        }
        Ok(deleted)
    }
}
