//! 영속 상태 저장소 포트.
//!
//! 구현: `healthsync-storage` crate (rusqlite)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

use crate::error::CoreError;
use crate::models::sync::SyncWatermark;
use crate::models::upload::{JobHandle, UploadJobRecord};

/// 동기화 상태 저장소
///
/// 워터마크와 활성 플래그는 스케줄러만 변경하며
/// 재시작 후에도 마지막 쓰기 값을 그대로 읽을 수 있어야 한다.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// 동기화 활성 여부 (기록이 없으면 `false`)
    async fn is_sync_enabled(&self) -> Result<bool, CoreError>;

    /// 동기화 활성 여부 저장
    async fn set_sync_enabled(&self, enabled: bool) -> Result<(), CoreError>;

    /// 워터마크 조회
    async fn watermark(&self) -> Result<Option<SyncWatermark>, CoreError>;

    /// 워터마크 저장
    async fn set_watermark(&self, watermark: SyncWatermark) -> Result<(), CoreError>;

    /// 마지막 사이클 시각/상태 조회
    async fn last_sync(&self) -> Result<(Option<DateTime<Utc>>, Option<String>), CoreError>;

    /// 마지막 사이클 시각/상태 저장
    async fn record_sync(&self, at: DateTime<Utc>, status: &str) -> Result<(), CoreError>;

    /// 마지막 전송 성공 시각
    async fn last_sent_at(&self) -> Result<Option<DateTime<Utc>>, CoreError>;

    /// 마지막 전송 성공 시각 저장
    async fn set_last_sent_at(&self, at: DateTime<Utc>) -> Result<(), CoreError>;

    /// 최초 이력 업로드 완료 여부
    async fn is_initial_upload_done(&self) -> Result<bool, CoreError>;

    /// 최초 이력 업로드 완료 표시
    async fn set_initial_upload_done(&self, done: bool) -> Result<(), CoreError>;
}

/// 백그라운드 전송 작업 장부
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// 넘긴 작업을 `pending`으로 기록
    async fn insert_pending(
        &self,
        handle: &JobHandle,
        artifact_path: &Path,
        created_at: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    /// 완료 표시: 없는 핸들이면 `NotFound`
    async fn mark_completed(&self, handle: &JobHandle, at: DateTime<Utc>) -> Result<(), CoreError>;

    /// 실패 표시: 없는 핸들이면 `NotFound`
    async fn mark_failed(
        &self,
        handle: &JobHandle,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), CoreError>;

    /// 단일 작업 조회
    async fn get_job(&self, handle: &JobHandle) -> Result<Option<UploadJobRecord>, CoreError>;

    /// 대기 중인 작업 (생성 순)
    async fn pending_jobs(&self) -> Result<Vec<UploadJobRecord>, CoreError>;

    /// `before` 이전에 종료된 작업 삭제, 삭제 건수 반환
    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, CoreError>;
}
