//! 스냅샷 전송 포트.
//!
//! 구현: `healthsync-network` crate (SnapshotTransport)

use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::snapshot::MetricSnapshot;
use crate::models::upload::JobHandle;

/// 업로드 전송
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// 동기 전송: 응답까지 기다림
    ///
    /// 성공 시에만 마지막 전송 시각을 기록한다.
    /// 2xx 이외 응답은 `ServerRejection`, 네트워크 에러는 `Transport`.
    async fn send_synchronous(&self, snapshot: &MetricSnapshot) -> Result<(), CoreError>;

    /// 백그라운드 전송 채널에 넘김
    ///
    /// 넘기기가 수락되면 네트워크 전송 완료 전에 바로 핸들을 반환한다.
    /// 실제 결과는 나중에 완료 이벤트로만 통지된다.
    async fn enqueue_durable(&self, snapshot: &MetricSnapshot) -> Result<JobHandle, CoreError>;

    /// 헬스 엔드포인트 연결 확인: 에러는 `false`
    async fn test_connection(&self) -> bool;
}
