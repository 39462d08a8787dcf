//! 메트릭 데이터 소스 포트 (읽기 전용).
//!
//! 구현: `healthsync-collector` crate (InMemoryMetricSource, SimulatedMetricSource)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::CoreError;
use crate::models::metric::{MetricKind, MetricSample};

/// 메트릭 데이터 소스
///
/// 범위 조회는 모두 반열린 구간 `[start, end)`이며 샘플 시작 시각 기준이다.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// 읽기 권한 확인: 거부 시 `AuthorizationDenied`
    async fn ensure_authorized(&self) -> Result<(), CoreError> {
        Ok(())
    }

    /// 구간 합계 (누적 메트릭). 샘플이 없으면 `None`
    async fn sum_over_range(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<f64>, CoreError>;

    /// 가장 최근 값 (순간 측정 메트릭)
    async fn latest_value(&self, kind: MetricKind) -> Result<Option<f64>, CoreError>;

    /// 구간 내 원시 샘플: 시작 시각 오름차순
    async fn samples_in_range(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, CoreError>;

    /// 변경 알림 등록
    ///
    /// 해당 종류의 데이터가 새로 기록될 때마다 `notify`로 종류를 보낸다.
    /// 전달 시점과 묶음 여부는 소스가 결정한다.
    async fn observe_changes(
        &self,
        kind: MetricKind,
        notify: mpsc::UnboundedSender<MetricKind>,
    ) -> Result<(), CoreError>;
}
