//! 메트릭 스냅샷: 전송 단위.
//!
//! 선택적 메트릭 필드 묶음 + 타임스탬프 + 전체/증분 플래그.
//! 생성 후에는 불변이며, 직렬화 형식이 곧 업로드 JSON 본문이다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::metric::{MetricKind, MetricStyle};
use crate::models::sleep::{SleepSegment, SleepSummary};

/// 수집 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// 워터마크 없음: 오늘 하루 전체 집계
    Full,
    /// 워터마크 이후 증분
    Incremental {
        /// 증분 기준 시각
        since: DateTime<Utc>,
    },
}

impl SyncMode {
    /// 워터마크로부터 모드 결정
    pub fn from_watermark(since: Option<DateTime<Utc>>) -> Self {
        match since {
            Some(since) => SyncMode::Incremental { since },
            None => SyncMode::Full,
        }
    }

    /// 증분 모드 여부
    pub fn is_incremental(&self) -> bool {
        matches!(self, SyncMode::Incremental { .. })
    }

    /// 증분 기준 시각
    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            SyncMode::Full => None,
            SyncMode::Incremental { since } => Some(*since),
        }
    }
}

/// 메트릭 스냅샷
///
/// 필드는 비공개이며 [`SnapshotBuilder`] 또는 [`MetricSnapshot::single`]로만 생성한다.
/// `Full` 스냅샷은 `sinceDate`를 절대 갖지 않는다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    step_count: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    heart_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_energy_burned: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    distance_walking_running: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body_mass: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mindful_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sleep_segments: Option<Vec<SleepSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_sleep_minutes: Option<i64>,
    timestamp: DateTime<Utc>,
    is_incremental: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    since_date: Option<DateTime<Utc>>,
}

impl MetricSnapshot {
    /// 빌더 시작
    pub fn builder(mode: SyncMode, timestamp: DateTime<Utc>) -> SnapshotBuilder {
        SnapshotBuilder::new(mode, timestamp)
    }

    /// 단일 필드 스냅샷 (원시 샘플 하나)
    ///
    /// 수면은 [`MetricSnapshot::single_segment`]를 사용한다.
    pub fn single(
        kind: MetricKind,
        value: f64,
        timestamp: DateTime<Utc>,
        since: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        if kind.style() == MetricStyle::Segment {
            return Err(CoreError::Validation {
                field: kind.field_name().to_string(),
                message: "구간 메트릭은 single_segment로 생성".to_string(),
            });
        }
        Ok(SnapshotBuilder::new(SyncMode::Incremental { since }, timestamp)
            .value(kind, Some(value))
            .build())
    }

    /// 수면 구간 하나만 담은 스냅샷: 타임스탬프는 구간 종료 시각
    pub fn single_segment(segment: SleepSegment, since: DateTime<Utc>) -> Self {
        let timestamp = segment.end_date;
        let summary = SleepSummary {
            total_minutes: if segment.state.counts_toward_total() {
                segment.minutes().round() as i64
            } else {
                0
            },
            segments: vec![segment],
        };
        SnapshotBuilder::new(SyncMode::Incremental { since }, timestamp)
            .sleep(Some(summary))
            .build()
    }

    /// 수치 메트릭 값 (수면은 `None`, [`Self::sleep_segments`] 사용)
    pub fn value(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::StepCount => self.step_count,
            MetricKind::ActiveEnergyBurned => self.active_energy_burned,
            MetricKind::DistanceWalkingRunning => self.distance_walking_running,
            MetricKind::MindfulMinutes => self.mindful_minutes,
            MetricKind::HeartRate => self.heart_rate,
            MetricKind::BodyMass => self.body_mass,
            MetricKind::Height => self.height,
            MetricKind::SleepAnalysis => None,
        }
    }

    /// 수면 구간 목록
    pub fn sleep_segments(&self) -> Option<&[SleepSegment]> {
        self.sleep_segments.as_deref()
    }

    /// 총 수면 시간 (분)
    pub fn total_sleep_minutes(&self) -> Option<i64> {
        self.total_sleep_minutes
    }

    /// 스냅샷 시각
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// 증분 스냅샷 여부
    pub fn is_incremental(&self) -> bool {
        self.is_incremental
    }

    /// 증분 기준 시각 (증분일 때만)
    pub fn since_date(&self) -> Option<DateTime<Utc>> {
        self.since_date
    }

    /// 채워진 메트릭 목록
    pub fn populated_fields(&self) -> Vec<MetricKind> {
        MetricKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                MetricKind::SleepAnalysis => self.sleep_segments.is_some(),
                other => self.value(*other).is_some(),
            })
            .collect()
    }

    /// 채워진 메트릭이 하나도 없는지
    pub fn is_empty(&self) -> bool {
        self.populated_fields().is_empty()
    }

    /// 불변식 검증
    ///
    /// - `Full`은 `sinceDate`가 없어야 하고 `Incremental`은 반드시 있어야 함
    /// - 최소 한 개 필드가 채워져 있어야 함
    /// - `totalSleepMinutes`는 구간 목록과 함께만 존재
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.is_incremental != self.since_date.is_some() {
            return Err(CoreError::Validation {
                field: "sinceDate".to_string(),
                message: format!(
                    "isIncremental={}인데 sinceDate={:?}",
                    self.is_incremental, self.since_date
                ),
            });
        }
        if self.total_sleep_minutes.is_some() != self.sleep_segments.is_some() {
            return Err(CoreError::Validation {
                field: "totalSleepMinutes".to_string(),
                message: "수면 구간 목록과 총 수면 시간은 함께 존재해야 함".to_string(),
            });
        }
        if self.is_empty() {
            return Err(CoreError::Validation {
                field: "metrics".to_string(),
                message: "채워진 메트릭 필드가 없음".to_string(),
            });
        }
        Ok(())
    }

    /// 업로드 본문 직렬화
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 업로드 본문 역직렬화
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// 스냅샷 빌더
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    inner: MetricSnapshot,
}

impl SnapshotBuilder {
    /// 모드와 타임스탬프로 빌더 생성
    pub fn new(mode: SyncMode, timestamp: DateTime<Utc>) -> Self {
        Self {
            inner: MetricSnapshot {
                step_count: None,
                heart_rate: None,
                active_energy_burned: None,
                distance_walking_running: None,
                body_mass: None,
                height: None,
                mindful_minutes: None,
                sleep_segments: None,
                total_sleep_minutes: None,
                timestamp,
                is_incremental: mode.is_incremental(),
                since_date: mode.since(),
            },
        }
    }

    /// 수치 메트릭 설정 (수면은 무시)
    pub fn value(mut self, kind: MetricKind, value: Option<f64>) -> Self {
        let slot = match kind {
            MetricKind::StepCount => &mut self.inner.step_count,
            MetricKind::ActiveEnergyBurned => &mut self.inner.active_energy_burned,
            MetricKind::DistanceWalkingRunning => &mut self.inner.distance_walking_running,
            MetricKind::MindfulMinutes => &mut self.inner.mindful_minutes,
            MetricKind::HeartRate => &mut self.inner.heart_rate,
            MetricKind::BodyMass => &mut self.inner.body_mass,
            MetricKind::Height => &mut self.inner.height,
            MetricKind::SleepAnalysis => return self,
        };
        *slot = value;
        self
    }

    /// 수면 요약 설정: 구간 목록과 총 수면 시간을 함께 채움
    pub fn sleep(mut self, summary: Option<SleepSummary>) -> Self {
        match summary {
            Some(s) => {
                self.inner.total_sleep_minutes = Some(s.total_minutes);
                self.inner.sleep_segments = Some(s.segments);
            }
            None => {
                self.inner.total_sleep_minutes = None;
                self.inner.sleep_segments = None;
            }
        }
        self
    }

    /// 스냅샷 생성
    pub fn build(self) -> MetricSnapshot {
        self.inner
    }
}
