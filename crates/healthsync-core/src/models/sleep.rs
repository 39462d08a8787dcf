//! 수면 구간 모델.
//!
//! 원시 카테고리 코드를 3상태(`inBed | asleep | awake`)로 분류하고
//! 총 수면 시간(분)을 구간 목록과 함께 계산한다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::metric::MetricSample;

/// 원시 코드: 침대에 누움
pub const RAW_IN_BED: i64 = 0;
/// 원시 코드: 수면 (단계 미상)
pub const RAW_ASLEEP_UNSPECIFIED: i64 = 1;
/// 원시 코드: 깨어 있음
pub const RAW_AWAKE: i64 = 2;
/// 원시 코드: 코어 수면
pub const RAW_ASLEEP_CORE: i64 = 3;
/// 원시 코드: 깊은 수면
pub const RAW_ASLEEP_DEEP: i64 = 4;
/// 원시 코드: REM 수면
pub const RAW_ASLEEP_REM: i64 = 5;

/// 수면 구간 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SleepState {
    /// 침대에 있음 (총 수면 시간에 포함하지 않음)
    InBed,
    /// 수면 중 (총 수면 시간에 포함)
    Asleep,
    /// 깨어 있음
    Awake,
}

impl SleepState {
    /// 원시 카테고리 코드 분류
    ///
    /// 수면 계열(1, 3, 4, 5) → `Asleep`, 0 → `InBed`, 그 외 → `Awake`.
    pub fn classify(raw: f64) -> Self {
        if raw.fract() != 0.0 {
            return SleepState::Awake;
        }
        match raw as i64 {
            RAW_ASLEEP_UNSPECIFIED | RAW_ASLEEP_CORE | RAW_ASLEEP_DEEP | RAW_ASLEEP_REM => {
                SleepState::Asleep
            }
            RAW_IN_BED => SleepState::InBed,
            _ => SleepState::Awake,
        }
    }

    /// 총 수면 시간 집계 대상 여부
    pub fn counts_toward_total(self) -> bool {
        self == SleepState::Asleep
    }
}

/// 상태 라벨이 붙은 연속 구간
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepSegment {
    /// 시작 시각
    pub start_date: DateTime<Utc>,
    /// 종료 시각 (start_date 이상)
    pub end_date: DateTime<Utc>,
    /// 구간 상태
    pub state: SleepState,
}

impl SleepSegment {
    /// 새 구간 생성: 종료가 시작보다 앞서면 거부
    pub fn new(
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        state: SleepState,
    ) -> Result<Self, CoreError> {
        if end_date < start_date {
            return Err(CoreError::Validation {
                field: "endDate".to_string(),
                message: format!("종료 시각({end_date})이 시작 시각({start_date})보다 앞섬"),
            });
        }
        Ok(Self {
            start_date,
            end_date,
            state,
        })
    }

    /// 원시 샘플에서 구간 생성
    pub fn from_sample(sample: &MetricSample) -> Result<Self, CoreError> {
        Self::new(sample.start, sample.end, SleepState::classify(sample.value))
    }

    /// 구간 길이 (분, 소수)
    pub fn minutes(&self) -> f64 {
        (self.end_date - self.start_date).num_milliseconds() as f64 / 60_000.0
    }
}

/// 구간 목록 + 파생 총 수면 시간
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepSummary {
    /// 분류된 구간 목록 (소스 순서 유지)
    pub segments: Vec<SleepSegment>,
    /// 수면 상태 구간 합계 (분, 반올림)
    pub total_minutes: i64,
}

impl SleepSummary {
    /// 원시 샘플 목록 요약
    ///
    /// 샘플이 없으면 `None`: 빈 자리표시자를 만들지 않는다.
    /// 종료가 시작보다 앞선 샘플은 건너뛴다.
    pub fn from_samples(samples: &[MetricSample]) -> Option<Self> {
        let segments: Vec<SleepSegment> = samples
            .iter()
            .filter_map(|s| match SleepSegment::from_sample(s) {
                Ok(seg) => Some(seg),
                Err(e) => {
                    tracing::warn!("수면 샘플 무시: {e}");
                    None
                }
            })
            .collect();

        if segments.is_empty() {
            return None;
        }

        let total: f64 = segments
            .iter()
            .filter(|seg| seg.state.counts_toward_total())
            .map(SleepSegment::minutes)
            .sum();

        Some(Self {
            segments,
            total_minutes: total.round() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn classify_raw_codes() {
        assert_eq!(SleepState::classify(0.0), SleepState::InBed);
        for raw in [1.0, 3.0, 4.0, 5.0] {
            assert_eq!(SleepState::classify(raw), SleepState::Asleep);
        }
        assert_eq!(SleepState::classify(2.0), SleepState::Awake);
        assert_eq!(SleepState::classify(42.0), SleepState::Awake);
        assert_eq!(SleepState::classify(1.5), SleepState::Awake);
    }

    #[test]
    fn in_bed_recorded_but_not_counted() {
        let samples = vec![
            MetricSample::span(0.0, at(22, 0), at(23, 0)), // inBed 60분
            MetricSample::span(3.0, at(23, 0), at(23, 30)), // core 30분
            MetricSample::span(2.0, at(23, 30), at(23, 40)), // awake 10분
            MetricSample::span(4.0, at(23, 40), at(23, 55)), // deep 15분
        ];
        let summary = SleepSummary::from_samples(&samples).unwrap();
        assert_eq!(summary.segments.len(), 4);
        assert_eq!(summary.segments[0].state, SleepState::InBed);
        assert_eq!(summary.total_minutes, 45);
    }

    #[test]
    fn total_rounds_to_nearest_minute() {
        let start = at(1, 0);
        let samples = vec![
            MetricSample::span(1.0, start, start + Duration::seconds(60)), // 1분
            MetricSample::span(5.0, at(2, 0), at(2, 0) + Duration::seconds(40)), // 0.667분
        ];
        // 1.667분 → 2 (절삭이면 1)
        assert_eq!(SleepSummary::from_samples(&samples).unwrap().total_minutes, 2);
    }

    #[test]
    fn empty_samples_yield_nothing() {
        assert!(SleepSummary::from_samples(&[]).is_none());
    }

    #[test]
    fn inverted_segment_rejected() {
        assert!(SleepSegment::new(at(5, 0), at(4, 0), SleepState::Asleep).is_err());
        let only_bad = vec![MetricSample::span(1.0, at(5, 0), at(4, 0))];
        assert!(SleepSummary::from_samples(&only_bad).is_none());
    }

    #[test]
    fn segment_json_shape() {
        let seg = SleepSegment::new(at(1, 0), at(2, 0), SleepState::InBed).unwrap();
        let json = serde_json::to_value(&seg).unwrap();
        assert_eq!(json["state"], "inBed");
        assert!(json.get("startDate").is_some());
        assert!(json.get("endDate").is_some());
    }
}
