//! 메트릭 종류와 원시 샘플.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 메트릭 집계 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricStyle {
    /// 구간 합산 가능한 누적 메트릭 (걸음 수, 에너지, 거리, 명상 시간)
    Cumulative,
    /// 순간 측정값 (심박수, 체중, 키): 증분 동기화 시 샘플마다 개별 전송
    PointSample,
    /// 상태 라벨이 붙은 구간 스트림 (수면)
    Segment,
}

/// 수집 대상 메트릭 종류
///
/// 직렬화 이름은 업로드 JSON 필드명과 동일하다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    /// 걸음 수 (count)
    StepCount,
    /// 활동 에너지 (kcal)
    ActiveEnergyBurned,
    /// 걷기/달리기 거리 (m)
    DistanceWalkingRunning,
    /// 명상 시간 (분): 세션 길이의 합
    MindfulMinutes,
    /// 심박수 (count/min)
    HeartRate,
    /// 체중 (kg)
    BodyMass,
    /// 키 (m)
    Height,
    /// 수면 분석 구간
    SleepAnalysis,
}

impl MetricKind {
    /// 전체 메트릭 목록 (수집 순서)
    pub const ALL: [MetricKind; 8] = [
        MetricKind::StepCount,
        MetricKind::ActiveEnergyBurned,
        MetricKind::DistanceWalkingRunning,
        MetricKind::MindfulMinutes,
        MetricKind::HeartRate,
        MetricKind::BodyMass,
        MetricKind::Height,
        MetricKind::SleepAnalysis,
    ];

    /// 순간 측정값 메트릭 목록
    pub const POINT_SAMPLES: [MetricKind; 3] =
        [MetricKind::HeartRate, MetricKind::BodyMass, MetricKind::Height];

    /// 집계 방식
    pub fn style(self) -> MetricStyle {
        match self {
            MetricKind::StepCount
            | MetricKind::ActiveEnergyBurned
            | MetricKind::DistanceWalkingRunning
            | MetricKind::MindfulMinutes => MetricStyle::Cumulative,
            MetricKind::HeartRate | MetricKind::BodyMass | MetricKind::Height => {
                MetricStyle::PointSample
            }
            MetricKind::SleepAnalysis => MetricStyle::Segment,
        }
    }

    /// 업로드 JSON 필드명
    pub fn field_name(self) -> &'static str {
        match self {
            MetricKind::StepCount => "stepCount",
            MetricKind::ActiveEnergyBurned => "activeEnergyBurned",
            MetricKind::DistanceWalkingRunning => "distanceWalkingRunning",
            MetricKind::MindfulMinutes => "mindfulMinutes",
            MetricKind::HeartRate => "heartRate",
            MetricKind::BodyMass => "bodyMass",
            MetricKind::Height => "height",
            MetricKind::SleepAnalysis => "sleepSegments",
        }
    }

    /// 측정 단위 (로그 출력용)
    pub fn unit(self) -> &'static str {
        match self {
            MetricKind::StepCount => "count",
            MetricKind::ActiveEnergyBurned => "kcal",
            MetricKind::DistanceWalkingRunning | MetricKind::Height => "m",
            MetricKind::MindfulMinutes | MetricKind::SleepAnalysis => "min",
            MetricKind::HeartRate => "count/min",
            MetricKind::BodyMass => "kg",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// 데이터 소스에서 읽은 원시 샘플 하나
///
/// 수량 메트릭은 `value`가 측정값, 구간 메트릭(수면/명상)은 `value`가
/// 카테고리 원시 코드이고 길이는 `start..end`로 표현된다.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// 측정값 또는 카테고리 코드
    pub value: f64,
    /// 샘플 시작 시각
    pub start: DateTime<Utc>,
    /// 샘플 종료 시각 (start 이상)
    pub end: DateTime<Utc>,
}

impl MetricSample {
    /// 순간 측정 샘플 (start == end)
    pub fn instant(value: f64, at: DateTime<Utc>) -> Self {
        Self {
            value,
            start: at,
            end: at,
        }
    }

    /// 구간 샘플
    pub fn span(value: f64, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { value, start, end }
    }

    /// 구간 길이 (분, 소수)
    pub fn duration_minutes(&self) -> f64 {
        (self.end - self.start).num_milliseconds().max(0) as f64 / 60_000.0
    }

    /// `[from, to)` 구간 포함 여부: 샘플 시작 시각 기준
    pub fn starts_within(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start >= from && self.start < to
    }
}
