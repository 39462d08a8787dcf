//! 메트릭 수집기.
//!
//! 워터마크가 없으면 오늘 하루 전체를 하나의 누적 스냅샷으로,
//! 있으면 `[since, now)` 누적 스냅샷 하나와 순간 측정 샘플별 스냅샷을 만든다.
//! 메트릭 단위 조회 실패는 해당 필드만 빼고 계속 진행하며,
//! 걸음 수 조회 실패만 수집 전체를 실패시킨다.

use chrono::{DateTime, Duration, Local, Timelike, Utc};
use futures::future::join_all;
use healthsync_core::error::CoreError;
use healthsync_core::models::metric::{MetricKind, MetricSample, MetricStyle};
use healthsync_core::models::sleep::{SleepSegment, SleepSummary};
use healthsync_core::models::snapshot::{MetricSnapshot, SyncMode};
use healthsync_core::models::sync::SyncWatermark;
use healthsync_core::ports::metric_source::MetricSource;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 한 번의 수집 결과
///
/// 소비형 반복자: 다시 돌릴 수 없으며, 새 조회는 새 `collect` 호출로만 한다.
/// 증분 모드에서 첫 항목은 항상 누적 스냅샷이다.
#[derive(Debug)]
pub struct SnapshotBatch {
    mode: SyncMode,
    started_at: DateTime<Utc>,
    failures: Vec<CoreError>,
    snapshots: std::vec::IntoIter<MetricSnapshot>,
}

impl SnapshotBatch {
    fn new(
        mode: SyncMode,
        started_at: DateTime<Utc>,
        failures: Vec<CoreError>,
        snapshots: Vec<MetricSnapshot>,
    ) -> Self {
        Self {
            mode,
            started_at,
            failures,
            snapshots: snapshots.into_iter(),
        }
    }

    /// 수집 모드
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// 수집 시작 시각: 다음 워터마크 후보
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// 제외된 메트릭의 조회 실패 목록
    pub fn failures(&self) -> &[CoreError] {
        &self.failures
    }
}

impl Iterator for SnapshotBatch {
    type Item = MetricSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        self.snapshots.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.snapshots.size_hint()
    }
}

impl ExactSizeIterator for SnapshotBatch {}

/// 메트릭 수집기
pub struct MetricCollector {
    source: Arc<dyn MetricSource>,
}

impl MetricCollector {
    /// 새 수집기 생성
    pub fn new(source: Arc<dyn MetricSource>) -> Self {
        Self { source }
    }

    /// 현재 시각 기준 수집
    pub async fn collect(&self, since: Option<SyncWatermark>) -> Result<SnapshotBatch, CoreError> {
        self.collect_at(since, Utc::now()).await
    }

    /// 지정 시각 기준 수집
    pub async fn collect_at(
        &self,
        since: Option<SyncWatermark>,
        now: DateTime<Utc>,
    ) -> Result<SnapshotBatch, CoreError> {
        self.source.ensure_authorized().await?;

        match since {
            None => self.collect_full(now).await,
            Some(watermark) => self.collect_incremental(watermark.instant(), now).await,
        }
    }

    /// 전체 수집: 오늘 0시부터 지금까지 하나의 누적 스냅샷
    async fn collect_full(&self, now: DateTime<Utc>) -> Result<SnapshotBatch, CoreError> {
        let start = start_of_day(now);
        debug!("전체 수집: {start} ~ {now}");

        let (steps, energy, distance, mindful, heart_rate, body_mass, height, sleep) = tokio::join!(
            self.cumulative(MetricKind::StepCount, start, now),
            self.cumulative(MetricKind::ActiveEnergyBurned, start, now),
            self.cumulative(MetricKind::DistanceWalkingRunning, start, now),
            self.cumulative(MetricKind::MindfulMinutes, start, now),
            self.source.latest_value(MetricKind::HeartRate),
            self.source.latest_value(MetricKind::BodyMass),
            self.source.latest_value(MetricKind::Height),
            self.source
                .samples_in_range(MetricKind::SleepAnalysis, start, now),
        );

        let steps = must_have(steps)?;
        let mut failures = Vec::new();

        let snapshot = MetricSnapshot::builder(SyncMode::Full, now)
            .value(MetricKind::StepCount, steps)
            .value(
                MetricKind::ActiveEnergyBurned,
                optional(MetricKind::ActiveEnergyBurned, energy, &mut failures).flatten(),
            )
            .value(
                MetricKind::DistanceWalkingRunning,
                optional(MetricKind::DistanceWalkingRunning, distance, &mut failures).flatten(),
            )
            .value(
                MetricKind::MindfulMinutes,
                optional(MetricKind::MindfulMinutes, mindful, &mut failures).flatten(),
            )
            .value(
                MetricKind::HeartRate,
                optional(MetricKind::HeartRate, heart_rate, &mut failures).flatten(),
            )
            .value(
                MetricKind::BodyMass,
                optional(MetricKind::BodyMass, body_mass, &mut failures).flatten(),
            )
            .value(
                MetricKind::Height,
                optional(MetricKind::Height, height, &mut failures).flatten(),
            )
            .sleep(
                optional(MetricKind::SleepAnalysis, sleep, &mut failures)
                    .and_then(|samples| SleepSummary::from_samples(&samples)),
            )
            .build();

        info!(
            "전체 수집 완료: 필드 {}개, 실패 {}개",
            snapshot.populated_fields().len(),
            failures.len()
        );
        Ok(SnapshotBatch::new(SyncMode::Full, now, failures, vec![snapshot]))
    }

    /// 증분 수집: 누적 스냅샷 하나 + 순간 측정 샘플별 스냅샷
    async fn collect_incremental(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SnapshotBatch, CoreError> {
        debug!("증분 수집: {since} ~ {now}");
        let mode = SyncMode::Incremental { since };

        let cumulative_reads = async {
            tokio::join!(
                self.cumulative(MetricKind::StepCount, since, now),
                self.cumulative(MetricKind::ActiveEnergyBurned, since, now),
                self.cumulative(MetricKind::DistanceWalkingRunning, since, now),
                self.cumulative(MetricKind::MindfulMinutes, since, now),
                self.source
                    .samples_in_range(MetricKind::SleepAnalysis, since, now),
            )
        };
        let point_reads = join_all(
            MetricKind::POINT_SAMPLES.map(|kind| self.samples_with_kind(kind, since, now)),
        );
        let ((steps, energy, distance, mindful, sleep), point_results) =
            tokio::join!(cumulative_reads, point_reads);

        let steps = must_have(steps)?;
        let mut failures = Vec::new();

        let cumulative = MetricSnapshot::builder(mode, now)
            .value(MetricKind::StepCount, steps)
            .value(
                MetricKind::ActiveEnergyBurned,
                optional(MetricKind::ActiveEnergyBurned, energy, &mut failures).flatten(),
            )
            .value(
                MetricKind::DistanceWalkingRunning,
                optional(MetricKind::DistanceWalkingRunning, distance, &mut failures).flatten(),
            )
            .value(
                MetricKind::MindfulMinutes,
                optional(MetricKind::MindfulMinutes, mindful, &mut failures).flatten(),
            )
            .sleep(
                optional(MetricKind::SleepAnalysis, sleep, &mut failures)
                    .and_then(|samples| SleepSummary::from_samples(&samples)),
            )
            .build();

        let mut snapshots = vec![cumulative];
        for (kind, result) in point_results {
            let Some(mut samples) = optional(kind, result, &mut failures) else {
                continue;
            };
            samples.sort_by_key(|s| s.end);
            for sample in samples {
                snapshots.push(MetricSnapshot::single(kind, sample.value, sample.end, since)?);
            }
        }

        info!(
            "증분 수집 완료: 스냅샷 {}개 (누적 1 + 샘플 {}), 실패 {}개",
            snapshots.len(),
            snapshots.len() - 1,
            failures.len()
        );
        Ok(SnapshotBatch::new(mode, now, failures, snapshots))
    }

    /// 이력 수집: 최근 `days_back`일의 모든 원시 샘플을 샘플별 스냅샷으로
    ///
    /// 어느 한 메트릭이라도 조회에 실패하면 전체 실패로 처리한다.
    pub async fn collect_history(
        &self,
        days_back: u32,
        now: DateTime<Utc>,
    ) -> Result<SnapshotBatch, CoreError> {
        self.source.ensure_authorized().await?;

        let since = now - Duration::days(i64::from(days_back));
        info!("이력 수집: 최근 {days_back}일 ({since} ~ {now})");

        let reads = join_all(MetricKind::ALL.map(|kind| self.samples_with_kind(kind, since, now))).await;

        let mut snapshots = Vec::new();
        for (kind, result) in reads {
            let mut samples = result.map_err(|e| CoreError::PartialMetricFailure {
                kind,
                message: e.to_string(),
            })?;
            samples.sort_by_key(|s| s.end);
            debug!("이력 {kind}: 샘플 {}개", samples.len());

            for sample in samples {
                match kind.style() {
                    MetricStyle::Segment => match SleepSegment::from_sample(&sample) {
                        Ok(segment) => snapshots.push(MetricSnapshot::single_segment(segment, since)),
                        Err(e) => warn!("수면 샘플 무시: {e}"),
                    },
                    _ => {
                        let value = if kind == MetricKind::MindfulMinutes {
                            sample.duration_minutes()
                        } else {
                            sample.value
                        };
                        snapshots.push(MetricSnapshot::single(kind, value, sample.end, since)?);
                    }
                }
            }
        }

        info!("이력 수집 완료: 스냅샷 {}개", snapshots.len());
        Ok(SnapshotBatch::new(
            SyncMode::Incremental { since },
            now,
            Vec::new(),
            snapshots,
        ))
    }

    /// 누적 메트릭 구간 값: 명상 시간은 세션 길이(분)의 합
    async fn cumulative(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<f64>, CoreError> {
        if kind == MetricKind::MindfulMinutes {
            let sessions = self.source.samples_in_range(kind, start, end).await?;
            if sessions.is_empty() {
                return Ok(None);
            }
            return Ok(Some(sessions.iter().map(MetricSample::duration_minutes).sum()));
        }
        self.source.sum_over_range(kind, start, end).await
    }

    async fn samples_with_kind(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> (MetricKind, Result<Vec<MetricSample>, CoreError>) {
        (kind, self.source.samples_in_range(kind, start, end).await)
    }
}

/// 필수 조회 결과: 실패하면 수집 전체 실패
fn must_have<T>(result: Result<T, CoreError>) -> Result<T, CoreError> {
    result.map_err(|e| {
        error!("걸음 수 조회 실패, 수집 중단: {e}");
        e
    })
}

/// 선택 조회 결과: 실패는 기록하고 필드에서 제외
fn optional<T>(
    kind: MetricKind,
    result: Result<T, CoreError>,
    failures: &mut Vec<CoreError>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{kind} 조회 실패, 제외하고 계속: {e}");
            failures.push(CoreError::PartialMetricFailure {
                kind,
                message: e.to_string(),
            });
            None
        }
    }
}

/// `now`가 속한 현지 날짜의 0시 (UTC)
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&Local);
    local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| now - Duration::seconds(i64::from(local.num_seconds_from_midnight())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMetricSource;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    fn local_noon() -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn collector_with(source: &Arc<InMemoryMetricSource>) -> MetricCollector {
        MetricCollector::new(source.clone() as Arc<dyn MetricSource>)
    }

    #[tokio::test]
    async fn incremental_scenario_yields_cumulative_then_per_sample() {
        let source = Arc::new(InMemoryMetricSource::new());
        source.record(MetricKind::StepCount, MetricSample::span(1200.0, at(9, 10), at(9, 50)));
        source.record(MetricKind::HeartRate, MetricSample::instant(71.0, at(9, 45)));
        source.record(MetricKind::HeartRate, MetricSample::instant(62.0, at(9, 15)));

        let batch = collector_with(&source)
            .collect_at(Some(SyncWatermark(at(9, 0))), at(10, 0))
            .await
            .unwrap();
        assert!(batch.failures().is_empty());
        let snapshots: Vec<_> = batch.collect();
        assert_eq!(snapshots.len(), 3);

        let a = &snapshots[0];
        assert!(a.is_incremental());
        assert_eq!(a.since_date(), Some(at(9, 0)));
        assert_eq!(a.value(MetricKind::StepCount), Some(1200.0));
        assert_eq!(a.timestamp(), at(10, 0));

        let b = &snapshots[1];
        assert_eq!(b.populated_fields(), vec![MetricKind::HeartRate]);
        assert_eq!(b.value(MetricKind::HeartRate), Some(62.0));
        assert_eq!(b.timestamp(), at(9, 15));
        assert_eq!(b.since_date(), Some(at(9, 0)));

        let c = &snapshots[2];
        assert_eq!(c.value(MetricKind::HeartRate), Some(71.0));
        assert_eq!(c.timestamp(), at(9, 45));
        assert!(c.is_incremental());
    }

    #[tokio::test]
    async fn batch_is_a_snapshot_of_reads_at_collect_time() {
        let source = Arc::new(InMemoryMetricSource::new());
        source.record(MetricKind::HeartRate, MetricSample::instant(62.0, at(9, 15)));
        let collector = collector_with(&source);
        let since = Some(SyncWatermark(at(9, 0)));

        let first = collector.collect_at(since, at(10, 0)).await.unwrap();
        assert_eq!(first.len(), 2);
        source.record(MetricKind::HeartRate, MetricSample::instant(71.0, at(9, 45)));

        // 이미 만든 배치는 나중에 기록된 샘플을 보지 않는다
        assert_eq!(first.count(), 2);
        let second = collector.collect_at(since, at(10, 0)).await.unwrap();
        assert_eq!(second.len(), 3);
    }

    #[tokio::test]
    async fn full_collection_yields_single_snapshot() {
        let now = local_noon();
        let source = Arc::new(InMemoryMetricSource::new());
        source.record(
            MetricKind::StepCount,
            MetricSample::span(500.0, now - Duration::hours(2), now - Duration::hours(1)),
        );
        source.record(
            MetricKind::StepCount,
            MetricSample::span(300.0, now - Duration::minutes(30), now - Duration::minutes(10)),
        );
        source.record(MetricKind::HeartRate, MetricSample::instant(64.0, now - Duration::hours(3)));
        source.record(MetricKind::HeartRate, MetricSample::instant(70.0, now - Duration::minutes(5)));

        let batch = collector_with(&source).collect_at(None, now).await.unwrap();
        assert_eq!(batch.mode(), SyncMode::Full);
        let snapshots: Vec<_> = batch.collect();
        assert_eq!(snapshots.len(), 1);

        let full = &snapshots[0];
        assert!(!full.is_incremental());
        assert!(full.since_date().is_none());
        assert_eq!(full.value(MetricKind::StepCount), Some(800.0));
        assert_eq!(full.value(MetricKind::HeartRate), Some(70.0));
        assert!(full.sleep_segments().is_none());
    }

    #[tokio::test]
    async fn full_collection_ignores_yesterday() {
        let now = local_noon();
        let source = Arc::new(InMemoryMetricSource::new());
        let yesterday = start_of_day(now) - Duration::hours(1);
        source.record(
            MetricKind::StepCount,
            MetricSample::span(999.0, yesterday, yesterday + Duration::minutes(10)),
        );

        let snapshot = collector_with(&source)
            .collect_at(None, now)
            .await
            .unwrap()
            .next()
            .unwrap();
        assert_eq!(snapshot.value(MetricKind::StepCount), None);
    }

    #[tokio::test]
    async fn failing_secondary_metric_is_excluded() {
        let source = Arc::new(InMemoryMetricSource::new());
        source.record(MetricKind::StepCount, MetricSample::span(10.0, at(9, 5), at(9, 6)));
        source.record(MetricKind::HeartRate, MetricSample::instant(60.0, at(9, 30)));
        source.record(MetricKind::BodyMass, MetricSample::instant(70.2, at(9, 20)));
        source.inject_failure(MetricKind::HeartRate, "query timeout");
        source.inject_failure(MetricKind::ActiveEnergyBurned, "query timeout");

        let batch = collector_with(&source)
            .collect_at(Some(SyncWatermark(at(9, 0))), at(10, 0))
            .await
            .unwrap();
        assert_eq!(batch.failures().len(), 2);
        assert!(batch
            .failures()
            .iter()
            .all(|e| matches!(e, CoreError::PartialMetricFailure { .. })));

        let snapshots: Vec<_> = batch.collect();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].value(MetricKind::StepCount), Some(10.0));
        assert_eq!(snapshots[1].value(MetricKind::BodyMass), Some(70.2));
    }

    #[tokio::test]
    async fn failing_step_count_aborts_collection() {
        let source = Arc::new(InMemoryMetricSource::new());
        source.record(MetricKind::HeartRate, MetricSample::instant(60.0, at(9, 30)));
        source.inject_failure(MetricKind::StepCount, "store locked");

        let result = collector_with(&source)
            .collect_at(Some(SyncWatermark(at(9, 0))), at(10, 0))
            .await;
        assert!(matches!(result, Err(CoreError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn unauthorized_source_fails_before_reading() {
        let source = Arc::new(InMemoryMetricSource::new());
        source.set_authorized(false);
        let result = collector_with(&source).collect_at(None, at(10, 0)).await;
        assert!(matches!(result, Err(CoreError::AuthorizationDenied(_))));
    }

    #[tokio::test]
    async fn incremental_sleep_and_mindful_in_cumulative_snapshot() {
        let source = Arc::new(InMemoryMetricSource::new());
        source.record(MetricKind::SleepAnalysis, MetricSample::span(0.0, at(1, 0), at(1, 30)));
        source.record(MetricKind::SleepAnalysis, MetricSample::span(4.0, at(1, 30), at(2, 15)));
        source.record(MetricKind::MindfulMinutes, MetricSample::span(1.0, at(3, 0), at(3, 10)));
        source.record(MetricKind::MindfulMinutes, MetricSample::span(1.0, at(4, 0), at(4, 5)));

        let snapshots: Vec<_> = collector_with(&source)
            .collect_at(Some(SyncWatermark(at(0, 0))), at(5, 0))
            .await
            .unwrap()
            .collect();
        assert_eq!(snapshots.len(), 1);

        let cumulative = &snapshots[0];
        assert_eq!(cumulative.sleep_segments().map(<[_]>::len), Some(2));
        assert_eq!(cumulative.total_sleep_minutes(), Some(45));
        assert_eq!(cumulative.value(MetricKind::MindfulMinutes), Some(15.0));
        // 누적 스냅샷은 필드가 없어도 항상 생성됨
        assert_eq!(cumulative.value(MetricKind::StepCount), None);
    }

    #[tokio::test]
    async fn empty_incremental_still_yields_cumulative() {
        let source = Arc::new(InMemoryMetricSource::new());
        let snapshots: Vec<_> = collector_with(&source)
            .collect_at(Some(SyncWatermark(at(9, 0))), at(10, 0))
            .await
            .unwrap()
            .collect();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].is_empty());
    }

    #[tokio::test]
    async fn history_yields_one_snapshot_per_sample() {
        let now = at(12, 0);
        let source = Arc::new(InMemoryMetricSource::new());
        let two_days_ago = now - Duration::days(2);
        let too_old = now - Duration::days(40);

        source.record(MetricKind::StepCount, MetricSample::span(100.0, two_days_ago, two_days_ago + Duration::minutes(5)));
        source.record(MetricKind::StepCount, MetricSample::span(50.0, too_old, too_old + Duration::minutes(5)));
        source.record(MetricKind::HeartRate, MetricSample::instant(65.0, at(11, 0)));
        source.record(MetricKind::MindfulMinutes, MetricSample::span(1.0, at(8, 0), at(8, 12)));
        source.record(MetricKind::SleepAnalysis, MetricSample::span(3.0, at(2, 0), at(3, 0)));

        let batch = collector_with(&source).collect_history(30, now).await.unwrap();
        let since = now - Duration::days(30);
        assert_eq!(batch.mode(), SyncMode::Incremental { since });

        let snapshots: Vec<_> = batch.collect();
        assert_eq!(snapshots.len(), 4);
        for snapshot in &snapshots {
            assert_eq!(snapshot.populated_fields().len(), 1);
            assert_eq!(snapshot.since_date(), Some(since));
            assert!(snapshot.validate().is_ok());
        }

        let mindful = snapshots
            .iter()
            .find(|s| s.value(MetricKind::MindfulMinutes).is_some())
            .unwrap();
        assert_eq!(mindful.value(MetricKind::MindfulMinutes), Some(12.0));
        assert_eq!(mindful.timestamp(), at(8, 12));

        let sleep = snapshots
            .iter()
            .find(|s| s.sleep_segments().is_some())
            .unwrap();
        assert_eq!(sleep.total_sleep_minutes(), Some(60));
    }

    #[tokio::test]
    async fn history_fails_when_any_read_fails() {
        let source = Arc::new(InMemoryMetricSource::new());
        source.inject_failure(MetricKind::Height, "denied");
        let result = collector_with(&source).collect_history(30, at(12, 0)).await;
        assert!(matches!(
            result,
            Err(CoreError::PartialMetricFailure {
                kind: MetricKind::Height,
                ..
            })
        ));
    }
}
