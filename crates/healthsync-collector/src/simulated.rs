//! 합성 샘플 생성기.
//!
//! 플랫폼 건강 데이터 저장소가 없는 제한 환경에서 그럴듯한 샘플을
//! `InMemoryMetricSource`에 주기적으로 기록해 전체 파이프라인을 돌린다.
//! 값은 틱 번호에서 결정적으로 계산된다.

use chrono::{DateTime, Duration, Utc};
use healthsync_core::models::metric::{MetricKind, MetricSample};
use healthsync_core::models::sleep::{
    RAW_ASLEEP_CORE, RAW_ASLEEP_DEEP, RAW_ASLEEP_REM, RAW_AWAKE, RAW_IN_BED,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::memory::InMemoryMetricSource;

/// 체중 측정 주기 (틱)
const BODY_MASS_EVERY: u64 = 30;
/// 키 측정 주기 (틱)
const HEIGHT_EVERY: u64 = 240;
/// 명상 세션 주기 (틱)
const MINDFUL_EVERY: u64 = 45;
/// 수면 구간 주기 (틱)
const SLEEP_EVERY: u64 = 20;

/// 수면 상태 순환
const SLEEP_CYCLE: [i64; 5] = [
    RAW_IN_BED,
    RAW_ASLEEP_CORE,
    RAW_ASLEEP_DEEP,
    RAW_ASLEEP_REM,
    RAW_AWAKE,
];

/// 합성 샘플 생성기
pub struct SampleGenerator {
    source: Arc<InMemoryMetricSource>,
    tick: u64,
}

impl SampleGenerator {
    /// 새 생성기
    pub fn new(source: Arc<InMemoryMetricSource>) -> Self {
        Self { source, tick: 0 }
    }

    /// 지금까지 생성한 틱 수
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// `now`로 끝나는 `interval` 한 구간의 샘플 생성
    pub fn generate_at(&mut self, now: DateTime<Utc>, interval: Duration) {
        let tick = self.tick;
        self.tick += 1;
        let start = now - interval;
        let minutes = interval.num_seconds().max(60) as f64 / 60.0;

        // 분당 40~130보
        let steps = ((40 + (tick % 7) * 15) as f64 * minutes).round();
        self.source
            .record(MetricKind::StepCount, MetricSample::span(steps, start, now));
        self.source.record(
            MetricKind::ActiveEnergyBurned,
            MetricSample::span((steps * 0.04 * 10.0).round() / 10.0, start, now),
        );
        self.source.record(
            MetricKind::DistanceWalkingRunning,
            MetricSample::span((steps * 0.75).round(), start, now),
        );

        let heart_rate = 72.0 + 12.0 * ((tick as f64) * 0.35).sin();
        self.source.record(
            MetricKind::HeartRate,
            MetricSample::instant(heart_rate.round(), now),
        );

        if tick % BODY_MASS_EVERY == 0 {
            let mass = 70.0 + ((tick / BODY_MASS_EVERY) % 5) as f64 * 0.2;
            self.source
                .record(MetricKind::BodyMass, MetricSample::instant(mass, now));
        }
        if tick % HEIGHT_EVERY == 0 {
            self.source
                .record(MetricKind::Height, MetricSample::instant(1.76, now));
        }
        if tick % MINDFUL_EVERY == 0 {
            self.source.record(
                MetricKind::MindfulMinutes,
                MetricSample::span(1.0, now - Duration::minutes(10), now),
            );
        }
        if tick % SLEEP_EVERY == 0 {
            let code = SLEEP_CYCLE[((tick / SLEEP_EVERY) as usize) % SLEEP_CYCLE.len()];
            self.source.record(
                MetricKind::SleepAnalysis,
                MetricSample::span(code as f64, start, now),
            );
        }
    }

    /// `[now - days, now)` 구간을 `step` 간격으로 미리 채움
    pub fn seed_history(&mut self, now: DateTime<Utc>, days: u32, step: Duration) {
        let mut cursor = now - Duration::days(i64::from(days)) + step;
        let mut count = 0u64;
        while cursor <= now {
            self.generate_at(cursor, step);
            cursor += step;
            count += 1;
        }
        info!("합성 이력 생성: {days}일, {count}구간");
    }

    /// 종료 신호까지 주기적으로 생성
    pub async fn run(mut self, interval: std::time::Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let step = Duration::from_std(interval).unwrap_or_else(|_| Duration::minutes(1));
        let mut ticker = tokio::time::interval(interval);
        // 첫 틱은 즉시 발생하므로 건너뜀
        ticker.tick().await;
        info!("합성 샘플 생성 시작: {}초 간격", interval.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.generate_at(Utc::now(), step);
                    debug!("합성 샘플 생성: tick={}", self.tick);
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("합성 샘플 생성 종료");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn first_tick_records_every_kind() {
        let source = Arc::new(InMemoryMetricSource::new());
        let mut generator = SampleGenerator::new(source.clone());
        generator.generate_at(at(9, 0), Duration::minutes(1));

        for kind in MetricKind::ALL {
            assert_eq!(source.sample_count(kind), 1, "{kind}");
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let a = Arc::new(InMemoryMetricSource::new());
        let b = Arc::new(InMemoryMetricSource::new());
        let mut gen_a = SampleGenerator::new(a.clone());
        let mut gen_b = SampleGenerator::new(b.clone());
        for i in 0..10 {
            gen_a.generate_at(at(9, i), Duration::minutes(1));
            gen_b.generate_at(at(9, i), Duration::minutes(1));
        }
        for kind in MetricKind::ALL {
            assert_eq!(a.sample_count(kind), b.sample_count(kind));
        }
        assert_eq!(gen_a.ticks(), 10);
    }

    #[test]
    fn seed_history_covers_window() {
        let source = Arc::new(InMemoryMetricSource::new());
        let mut generator = SampleGenerator::new(source.clone());
        generator.seed_history(at(12, 0), 2, Duration::hours(1));
        assert_eq!(generator.ticks(), 48);
        assert_eq!(source.sample_count(MetricKind::HeartRate), 48);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let source = Arc::new(InMemoryMetricSource::new());
        let generator = SampleGenerator::new(source.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(generator.run(std::time::Duration::from_secs(60), rx));
        tokio::time::sleep(std::time::Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(source.sample_count(MetricKind::HeartRate), 2);
    }
}
