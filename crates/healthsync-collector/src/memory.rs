//! 인메모리 메트릭 소스.
//!
//! `MetricSource` 포트 구현. 기록된 샘플을 종류별로 시작 시각 순서로 보관하고,
//! 새 샘플이 기록되면 등록된 관찰자에게 변경 알림을 보낸다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use healthsync_core::error::CoreError;
use healthsync_core::models::metric::{MetricKind, MetricSample};
use healthsync_core::ports::metric_source::MetricSource;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// 인메모리 메트릭 소스: `MetricSource` 포트 구현
pub struct InMemoryMetricSource {
    samples: RwLock<HashMap<MetricKind, Vec<MetricSample>>>,
    observers: Mutex<HashMap<MetricKind, Vec<mpsc::UnboundedSender<MetricKind>>>>,
    failures: RwLock<HashMap<MetricKind, String>>,
    authorized: AtomicBool,
}

impl InMemoryMetricSource {
    /// 빈 소스 생성
    pub fn new() -> Self {
        Self {
            samples: RwLock::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            authorized: AtomicBool::new(true),
        }
    }

    /// 샘플 기록 + 관찰자 알림
    pub fn record(&self, kind: MetricKind, sample: MetricSample) {
        {
            let mut samples = self.samples.write();
            let list = samples.entry(kind).or_default();
            let pos = list.partition_point(|s| s.start <= sample.start);
            list.insert(pos, sample);
        }
        self.notify(kind);
    }

    /// 여러 샘플 기록: 알림은 종류당 한 번
    pub fn record_batch(&self, kind: MetricKind, batch: impl IntoIterator<Item = MetricSample>) {
        {
            let mut samples = self.samples.write();
            let list = samples.entry(kind).or_default();
            list.extend(batch);
            list.sort_by_key(|s| s.start);
        }
        self.notify(kind);
    }

    /// 해당 종류 조회를 실패시킴
    pub fn inject_failure(&self, kind: MetricKind, message: impl Into<String>) {
        self.failures.write().insert(kind, message.into());
    }

    /// 주입한 실패 해제
    pub fn clear_failure(&self, kind: MetricKind) {
        self.failures.write().remove(&kind);
    }

    /// 읽기 권한 설정
    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    /// 기록된 샘플 수
    pub fn sample_count(&self, kind: MetricKind) -> usize {
        self.samples.read().get(&kind).map_or(0, Vec::len)
    }

    fn notify(&self, kind: MetricKind) {
        let mut observers = self.observers.lock();
        if let Some(list) = observers.get_mut(&kind) {
            // 닫힌 수신자는 정리
            list.retain(|tx| tx.send(kind).is_ok());
            debug!("{kind} 변경 알림: 관찰자 {}명", list.len());
        }
    }

    fn check(&self, kind: MetricKind) -> Result<(), CoreError> {
        match self.failures.read().get(&kind) {
            Some(message) => Err(CoreError::SourceUnavailable(format!("{kind}: {message}"))),
            None => Ok(()),
        }
    }

    fn in_range(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, CoreError> {
        self.check(kind)?;
        Ok(self
            .samples
            .read()
            .get(&kind)
            .map(|list| {
                list.iter()
                    .filter(|s| s.starts_within(start, end))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Default for InMemoryMetricSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for InMemoryMetricSource {
    async fn ensure_authorized(&self) -> Result<(), CoreError> {
        if self.authorized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::AuthorizationDenied(
                "메트릭 읽기 권한 없음".to_string(),
            ))
        }
    }

    async fn sum_over_range(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<f64>, CoreError> {
        let samples = self.in_range(kind, start, end)?;
        if samples.is_empty() {
            return Ok(None);
        }
        Ok(Some(samples.iter().map(|s| s.value).sum()))
    }

    async fn latest_value(&self, kind: MetricKind) -> Result<Option<f64>, CoreError> {
        self.check(kind)?;
        Ok(self
            .samples
            .read()
            .get(&kind)
            .and_then(|list| list.iter().max_by_key(|s| s.end))
            .map(|s| s.value))
    }

    async fn samples_in_range(
        &self,
        kind: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, CoreError> {
        self.in_range(kind, start, end)
    }

    async fn observe_changes(
        &self,
        kind: MetricKind,
        notify: mpsc::UnboundedSender<MetricKind>,
    ) -> Result<(), CoreError> {
        self.observers.lock().entry(kind).or_default().push(notify);
        debug!("{kind} 변경 관찰 등록");
        Ok(())
    }
}
