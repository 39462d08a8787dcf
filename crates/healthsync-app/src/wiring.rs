//! 어댑터 조립 (DI 와이어링).
//!
//! 저장소 → 전송 → 수집기 → 실행 예산 제공자 → 스케줄러 순서로 만든다.
//! 백그라운드 루프는 띄우지 않으며, 그것은 진입점이 명령에 따라 결정한다.

use chrono::Utc;
use healthsync_collector::collector::MetricCollector;
use healthsync_collector::memory::InMemoryMetricSource;
use healthsync_collector::simulated::SampleGenerator;
use healthsync_core::config::AppConfig;
use healthsync_core::error::CoreError;
use healthsync_core::models::metric::MetricKind;
use healthsync_core::models::upload::TransferEvent;
use healthsync_core::ports::metric_source::MetricSource;
use healthsync_core::ports::storage::JobLedger;
use healthsync_network::transfer_channel::CompletionReceiver;
use healthsync_network::transport::SnapshotTransport;
use healthsync_storage::sqlite::SqliteStorage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::budget::{BudgetReceiver, IntervalBudgetProvider};
use crate::event_bus::{AppEvent, EventBus};
use crate::scheduler::{SchedulerConfig, SyncScheduler};

/// DB 파일 이름
pub const DB_FILE_NAME: &str = "healthsync.db";

/// 조립된 구성 요소
pub struct App {
    pub config: AppConfig,
    pub storage: Arc<SqliteStorage>,
    pub source: Arc<InMemoryMetricSource>,
    pub transport: Arc<SnapshotTransport>,
    pub scheduler: Arc<SyncScheduler>,
    pub provider: Arc<IntervalBudgetProvider>,
    pub events: Arc<EventBus>,
    /// 완료 수신기: [`App::start_transfers`]가 가져간다
    pub completions: Option<CompletionReceiver>,
    /// [`SyncScheduler::run`]으로 넘길 예산 수신기
    pub grants: BudgetReceiver,
}

/// 저장 경로
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub db_path: PathBuf,
    pub spool_dir: PathBuf,
}

impl StoragePaths {
    /// 설정값이 있으면 그대로, 없으면 데이터 디렉토리 아래
    pub fn resolve(config: &AppConfig, data_dir: &Path) -> Self {
        Self {
            db_path: config
                .storage
                .db_path
                .clone()
                .unwrap_or_else(|| data_dir.join(DB_FILE_NAME)),
            spool_dir: config
                .storage
                .spool_dir
                .clone()
                .unwrap_or_else(|| data_dir.join("spool")),
        }
    }
}

/// 전체 조립
///
/// tokio 런타임 안에서 호출해야 한다 (전송 채널 워커를 띄움).
pub fn assemble(config: AppConfig, data_dir: &Path) -> Result<App, CoreError> {
    config.validate()?;
    let paths = StoragePaths::resolve(&config, data_dir);
    info!("DB: {}, 전송 임시 디렉토리: {}", paths.db_path.display(), paths.spool_dir.display());

    let storage = Arc::new(SqliteStorage::open(&paths.db_path)?);

    let (transport, completions) = SnapshotTransport::from_config(
        &config,
        paths.spool_dir,
        storage.clone(),
        storage.clone(),
    )?;
    let transport = Arc::new(transport);

    let source = Arc::new(InMemoryMetricSource::new());
    let collector = MetricCollector::new(source.clone());

    let (provider, grants) =
        IntervalBudgetProvider::new(config.constrained_interval(), config.execution_window());
    let provider = Arc::new(provider);
    let events = Arc::new(EventBus::default());

    let scheduler = SyncScheduler::new(
        SchedulerConfig::from_app_config(&config),
        collector,
        transport.clone(),
        storage.clone(),
        provider.clone(),
    )
    .with_event_bus(events.clone());

    Ok(App {
        config,
        storage,
        source,
        transport,
        scheduler: Arc::new(scheduler),
        provider,
        events,
        completions: Some(completions),
        grants,
    })
}

impl App {
    /// 시작 단계: 완료 리스너를 띄운 뒤 장부의 대기 작업을 다시 연결한다
    ///
    /// 어떤 명령보다 먼저 한 번 호출한다. 다시 연결한 작업 수를 반환.
    pub async fn start_transfers(
        &mut self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<usize, CoreError> {
        let completions = self
            .completions
            .take()
            .ok_or_else(|| CoreError::Internal("전송 완료 리스너가 이미 시작됨".to_string()))?;
        tokio::spawn(
            self.transport
                .clone()
                .run_completion_listener(completions, shutdown_rx),
        );
        let (reattached, _) = recover_ledger(
            &self.transport,
            self.storage.as_ref(),
            self.config.storage.retention_days,
        )
        .await?;
        Ok(reattached)
    }
}

/// 전송 결과 집계
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferTally {
    pub completed: usize,
    pub failed: usize,
    /// 제한 시간 안에 끝나지 않은 작업 (장부에 `pending`으로 남음)
    pub unfinished: usize,
}

/// 넘긴 작업 `expected`건의 완료 이벤트를 `limit`까지 대기
///
/// 끝나지 않은 작업은 다음 프로세스 시작 때 다시 연결된다.
pub async fn await_transfers(
    transfers: &mut broadcast::Receiver<TransferEvent>,
    expected: usize,
    limit: Duration,
) -> TransferTally {
    let mut tally = TransferTally::default();
    let deadline = tokio::time::Instant::now() + limit;

    while tally.completed + tally.failed < expected {
        match tokio::time::timeout_at(deadline, transfers.recv()).await {
            Ok(Ok(TransferEvent::Completed { .. })) => tally.completed += 1,
            Ok(Ok(TransferEvent::Failed { handle, error })) => {
                warn!(%handle, "백그라운드 전송 실패: {error}");
                tally.failed += 1;
            }
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                warn!("전송 이벤트 {n}개 누락 - 성공으로 집계");
                tally.completed += n as usize;
            }
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
        }
    }
    tally.unfinished = expected.saturating_sub(tally.completed + tally.failed);
    tally
}

/// 재시작 복구: 남은 작업 재연결 후 보존 기간 지난 장부 정리
pub async fn recover_ledger(
    transport: &SnapshotTransport,
    ledger: &dyn JobLedger,
    retention_days: u32,
) -> Result<(usize, usize), CoreError> {
    let reattached = transport.reattach_pending().await?;
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    let purged = ledger.purge_finished(cutoff).await?;
    if reattached > 0 || purged > 0 {
        info!("장부 복구: 재연결 {reattached}건, 정리 {purged}건");
    }
    Ok((reattached, purged))
}

/// 모든 메트릭 종류의 변경 알림 구독
pub async fn observe_all(
    source: &dyn MetricSource,
) -> Result<mpsc::UnboundedReceiver<MetricKind>, CoreError> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in MetricKind::ALL {
        source.observe_changes(kind, tx.clone()).await?;
        debug!("{kind} 변경 알림 구독");
    }
    Ok(rx)
}

/// 합성 이력 선행 생성 (최대 7일, 15구간 단위)
pub fn seed_simulation(source: Arc<InMemoryMetricSource>, config: &AppConfig) -> SampleGenerator {
    let mut generator = SampleGenerator::new(source);
    let step = chrono::Duration::seconds(config.source.simulate_interval_secs.max(60) as i64);
    generator.seed_history(Utc::now(), config.sync.backfill_days.min(7), step * 15);
    generator
}

/// 합성 샘플 생성기 시작
pub fn start_simulation(
    source: Arc<InMemoryMetricSource>,
    config: &AppConfig,
    shutdown_rx: watch::Receiver<bool>,
) {
    let generator = seed_simulation(source, config);
    let interval = Duration::from_secs(config.source.simulate_interval_secs);
    tokio::spawn(generator.run(interval, shutdown_rx));
}

/// 전송 완료 이벤트를 앱 이벤트로 전달
pub fn forward_transfer_events(
    transport: &SnapshotTransport,
    events: Arc<EventBus>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut transfers = transport.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = transfers.recv() => match received {
                    Ok(event) => events.publish(AppEvent::Transfer(event)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("전송 이벤트 {n}개 누락");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
}
