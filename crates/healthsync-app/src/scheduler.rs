//! 동기화 스케줄러.
//!
//! `Disabled` → `Armed` → `Running` → (`Expiring`) → `Armed` 상태 기계.
//! 실행 예산이 부여되면 다음 실행을 먼저 다시 요청한 뒤 사이클을 돌리고,
//! 사이클 결과는 항상 성공/실패로 예산에 보고한다.
//!
//! 사이클은 한 번에 하나만 실행된다. 실행 중에 들어온 수동 실행이나
//! 데이터 변경 신호는 `SyncInProgress`로 거절된다(워터마크를 공유하므로).

use chrono::{DateTime, SubsecRound, Utc};
use healthsync_collector::collector::{MetricCollector, SnapshotBatch};
use healthsync_core::config::AppConfig;
use healthsync_core::error::CoreError;
use healthsync_core::models::metric::MetricKind;
use healthsync_core::models::snapshot::MetricSnapshot;
use healthsync_core::models::sync::{
    CycleOutcome, CycleReport, SchedulerState, SyncStatus, SyncTrigger, SyncWatermark,
    TransportMode,
};
use healthsync_core::ports::budget::{ExecutionBudget, ExecutionBudgetProvider};
use healthsync_core::ports::storage::SyncStateStore;
use healthsync_core::ports::transport::UploadTransport;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::budget::BudgetReceiver;
use crate::event_bus::{AppEvent, EventBus};

/// 스케줄러 설정
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 실행 요청 식별자
    pub task_identifier: String,
    /// 다음 실행 최소 대기
    pub interval: Duration,
}

impl SchedulerConfig {
    /// 앱 설정에서 생성
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            task_identifier: config.sync.task_identifier.clone(),
            interval: config.sync_interval(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default_config())
    }
}

/// 사이클 1회 실행 결과 (보고서 + 원인 에러)
struct CycleRun {
    report: CycleReport,
    error: Option<CoreError>,
}

/// 동기화 스케줄러
pub struct SyncScheduler {
    config: SchedulerConfig,
    collector: MetricCollector,
    transport: Arc<dyn UploadTransport>,
    store: Arc<dyn SyncStateStore>,
    provider: Arc<dyn ExecutionBudgetProvider>,
    events: Option<Arc<EventBus>>,
    state_tx: Arc<watch::Sender<SchedulerState>>,
    enabled: AtomicBool,
    /// 단일 사이클 보장
    cycle_lock: Mutex<()>,
    /// 스케줄링 실패 상태 문자열 (다음 사이클 종료 시 지워짐)
    schedule_note: SyncMutex<Option<String>>,
}

impl SyncScheduler {
    /// 새 스케줄러 생성: 상태는 [`Self::initialize`] 전까지 `Idle`
    pub fn new(
        config: SchedulerConfig,
        collector: MetricCollector,
        transport: Arc<dyn UploadTransport>,
        store: Arc<dyn SyncStateStore>,
        provider: Arc<dyn ExecutionBudgetProvider>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self {
            config,
            collector,
            transport,
            store,
            provider,
            events: None,
            state_tx: Arc::new(state_tx),
            enabled: AtomicBool::new(false),
            cycle_lock: Mutex::new(()),
            schedule_note: SyncMutex::new(None),
        }
    }

    /// 이벤트 버스 연결
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// 현재 상태
    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    /// 상태 변경 수신기
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    /// 동기화 활성 여부 (메모리 사본)
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: SchedulerState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!("스케줄러 상태: {previous} → {next}");
        }
    }

    /// 사이클 밖에서의 휴지 상태
    fn resting_state(&self) -> SchedulerState {
        if self.is_enabled() {
            SchedulerState::Armed
        } else {
            SchedulerState::Disabled
        }
    }

    fn publish(&self, event: AppEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// 영속 활성 플래그로 초기 상태 결정
    pub async fn initialize(&self) -> Result<SchedulerState, CoreError> {
        let enabled = self.store.is_sync_enabled().await?;
        self.enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.arm_next().await;
        }
        let state = self.resting_state();
        self.set_state(state);
        info!("스케줄러 초기화: {state}");
        Ok(state)
    }

    /// 동기화 활성화: `Disabled` → `Armed`
    pub async fn enable(&self) -> Result<(), CoreError> {
        self.store.set_sync_enabled(true).await?;
        self.enabled.store(true, Ordering::SeqCst);
        self.arm_next().await;
        if !matches!(
            self.state(),
            SchedulerState::Running | SchedulerState::Expiring
        ) {
            self.set_state(SchedulerState::Armed);
        }
        info!("동기화 활성화");
        Ok(())
    }

    /// 동기화 비활성화: 대기 중인 실행 요청도 철회
    pub async fn disable(&self) -> Result<(), CoreError> {
        self.store.set_sync_enabled(false).await?;
        self.enabled.store(false, Ordering::SeqCst);
        self.provider.cancel(&self.config.task_identifier).await;
        self.set_state(SchedulerState::Disabled);
        info!("동기화 비활성화");
        Ok(())
    }

    /// 다음 실행 요청. 실패해도 `Armed`를 유지하고 상태 문자열만 남긴다
    async fn arm_next(&self) {
        let identifier = &self.config.task_identifier;
        let earliest = Utc::now()
            + chrono::Duration::from_std(self.config.interval)
                .unwrap_or_else(|_| chrono::Duration::minutes(15));

        let Err(e) = self.provider.request_execution(identifier, earliest).await else {
            debug!("다음 실행 요청 완료: {earliest} 이후");
            return;
        };

        warn!("실행 요청 실패: {e}");
        *self.schedule_note.lock() = Some(e.to_string());
        self.publish(AppEvent::Error(e.to_string()));
    }

    /// 실행 예산 부여 처리
    ///
    /// 다음 실행을 먼저 다시 요청하고, 만료 핸들러를 등록한 뒤 사이클을 돌린다.
    /// 어떤 경우에도 예산에 성공/실패를 보고하며 에러를 밖으로 던지지 않는다.
    pub async fn on_execution_granted(&self, budget: ExecutionBudget) -> Option<CycleReport> {
        if !self.is_enabled() {
            debug!("비활성 상태에서 실행 예산 수신 - 즉시 종료");
            budget.mark_complete(true);
            return None;
        }

        self.arm_next().await;

        let state_tx = self.state_tx.clone();
        budget.on_expiring(move || {
            let moved = state_tx.send_if_modified(|state| {
                if *state == SchedulerState::Running {
                    *state = SchedulerState::Expiring;
                    true
                } else {
                    false
                }
            });
            if moved {
                warn!("실행 예산 만료 임박 - 사이클 중단");
            }
        });

        match self
            .run_cycle(SyncTrigger::Scheduled, Some(budget.expiry_token()))
            .await
        {
            Ok(run) => {
                budget.mark_complete(run.report.outcome.is_dispatched());
                Some(run.report)
            }
            Err(e) => {
                info!("예약 실행 건너뜀: {e}");
                budget.mark_complete(false);
                None
            }
        }
    }

    /// 수동 실행: 동기 전송, 사이클 에러는 호출자에게 전달
    pub async fn on_manual_trigger(&self) -> Result<CycleReport, CoreError> {
        let run = self.run_cycle(SyncTrigger::Manual, None).await?;
        match run.error {
            Some(e) => Err(e),
            None => Ok(run.report),
        }
    }

    /// 데이터 변경 신호: 활성 상태일 때만 백그라운드 전송으로 사이클 실행
    ///
    /// 비활성이면 `Ok(None)`. 사이클 실패는 상태 문자열로만 남는다.
    pub async fn on_data_change_signal(
        &self,
        kind: MetricKind,
    ) -> Result<Option<CycleReport>, CoreError> {
        if !self.is_enabled() {
            debug!("{kind} 변경 신호 무시 - 동기화 비활성");
            return Ok(None);
        }
        debug!("{kind} 변경 신호 - 사이클 시작");
        let run = self.run_cycle(SyncTrigger::DataChange, None).await?;
        Ok(Some(run.report))
    }

    /// 사이클 1회 실행
    ///
    /// 다른 사이클이 실행 중이면 `SyncInProgress`. 그 외 수집/전송 에러는
    /// 보고서의 결과로 기록되고 `CycleRun::error`로만 전달된다.
    async fn run_cycle(
        &self,
        trigger: SyncTrigger,
        expiry: Option<CancellationToken>,
    ) -> Result<CycleRun, CoreError> {
        let _guard = self.cycle_lock.try_lock().map_err(|_| {
            debug!("{trigger} 사이클 거절 - 이미 실행 중");
            CoreError::SyncInProgress
        })?;

        self.set_state(SchedulerState::Running);
        // 워터마크 저장 정밀도(마이크로초)
        let started_at = Utc::now().trunc_subsecs(6);
        info!("동기화 사이클 시작: {trigger}");

        let work = self.execute(trigger, started_at);
        let result = match expiry {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    result = work => Some(result),
                }
            }
            None => Some(work.await),
        };

        let (outcome, error) = match result {
            None => (CycleOutcome::Expired, None),
            Some(Ok((dispatched, failed))) => (CycleOutcome::Dispatched { dispatched, failed }, None),
            Some(Err(e)) => (CycleOutcome::Failed(e.to_string()), Some(e)),
        };

        self.finish_cycle(&outcome, started_at).await;

        let report = CycleReport {
            trigger,
            started_at,
            outcome,
        };
        self.publish(AppEvent::CycleFinished(report.clone()));
        self.set_state(self.resting_state());
        Ok(CycleRun { report, error })
    }

    /// 결과 기록: 누적 스냅샷을 넘겼으면 워터마크 전진
    ///
    /// 개별 샘플 실패는 집계만 하고 재시도하지 않는다. 워터마크가 그 샘플을 지나간다.
    async fn finish_cycle(&self, outcome: &CycleOutcome, started_at: DateTime<Utc>) {
        match outcome {
            CycleOutcome::Dispatched { .. } => {
                info!("동기화 사이클 완료: {}", outcome.status_text());
                if let Err(e) = self.store.set_watermark(SyncWatermark(started_at)).await {
                    error!("워터마크 저장 실패: {e}");
                }
            }
            CycleOutcome::Failed(reason) => error!("동기화 사이클 실패: {reason}"),
            CycleOutcome::Expired => warn!("동기화 사이클 만료로 중단"),
        }

        self.schedule_note.lock().take();
        if let Err(e) = self.store.record_sync(Utc::now(), &outcome.status_text()).await {
            error!("동기화 결과 저장 실패: {e}");
        }
    }

    /// 수집 후 전송. 누적 스냅샷 실패는 사이클 실패, 개별 샘플 실패는 집계만
    async fn execute(
        &self,
        trigger: SyncTrigger,
        started_at: DateTime<Utc>,
    ) -> Result<(usize, usize), CoreError> {
        let watermark = self.store.watermark().await?;
        let batch = self.collector.collect_at(watermark, started_at).await?;
        log_batch(&batch);

        let mode = trigger.transport_mode();
        let mut dispatched = 0usize;
        let mut failed = 0usize;

        for (index, snapshot) in batch.enumerate() {
            match self.dispatch(&snapshot, mode).await {
                Ok(()) => dispatched += 1,
                Err(e) if index == 0 => {
                    error!("누적 스냅샷 전송 실패: {e}");
                    return Err(e);
                }
                Err(e) => {
                    warn!("개별 샘플 스냅샷 전송 실패 ({:?}): {e}", snapshot.populated_fields());
                    failed += 1;
                }
            }
        }
        Ok((dispatched, failed))
    }

    async fn dispatch(&self, snapshot: &MetricSnapshot, mode: TransportMode) -> Result<(), CoreError> {
        match mode {
            TransportMode::Synchronous => self.transport.send_synchronous(snapshot).await,
            TransportMode::Durable => {
                let handle = self.transport.enqueue_durable(snapshot).await?;
                debug!(%handle, "스냅샷 백그라운드 전송 넘김");
                Ok(())
            }
        }
    }

    /// 최초 설치 이력 업로드: 성공 시 한 번만 실행
    ///
    /// 최근 `days_back`일의 모든 원시 샘플을 백그라운드 전송으로 넘긴다.
    /// 실패하면 완료 플래그를 남기지 않아 다음에 다시 시도한다. 워터마크는 건드리지 않는다.
    pub async fn backfill_history(&self, days_back: u32) -> Result<usize, CoreError> {
        if self.store.is_initial_upload_done().await? {
            info!("이력 업로드 이미 완료 - 건너뜀");
            return Ok(0);
        }

        let _guard = self
            .cycle_lock
            .try_lock()
            .map_err(|_| CoreError::SyncInProgress)?;
        self.set_state(SchedulerState::Running);

        let result = self.upload_history(days_back).await;
        self.set_state(self.resting_state());

        match result {
            Ok(uploaded) => {
                self.store.set_initial_upload_done(true).await?;
                self.store
                    .record_sync(Utc::now(), &format!("이력 업로드: 스냅샷 {uploaded}개 전송"))
                    .await?;
                info!("이력 업로드 완료: {uploaded}개");
                self.publish(AppEvent::BackfillFinished { uploaded });
                Ok(uploaded)
            }
            Err(e) => {
                error!("이력 업로드 실패: {e}");
                self.store
                    .record_sync(Utc::now(), &format!("이력 업로드 실패: {e}"))
                    .await?;
                Err(e)
            }
        }
    }

    async fn upload_history(&self, days_back: u32) -> Result<usize, CoreError> {
        let batch = self.collector.collect_history(days_back, Utc::now()).await?;
        let mut uploaded = 0;
        for snapshot in batch {
            self.transport.enqueue_durable(&snapshot).await?;
            uploaded += 1;
        }
        Ok(uploaded)
    }

    /// 표시 계층용 상태
    pub async fn status(&self) -> Result<SyncStatus, CoreError> {
        let (last_sync_at, persisted_status) = self.store.last_sync().await?;
        let last_sync_status = self
            .schedule_note
            .lock()
            .clone()
            .or(persisted_status)
            .unwrap_or_else(|| "아직 동기화하지 않음".to_string());

        Ok(SyncStatus {
            is_sync_enabled: self.store.is_sync_enabled().await?,
            last_sync_at,
            last_sync_status,
            is_constrained_environment: self.provider.is_constrained(),
            last_sent_at: self.store.last_sent_at().await?,
            state: self.state(),
            watermark: self.store.watermark().await?,
        })
    }

    /// 예산 부여와 데이터 변경 신호 처리 루프: 종료 신호까지 실행
    pub async fn run(
        self: Arc<Self>,
        mut grants: BudgetReceiver,
        mut changes: mpsc::UnboundedReceiver<MetricKind>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("동기화 스케줄러 시작 (상태: {})", self.state());
        loop {
            tokio::select! {
                Some(budget) = grants.recv() => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.on_execution_granted(budget).await;
                    });
                }
                Some(kind) = changes.recv() => {
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        match scheduler.on_data_change_signal(kind).await {
                            Ok(_) => {}
                            Err(CoreError::SyncInProgress) => {
                                debug!("{kind} 변경 신호 병합 - 실행 중인 사이클이 처리");
                            }
                            Err(e) => warn!("데이터 변경 처리 실패: {e}"),
                        }
                    });
                }
                changed = shutdown_rx.changed() => {
                    // 송신측이 사라져도 종료
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("동기화 스케줄러 종료");
                        break;
                    }
                }
            }
        }
    }
}

fn log_batch(batch: &SnapshotBatch) {
    for failure in batch.failures() {
        warn!("메트릭 제외: {failure}");
    }
    debug!(
        "수집 완료: {}개 스냅샷 (증분: {})",
        batch.len(),
        batch.mode().is_incremental()
    );
}
