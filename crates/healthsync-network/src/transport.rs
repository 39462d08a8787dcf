//! 스냅샷 전송 (UploadTransport 포트 구현).
//!
//! - 동기 전송: 요청 1건을 보내고 응답을 기다린다. 성공 시에만 마지막 전송 시각 기록.
//! - 백그라운드 전송: 스냅샷을 스풀 파일로 기록하고 작업 장부에 `pending`으로 남긴 뒤
//!   전송 채널에 넘긴다. 완료 통지는 [`SnapshotTransport::on_job_completed`]로 처리된다.
//!
//! 프로세스가 재시작되면 [`SnapshotTransport::reattach_pending`]으로 장부의
//! `pending` 작업을 다시 채널에 연결해 완료 통지를 잃지 않는다.

use async_trait::async_trait;
use chrono::Utc;
use healthsync_core::config::AppConfig;
use healthsync_core::error::CoreError;
use healthsync_core::models::snapshot::MetricSnapshot;
use healthsync_core::models::upload::{JobHandle, JobStatus, TransferEvent, UploadJobRecord};
use healthsync_core::ports::storage::{JobLedger, SyncStateStore};
use healthsync_core::ports::transport::UploadTransport;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::connectivity::ConnectivityManager;
use crate::http_client::HttpUploadClient;
use crate::transfer_channel::{
    CompletionReceiver, TransferChannel, TransferCompletion, TransferRequest, TransferSettings,
};

/// 완료 이벤트 브로드캐스트 버퍼
const EVENT_CAPACITY: usize = 64;

/// 전송 경로별 설정
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// 스풀 파일 디렉토리
    pub spool_dir: PathBuf,
    /// 동기 전송 타임아웃
    pub request_timeout: Duration,
    /// 헬스 체크 타임아웃
    pub health_timeout: Duration,
}

/// 스냅샷 전송: `UploadTransport` 포트 구현
pub struct SnapshotTransport {
    client: Arc<HttpUploadClient>,
    connectivity: Arc<ConnectivityManager>,
    channel: TransferChannel,
    state: Arc<dyn SyncStateStore>,
    ledger: Arc<dyn JobLedger>,
    options: TransportOptions,
    events: broadcast::Sender<TransferEvent>,
}

impl SnapshotTransport {
    /// 구성 요소를 직접 받아 생성
    pub fn new(
        client: Arc<HttpUploadClient>,
        connectivity: Arc<ConnectivityManager>,
        channel: TransferChannel,
        state: Arc<dyn SyncStateStore>,
        ledger: Arc<dyn JobLedger>,
        options: TransportOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            connectivity,
            channel,
            state,
            ledger,
            options,
            events,
        }
    }

    /// 앱 설정으로 클라이언트, 연결 관리자, 전송 채널까지 구성
    ///
    /// 반환된 완료 수신기는 [`Self::run_completion_listener`]에 넘겨야 한다.
    pub fn from_config(
        config: &AppConfig,
        spool_dir: PathBuf,
        state: Arc<dyn SyncStateStore>,
        ledger: Arc<dyn JobLedger>,
    ) -> Result<(Self, CompletionReceiver), CoreError> {
        let client = Arc::new(HttpUploadClient::new(&config.server.base_url)?);
        let connectivity = Arc::new(ConnectivityManager::default());
        let (channel, completions) = TransferChannel::spawn(
            client.clone(),
            connectivity.clone(),
            TransferSettings::from_config(config),
        );
        let options = TransportOptions {
            spool_dir,
            request_timeout: config.request_timeout(),
            health_timeout: config.health_timeout(),
        };
        Ok((
            Self::new(client, connectivity, channel, state, ledger, options),
            completions,
        ))
    }

    /// 완료 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    /// 연결 상태 관리자
    pub fn connectivity(&self) -> &Arc<ConnectivityManager> {
        &self.connectivity
    }

    /// 백그라운드 작업 완료 처리
    ///
    /// 성공이면 마지막 전송 시각을 기록하고 `Completed` 이벤트를 보낸다.
    /// 실패면 전송 시각은 건드리지 않고 에러 설명을 담은 `Failed` 이벤트를 보낸다.
    /// 어느 쪽이든 스풀 파일은 삭제된다. 이미 종료된 작업의 중복 통지는 무시한다.
    pub async fn on_job_completed(
        &self,
        handle: &JobHandle,
        outcome: Result<(), String>,
    ) -> Result<(), CoreError> {
        let record = self
            .ledger
            .get_job(handle)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                resource_type: "UploadJob".to_string(),
                id: handle.to_string(),
            })?;

        if record.status != JobStatus::Pending {
            debug!(%handle, status = record.status.as_str(), "이미 종료된 작업 - 통지 무시");
            return Ok(());
        }

        let now = Utc::now();
        let event = match outcome {
            Ok(()) => {
                self.state.set_last_sent_at(now).await?;
                self.ledger.mark_completed(handle, now).await?;
                info!(%handle, "백그라운드 전송 완료");
                TransferEvent::Completed {
                    handle: handle.clone(),
                    at: now,
                }
            }
            Err(error) => {
                self.ledger.mark_failed(handle, now, &error).await?;
                warn!(%handle, "백그라운드 전송 실패: {error}");
                TransferEvent::Failed {
                    handle: handle.clone(),
                    error,
                }
            }
        };

        remove_artifact(&record.artifact_path).await;

        if self.events.send(event).is_err() {
            debug!("완료 이벤트 구독자 없음");
        }
        Ok(())
    }

    /// 장부의 `pending` 작업을 전송 채널에 다시 연결
    ///
    /// 스풀 파일이 사라진 작업은 실패로 종료한다. 다시 연결한 작업 수를 반환.
    pub async fn reattach_pending(&self) -> Result<usize, CoreError> {
        // 파일 목록을 장부보다 먼저 읽는다 (행 기록이 파일 쓰기보다 앞서므로)
        let spooled = self.spooled_artifacts().await;
        let pending = self.ledger.pending_jobs().await?;
        self.sweep_unreferenced(spooled, &pending).await;
        let mut reattached = 0;

        for record in pending {
            if tokio::fs::try_exists(&record.artifact_path)
                .await
                .unwrap_or(false)
            {
                self.channel.submit(TransferRequest {
                    handle: record.handle.clone(),
                    artifact: record.artifact_path.clone(),
                })?;
                reattached += 1;
            } else {
                warn!(handle = %record.handle, "스풀 파일 없음 - 작업 실패 처리");
                self.on_job_completed(
                    &record.handle,
                    Err(format!(
                        "전송 파일 유실: {}",
                        record.artifact_path.display()
                    )),
                )
                .await?;
            }
        }

        if reattached > 0 {
            info!("대기 중인 백그라운드 작업 {reattached}건 재연결");
        }
        Ok(reattached)
    }

    /// 스풀 디렉토리의 전송 파일 목록
    async fn spooled_artifacts(&self) -> Vec<PathBuf> {
        let mut entries = match tokio::fs::read_dir(&self.options.spool_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("스풀 디렉토리 읽기 실패: {e}");
                return Vec::new();
            }
        };
        let mut paths = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths
    }

    /// 대기 중인 작업이 가리키지 않는 스풀 파일 삭제
    async fn sweep_unreferenced(&self, spooled: Vec<PathBuf>, pending: &[UploadJobRecord]) {
        let referenced: HashSet<&OsStr> = pending
            .iter()
            .filter_map(|record| record.artifact_path.file_name())
            .collect();
        let mut swept = 0;
        for path in spooled {
            let owned = path
                .file_name()
                .is_some_and(|name| referenced.contains(name));
            if !owned {
                remove_artifact(&path).await;
                swept += 1;
            }
        }
        if swept > 0 {
            info!("주인 없는 스풀 파일 {swept}개 정리");
        }
    }

    /// 완료 통지 처리 루프: 종료 신호까지 실행
    pub async fn run_completion_listener(
        self: Arc<Self>,
        mut completions: CompletionReceiver,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("백그라운드 전송 완료 리스너 시작");
        loop {
            tokio::select! {
                received = completions.recv() => {
                    let Some(TransferCompletion { handle, outcome }) = received else {
                        info!("전송 채널 종료 - 완료 리스너 종료");
                        break;
                    };
                    if let Err(e) = self.on_job_completed(&handle, outcome).await {
                        error!(%handle, "완료 통지 처리 실패: {e}");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("백그라운드 전송 완료 리스너 종료");
                        break;
                    }
                }
            }
        }
    }
}

async fn write_artifact(dir: &Path, path: &Path, body: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, body).await
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("스풀 파일 삭제: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("스풀 파일 삭제 실패 ({}): {e}", path.display()),
    }
}

#[async_trait]
impl UploadTransport for SnapshotTransport {
    async fn send_synchronous(&self, snapshot: &MetricSnapshot) -> Result<(), CoreError> {
        let body = snapshot.to_json_bytes()?;

        match self
            .client
            .post_snapshot(body, self.options.request_timeout)
            .await
        {
            Ok(()) => {
                self.connectivity.record_success();
                self.state.set_last_sent_at(Utc::now()).await?;
                Ok(())
            }
            Err(e) => {
                if matches!(e, CoreError::Transport(_)) {
                    self.connectivity.record_failure();
                }
                Err(e)
            }
        }
    }

    async fn enqueue_durable(&self, snapshot: &MetricSnapshot) -> Result<JobHandle, CoreError> {
        let body = snapshot.to_json_bytes()?;
        let handle = JobHandle::generate();
        let artifact = self.options.spool_dir.join(format!("{handle}.json"));

        // 장부 행이 스풀 파일보다 먼저 존재해야 한다
        self.ledger
            .insert_pending(&handle, &artifact, Utc::now())
            .await?;
        if let Err(e) = write_artifact(&self.options.spool_dir, &artifact, &body).await {
            self.ledger
                .mark_failed(&handle, Utc::now(), &e.to_string())
                .await?;
            return Err(e.into());
        }

        let request = TransferRequest {
            handle: handle.clone(),
            artifact: artifact.clone(),
        };
        if let Err(e) = self.channel.submit(request) {
            self.ledger
                .mark_failed(&handle, Utc::now(), &e.to_string())
                .await?;
            remove_artifact(&artifact).await;
            return Err(e);
        }

        debug!(%handle, bytes = body.len(), "백그라운드 전송 넘김");
        Ok(handle)
    }

    async fn test_connection(&self) -> bool {
        let reachable = self.client.probe_health(self.options.health_timeout).await;
        if reachable {
            self.connectivity.record_success();
        } else {
            self.connectivity.record_failure();
        }
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use healthsync_core::models::metric::MetricKind;
    use healthsync_core::models::snapshot::SyncMode;
    use healthsync_storage::sqlite::SqliteStorage;
    use std::path::Path;
    use tempfile::TempDir;

    struct Harness {
        transport: Arc<SnapshotTransport>,
        storage: Arc<SqliteStorage>,
        _spool: TempDir,
        completions: Option<CompletionReceiver>,
    }

    fn harness(base_url: &str) -> Harness {
        let spool = TempDir::new().unwrap();
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let mut config = AppConfig::default_config();
        config.server.base_url = base_url.to_string();
        config.server.request_timeout_ms = 2_000;
        config.server.health_timeout_ms = 2_000;
        config.sync.durable_max_retries = 0;

        let (transport, completions) = SnapshotTransport::from_config(
            &config,
            spool.path().join("spool"),
            storage.clone(),
            storage.clone(),
        )
        .unwrap();
        Harness {
            transport: Arc::new(transport),
            storage,
            _spool: spool,
            completions: Some(completions),
        }
    }

    fn snapshot() -> MetricSnapshot {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        MetricSnapshot::builder(SyncMode::Full, ts)
            .value(MetricKind::StepCount, Some(1200.0))
            .build()
    }

    async fn next_event(rx: &mut broadcast::Receiver<TransferEvent>) -> TransferEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn synchronous_success_records_last_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/health-data")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"stepCount":1200.0,"isIncremental":false}"#.to_string(),
            ))
            .with_status(200)
            .create_async()
            .await;
        let h = harness(&server.url());

        h.transport.send_synchronous(&snapshot()).await.unwrap();
        mock.assert_async().await;
        assert!(h.storage.last_sent_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn synchronous_rejection_leaves_last_sent_unchanged() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/health-data")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;
        let h = harness(&server.url());
        let before = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        h.storage.set_last_sent_at(before).await.unwrap();

        let err = h.transport.send_synchronous(&snapshot()).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::ServerRejection { status: 503, ref body } if body == "overloaded"
        ));
        assert_eq!(h.storage.last_sent_at().await.unwrap(), Some(before));
    }

    #[tokio::test]
    async fn connection_test_against_unreachable_host_is_false_twice() {
        let h = harness("http://127.0.0.1:1");
        assert!(!h.transport.test_connection().await);
        assert!(!h.transport.test_connection().await);
    }

    #[tokio::test]
    async fn durable_send_completes_through_listener() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/health-data")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let mut h = harness(&server.url());
        let mut events = h.transport.subscribe();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(
            h.transport
                .clone()
                .run_completion_listener(h.completions.take().unwrap(), shutdown_rx),
        );

        let handle = h.transport.enqueue_durable(&snapshot()).await.unwrap();

        match next_event(&mut events).await {
            TransferEvent::Completed { handle: done, .. } => assert_eq!(done, handle),
            other => panic!("Completed 예상, 실제: {other:?}"),
        }
        mock.assert_async().await;

        let record = h.storage.get_job(&handle).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(!record.artifact_path.exists());
        assert!(h.storage.last_sent_at().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn completion_success_updates_timestamp_and_emits_event() {
        let h = harness("http://127.0.0.1:1");
        let mut events = h.transport.subscribe();
        let handle = JobHandle::generate();
        let artifact = h._spool.path().join("manual.json");
        std::fs::write(&artifact, b"{}").unwrap();
        h.storage
            .insert_pending(&handle, &artifact, Utc::now())
            .await
            .unwrap();

        h.transport.on_job_completed(&handle, Ok(())).await.unwrap();

        assert!(matches!(
            next_event(&mut events).await,
            TransferEvent::Completed { .. }
        ));
        assert!(h.storage.last_sent_at().await.unwrap().is_some());
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn completion_failure_keeps_timestamp_and_carries_error() {
        let h = harness("http://127.0.0.1:1");
        let mut events = h.transport.subscribe();
        let handle = JobHandle::generate();
        h.storage
            .insert_pending(&handle, Path::new("/nonexistent/f.json"), Utc::now())
            .await
            .unwrap();

        h.transport
            .on_job_completed(&handle, Err("network connection lost".to_string()))
            .await
            .unwrap();

        match next_event(&mut events).await {
            TransferEvent::Failed { handle: failed, error } => {
                assert_eq!(failed, handle);
                assert_eq!(error, "network connection lost");
            }
            other => panic!("Failed 예상, 실제: {other:?}"),
        }
        assert!(h.storage.last_sent_at().await.unwrap().is_none());
        let record = h.storage.get_job(&handle).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn duplicate_completion_is_ignored() {
        let h = harness("http://127.0.0.1:1");
        let handle = JobHandle::generate();
        h.storage
            .insert_pending(&handle, Path::new("/nonexistent/g.json"), Utc::now())
            .await
            .unwrap();

        h.transport
            .on_job_completed(&handle, Err("timeout".to_string()))
            .await
            .unwrap();
        h.transport.on_job_completed(&handle, Ok(())).await.unwrap();

        let record = h.storage.get_job(&handle).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(h.storage.last_sent_at().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_handle_is_not_found() {
        let h = harness("http://127.0.0.1:1");
        let result = h
            .transport
            .on_job_completed(&JobHandle::generate(), Ok(()))
            .await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn reattach_resubmits_pending_and_fails_orphans() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/health-data")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let mut h = harness(&server.url());
        let mut events = h.transport.subscribe();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(
            h.transport
                .clone()
                .run_completion_listener(h.completions.take().unwrap(), shutdown_rx),
        );

        let survivor = JobHandle::generate();
        let artifact = h._spool.path().join("survivor.json");
        std::fs::write(&artifact, snapshot().to_json_bytes().unwrap()).unwrap();
        h.storage
            .insert_pending(&survivor, &artifact, Utc::now())
            .await
            .unwrap();
        let orphan = JobHandle::generate();
        h.storage
            .insert_pending(&orphan, Path::new("/nonexistent/orphan.json"), Utc::now())
            .await
            .unwrap();

        assert_eq!(h.transport.reattach_pending().await.unwrap(), 1);

        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(next_event(&mut events).await);
        }
        assert!(seen.iter().any(|e| matches!(
            e,
            TransferEvent::Failed { handle, .. } if *handle == orphan
        )));
        assert!(seen.iter().any(|e| matches!(
            e,
            TransferEvent::Completed { handle, .. } if *handle == survivor
        )));
        mock.assert_async().await;
        assert!(h.storage.pending_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reattach_sweeps_unreferenced_spool_files() {
        let h = harness("http://127.0.0.1:1");
        let spool_dir = h._spool.path().join("spool");
        std::fs::create_dir_all(&spool_dir).unwrap();

        let stray = spool_dir.join(format!("{}.json", JobHandle::generate()));
        std::fs::write(&stray, b"{}").unwrap();
        let notes = spool_dir.join("README.txt");
        std::fs::write(&notes, b"keep").unwrap();

        let kept = JobHandle::generate();
        let artifact = spool_dir.join(format!("{kept}.json"));
        std::fs::write(&artifact, snapshot().to_json_bytes().unwrap()).unwrap();
        h.storage
            .insert_pending(&kept, &artifact, Utc::now())
            .await
            .unwrap();

        assert_eq!(h.transport.reattach_pending().await.unwrap(), 1);
        assert!(!stray.exists());
        assert!(artifact.exists());
        assert!(notes.exists());
    }

    #[tokio::test]
    async fn failed_spool_write_leaves_no_pending_row() {
        let h = harness("http://127.0.0.1:1");
        // 스풀 경로를 일반 파일로 막아 디렉토리 생성 실패
        std::fs::write(h._spool.path().join("spool"), b"").unwrap();

        let result = h.transport.enqueue_durable(&snapshot()).await;
        assert!(matches!(result, Err(CoreError::Io(_))));
        assert!(h.storage.pending_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_listener_stops_when_shutdown_sender_is_dropped() {
        let mut h = harness("http://127.0.0.1:1");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = tokio::spawn(
            h.transport
                .clone()
                .run_completion_listener(h.completions.take().unwrap(), shutdown_rx),
        );

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
