//! 백그라운드 전송 채널.
//!
//! 디스크에 기록된 스냅샷 파일을 받아 독립 태스크로 업로드한다.
//! 넘기기(submit)는 즉시 반환되고, 결과는 나중에 완료 수신기로 통지된다.
//! 오프라인이면 연결 복구까지 대기하며, 실패는 exponential backoff
//! (1s → 2s → … 최대 30s)로 설정된 횟수만큼 재시도한 뒤 보고한다.

use healthsync_core::config::AppConfig;
use healthsync_core::error::CoreError;
use healthsync_core::models::upload::JobHandle;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connectivity::ConnectivityManager;
use crate::http_client::{is_retryable, HttpUploadClient};

/// 채널에 넘기는 전송 요청
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// 작업 핸들
    pub handle: JobHandle,
    /// 직렬화된 스냅샷 파일
    pub artifact: PathBuf,
}

/// 전송 완료 통지
#[derive(Debug, Clone)]
pub struct TransferCompletion {
    /// 작업 핸들
    pub handle: JobHandle,
    /// 결과 (실패 시 에러 설명)
    pub outcome: Result<(), String>,
}

/// 완료 통지 수신기
pub type CompletionReceiver = mpsc::UnboundedReceiver<TransferCompletion>;

/// 전송 채널 동작 설정
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// 요청 1건 타임아웃
    pub request_timeout: Duration,
    /// 재시도 횟수 (최초 시도 제외)
    pub max_retries: u32,
    /// 첫 재시도 대기
    pub initial_backoff: Duration,
    /// 재시도 대기 상한
    pub max_backoff: Duration,
    /// 오프라인 중 헬스 체크 주기
    pub probe_interval: Duration,
    /// 헬스 체크 타임아웃
    pub probe_timeout: Duration,
}

impl TransferSettings {
    /// 앱 설정에서 생성
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            request_timeout: config.durable_timeout(),
            max_retries: config.sync.durable_max_retries,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            probe_interval: Duration::from_secs(30),
            probe_timeout: config.health_timeout(),
        }
    }
}

/// 전송 채널 핸들: 복제해서 여러 곳에서 넘길 수 있다
#[derive(Clone)]
pub struct TransferChannel {
    tx: mpsc::UnboundedSender<TransferRequest>,
}

impl TransferChannel {
    /// 워커를 띄우고 채널과 완료 수신기를 반환
    ///
    /// 모든 `TransferChannel` 복제본이 drop되면 워커가 종료된다.
    /// 이미 시작된 전송은 끝까지 진행된다.
    pub fn spawn(
        client: Arc<HttpUploadClient>,
        connectivity: Arc<ConnectivityManager>,
        settings: TransferSettings,
    ) -> (Self, CompletionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let worker = Arc::new(TransferWorker {
            client,
            connectivity,
            settings,
            completions: done_tx,
        });
        tokio::spawn(worker.run(rx));

        (Self { tx }, done_rx)
    }

    /// 전송 요청 넘기기: 수락 즉시 반환
    pub fn submit(&self, request: TransferRequest) -> Result<(), CoreError> {
        let handle = request.handle.clone();
        self.tx
            .send(request)
            .map_err(|_| CoreError::Transport(format!("전송 채널 닫힘: {handle}")))?;
        debug!(%handle, "전송 채널에 넘김");
        Ok(())
    }
}

struct TransferWorker {
    client: Arc<HttpUploadClient>,
    connectivity: Arc<ConnectivityManager>,
    settings: TransferSettings,
    completions: mpsc::UnboundedSender<TransferCompletion>,
}

impl TransferWorker {
    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<TransferRequest>) {
        info!("백그라운드 전송 채널 시작");
        while let Some(request) = rx.recv().await {
            let worker = self.clone();
            tokio::spawn(async move {
                let outcome = worker.transfer(&request).await;
                let completion = TransferCompletion {
                    handle: request.handle,
                    outcome,
                };
                if worker.completions.send(completion).is_err() {
                    warn!("완료 수신기 없음 - 통지 유실 (장부 pending 유지)");
                }
            });
        }
        info!("백그라운드 전송 채널 종료");
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<(), String> {
        let body = tokio::fs::read(&request.artifact).await.map_err(|e| {
            format!(
                "전송 파일 읽기 실패 ({}): {e}",
                request.artifact.display()
            )
        })?;

        let mut delay = self.settings.initial_backoff;
        let mut attempt = 0u32;
        loop {
            self.connectivity
                .wait_until_online(self.settings.probe_interval, move || {
                    self.client.probe_health(self.settings.probe_timeout)
                })
                .await;

            match self
                .client
                .post_snapshot(body.clone(), self.settings.request_timeout)
                .await
            {
                Ok(()) => {
                    self.connectivity.record_success();
                    debug!(handle = %request.handle, attempt, "백그라운드 전송 성공");
                    return Ok(());
                }
                Err(e) => {
                    if matches!(e, CoreError::Transport(_)) {
                        self.connectivity.record_failure();
                    } else {
                        self.connectivity.record_success();
                    }

                    if !is_retryable(&e) || attempt >= self.settings.max_retries {
                        error!(handle = %request.handle, "백그라운드 전송 최종 실패: {e}");
                        return Err(e.to_string());
                    }

                    attempt += 1;
                    warn!(
                        handle = %request.handle,
                        "백그라운드 전송 실패 (시도 {}/{}): {e}, {delay:?} 후 재시도",
                        attempt,
                        self.settings.max_retries + 1
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.settings.max_backoff);
                }
            }
        }
    }
}
