//! 연결 상태 관리.
//!
//! 헬스 체크 결과와 전송 결과로 서버 도달 가능 여부를 추적한다.
//! 백그라운드 전송 채널은 오프라인 동안 재시도 횟수를 소모하지 않고
//! [`ConnectivityManager::wait_until_online`]에서 대기한다.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// 연결됨
    Connected,
    /// 연결 끊김
    Disconnected,
    /// 실패가 누적 중이지만 아직 임계값 미만
    Reconnecting,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

/// 연결 상태 관리자
pub struct ConnectivityManager {
    is_online: AtomicBool,
    /// 마지막 성공 시각 (Unix timestamp)
    last_success: AtomicU64,
    failure_count: AtomicU64,
    status_tx: watch::Sender<ConnectionStatus>,
    /// 이 횟수만큼 연속 실패하면 오프라인 전환
    offline_threshold: u64,
}

impl ConnectivityManager {
    /// 새 연결 관리자 생성
    pub fn new(offline_threshold: u64) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Connected);
        Self {
            is_online: AtomicBool::new(true),
            last_success: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            status_tx,
            offline_threshold: offline_threshold.max(1),
        }
    }

    /// 현재 온라인 상태
    pub fn is_online(&self) -> bool {
        self.is_online.load(Ordering::Relaxed)
    }

    /// 현재 연결 상태
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// 상태 변경 수신기 생성
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// 연결 성공 기록: 온라인 전환, 실패 카운터 리셋
    pub fn record_success(&self) {
        let was_offline = !self.is_online.swap(true, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        self.last_success.store(unix_now(), Ordering::Relaxed);

        if was_offline {
            info!("서버 연결 복구됨 - 대기 중인 전송 재개");
        }
        self.status_tx.send_if_modified(|status| {
            let changed = *status != ConnectionStatus::Connected;
            *status = ConnectionStatus::Connected;
            changed
        });
    }

    /// 연결 실패 기록: 임계값 도달 시 오프라인 전환
    pub fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("연결 실패 기록 (연속 {count}회)");

        let next = if count >= self.offline_threshold {
            if self.is_online.swap(false, Ordering::Relaxed) {
                warn!("연속 {count}회 실패 - 오프라인 전환 (백그라운드 전송 대기)");
            }
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Reconnecting
        };
        self.status_tx.send_if_modified(|status| {
            let changed = *status != next;
            *status = next;
            changed
        });
    }

    /// 연속 실패 횟수
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// 마지막 성공 이후 경과 시간 (성공 기록이 없으면 0)
    pub fn time_since_last_success(&self) -> Duration {
        let last = self.last_success.load(Ordering::Relaxed);
        if last == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs(unix_now().saturating_sub(last))
    }

    /// 온라인이 될 때까지 대기
    ///
    /// `probe_interval`마다 `probe`를 호출해 결과를 기록한다.
    /// 다른 경로(동기 전송 등)의 성공으로 온라인이 되어도 즉시 깨어난다.
    pub async fn wait_until_online<F, Fut>(&self, probe_interval: Duration, mut probe: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let mut rx = self.subscribe();
        while !self.is_online() {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(probe_interval) => {
                    if probe().await {
                        self.record_success();
                    } else {
                        debug!("오프라인 유지 - {probe_interval:?} 후 재확인");
                    }
                }
            }
        }
    }
}

impl Default for ConnectivityManager {
    fn default() -> Self {
        Self::new(3)
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
