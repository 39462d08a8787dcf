//! 주기 타이머 실행 예산 제공자.
//!
//! 플랫폼 백그라운드 스케줄러를 쓸 수 없는 환경에서 `ExecutionBudgetProvider`를
//! 대신한다. 요청마다 타이머를 걸고, 만료되면 실행 예산을 부여하며,
//! 실행 창 길이가 지나면 예산을 회수한다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use healthsync_core::ports::budget::{
    BudgetControl, ExecutionBudget, ExecutionBudgetProvider, SchedulingError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 부여된 예산 수신기
pub type BudgetReceiver = mpsc::UnboundedReceiver<ExecutionBudget>;

/// 주기 타이머 기반 실행 예산 제공자
///
/// 식별자당 대기 요청은 하나만 유지한다. 같은 식별자로 다시 요청하면
/// 이전 요청을 대체한다.
pub struct IntervalBudgetProvider {
    grants: mpsc::UnboundedSender<ExecutionBudget>,
    /// 타이머 최대 대기
    period: Duration,
    /// 부여한 예산의 실행 창 길이
    window: Duration,
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl IntervalBudgetProvider {
    /// 새 제공자와 예산 수신기 생성
    pub fn new(period: Duration, window: Duration) -> (Self, BudgetReceiver) {
        let (grants, rx) = mpsc::unbounded_channel();
        (
            Self {
                grants,
                period,
                window,
                pending: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    /// 대기 중인 요청 수
    pub fn pending_count(&self) -> usize {
        let mut pending = self.pending.lock();
        pending.retain(|_, task| !task.is_finished());
        pending.len()
    }

    /// 요청 시작까지 대기 시간: 타이머 주기를 넘지 않는다
    fn delay_until(&self, earliest_start: DateTime<Utc>) -> Duration {
        (earliest_start - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(self.period)
    }
}

/// 실행 창이 지나도록 결과 보고가 없으면 예산 회수
async fn watch_window(identifier: String, mut control: BudgetControl, window: Duration) {
    let expired = tokio::select! {
        outcome = control.outcome() => {
            debug!(%identifier, ?outcome, "실행 예산 결과 보고");
            false
        }
        _ = tokio::time::sleep(window) => true,
    };
    if expired {
        warn!(%identifier, "실행 창 종료 - 예산 회수");
        control.expire();
        let outcome = control.outcome().await;
        debug!(%identifier, ?outcome, "회수 후 결과 보고");
    }
}

#[async_trait]
impl ExecutionBudgetProvider for IntervalBudgetProvider {
    async fn request_execution(
        &self,
        identifier: &str,
        earliest_start: DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        if self.grants.is_closed() {
            return Err(SchedulingError::Unavailable);
        }

        let delay = self.delay_until(earliest_start);
        let grants = self.grants.clone();
        let window = self.window;
        let id = identifier.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let (budget, control) = ExecutionBudget::new(id.clone());
            if grants.send(budget).is_err() {
                warn!(identifier = %id, "예산 수신자 없음 - 부여 취소");
                return;
            }
            debug!(identifier = %id, "실행 예산 부여 (창 {window:?})");
            tokio::spawn(watch_window(id, control, window));
        });

        // 부여가 끝난 타이머는 대체해도 영향 없음
        if let Some(previous) = self.pending.lock().insert(identifier.to_string(), task) {
            if !previous.is_finished() {
                previous.abort();
                debug!(identifier, "이전 실행 요청 대체");
            }
        }
        info!(identifier, "다음 실행 요청: {delay:?} 후");
        Ok(())
    }

    async fn cancel(&self, identifier: &str) {
        if let Some(task) = self.pending.lock().remove(identifier) {
            task.abort();
            info!(identifier, "실행 요청 철회");
        }
    }

    fn is_constrained(&self) -> bool {
        true
    }
}
