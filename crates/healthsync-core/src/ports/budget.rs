//! 실행 예산 포트.
//!
//! 백그라운드에서는 환경이 짧고 예측 불가능한 실행 창만 허용한다.
//! 스케줄러는 이 trait에만 의존하며, 플랫폼 스케줄러 래퍼와
//! 주기 타이머 대체 구현의 선택은 조립 지점(main)에서만 일어난다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// 실행 요청 실패 사유
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    /// 백그라운드 실행 기능 비활성
    #[error("백그라운드 앱 새로고침이 비활성화됨")]
    Unavailable,
    /// 대기 중인 요청 과다
    #[error("너무 많은 대기 중인 작업")]
    TooManyPending,
    /// 권한 없음
    #[error("백그라운드 작업 권한 없음")]
    NotPermitted,
    /// 기타
    #[error("백그라운드 동기화 예약 실패: {0}")]
    Other(String),
}

/// 실행 예산 제공자
#[async_trait]
pub trait ExecutionBudgetProvider: Send + Sync {
    /// 1회 실행 요청: 나중에 [`ExecutionBudget`]이 부여된다
    async fn request_execution(
        &self,
        identifier: &str,
        earliest_start: DateTime<Utc>,
    ) -> Result<(), SchedulingError>;

    /// 대기 중인 요청 철회 (best-effort)
    async fn cancel(&self, identifier: &str);

    /// 백그라운드 실행이 제한된 환경인지
    fn is_constrained(&self) -> bool;
}

/// 부여된 실행 예산
///
/// 만료 신호는 [`CancellationToken`]으로 전달되고, 결과는 반드시
/// [`ExecutionBudget::mark_complete`]로 보고한다. 보고 없이 drop되면 실패로 보고된다.
#[derive(Debug)]
pub struct ExecutionBudget {
    identifier: String,
    expiry: CancellationToken,
    finished: CancellationToken,
    completion: Option<oneshot::Sender<bool>>,
}

/// 예산을 부여한 쪽이 쥐는 제어 핸들
#[derive(Debug)]
pub struct BudgetControl {
    expiry: CancellationToken,
    completion: oneshot::Receiver<bool>,
    received: bool,
}

impl ExecutionBudget {
    /// 새 예산과 제어 핸들 생성
    pub fn new(identifier: impl Into<String>) -> (Self, BudgetControl) {
        let expiry = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let budget = Self {
            identifier: identifier.into(),
            expiry: expiry.clone(),
            finished: CancellationToken::new(),
            completion: Some(tx),
        };
        (
            budget,
            BudgetControl {
                expiry,
                completion: rx,
                received: false,
            },
        )
    }

    /// 작업 식별자
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// 만료 토큰: 사이클의 모든 대기 지점에서 select 대상
    pub fn expiry_token(&self) -> CancellationToken {
        self.expiry.clone()
    }

    /// 만료 여부
    pub fn is_expired(&self) -> bool {
        self.expiry.is_cancelled()
    }

    /// 만료 임박 핸들러 등록
    ///
    /// 예산이 완료되기 전에 만료되면 한 번 호출된다.
    pub fn on_expiring<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let expiry = self.expiry.clone();
        let finished = self.finished.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = finished.cancelled() => {}
                _ = expiry.cancelled() => handler(),
            }
        });
    }

    /// 결과 보고
    pub fn mark_complete(mut self, success: bool) {
        self.report(success);
    }

    fn report(&mut self, success: bool) {
        self.finished.cancel();
        if let Some(tx) = self.completion.take() {
            // 제공자가 이미 관심을 끊었으면 무시
            let _ = tx.send(success);
        }
    }
}

impl Drop for ExecutionBudget {
    fn drop(&mut self) {
        if self.completion.is_some() {
            tracing::warn!(identifier = %self.identifier, "결과 보고 없이 실행 예산 해제 - 실패로 보고");
            self.report(false);
        }
    }
}

impl BudgetControl {
    /// 예산 회수 (만료 신호)
    pub fn expire(&self) {
        self.expiry.cancel();
    }

    /// 결과 보고 대기. 예산이 보고 없이 사라지면 `None`
    ///
    /// 결과를 받은 뒤 다시 호출하면 `None`.
    pub async fn outcome(&mut self) -> Option<bool> {
        if self.received {
            return None;
        }
        let result = (&mut self.completion).await.ok();
        self.received = true;
        result
    }
}
