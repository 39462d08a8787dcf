//! HEALTHSYNC 핵심 에러 타입.
//!
//! 모든 어댑터 crate는 이 타입을 그대로 반환하거나 `#[from]`으로 래핑한다.

use thiserror::Error;

use crate::models::metric::MetricKind;

/// 코어 레이어 에러.
/// 데이터 소스, 전송, 저장소, 설정 등 도메인 공통 에러를 정의한다.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 데이터 소스를 전혀 읽을 수 없음 (사이클 치명적)
    #[error("데이터 소스 사용 불가: {0}")]
    SourceUnavailable(String),

    /// 데이터 접근 권한 거부 (사이클 치명적, 자동 재시도 없음)
    #[error("데이터 접근 권한 거부: {0}")]
    AuthorizationDenied(String),

    /// 단일 메트릭 스트림 조회 실패 (스냅샷에서 제외, 사이클 계속)
    #[error("메트릭 조회 실패 - {kind}: {message}")]
    PartialMetricFailure {
        /// 실패한 메트릭 종류
        kind: MetricKind,
        /// 실패 사유
        message: String,
    },

    /// 네트워크/직렬화 전송 실패
    #[error("전송 실패: {0}")]
    Transport(String),

    /// 서버가 2xx 이외 상태 코드로 응답
    #[error("서버 거부 (status: {status}): {body}")]
    ServerRejection {
        /// HTTP 상태 코드
        status: u16,
        /// 응답 본문
        body: String,
    },

    /// 다른 동기화 사이클이 이미 실행 중
    #[error("동기화 사이클이 이미 실행 중")]
    SyncInProgress,

    /// 로컬 저장소 에러
    #[error("저장소 에러: {0}")]
    Storage(String),

    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 설정값 오류
    #[error("설정 에러: {0}")]
    Config(String),

    /// 필드 유효성 검증 실패
    #[error("유효성 검증 실패 - {field}: {message}")]
    Validation {
        /// 검증 실패한 필드명
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 리소스를 찾을 수 없음
    #[error("{resource_type} 미발견: {id}")]
    NotFound {
        /// 리소스 종류 (예: "UploadJob")
        resource_type: String,
        /// 리소스 식별자
        id: String,
    },

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),
}

impl CoreError {
    /// 사이클 전체를 중단시켜야 하는 에러인지 판별
    ///
    /// 메트릭 단위 실패는 해당 필드만 제외하고 계속 진행한다.
    pub fn is_cycle_fatal(&self) -> bool {
        !matches!(self, CoreError::PartialMetricFailure { .. })
    }

    /// 전송 경로에서 발생한 에러인지 판별
    pub fn is_delivery_failure(&self) -> bool {
        matches!(
            self,
            CoreError::Transport(_) | CoreError::ServerRejection { .. }
        )
    }
}
