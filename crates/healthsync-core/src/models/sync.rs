//! 동기화 상태 모델.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 스케줄러 상태
///
/// `Disabled` → `Armed` → `Running` → (`Expiring`) → `Armed` 순환.
/// `Idle`은 활성화 여부를 아직 확인하지 않은 시작 직후 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// 스케줄링 비활성
    Disabled,
    /// 다음 실행 요청 후 실행 창 대기
    Armed,
    /// 실행 창 안에서 사이클 진행 중
    Running,
    /// 실행 예산 소진 임박 신호 수신
    Expiring,
    /// 초기화 전
    Idle,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Disabled => "disabled",
            SchedulerState::Armed => "armed",
            SchedulerState::Running => "running",
            SchedulerState::Expiring => "expiring",
            SchedulerState::Idle => "idle",
        };
        f.write_str(s)
    }
}

/// 전달 완료 경계 시각: 이 시각까지의 데이터는 전송됨
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncWatermark(pub DateTime<Utc>);

impl SyncWatermark {
    /// 경계 시각
    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }
}

/// 전송 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// 응답을 기다리는 즉시 전송 (포그라운드)
    Synchronous,
    /// 백그라운드 전송 채널에 넘기고 완료는 나중에 통지
    Durable,
}

/// 사이클 시작 원인
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// 실행 창 부여 (타이머/플랫폼 스케줄러)
    Scheduled,
    /// 사용자 수동 요청
    Manual,
    /// 데이터 소스 변경 알림
    DataChange,
}

impl SyncTrigger {
    /// 트리거별 전송 모드: 수동 요청만 동기 전송
    pub fn transport_mode(self) -> TransportMode {
        match self {
            SyncTrigger::Manual => TransportMode::Synchronous,
            SyncTrigger::Scheduled | SyncTrigger::DataChange => TransportMode::Durable,
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncTrigger::Scheduled => "scheduled",
            SyncTrigger::Manual => "manual",
            SyncTrigger::DataChange => "data_change",
        };
        f.write_str(s)
    }
}

/// 사이클 종료 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 모든 스냅샷을 넘김 (개별 샘플 실패 수 포함)
    Dispatched {
        /// 넘긴 스냅샷 수
        dispatched: usize,
        /// 실패한 개별 샘플 스냅샷 수
        failed: usize,
    },
    /// 사이클 실패: 남은 작업 중단
    Failed(String),
    /// 실행 예산 만료로 중단
    Expired,
}

impl CycleOutcome {
    /// 워터마크 전진 대상 여부
    pub fn is_dispatched(&self) -> bool {
        matches!(self, CycleOutcome::Dispatched { .. })
    }

    /// 사람이 읽는 상태 문자열
    pub fn status_text(&self) -> String {
        match self {
            CycleOutcome::Dispatched {
                dispatched,
                failed: 0,
            } => format!("성공: 스냅샷 {dispatched}개 전송"),
            CycleOutcome::Dispatched { dispatched, failed } => {
                format!("부분 성공: 스냅샷 {dispatched}개 전송, {failed}개 실패")
            }
            CycleOutcome::Failed(reason) => format!("실패: {reason}"),
            CycleOutcome::Expired => "실패: 실행 시간 만료로 중단".to_string(),
        }
    }
}

/// 사이클 보고서
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// 시작 원인
    pub trigger: SyncTrigger,
    /// 수집 시작 시각 (워터마크 후보)
    pub started_at: DateTime<Utc>,
    /// 결과
    pub outcome: CycleOutcome,
}

/// 표시 계층에 노출하는 영속 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// 동기화 활성 여부
    pub is_sync_enabled: bool,
    /// 마지막 사이클 종료 시각
    pub last_sync_at: Option<DateTime<Utc>>,
    /// 마지막 사이클 결과 문자열
    pub last_sync_status: String,
    /// 백그라운드 실행 불가 환경 여부
    pub is_constrained_environment: bool,
    /// 마지막 전송 성공 시각
    pub last_sent_at: Option<DateTime<Utc>>,
    /// 현재 스케줄러 상태
    pub state: SchedulerState,
    /// 현재 워터마크
    pub watermark: Option<SyncWatermark>,
}
