//! 애플리케이션 설정 구조체.
//!
//! 서버 URL, 전송 타임아웃, 동기화 주기, 저장소 경로, 시뮬레이션 소스 설정 등
//! 런타임 설정을 정의한다. `ConfigManager`를 통해 JSON 파일에서 로드.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 서버 연결 설정
    pub server: ServerConfig,
    /// 동기화 스케줄 설정
    #[serde(default)]
    pub sync: SyncConfig,
    /// 로컬 저장소 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// 시뮬레이션 데이터 소스 설정
    #[serde(default)]
    pub source: SourceConfig,
}

// ============================================================
// 서버 설정
// ============================================================

/// 서버 연결 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 수집 서버 기본 URL (예: "http://192.168.0.10:8000")
    pub base_url: String,
    /// 동기 전송 타임아웃 (밀리초): 백그라운드 전송보다 짧아야 함
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// 백그라운드 전송 타임아웃 (밀리초)
    #[serde(default = "default_durable_timeout_ms")]
    pub durable_timeout_ms: u64,
    /// 헬스 체크 타임아웃 (밀리초)
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,
}

// ============================================================
// 동기화 설정
// ============================================================

/// 동기화 스케줄 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 실행 요청 식별자
    #[serde(default = "default_task_identifier")]
    pub task_identifier: String,
    /// 다음 실행 최소 대기 (초)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// 제한 환경 대체 타이머 주기 (초)
    #[serde(default = "default_constrained_interval_secs")]
    pub constrained_interval_secs: u64,
    /// 대체 타이머가 부여하는 실행 창 길이 (초)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// 최초 이력 업로드 기간 (일)
    #[serde(default = "default_backfill_days")]
    pub backfill_days: u32,
    /// 백그라운드 전송 최대 재시도 횟수
    #[serde(default = "default_durable_max_retries")]
    pub durable_max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            task_identifier: default_task_identifier(),
            interval_secs: default_interval_secs(),
            constrained_interval_secs: default_constrained_interval_secs(),
            window_secs: default_window_secs(),
            backfill_days: default_backfill_days(),
            durable_max_retries: default_durable_max_retries(),
        }
    }
}

// ============================================================
// 저장소/소스 설정
// ============================================================

/// 로컬 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite DB 파일 경로 (None이면 플랫폼 기본 경로)
    pub db_path: Option<PathBuf>,
    /// 백그라운드 전송 임시 파일 디렉토리 (None이면 데이터 디렉토리 아래 `spool`)
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
    /// 종료된 작업 장부 보존 기간 (일)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            spool_dir: None,
            retention_days: default_retention_days(),
        }
    }
}

/// 시뮬레이션 데이터 소스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// 시뮬레이션 소스 사용 여부
    #[serde(default = "default_true")]
    pub simulate: bool,
    /// 합성 샘플 생성 주기 (초)
    #[serde(default = "default_simulate_interval_secs")]
    pub simulate_interval_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            simulate: true,
            simulate_interval_secs: default_simulate_interval_secs(),
        }
    }
}

// ============================================================
// AppConfig impl
// ============================================================

impl AppConfig {
    /// 기본 설정값 반환
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig {
                base_url: "http://localhost:8000".to_string(),
                request_timeout_ms: default_request_timeout_ms(),
                durable_timeout_ms: default_durable_timeout_ms(),
                health_timeout_ms: default_health_timeout_ms(),
            },
            sync: SyncConfig::default(),
            storage: StorageConfig::default(),
            source: SourceConfig::default(),
        }
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<(), CoreError> {
        let url = url::Url::parse(&self.server.base_url).map_err(|e| {
            CoreError::Config(format!("잘못된 서버 URL '{}': {e}", self.server.base_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::Config(format!(
                "지원하지 않는 URL 스킴: {}",
                url.scheme()
            )));
        }
        if self.server.request_timeout_ms == 0 || self.server.health_timeout_ms == 0 {
            return Err(CoreError::Config("타임아웃은 0보다 커야 함".to_string()));
        }
        if self.server.request_timeout_ms >= self.server.durable_timeout_ms {
            return Err(CoreError::Config(format!(
                "동기 전송 타임아웃({}ms)은 백그라운드 전송 타임아웃({}ms)보다 짧아야 함",
                self.server.request_timeout_ms, self.server.durable_timeout_ms
            )));
        }
        if self.sync.interval_secs == 0
            || self.sync.constrained_interval_secs == 0
            || self.sync.window_secs == 0
        {
            return Err(CoreError::Config("동기화 주기는 0보다 커야 함".to_string()));
        }
        if self.source.simulate_interval_secs == 0 {
            return Err(CoreError::Config("샘플 생성 주기는 0보다 커야 함".to_string()));
        }
        Ok(())
    }

    /// 동기 전송 타임아웃
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    /// 백그라운드 전송 타임아웃
    pub fn durable_timeout(&self) -> Duration {
        Duration::from_millis(self.server.durable_timeout_ms)
    }

    /// 헬스 체크 타임아웃
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.server.health_timeout_ms)
    }

    /// 다음 실행 최소 대기
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    /// 제한 환경 대체 타이머 주기
    pub fn constrained_interval(&self) -> Duration {
        Duration::from_secs(self.sync.constrained_interval_secs)
    }

    /// 대체 타이머 실행 창 길이
    pub fn execution_window(&self) -> Duration {
        Duration::from_secs(self.sync.window_secs)
    }
}

// ============================================================
// 기본값 함수
// ============================================================

fn default_true() -> bool {
    true
}

fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_durable_timeout_ms() -> u64 {
    300_000
}
fn default_health_timeout_ms() -> u64 {
    10_000
}
fn default_task_identifier() -> String {
    "healthsync.metric-sync".to_string()
}
fn default_interval_secs() -> u64 {
    15 * 60
}
fn default_constrained_interval_secs() -> u64 {
    30
}
fn default_window_secs() -> u64 {
    30
}
fn default_backfill_days() -> u32 {
    30
}
fn default_durable_max_retries() -> u32 {
    5
}
fn default_retention_days() -> u32 {
    7
}
fn default_simulate_interval_secs() -> u64 {
    60
}
