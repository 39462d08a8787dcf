//! 업로드 작업 모델.
//!
//! 백그라운드 전송 채널에 넘긴 작업의 핸들, 장부 레코드, 완료 이벤트.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::CoreError;

/// 백그라운드 전송 작업 핸들: 나중에 도착하는 완료 통지와 짝을 맞추는 키
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    /// 새 핸들 발급
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// 문자열 표현
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 작업 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// 전송 채널에 넘김, 완료 대기
    Pending,
    /// 전송 성공
    Completed,
    /// 전송 실패
    Failed,
}

impl JobStatus {
    /// 저장소 표현
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(CoreError::Validation {
                field: "status".to_string(),
                message: format!("알 수 없는 작업 상태: {other}"),
            }),
        }
    }
}

/// 작업 장부 레코드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJobRecord {
    /// 작업 핸들
    pub handle: JobHandle,
    /// 직렬화된 스냅샷 임시 파일 경로
    pub artifact_path: PathBuf,
    /// 상태
    pub status: JobStatus,
    /// 넘긴 시각
    pub created_at: DateTime<Utc>,
    /// 종료 시각
    pub finished_at: Option<DateTime<Utc>>,
    /// 실패 사유
    pub error: Option<String>,
}

/// 백그라운드 전송 완료 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// 전송 성공
    Completed {
        /// 작업 핸들
        handle: JobHandle,
        /// 완료 시각
        at: DateTime<Utc>,
    },
    /// 전송 실패
    Failed {
        /// 작업 핸들
        handle: JobHandle,
        /// 에러 설명
        error: String,
    },
}

impl TransferEvent {
    /// 이벤트 대상 핸들
    pub fn handle(&self) -> &JobHandle {
        match self {
            TransferEvent::Completed { handle, .. } | TransferEvent::Failed { handle, .. } => {
                handle
            }
        }
    }
}
