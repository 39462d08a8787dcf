//! # healthsync-storage
//!
//! 로컬 저장소 어댑터.
//! SQLite 기반 동기화 상태(워터마크, 활성 플래그, 마지막 전송 시각)와
//! 백그라운드 전송 작업 장부를 관리한다. 재시작 후에도 마지막 쓰기 값을 읽는다.
//!
//! ## 모듈
//! - `sqlite`: `SyncStateStore` + `JobLedger` 구현
//! - `migration`: 스키마 마이그레이션

pub mod migration;
pub mod sqlite;
