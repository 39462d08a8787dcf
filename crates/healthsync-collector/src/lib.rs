//! # healthsync-collector
//!
//! 메트릭 수집 어댑터.
//! 워터마크로 전체/증분 모드를 결정하고, 데이터 소스를 동시에 조회해
//! 누적 스냅샷과 샘플별 스냅샷을 만든다.
//!
//! ## 모듈
//! - `collector`: `MetricCollector` (모드 결정, 동시 조회, 스냅샷 분배)
//! - `memory`: `InMemoryMetricSource` (`MetricSource` 포트 구현)
//! - `simulated`: 제한 환경용 합성 샘플 생성기

pub mod collector;
pub mod memory;
pub mod simulated;
