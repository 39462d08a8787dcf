//! # healthsync-core
//!
//! HEALTHSYNC 도메인 모델, 포트(trait) 정의, 에러 타입.
//! 모든 크레이트가 공유하는 핵심 타입과 인터페이스를 제공한다.
//!
//! ## 구조
//!
//! - [`models`]: 도메인 데이터 구조체 (스냅샷, 수면 구간, 동기화 상태)
//! - [`ports`]: Hexagonal Architecture 포트 인터페이스 (async_trait)
//! - [`error`]: 핵심 에러 타입 (thiserror)
//! - [`config`]: 애플리케이션 설정 구조체
//! - [`config_manager`]: 설정 파일 관리 (로드/저장)

pub mod config;
pub mod config_manager;
pub mod error;
pub mod models;
pub mod ports;

#[cfg(test)]
mod tests {
    use crate::models::metric::{MetricKind, MetricStyle};

    #[test]
    fn config_defaults() {
        let config = crate::config::AppConfig::default_config();
        assert_eq!(config.server.base_url, "http://localhost:8000");
        assert_eq!(config.server.health_timeout_ms, 10_000);
        assert_eq!(config.sync.interval_secs, 15 * 60);
        assert_eq!(config.sync.backfill_days, 30);
        assert!(config.server.request_timeout_ms < config.server.durable_timeout_ms);
    }

    #[test]
    fn every_kind_has_a_style() {
        let cumulative = MetricKind::ALL
            .iter()
            .filter(|k| k.style() == MetricStyle::Cumulative)
            .count();
        let latest = MetricKind::ALL
            .iter()
            .filter(|k| k.style() == MetricStyle::PointSample)
            .count();
        assert_eq!(cumulative, 4);
        assert_eq!(latest, 3);
        assert_eq!(MetricKind::SleepAnalysis.style(), MetricStyle::Segment);
    }
}
