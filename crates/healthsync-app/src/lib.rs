//! # healthsync-app
//!
//! HEALTHSYNC 에이전트 조립 계층.
//! 동기화 스케줄러, 실행 예산 제공자, 내부 이벤트 버스, 라이프사이클을 제공하며
//! 바이너리(`healthsync`)는 이 구성 요소들을 어댑터와 연결만 한다.

pub mod budget;
pub mod event_bus;
pub mod lifecycle;
pub mod scheduler;
pub mod wiring;
