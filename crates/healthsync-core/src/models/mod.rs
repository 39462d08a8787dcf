//! HEALTHSYNC 도메인 모델.
//!
//! 클라이언트-서버 간 공유하는 스냅샷 구조체와 동기화 상태 타입을 정의한다.
//! 전송 대상 모델은 `serde` Serialize/Deserialize를 구현한다.

pub mod metric;
pub mod sleep;
pub mod snapshot;
pub mod sync;
pub mod upload;
