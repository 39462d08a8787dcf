//! # healthsync-network
//!
//! 수집 서버로 스냅샷을 보내는 네트워크 어댑터.
//! 동기 전송(응답 대기)과 백그라운드 전송 채널(완료 통지 후행)을 모두 제공하며,
//! 연결 상태를 추적해 오프라인 동안에는 전송을 실패시키지 않고 대기한다.
//!
//! ## 사용 예시
//!
//! ```rust,ignore
//! use healthsync_network::transport::SnapshotTransport;
//!
//! let (transport, completions) =
//!     SnapshotTransport::from_config(&config, spool_dir, state_store, job_ledger)?;
//! let transport = Arc::new(transport);
//! tokio::spawn(transport.clone().run_completion_listener(completions, shutdown_rx));
//! ```

pub mod connectivity;
pub mod http_client;
pub mod transfer_channel;
pub mod transport;
