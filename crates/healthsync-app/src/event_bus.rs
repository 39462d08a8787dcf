//! 내부 이벤트 버스.
//!
//! `tokio::broadcast` 기반 내부 이벤트 라우팅.
//! 스케줄러 사이클 결과와 백그라운드 전송 완료 통지를 표시 계층으로 전달한다.

use healthsync_core::models::sync::CycleReport;
use healthsync_core::models::upload::TransferEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// 내부 앱 이벤트
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// 동기화 사이클 종료
    CycleFinished(CycleReport),
    /// 백그라운드 전송 완료/실패
    Transfer(TransferEvent),
    /// 최초 이력 업로드 완료
    BackfillFinished { uploaded: usize },
    /// 스케줄링 실패 등 사용자에게 보여줄 에러
    Error(String),
}

/// 내부 이벤트 버스
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// 새 이벤트 버스 생성
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// 이벤트 발행
    pub fn publish(&self, event: AppEvent) {
        debug!("이벤트 발행: {:?}", std::mem::discriminant(&event));
        let _ = self.tx.send(event);
    }

    /// 구독자 생성
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthsync_core::models::upload::JobHandle;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(AppEvent::BackfillFinished { uploaded: 3 });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, AppEvent::BackfillFinished { uploaded: 3 }));
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(AppEvent::Transfer(TransferEvent::Failed {
            handle: JobHandle::generate(),
            error: "offline".to_string(),
        }));

        assert!(matches!(rx1.recv().await.unwrap(), AppEvent::Transfer(_)));
        assert!(matches!(rx2.recv().await.unwrap(), AppEvent::Transfer(_)));
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(AppEvent::Error("no listeners".to_string()));
    }
}
