//! 내부 이벤트 버스.
//!
//! 토픽별 핸들러를 발행 시점에 동기적으로 호출한다.
//! 핸들러 패닉은 잡아서 로그로 남기고 나머지 핸들러 전달은 계속한다.
//! 비동기 소비자는 `tokio::broadcast` 기반 탭(`tap`)으로 같은 이벤트를 받는다.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::models::connection::ConnectionStatus;

/// 이벤트 토픽
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ConnectionStatusChanged,
    ConnectionRestored,
    DataRefreshNeeded,
    AuthenticationRequired,
    TrackingChanged,
    RetryQueueDrained,
}

/// 내부 앱 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// 연결 상태 변경
    ConnectionStatusChanged { status: ConnectionStatus },
    /// 복구 시퀀스 성공
    ConnectionRestored,
    /// UI 소비자 재조회 트리거 (`Ready` 이후에만 발행)
    DataRefreshNeeded,
    /// 리프레시 토큰 거부: 재로그인 필요
    AuthenticationRequired { reason: String },
    /// 위치 추적 on/off
    TrackingChanged {
        enabled: bool,
        attendance_log_id: Option<String>,
    },
    /// 재시도 큐 처리 결과
    RetryQueueDrained { succeeded: usize, remaining: usize },
}

impl AppEvent {
    pub fn topic(&self) -> Topic {
        match self {
            AppEvent::ConnectionStatusChanged { .. } => Topic::ConnectionStatusChanged,
            AppEvent::ConnectionRestored => Topic::ConnectionRestored,
            AppEvent::DataRefreshNeeded => Topic::DataRefreshNeeded,
            AppEvent::AuthenticationRequired { .. } => Topic::AuthenticationRequired,
            AppEvent::TrackingChanged { .. } => Topic::TrackingChanged,
            AppEvent::RetryQueueDrained { .. } => Topic::RetryQueueDrained,
        }
    }
}

type Handler = Arc<dyn Fn(&AppEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<Topic, Vec<(u64, Handler)>>,
}

/// 내부 이벤트 버스
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    tap: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// 새 이벤트 버스 생성 (`tap_capacity`: 비동기 탭 버퍼 크기)
    pub fn new(tap_capacity: usize) -> Self {
        let (tap, _) = broadcast::channel(tap_capacity.max(1));
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            tap,
        }
    }

    /// 토픽 핸들러 등록
    ///
    /// 반환된 `Subscription`의 `unsubscribe()`를 부르기 전까지 유지된다.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&AppEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            topic,
            id,
        }
    }

    /// 이벤트 발행
    ///
    /// 발행 시점에 등록된 핸들러 스냅샷을 등록 순서대로 호출한다.
    /// 레지스트리 락은 호출 전에 풀리므로 핸들러 안에서 구독/발행해도 된다.
    pub fn publish(&self, event: AppEvent) {
        let topic = event.topic();
        let handlers: Vec<Handler> = {
            let registry = self.registry.lock();
            registry
                .handlers
                .get(&topic)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        debug!("이벤트 발행: {topic:?} (핸들러 {}개)", handlers.len());

        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                error!(
                    "이벤트 핸들러 패닉 ({topic:?}): {}",
                    panic_message(panic.as_ref())
                );
            }
        }

        // 수신자가 없으면 실패하지만 무시 (블로킹 없음)
        let _ = self.tap.send(event);
    }

    /// 비동기 구독자 생성 (모든 토픽)
    pub fn tap(&self) -> broadcast::Receiver<AppEvent> {
        self.tap.subscribe()
    }

    /// 토픽별 등록 핸들러 수
    pub fn handler_count(&self, topic: Topic) -> usize {
        self.registry
            .lock()
            .handlers
            .get(&topic)
            .map_or(0, |list| list.len())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

/// 핸들러 등록 해제 핸들
#[must_use = "unsubscribe()를 호출하지 않으면 핸들러가 계속 등록된 상태로 남는다"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    /// 핸들러 등록 해제
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock();
            if let Some(list) = registry.handlers.get_mut(&self.topic) {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "알 수 없는 패닉".to_string()
    }
}
