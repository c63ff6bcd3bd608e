//! 의존성 조립과 백그라운드 루프 기동.
//!
//! `AppConfig` + 키-값 저장소 하나로 모든 어댑터와 컨텍스트 객체를 만든다.
//! 전역 상태는 없고, 각 컨텍스트는 `Arc`로 주입된다.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use yamkar_core::config::{AppConfig, LocationOverrides};
use yamkar_core::error::CoreError;
use yamkar_core::event_bus::{AppEvent, EventBus, Subscription};
use yamkar_core::models::lifecycle::LifecycleSignal;
use yamkar_core::ports::kv_store::KeyValueStore;
use yamkar_core::ports::session_service::SessionService;
use yamkar_location::{GpsdPositionProvider, LocationReporter};
use yamkar_network::{HttpDataProbe, HttpLocationUploader, HttpSessionService, RealtimeClient};
use yamkar_recovery::{ConnectionRecovery, LifecycleHub, SessionStore, SuspendDetector};

/// 조립된 클라이언트 코어
pub struct App {
    config: AppConfig,
    pub bus: Arc<EventBus>,
    pub hub: Arc<LifecycleHub>,
    pub store: Arc<SessionStore>,
    pub recovery: Arc<ConnectionRecovery>,
    pub reporter: Arc<LocationReporter>,
}

impl App {
    /// 설정으로 어댑터/컨텍스트 조립 (네트워크 호출 없음)
    pub fn build(config: &AppConfig, kv: Arc<dyn KeyValueStore>) -> Result<Self, CoreError> {
        let server = &config.server;
        let bus = Arc::new(EventBus::default());
        let hub = Arc::new(LifecycleHub::default());

        let service: Arc<dyn SessionService> = Arc::new(HttpSessionService::new(
            &server.base_url,
            &server.api_key,
            config.request_timeout(),
        )?);
        let store = Arc::new(SessionStore::new(
            Arc::clone(&kv),
            Arc::clone(&service),
            config.recovery.refresh_timeout(),
        ));

        let probe = Arc::new(HttpDataProbe::new(
            &server.base_url,
            &server.api_key,
            &config.recovery.probe_table,
            config.recovery.probe_timeout(),
        )?);
        let mut recovery = ConnectionRecovery::new(
            config.recovery.clone(),
            Arc::clone(&bus),
            service,
            Arc::clone(&store),
            probe,
        );
        if server.realtime_enabled {
            let realtime = RealtimeClient::new(
                &server.realtime_url(),
                Duration::from_secs(server.realtime_heartbeat_secs),
            );
            recovery = recovery.with_realtime(Arc::new(realtime));
        }

        let uploader = Arc::new(HttpLocationUploader::new(
            &server.api_key,
            config.location.upload_timeout(),
        )?);
        let provider = Arc::new(GpsdPositionProvider::new(&config.location.gpsd_addr));
        let reporter = Arc::new(LocationReporter::new(
            config.location.clone(),
            &server.base_url,
            provider,
            uploader,
            store.clone(),
            kv,
            Arc::clone(&bus),
        ));

        Ok(Self {
            config: config.clone(),
            bus,
            hub,
            store,
            recovery: Arc::new(recovery),
            reporter,
        })
    }

    /// 백그라운드 루프 기동: 복구 드라이버, 선제 토큰 갱신, 절전 감지, 이벤트 로거.
    ///
    /// 위치 보고기도 초기화되어 저장된 추적 상태가 있으면 이어서 추적한다.
    pub async fn start(&self, shutdown_rx: watch::Receiver<bool>) -> Running {
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(Arc::clone(&self.recovery).run(
            self.hub.subscribe(),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(
            Arc::clone(&self.recovery).run_token_refresh(shutdown_rx.clone()),
        ));
        let detector = SuspendDetector::new(&self.config.lifecycle);
        tasks.push(tokio::spawn(
            detector.run(Arc::clone(&self.hub), shutdown_rx.clone()),
        ));
        tasks.push(tokio::spawn(log_events(self.bus.tap(), shutdown_rx)));

        let retry_subscription = self.reporter.attach();
        self.reporter
            .initialize(&LocationOverrides::default(), self.hub.subscribe())
            .await;

        info!("백그라운드 루프 {}개 기동", tasks.len());
        Running {
            tasks,
            retry_subscription: Some(retry_subscription),
        }
    }

    /// 환경 변수 자격증명으로 로그인 (저장된 세션이 없을 때만)
    pub async fn sign_in_if_needed(&self, email: Option<&str>, password: Option<&str>) -> bool {
        if self.store.get_token().await.is_some() {
            debug!("저장된 세션 있음, 로그인 생략");
            return true;
        }
        let (Some(email), Some(password)) = (email, password) else {
            info!("저장된 세션과 자격증명이 없음, 로그인 전까지 연결 복구는 Disconnected로 끝난다");
            return false;
        };
        match self.store.sign_in(email, password).await {
            Ok(session) => {
                info!(
                    "로그인 완료: {}",
                    session.user.as_ref().map_or("-", |u| u.id.as_str())
                );
                true
            }
            Err(e) => {
                warn!("로그인 실패: {e}");
                false
            }
        }
    }

    /// 앱 활성화 신호: 시작 직후 첫 복구 시퀀스 트리거
    pub fn activate(&self) {
        self.hub.emit(LifecycleSignal::BecameActive);
    }

    /// 정리: 감시 닫기 (저장된 추적 상태는 유지)
    pub async fn shutdown(&self, running: Running) {
        running.stop();
        self.reporter.shutdown().await;
    }
}

/// 기동된 백그라운드 태스크
pub struct Running {
    tasks: Vec<JoinHandle<()>>,
    retry_subscription: Option<Subscription>,
}

impl Running {
    fn stop(mut self) {
        if let Some(subscription) = self.retry_subscription.take() {
            subscription.unsubscribe();
        }
        for task in self.tasks.drain(..) {
            if !task.is_finished() {
                task.abort();
            }
        }
    }
}

/// 버스 이벤트 로그 출력
async fn log_events(mut tap: broadcast::Receiver<AppEvent>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            event = tap.recv() => match event {
                Ok(AppEvent::ConnectionStatusChanged { status }) => info!("연결 상태: {status}"),
                Ok(AppEvent::AuthenticationRequired { reason }) => {
                    warn!("재로그인 필요: {reason}");
                }
                Ok(AppEvent::RetryQueueDrained { succeeded, remaining }) => {
                    info!("재시도 큐: 성공 {succeeded}, 잔여 {remaining}");
                }
                Ok(event) => debug!("이벤트: {event:?}"),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("이벤트 로그 {n}건 유실"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown_rx.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yamkar_core::models::connection::ConnectionStatus;
    use yamkar_storage::MemoryKvStore;

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default_config();
        config.server.base_url = "http://127.0.0.1:1".to_string();
        config.server.realtime_enabled = false;
        config.location.gpsd_addr = "127.0.0.1:1".to_string();
        config
    }

    #[tokio::test]
    async fn builds_from_default_config() {
        let app = App::build(&offline_config(), Arc::new(MemoryKvStore::new())).unwrap();
        assert_eq!(app.recovery.status(), ConnectionStatus::Connected);
        assert!(!app.reporter.tracking_state().await.enabled);
    }

    #[tokio::test]
    async fn activation_without_session_ends_disconnected() {
        let app = App::build(&offline_config(), Arc::new(MemoryKvStore::new())).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = app.start(shutdown_rx).await;
        let mut status_rx = app.recovery.subscribe_status();

        assert!(!app.sign_in_if_needed(None, None).await);
        app.activate();

        tokio::time::timeout(
            Duration::from_secs(5),
            status_rx.wait_for(|s| *s == ConnectionStatus::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();

        shutdown_tx.send(true).unwrap();
        app.shutdown(running).await;
    }
}
