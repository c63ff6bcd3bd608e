//! 연결 복구 상태 머신.
//!
//! 앱이 다시 활성화되면 세션을 확인/갱신하고, 실시간 채널을 재설정하고,
//! 프로브 쿼리로 백엔드 도달성을 확인한 뒤에야 `Ready`를 발행한다.
//!
//! ```text
//! Reconnecting → Authenticating ─┬─ 세션 없음 ──────────────→ Disconnected
//!                                ├─ 조회/갱신/프로브 실패 ───→ Error
//!                                ├─ 워치독 초과 ─────────────→ Error
//!                                └─ 프로브 성공 ─────────────→ Ready
//!                                     → ConnectionRestored → DataRefreshNeeded
//! ```
//!
//! 한 컨텍스트에서 복구 시퀀스는 한 번에 하나만 돈다. 내부 재시도는 없고,
//! 다음 라이프사이클 이벤트나 수동 트리거가 유일한 재시도 경로다.
//! 선제 토큰 갱신도 같은 진행 플래그를 잡는다. 그동안 들어온 활성화 요청은
//! 갱신이 끝난 뒤 복구를 이어서 실행한다.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use yamkar_core::bounded::bounded;
use yamkar_core::config::RecoveryConfig;
use yamkar_core::error::CoreError;
use yamkar_core::event_bus::{AppEvent, EventBus};
use yamkar_core::models::connection::ConnectionStatus;
use yamkar_core::models::lifecycle::LifecycleSignal;
use yamkar_core::models::session::Session;
use yamkar_core::ports::probe::DataProbe;
use yamkar_core::ports::realtime::RealtimeChannel;
use yamkar_core::ports::session_service::SessionService;

use crate::session_store::SessionStore;

/// 복구 시퀀스 실패 원인
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryFailure {
    /// 세션 조회 실패 또는 타임아웃
    SessionCheck(String),
    /// 토큰 갱신 실패 (`rejected`: 리프레시 토큰 거부)
    Refresh { rejected: bool, message: String },
    /// 프로브 쿼리 실패 또는 타임아웃
    Probe(String),
    /// 워치독 시간 초과
    Watchdog,
}

/// 복구 시퀀스 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// 이미 다른 복구가 진행 중이라 아무것도 하지 않음
    Skipped,
    /// `Ready` 도달
    Ready,
    /// 세션 없음 (`Disconnected`, 장애 아님)
    NoSession,
    /// `Error`로 종료
    Failed(RecoveryFailure),
}

impl RecoveryOutcome {
    /// 이 결과로 확정된 종료 상태 (`Skipped`는 없음)
    pub fn status(&self) -> Option<ConnectionStatus> {
        match self {
            RecoveryOutcome::Skipped => None,
            RecoveryOutcome::Ready => Some(ConnectionStatus::Ready),
            RecoveryOutcome::NoSession => Some(ConnectionStatus::Disconnected),
            RecoveryOutcome::Failed(_) => Some(ConnectionStatus::Error),
        }
    }
}

/// 시퀀스 본문 결과: 워치독 안에서 끝나는 부분
enum SequenceEnd {
    /// 프로브까지 통과
    Verified,
    NoSession,
    Failed(RecoveryFailure),
}

/// 재진입 가드: drop 시 (패닉 포함) 진행 플래그 해제
struct RecoveryGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RecoveryGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// 선제 갱신 구간 표시
///
/// 진행 플래그를 잡기 전에 켜지고, drop 시 플래그 해제 → 세대 증가 →
/// 표시 해제 → 대기자 깨우기 순으로 정리한다.
struct ProactiveRefresh<'a> {
    recovery: &'a ConnectionRecovery,
    guard: Option<RecoveryGuard<'a>>,
}

impl<'a> ProactiveRefresh<'a> {
    fn begin(recovery: &'a ConnectionRecovery) -> Self {
        recovery.proactive_refresh.store(true, Ordering::SeqCst);
        let guard = RecoveryGuard::acquire(&recovery.in_progress);
        Self { recovery, guard }
    }

    fn holds_guard(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for ProactiveRefresh<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.recovery.refresh_generation.fetch_add(1, Ordering::SeqCst);
        self.recovery.proactive_refresh.store(false, Ordering::SeqCst);
        self.recovery.refresh_finished.notify_waiters();
    }
}

/// 연결 복구 컨텍스트
pub struct ConnectionRecovery {
    config: RecoveryConfig,
    bus: Arc<EventBus>,
    service: Arc<dyn SessionService>,
    store: Arc<SessionStore>,
    probe: Arc<dyn DataProbe>,
    realtime: Option<Arc<dyn RealtimeChannel>>,
    status: watch::Sender<ConnectionStatus>,
    in_progress: AtomicBool,
    proactive_refresh: AtomicBool,
    refresh_generation: AtomicU64,
    refresh_finished: Notify,
    created_at: DateTime<Utc>,
}

impl ConnectionRecovery {
    /// 새 복구 컨텍스트 생성 (초기 상태: `Connected`)
    pub fn new(
        config: RecoveryConfig,
        bus: Arc<EventBus>,
        service: Arc<dyn SessionService>,
        store: Arc<SessionStore>,
        probe: Arc<dyn DataProbe>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connected);
        Self {
            config,
            bus,
            service,
            store,
            probe,
            realtime: None,
            status,
            in_progress: AtomicBool::new(false),
            proactive_refresh: AtomicBool::new(false),
            refresh_generation: AtomicU64::new(0),
            refresh_finished: Notify::new(),
            created_at: Utc::now(),
        }
    }

    /// 실시간 채널 연결 (없으면 재설정 단계 생략)
    pub fn with_realtime(mut self, realtime: Arc<dyn RealtimeChannel>) -> Self {
        self.realtime = Some(realtime);
        self
    }

    /// 현재 연결 상태
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// 상태 변경 구독
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// 복구 시퀀스 진행 중 여부
    pub fn is_recovering(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// 상태 변경 + 버스 발행 (같은 값이면 무시)
    fn set_status(&self, next: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            debug!("연결 상태: {next}");
            self.bus
                .publish(AppEvent::ConnectionStatusChanged { status: next });
        }
    }

    /// 앱 활성화 시 복구 시퀀스 실행
    pub async fn handle_became_visible(&self) -> RecoveryOutcome {
        let Some(_guard) = RecoveryGuard::acquire(&self.in_progress) else {
            debug!("복구 시퀀스 진행 중, 요청 무시");
            return RecoveryOutcome::Skipped;
        };

        info!("연결 복구 시작");
        let watchdog = self.config.watchdog();
        let end = match tokio::time::timeout(watchdog, self.run_sequence()).await {
            Ok(end) => end,
            Err(_) => {
                warn!("복구 워치독 초과 ({}ms)", watchdog.as_millis());
                SequenceEnd::Failed(RecoveryFailure::Watchdog)
            }
        };

        match end {
            SequenceEnd::Verified => {
                self.set_status(ConnectionStatus::Ready);
                self.bus.publish(AppEvent::ConnectionRestored);
                self.bus.publish(AppEvent::DataRefreshNeeded);
                if let Err(e) = bounded(
                    "활성 시각 기록",
                    self.config.session_check_timeout(),
                    async {
                        self.store.mark_active(Utc::now()).await;
                        Ok::<_, CoreError>(())
                    },
                )
                .await
                {
                    warn!("활성 시각 기록 실패: {e}");
                }
                info!("연결 복구 완료");
                RecoveryOutcome::Ready
            }
            SequenceEnd::NoSession => {
                self.set_status(ConnectionStatus::Disconnected);
                info!("세션 없음, 로그인 필요");
                RecoveryOutcome::NoSession
            }
            SequenceEnd::Failed(failure) => {
                self.set_status(ConnectionStatus::Error);
                warn!("연결 복구 실패: {failure:?}");
                RecoveryOutcome::Failed(failure)
            }
        }
    }

    /// 활성화 신호 처리
    ///
    /// 선제 토큰 갱신이 진행 플래그를 잡고 있어 건너뛰었다면 갱신이 끝나길
    /// 기다렸다가 복구를 다시 시도한다. 다른 복구 시퀀스 때문에 건너뛴 경우만
    /// `Skipped`로 끝난다.
    pub async fn handle_became_active(&self) -> RecoveryOutcome {
        loop {
            let mut finished = std::pin::pin!(self.refresh_finished.notified());
            finished.as_mut().enable();
            let generation = self.refresh_generation.load(Ordering::SeqCst);

            let outcome = self.handle_became_visible().await;
            if outcome != RecoveryOutcome::Skipped {
                return outcome;
            }

            if self.proactive_refresh.load(Ordering::SeqCst) {
                debug!("선제 토큰 갱신 종료 후 복구 재시도");
                finished.await;
            } else if self.refresh_generation.load(Ordering::SeqCst) == generation {
                return outcome;
            }
        }
    }

    /// 수동 복구 트리거: `Ready`에 도달하면 true
    ///
    /// 이미 복구가 진행 중이면 아무것도 하지 않고 false.
    pub async fn force_connection_refresh(&self) -> bool {
        self.handle_became_active().await == RecoveryOutcome::Ready
    }

    /// 워치독 안에서 도는 시퀀스 본문
    async fn run_sequence(&self) -> SequenceEnd {
        self.set_status(ConnectionStatus::Reconnecting);
        let inactivity = self.inactivity().await;

        self.set_status(ConnectionStatus::Authenticating);
        let session = match self.current_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return SequenceEnd::NoSession,
            Err(e) => {
                self.require_authentication(&e);
                return SequenceEnd::Failed(RecoveryFailure::SessionCheck(e.to_string()));
            }
        };

        let mut access_token = session.access_token;
        if inactivity > self.config.long_inactivity_threshold() {
            info!(
                "장시간 비활성 ({}초), 토큰 강제 갱신",
                inactivity.as_secs()
            );
            match self.store.try_refresh().await {
                Ok(refreshed) => access_token = refreshed.access_token,
                Err(e) => {
                    self.require_authentication(&e);
                    return SequenceEnd::Failed(RecoveryFailure::Refresh {
                        rejected: e.is_unauthenticated(),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.reset_realtime(&access_token).await;

        if let Err(e) = bounded(
            "프로브 쿼리",
            self.config.probe_timeout(),
            self.probe.probe(&access_token),
        )
        .await
        {
            return SequenceEnd::Failed(RecoveryFailure::Probe(e.to_string()));
        }

        SequenceEnd::Verified
    }

    /// 마지막 활성 시각 이후 경과 시간 (기록이 없으면 컨텍스트 생성 시각 기준)
    async fn inactivity(&self) -> Duration {
        let last_active = self
            .store
            .last_active_at()
            .await
            .unwrap_or(self.created_at);
        (Utc::now() - last_active).to_std().unwrap_or(Duration::ZERO)
    }

    /// 원격 클라이언트 세션 조회, 없으면 저장된 토큰으로 복원 후 재조회
    async fn current_session(&self) -> Result<Option<Session>, CoreError> {
        let timeout = self.config.session_check_timeout();

        if let Some(session) = bounded("세션 조회", timeout, self.service.get_session()).await? {
            // 원격 클라이언트가 더 새 토큰을 들고 있으면 저장소에 반영
            if self.store.get_token().await.as_deref() != Some(session.access_token.as_str()) {
                self.store.store(&session).await;
            }
            return Ok(Some(session));
        }

        let Some(restored) = self.store.try_restore().await? else {
            return Ok(None);
        };
        debug!("저장된 토큰으로 세션 복원");

        let fetched = bounded("세션 재조회", timeout, self.service.get_session()).await?;
        Ok(fetched.or(Some(restored)))
    }

    /// 실시간 채널 재설정: 실패는 로그만 남긴다
    async fn reset_realtime(&self, access_token: &str) {
        let Some(realtime) = &self.realtime else {
            return;
        };

        if let Err(e) = realtime.disconnect().await {
            warn!("실시간 채널 해제 실패: {e}");
        }
        tokio::time::sleep(self.config.realtime_reset_delay()).await;
        if let Err(e) = realtime.connect(access_token).await {
            warn!("실시간 채널 재연결 실패 (무시): {e}");
        }
    }

    /// 리프레시 토큰 거부면 재로그인 요청 발행
    fn require_authentication(&self, err: &CoreError) {
        if err.is_unauthenticated() {
            self.bus.publish(AppEvent::AuthenticationRequired {
                reason: err.to_string(),
            });
        }
    }

    /// 라이프사이클 드라이버
    ///
    /// `BecameInactive` → 마지막 활성 시각 기록, `BecameActive` → 복구 시퀀스 spawn.
    pub async fn run(
        self: Arc<Self>,
        mut lifecycle_rx: broadcast::Receiver<LifecycleSignal>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                signal = lifecycle_rx.recv() => match signal {
                    Ok(LifecycleSignal::BecameInactive { at }) => {
                        debug!("앱 비활성, 마지막 활성 시각 기록");
                        self.store.mark_active(at).await;
                    }
                    Ok(LifecycleSignal::BecameActive) => {
                        let this = Arc::clone(&self);
                        tokio::spawn(async move {
                            this.handle_became_active().await;
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("라이프사이클 신호 {n}개 유실");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("라이프사이클 채널 종료");
                        break;
                    }
                },
                _ = shutdown_rx.changed() => {
                    info!("복구 드라이버 종료");
                    break;
                }
            }
        }
    }

    /// 선제 토큰 갱신 루프: 만료 여유 시간 안에 들어오면 갱신
    pub async fn run_token_refresh(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.token_refresh_check());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let margin = self.config.token_refresh_margin();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.refresh_if_expiring(margin).await;
                }
                _ = shutdown_rx.changed() => {
                    info!("토큰 갱신 루프 종료");
                    break;
                }
            }
        }
    }

    async fn refresh_if_expiring(&self, margin: Duration) {
        if !self.store.expires_within(margin).await {
            return;
        }

        let flight = ProactiveRefresh::begin(self);
        if !flight.holds_guard() {
            debug!("복구 시퀀스 진행 중, 선제 갱신 생략");
            return;
        }
        // 대기 사이 복구가 이미 갱신했을 수 있다
        if !self.store.expires_within(margin).await {
            return;
        }

        debug!("토큰 만료 임박, 선제 갱신");
        match self.store.try_refresh().await {
            Ok(_) => {}
            Err(e) if e.is_unauthenticated() => {
                warn!("리프레시 토큰 거부, 재로그인 필요: {e}");
                self.require_authentication(&e);
                self.set_status(ConnectionStatus::Error);
            }
            Err(e) => warn!("선제 토큰 갱신 실패 (다음 주기 재시도): {e}"),
        }
    }
}
