//! 백그라운드 위치 보고기.
//!
//! 출근 기간 동안 플랫폼 위치 감시를 열어 두고, 샘플 게이트를 통과한
//! 샘플을 업로드한다. 업로드 실패분은 영속 재시도 큐에 쌓이고
//! `DataRefreshNeeded` 이벤트(연결 복구 완료)마다 재전송된다.
//!
//! 추적 상태는 키-값 저장소에 영속화되어 프로세스가 재시작되어도
//! `initialize()`에서 이어서 추적한다.
//!
//! 락 순서: `watch` → `state`. 반대 순서로 잡지 않는다.

use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use yamkar_core::bounded::bounded;
use yamkar_core::config::{LocationConfig, LocationOverrides};
use yamkar_core::error::CoreError;
use yamkar_core::event_bus::{AppEvent, EventBus, Subscription, Topic};
use yamkar_core::models::lifecycle::LifecycleSignal;
use yamkar_core::models::location::{
    LastUpdate, LocationPayload, PendingUpload, Position, TrackingState,
};
use yamkar_core::ports::kv_store::KeyValueStore;
use yamkar_core::ports::location::{
    LocationUploader, PermissionScope, PermissionState, PermissionStatus, PositionProvider,
    PositionSample, PositionWatch, WatchCanceller, WatchOptions,
};
use yamkar_core::ports::session_service::AccessTokenProvider;

use crate::gate::SampleGate;
use crate::pending::PendingStore;

/// 추적 상태 저장 키
pub const TRACKING_STATE_KEY: &str = "location.tracking_state";

/// 열린 위치 감시 + 샘플 소비 태스크
struct ActiveWatch {
    canceller: WatchCanceller,
    task: JoinHandle<()>,
}

impl ActiveWatch {
    fn close(mut self) {
        self.canceller.cancel();
        self.task.abort();
    }
}

/// 백그라운드 위치 보고기
pub struct LocationReporter {
    provider: Arc<dyn PositionProvider>,
    uploader: Arc<dyn LocationUploader>,
    tokens: Arc<dyn AccessTokenProvider>,
    kv: Arc<dyn KeyValueStore>,
    bus: Arc<EventBus>,
    /// 업로드 엔드포인트 기본값 계산용
    base_url: String,
    base_config: LocationConfig,
    /// `initialize()`에서 덮어쓴 실효 설정
    config: RwLock<LocationConfig>,
    state: Mutex<TrackingState>,
    watch: Mutex<Option<ActiveWatch>>,
    pending: PendingStore,
    retry_lock: Mutex<()>,
    lifecycle_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl LocationReporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: LocationConfig,
        base_url: &str,
        provider: Arc<dyn PositionProvider>,
        uploader: Arc<dyn LocationUploader>,
        tokens: Arc<dyn AccessTokenProvider>,
        kv: Arc<dyn KeyValueStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        let pending = PendingStore::new(Arc::clone(&kv), config.retry_capacity);
        Self {
            provider,
            uploader,
            tokens,
            kv,
            bus,
            base_url: base_url.to_string(),
            config: RwLock::new(config.clone()),
            base_config: config,
            state: Mutex::new(TrackingState::default()),
            watch: Mutex::new(None),
            pending,
            retry_lock: Mutex::new(()),
            lifecycle_task: parking_lot::Mutex::new(None),
        }
    }

    // ── 초기화 / 배선 ────────────────────────────────────

    /// 설정 병합, 저장된 추적 상태 복원, 라이프사이클 리스너 등록.
    ///
    /// 저장된 상태가 활성이면 즉시 추적을 재개한다.
    pub async fn initialize(
        self: &Arc<Self>,
        overrides: &LocationOverrides,
        lifecycle_rx: broadcast::Receiver<LifecycleSignal>,
    ) {
        *self.config.write() = self.base_config.merged(overrides);

        let restored = self.load_state().await;
        *self.state.lock().await = restored.clone();

        let listener = tokio::spawn(Self::lifecycle_loop(Arc::downgrade(self), lifecycle_rx));
        if let Some(previous) = self.lifecycle_task.lock().replace(listener) {
            previous.abort();
        }

        if let Some(id) = restored.resumable_id() {
            info!("저장된 추적 상태 복원, 추적 재개: {id}");
            match self.start_tracking(id).await {
                Ok(true) => {}
                Ok(false) => warn!("추적 재개 실패, 다음 활성화 때 재시도"),
                Err(e) => warn!("추적 재개 실패: {e}"),
            }
        }
    }

    /// `DataRefreshNeeded` 소비자 등록: 복구 완료마다 재시도 큐 처리
    pub fn attach(self: &Arc<Self>) -> Subscription {
        let weak = Arc::downgrade(self);
        self.bus.subscribe(Topic::DataRefreshNeeded, move |_| {
            let Some(reporter) = weak.upgrade() else {
                return;
            };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        reporter.retry_failed_updates().await;
                    });
                }
                Err(_) => warn!("런타임 밖에서 재조회 이벤트 수신, 재시도 생략"),
            }
        })
    }

    /// 앱 활성화 시 추적이 켜져 있는데 감시가 없으면 다시 연다
    async fn lifecycle_loop(reporter: Weak<Self>, mut rx: broadcast::Receiver<LifecycleSignal>) {
        loop {
            match rx.recv().await {
                Ok(LifecycleSignal::BecameActive) => {
                    let Some(reporter) = reporter.upgrade() else {
                        break;
                    };
                    reporter.resume_if_needed().await;
                }
                Ok(LifecycleSignal::BecameInactive { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("라이프사이클 신호 {n}건 유실");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn resume_if_needed(self: &Arc<Self>) {
        let id = match self.state.lock().await.resumable_id() {
            Some(id) => id.to_string(),
            None => return,
        };
        let watch_open = self
            .watch
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| !active.task.is_finished());
        if watch_open {
            return;
        }

        info!("앱 활성화: 위치 감시가 없어 추적 재개 ({id})");
        if let Err(e) = self.start_tracking(&id).await {
            warn!("추적 재개 실패: {e}");
        }
    }

    // ── 권한 ─────────────────────────────────────────────

    /// 위치 권한 요청: 상승 권한이 필요한 플랫폼이면 기본 권한 허용 후 백그라운드 권한까지
    pub async fn request_permissions(&self) -> Result<PermissionStatus, CoreError> {
        let status = self
            .provider
            .request_permissions(PermissionScope::Foreground)
            .await?;
        if status.location_granted() && self.provider.requires_background_grant() {
            debug!("백그라운드 위치 권한 요청");
            return self
                .provider
                .request_permissions(PermissionScope::Background)
                .await;
        }
        Ok(status)
    }

    pub async fn check_permissions(&self) -> Result<PermissionStatus, CoreError> {
        self.provider.check_permissions().await
    }

    /// 권한 확인, 미결정이면 한 번만 요청
    async fn ensure_permission(&self) -> bool {
        let status = match self.check_permissions().await {
            Ok(status) => status,
            Err(e) => {
                warn!("위치 권한 확인 실패: {e}");
                return false;
            }
        };
        match status.location {
            PermissionState::Granted => true,
            PermissionState::Denied => false,
            PermissionState::Prompt => match self.request_permissions().await {
                Ok(status) => status.location_granted(),
                Err(e) => {
                    warn!("위치 권한 요청 실패: {e}");
                    false
                }
            },
        }
    }

    // ── 추적 ─────────────────────────────────────────────

    /// 추적 시작.
    ///
    /// 빈 ID는 부수 효과 없이 `Validation` 에러. 권한이 없거나 감시를 열지
    /// 못하면 `Ok(false)`. 이전 감시는 새 감시를 열기 전에 항상 취소된다.
    pub async fn start_tracking(self: &Arc<Self>, attendance_log_id: &str) -> Result<bool, CoreError> {
        let id = attendance_log_id.trim();
        if id.is_empty() {
            return Err(CoreError::validation(
                "attendance_log_id",
                "출근 기록 ID 없이 추적을 시작할 수 없음",
            ));
        }

        {
            let mut state = self.state.lock().await;
            state.attendance_log_id = Some(id.to_string());
            self.persist(&state).await;
        }

        if !self.ensure_permission().await {
            warn!("위치 권한 없음, 추적 시작 안 함");
            return Ok(false);
        }

        let (options, gate) = {
            let config = self.config.read();
            (
                watch_options(&config),
                SampleGate::new(config.update_interval(), config.distance_filter_m),
            )
        };

        let mut slot = self.watch.lock().await;
        if let Some(previous) = slot.take() {
            debug!("이전 위치 감시 취소");
            previous.close();
        }

        let watch = match bounded(
            "위치 감시 시작",
            options.timeout,
            self.provider.start_watch(&options),
        )
        .await
        {
            Ok(watch) => watch,
            Err(e) => {
                warn!("위치 감시 시작 실패: {e}");
                return Ok(false);
            }
        };

        let PositionWatch { samples, canceller } = watch;
        let task = tokio::spawn(Self::consume_samples(
            Arc::downgrade(self),
            samples,
            id.to_string(),
            gate,
        ));
        *slot = Some(ActiveWatch { canceller, task });

        {
            let mut state = self.state.lock().await;
            state.enabled = true;
            state.attendance_log_id = Some(id.to_string());
            self.persist(&state).await;
        }
        drop(slot);

        info!("위치 추적 시작: {id}");
        self.bus.publish(AppEvent::TrackingChanged {
            enabled: true,
            attendance_log_id: Some(id.to_string()),
        });
        Ok(true)
    }

    /// 감시 샘플 소비: 잘못된 샘플은 건너뛰고, 게이트 통과분만 업로드
    async fn consume_samples(
        reporter: Weak<Self>,
        mut samples: mpsc::Receiver<PositionSample>,
        attendance_log_id: String,
        mut gate: SampleGate,
    ) {
        while let Some(sample) = samples.recv().await {
            let position = match sample {
                Ok(position) if position.coordinate.is_valid() => position,
                Ok(position) => {
                    warn!(
                        "잘못된 좌표 샘플 무시: ({}, {})",
                        position.coordinate.latitude, position.coordinate.longitude
                    );
                    continue;
                }
                Err(e) => {
                    warn!("위치 측정 실패 샘플 무시: {e}");
                    continue;
                }
            };

            if !gate.admit(&position) {
                continue;
            }

            let Some(reporter) = reporter.upgrade() else {
                break;
            };
            let id = attendance_log_id.clone();
            // 업로드는 독립 태스크: 추적 중지로 취소되지 않는다
            tokio::spawn(async move {
                reporter.send_location_to_server(&position, &id).await;
            });
        }
        debug!("위치 감시 스트림 종료");
    }

    /// 추적 중지 (멱등). 진행 중인 업로드는 취소하지 않는다.
    pub async fn stop_tracking(&self) {
        let mut slot = self.watch.lock().await;
        if let Some(active) = slot.take() {
            active.close();
        }

        let was_enabled = {
            let mut state = self.state.lock().await;
            let was_enabled = state.enabled;
            state.enabled = false;
            state.attendance_log_id = None;
            self.persist(&state).await;
            was_enabled
        };
        drop(slot);

        if was_enabled {
            info!("위치 추적 중지");
            self.bus.publish(AppEvent::TrackingChanged {
                enabled: false,
                attendance_log_id: None,
            });
        }
    }

    /// 프로세스 종료용: 감시와 리스너를 닫되 저장된 추적 상태는 유지
    pub async fn shutdown(&self) {
        if let Some(active) = self.watch.lock().await.take() {
            active.close();
        }
        if let Some(listener) = self.lifecycle_task.lock().take() {
            listener.abort();
        }
        debug!("위치 보고기 종료");
    }

    /// 단발성 현재 위치
    pub async fn get_current_position(&self) -> Result<Position, CoreError> {
        let options = watch_options(&self.config.read());
        bounded(
            "현재 위치 조회",
            options.timeout,
            self.provider.current_position(&options),
        )
        .await
    }

    // ── 업로드 파이프라인 ────────────────────────────────

    /// 위치 1건 업로드. 토큰 없음/실패/타임아웃은 재시도 큐로 보낸다.
    pub async fn send_location_to_server(&self, position: &Position, attendance_log_id: &str) -> bool {
        let Some(token) = self.tokens.access_token().await else {
            warn!("액세스 토큰 없음, 위치를 재시도 큐에 보관");
            self.store_failed_update(position, attendance_log_id).await;
            return false;
        };

        let payload = LocationPayload::new(position.coordinate, attendance_log_id);
        let (endpoint, timeout) = self.upload_target();

        match bounded(
            "위치 업로드",
            timeout,
            self.uploader.upload(&endpoint, &payload, &token),
        )
        .await
        {
            Ok(()) => {
                self.record_last_update(position).await;
                true
            }
            Err(e) => {
                warn!("위치 업로드 실패, 재시도 큐에 보관: {e}");
                self.store_failed_update(position, attendance_log_id).await;
                false
            }
        }
    }

    pub async fn store_failed_update(&self, position: &Position, attendance_log_id: &str) {
        let entry = PendingUpload::from_position(position, attendance_log_id);
        if let Err(e) = self.pending.push(entry).await {
            error!("재시도 큐 저장 실패, 위치 유실: {e}");
        }
    }

    /// 재시도 큐 전체를 동시에 재전송하고 성공 건수를 반환한다.
    ///
    /// 큐는 전송 동안 저장소에 남아 있고, 성공한 항목만 끝에서 지운다.
    /// 실패분은 그 사이 적재된 항목보다 앞에 그대로 있다.
    /// 이미 재시도가 진행 중이면 아무것도 하지 않고 0.
    pub async fn retry_failed_updates(&self) -> usize {
        let Ok(_retrying) = self.retry_lock.try_lock() else {
            debug!("재시도 진행 중, 요청 무시");
            return 0;
        };

        let entries = match self.pending.load().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("재시도 큐 읽기 실패: {e}");
                return 0;
            }
        };
        if entries.is_empty() {
            return 0;
        }

        let total = entries.len();
        let Some(token) = self.tokens.access_token().await else {
            warn!("액세스 토큰 없음, 재시도 보류 ({total}건)");
            self.publish_drained(0).await;
            return 0;
        };

        info!("재시도 큐 처리 시작 ({total}건)");
        let (endpoint, timeout) = self.upload_target();
        let endpoint = endpoint.as_str();
        let token = token.as_str();

        let results = join_all(entries.iter().map(|entry| {
            let payload = entry.payload();
            async move {
                bounded(
                    "위치 재전송",
                    timeout,
                    self.uploader.upload(endpoint, &payload, token),
                )
                .await
            }
        }))
        .await;

        let mut newest: Option<Position> = None;
        let mut delivered = Vec::new();
        for (entry, result) in entries.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    if newest
                        .as_ref()
                        .map_or(true, |p| p.timestamp < entry.captured_at)
                    {
                        newest = Some(Position {
                            coordinate: entry.coordinate,
                            accuracy_m: None,
                            timestamp: entry.captured_at,
                        });
                    }
                    delivered.push(entry);
                }
                Err(e) => debug!("재전송 실패 ({}): {e}", entry.attendance_log_id),
            }
        }

        let succeeded = delivered.len();
        if let Some(position) = newest {
            self.record_last_update(&position).await;
        }
        if let Err(e) = self.pending.settle(&delivered).await {
            // 지우지 못한 항목은 다음 재시도에서 한 번 더 전송된다
            error!("재시도 큐 정산 실패: {e}");
        }
        let remaining = self.publish_drained(succeeded).await;
        info!("재시도 큐 처리 완료: 성공 {succeeded}/{total}, 잔여 {remaining}");
        succeeded
    }

    async fn publish_drained(&self, succeeded: usize) -> usize {
        let remaining = self.pending.len().await.unwrap_or(0);
        self.bus.publish(AppEvent::RetryQueueDrained {
            succeeded,
            remaining,
        });
        remaining
    }

    fn upload_target(&self) -> (String, std::time::Duration) {
        let config = self.config.read();
        (
            config.resolved_upload_endpoint(&self.base_url),
            config.upload_timeout(),
        )
    }

    // ── 상태 ─────────────────────────────────────────────

    pub async fn tracking_state(&self) -> TrackingState {
        self.state.lock().await.clone()
    }

    /// 추적 활성 + 감시 열림
    pub async fn is_tracking(&self) -> bool {
        let watch_open = self
            .watch
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| !active.task.is_finished());
        watch_open && self.state.lock().await.enabled
    }

    pub fn config(&self) -> LocationConfig {
        self.config.read().clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.len().await.unwrap_or(0)
    }

    /// 더 최근 샘플일 때만 마지막 업로드 스냅샷 갱신
    async fn record_last_update(&self, position: &Position) {
        let mut state = self.state.lock().await;
        let newer = state
            .last_update
            .as_ref()
            .map_or(true, |last| last.timestamp < position.timestamp);
        if newer {
            state.last_update = Some(LastUpdate {
                timestamp: position.timestamp,
                coordinate: position.coordinate,
            });
            self.persist(&state).await;
        }
    }

    async fn load_state(&self) -> TrackingState {
        match self.kv.get(TRACKING_STATE_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<TrackingState>(&raw) {
                Ok(state) => state.normalized(),
                Err(e) => {
                    warn!("추적 상태 파싱 실패, 초기화: {e}");
                    TrackingState::default()
                }
            },
            Ok(None) => TrackingState::default(),
            Err(e) => {
                warn!("추적 상태 읽기 실패: {e}");
                TrackingState::default()
            }
        }
    }

    /// 실패는 로그만 남긴다: 메모리 상태가 기준
    async fn persist(&self, state: &TrackingState) {
        let result = match serde_json::to_string(state) {
            Ok(raw) => self.kv.set(TRACKING_STATE_KEY, &raw).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("추적 상태 저장 실패: {e}");
        }
    }
}

fn watch_options(config: &LocationConfig) -> WatchOptions {
    WatchOptions {
        high_accuracy: config.high_accuracy,
        timeout: config.position_timeout(),
        maximum_age: config.maximum_age(),
        distance_filter_m: config.distance_filter_m,
        notification_title: config.notification_title.clone(),
        notification_text: config.notification_text.clone(),
    }
}
