//! 테스트용 포트 mock.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use yamkar_core::error::CoreError;
use yamkar_core::models::location::{LocationPayload, Position};
use yamkar_core::ports::location::{
    position_watch, LocationUploader, PermissionScope, PermissionState, PermissionStatus,
    PositionProvider, PositionSample, PositionWatch, WatchFeed, WatchOptions,
};
use yamkar_core::ports::session_service::AccessTokenProvider;

/// 조건이 참이 될 때까지 최대 2초 대기
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("조건이 2초 안에 충족되지 않음");
}

// ── 위치 제공자 ──────────────────────────────────────────

pub struct MockProvider {
    status: Mutex<PermissionStatus>,
    /// `request_permissions` 후 적용할 상태
    grant_on_request: PermissionState,
    background_required: bool,
    requests: Mutex<Vec<PermissionScope>>,
    watch_fails: AtomicBool,
    watch_starts: AtomicUsize,
    feeds: Mutex<Vec<mpsc::Sender<PositionSample>>>,
    cancels: Mutex<Vec<tokio::sync::oneshot::Receiver<()>>>,
    current: Mutex<Option<Position>>,
}

impl MockProvider {
    fn with_status(location: PermissionState, grant_on_request: PermissionState) -> Self {
        Self {
            status: Mutex::new(PermissionStatus {
                location,
                background: location,
            }),
            grant_on_request,
            background_required: false,
            requests: Mutex::new(Vec::new()),
            watch_fails: AtomicBool::new(false),
            watch_starts: AtomicUsize::new(0),
            feeds: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            current: Mutex::new(None),
        }
    }

    pub fn granted() -> Self {
        Self::with_status(PermissionState::Granted, PermissionState::Granted)
    }

    pub fn denied() -> Self {
        Self::with_status(PermissionState::Denied, PermissionState::Denied)
    }

    /// 아직 묻지 않은 상태: 요청하면 `grant_on_request`로 바뀜
    pub fn prompting(grant_on_request: PermissionState) -> Self {
        Self::with_status(PermissionState::Prompt, grant_on_request)
    }

    pub fn needing_background(mut self) -> Self {
        self.background_required = true;
        self
    }

    pub fn fail_watch(&self) {
        self.watch_fails.store(true, Ordering::SeqCst);
    }

    pub fn set_current(&self, position: Position) {
        *self.current.lock() = Some(position);
    }

    pub fn requests(&self) -> Vec<PermissionScope> {
        self.requests.lock().clone()
    }

    pub fn watch_starts(&self) -> usize {
        self.watch_starts.load(Ordering::SeqCst)
    }

    /// 가장 최근 감시로 샘플 송신
    pub async fn emit(&self, sample: PositionSample) {
        let tx = self.feeds.lock().last().cloned();
        if let Some(tx) = tx {
            let _ = tx.send(sample).await;
        }
    }

    /// n번째 감시가 취소되었는지
    pub fn watch_cancelled(&self, index: usize) -> bool {
        let mut cancels = self.cancels.lock();
        match cancels.get_mut(index) {
            Some(rx) => !matches!(rx.try_recv(), Err(tokio::sync::oneshot::error::TryRecvError::Empty)),
            None => false,
        }
    }
}

#[async_trait]
impl PositionProvider for MockProvider {
    async fn check_permissions(&self) -> Result<PermissionStatus, CoreError> {
        Ok(*self.status.lock())
    }

    async fn request_permissions(
        &self,
        scope: PermissionScope,
    ) -> Result<PermissionStatus, CoreError> {
        self.requests.lock().push(scope);
        let mut status = self.status.lock();
        match scope {
            PermissionScope::Foreground => status.location = self.grant_on_request,
            PermissionScope::Background => status.background = self.grant_on_request,
        }
        Ok(*status)
    }

    fn requires_background_grant(&self) -> bool {
        self.background_required
    }

    async fn current_position(&self, _options: &WatchOptions) -> Result<Position, CoreError> {
        match self.current.lock().clone() {
            Some(position) => Ok(position),
            None => Err(CoreError::Internal("측위 불가".into())),
        }
    }

    async fn start_watch(&self, _options: &WatchOptions) -> Result<PositionWatch, CoreError> {
        if self.watch_fails.load(Ordering::SeqCst) {
            return Err(CoreError::Internal("감시 시작 실패".into()));
        }
        self.watch_starts.fetch_add(1, Ordering::SeqCst);
        let (WatchFeed { samples, cancelled }, watch) = position_watch(16);
        self.feeds.lock().push(samples);
        self.cancels.lock().push(cancelled);
        Ok(watch)
    }
}

// ── 업로더 ───────────────────────────────────────────────

pub struct MockUploader {
    failing: AtomicBool,
    hanging: AtomicBool,
    calls: Mutex<Vec<(String, LocationPayload, String)>>,
}

impl MockUploader {
    pub fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            hanging: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 응답 없이 멈추는 업로드
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// (엔드포인트, 페이로드, 토큰)
    pub fn calls(&self) -> Vec<(String, LocationPayload, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LocationUploader for MockUploader {
    async fn upload(
        &self,
        endpoint: &str,
        payload: &LocationPayload,
        access_token: &str,
    ) -> Result<(), CoreError> {
        self.calls.lock().push((
            endpoint.to_string(),
            payload.clone(),
            access_token.to_string(),
        ));
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::ServiceUnavailable("503".into()));
        }
        Ok(())
    }
}

// ── 토큰 공급자 ──────────────────────────────────────────

pub struct StaticTokens(Mutex<Option<String>>);

impl StaticTokens {
    pub fn new(token: Option<&str>) -> Self {
        Self(Mutex::new(token.map(str::to_string)))
    }

    pub fn set(&self, token: Option<&str>) {
        *self.0.lock() = token.map(str::to_string);
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokens {
    async fn access_token(&self) -> Option<String> {
        self.0.lock().clone()
    }
}
