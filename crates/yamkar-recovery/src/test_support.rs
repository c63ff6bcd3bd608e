//! 테스트용 포트 mock.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use yamkar_core::error::CoreError;
use yamkar_core::models::session::{Session, UserProfile};
use yamkar_core::ports::kv_store::KeyValueStore;
use yamkar_core::ports::probe::DataProbe;
use yamkar_core::ports::realtime::RealtimeChannel;
use yamkar_core::ports::session_service::SessionService;
use yamkar_storage::MemoryKvStore;

/// `expires_in_secs` 뒤 만료되는 세션 (리프레시 토큰: `ref_{token}`)
pub fn session(token: &str, expires_in_secs: i64) -> Session {
    Session {
        access_token: token.to_string(),
        refresh_token: Some(format!("ref_{token}")),
        expires_at: Some(Utc::now().timestamp() + expires_in_secs),
        user: Some(UserProfile {
            id: "u_1".to_string(),
            email: Some("kim@yamkar.test".to_string()),
            extra: Default::default(),
        }),
    }
}

/// CoreError는 Clone이 아니므로 테스트에 필요한 변형만 복제
fn replay(err: &CoreError) -> CoreError {
    match err {
        CoreError::Auth(m) => CoreError::Auth(m.clone()),
        CoreError::Network(m) => CoreError::Network(m.clone()),
        other => CoreError::Internal(other.to_string()),
    }
}

// ── 세션 서비스 ──────────────────────────────────────────

pub struct MockSessionService {
    remote: Mutex<Option<Session>>,
    get_session_error: Mutex<Option<CoreError>>,
    get_session_hang: AtomicBool,
    refresh_result: Mutex<Result<Session, CoreError>>,
    refresh_hang: AtomicBool,
    refresh_gate: Mutex<Option<Arc<Notify>>>,
    rotating: AtomicBool,
    spent_refresh_tokens: Mutex<HashSet<String>>,
    refresh_calls: Mutex<Vec<String>>,
    set_session_calls: Mutex<Vec<(String, Option<String>)>>,
    sign_out_calls: AtomicUsize,
}

impl MockSessionService {
    pub fn new() -> Self {
        Self {
            remote: Mutex::new(None),
            get_session_error: Mutex::new(None),
            get_session_hang: AtomicBool::new(false),
            refresh_result: Mutex::new(Ok(session("jwt_refreshed", 3_600))),
            refresh_hang: AtomicBool::new(false),
            refresh_gate: Mutex::new(None),
            rotating: AtomicBool::new(false),
            spent_refresh_tokens: Mutex::new(HashSet::new()),
            refresh_calls: Mutex::new(Vec::new()),
            set_session_calls: Mutex::new(Vec::new()),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    /// 원격 클라이언트가 들고 있는 세션 지정
    pub fn with_remote(self, session: Session) -> Self {
        *self.remote.lock() = Some(session);
        self
    }

    pub fn fail_get_session(&self, err: CoreError) {
        *self.get_session_error.lock() = Some(err);
    }

    pub fn hang_get_session(&self) {
        self.get_session_hang.store(true, Ordering::SeqCst);
    }

    pub fn set_refresh_result(&self, result: Result<Session, CoreError>) {
        *self.refresh_result.lock() = result;
    }

    pub fn hang_refresh(&self) {
        self.refresh_hang.store(true, Ordering::SeqCst);
    }

    /// 첫 갱신 호출만 `notify_one()`까지 대기
    pub fn gate_refresh(&self, gate: Arc<Notify>) {
        *self.refresh_gate.lock() = Some(gate);
    }

    /// 리프레시 토큰 1회용: 쓸 때마다 새 토큰을 발급하고 재사용은 거부
    pub fn rotating(self) -> Self {
        self.rotating.store(true, Ordering::SeqCst);
        self
    }

    pub fn refresh_calls(&self) -> Vec<String> {
        self.refresh_calls.lock().clone()
    }

    pub fn set_session_calls(&self) -> Vec<(String, Option<String>)> {
        self.set_session_calls.lock().clone()
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionService for MockSessionService {
    async fn get_session(&self) -> Result<Option<Session>, CoreError> {
        if self.get_session_hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(err) = self.get_session_error.lock().as_ref() {
            return Err(replay(err));
        }
        Ok(self.remote.lock().clone())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, CoreError> {
        self.refresh_calls.lock().push(refresh_token.to_string());
        if self.refresh_hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let gate = self.refresh_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.rotating.load(Ordering::SeqCst) {
            let issued = {
                let mut spent = self.spent_refresh_tokens.lock();
                if !spent.insert(refresh_token.to_string()) {
                    return Err(CoreError::Auth("이미 사용된 리프레시 토큰".to_string()));
                }
                spent.len()
            };
            let rotated = session(&format!("jwt_rotated_{issued}"), 3_600);
            *self.remote.lock() = Some(rotated.clone());
            return Ok(rotated);
        }
        let result = match &*self.refresh_result.lock() {
            Ok(session) => Ok(session.clone()),
            Err(err) => Err(replay(err)),
        };
        if let Ok(session) = &result {
            *self.remote.lock() = Some(session.clone());
        }
        result
    }

    async fn sign_in_with_password(
        &self,
        _identifier: &str,
        _password: &str,
    ) -> Result<Session, CoreError> {
        let session = session("jwt_signin", 3_600);
        *self.remote.lock() = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), CoreError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        *self.remote.lock() = None;
        Ok(())
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Session, CoreError> {
        self.set_session_calls
            .lock()
            .push((access_token.to_string(), refresh_token.map(str::to_string)));
        let mut restored = session(access_token, 3_600);
        restored.refresh_token = refresh_token.map(str::to_string);
        *self.remote.lock() = Some(restored.clone());
        Ok(restored)
    }
}

// ── 프로브 ───────────────────────────────────────────────

pub struct MockProbe {
    error: Mutex<Option<CoreError>>,
    hang: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    tokens: Mutex<Vec<String>>,
}

impl MockProbe {
    pub fn ok() -> Self {
        Self {
            error: Mutex::new(None),
            hang: AtomicBool::new(false),
            gate: Mutex::new(None),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: CoreError) -> Self {
        let probe = Self::ok();
        *probe.error.lock() = Some(err);
        probe
    }

    pub fn hanging() -> Self {
        let probe = Self::ok();
        probe.hang.store(true, Ordering::SeqCst);
        probe
    }

    /// `notify_one()`이 올 때까지 대기하는 프로브
    pub fn gated(gate: Arc<Notify>) -> Self {
        let probe = Self::ok();
        *probe.gate.lock() = Some(gate);
        probe
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }
}

#[async_trait]
impl DataProbe for MockProbe {
    async fn probe(&self, access_token: &str) -> Result<(), CoreError> {
        self.tokens.lock().push(access_token.to_string());
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.error.lock().as_ref() {
            Some(err) => Err(replay(err)),
            None => Ok(()),
        }
    }
}

// ── 실시간 채널 ──────────────────────────────────────────

pub struct MockRealtime {
    connect_fails: AtomicBool,
    connected: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockRealtime {
    pub fn new() -> Self {
        Self {
            connect_fails: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        let rt = Self::new();
        rt.connect_fails.store(true, Ordering::SeqCst);
        rt
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RealtimeChannel for MockRealtime {
    async fn connect(&self, access_token: &str) -> Result<(), CoreError> {
        self.calls.lock().push(format!("connect:{access_token}"));
        if self.connect_fails.load(Ordering::SeqCst) {
            return Err(CoreError::Network("소켓 거부".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CoreError> {
        self.calls.lock().push("disconnect".to_string());
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ── 키-값 저장소 ─────────────────────────────────────────

/// 특정 키 쓰기만 실패하는 저장소
pub struct FlakyKv {
    pub inner: MemoryKvStore,
    failing_key: String,
}

impl FlakyKv {
    pub fn failing_on(key: &str) -> Self {
        Self {
            inner: MemoryKvStore::new(),
            failing_key: key.to_string(),
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyKv {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        if key == self.failing_key {
            return Err(CoreError::Storage(format!("디스크 가득 참: {key}")));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.inner.remove(key).await
    }
}
