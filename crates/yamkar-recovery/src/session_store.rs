//! 세션 저장소.
//!
//! 액세스/리프레시 토큰, 만료 시각, 사용자 프로필을 키-값 저장소에
//! 키 단위로 영속화하고, 원격 세션 서비스로 갱신/복원한다.
//!
//! 메모리 스냅샷은 쓰기 잠금 아래에서 통째로 교체되므로
//! 동시에 읽는 쪽은 이전 세션 또는 새 세션 하나만 본다.
//! 저장된 자격증명을 지우는 경로는 `sign_out()` 하나뿐이다.
//!
//! 리프레시 토큰은 한 번만 쓸 수 있으므로 갱신은 한 번에 하나씩 진행한다.
//! 대기하던 호출자는 그 사이 토큰이 바뀌었으면 네트워크 없이 새 세션을 받는다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use yamkar_core::bounded::bounded;
use yamkar_core::error::CoreError;
use yamkar_core::models::session::{Session, UserProfile};
use yamkar_core::ports::kv_store::KeyValueStore;
use yamkar_core::ports::session_service::{AccessTokenProvider, SessionService};

/// 액세스 토큰 키
pub const ACCESS_TOKEN_KEY: &str = "auth.access_token";
/// 리프레시 토큰 키
pub const REFRESH_TOKEN_KEY: &str = "auth.refresh_token";
/// 만료 시각 키 (epoch 초, 10진 문자열)
pub const EXPIRES_AT_KEY: &str = "auth.expires_at";
/// 사용자 프로필 키 (JSON)
pub const USER_KEY: &str = "auth.user";
/// 마지막 활성 시각 키 (epoch 밀리초)
pub const LAST_ACTIVE_KEY: &str = "app.last_active_at";

const AUTH_KEYS: [&str; 4] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY, USER_KEY];

/// 메모리 스냅샷
enum Snapshot {
    /// 아직 저장소에서 읽지 않음
    Unloaded,
    Loaded(Option<Session>),
}

/// 세션 저장소
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    service: Arc<dyn SessionService>,
    call_timeout: Duration,
    snapshot: RwLock<Snapshot>,
    refresh_flight: Mutex<()>,
}

impl SessionStore {
    /// 새 세션 저장소 생성
    ///
    /// `call_timeout`: 원격 갱신/재주입 호출 제한 시간
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        service: Arc<dyn SessionService>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            kv,
            service,
            call_timeout,
            snapshot: RwLock::new(Snapshot::Unloaded),
            refresh_flight: Mutex::new(()),
        }
    }

    // ── 저장 ─────────────────────────────────────────────

    /// 세션 영속화
    ///
    /// 네 개의 키를 각각 기록한다. 한 키의 쓰기 실패는 로그만 남기고
    /// 나머지 키 기록을 계속한다. 새 세션에 리프레시 토큰이나 사용자 프로필이
    /// 없으면 기존 값을 유지한다.
    pub async fn store(&self, session: &Session) {
        let mut snapshot = self.snapshot.write().await;
        let previous = match &*snapshot {
            Snapshot::Loaded(previous) => previous.clone(),
            Snapshot::Unloaded => self.load().await.ok().flatten(),
        };

        let mut merged = session.clone();
        if let Some(previous) = previous {
            if merged.refresh_token.is_none() {
                merged.refresh_token = previous.refresh_token;
            }
            if merged.user.is_none() {
                merged.user = previous.user;
            }
        }

        self.write_key(ACCESS_TOKEN_KEY, &merged.access_token).await;

        if let Some(refresh_token) = &merged.refresh_token {
            self.write_key(REFRESH_TOKEN_KEY, refresh_token).await;
        }

        match merged.expires_at {
            Some(expires_at) => self.write_key(EXPIRES_AT_KEY, &expires_at.to_string()).await,
            None => self.remove_key(EXPIRES_AT_KEY).await,
        }

        if let Some(user) = &merged.user {
            match serde_json::to_string(user) {
                Ok(json) => self.write_key(USER_KEY, &json).await,
                Err(e) => warn!("사용자 프로필 직렬화 실패: {e}"),
            }
        }

        *snapshot = Snapshot::Loaded(Some(merged));
        debug!("세션 저장 완료");
    }

    async fn write_key(&self, key: &str, value: &str) {
        if let Err(e) = self.kv.set(key, value).await {
            warn!("세션 키 저장 실패 ({key}): {e}");
        }
    }

    async fn remove_key(&self, key: &str) {
        if let Err(e) = self.kv.remove(key).await {
            warn!("세션 키 삭제 실패 ({key}): {e}");
        }
    }

    // ── 조회 ─────────────────────────────────────────────

    /// 저장소에서 세션 읽기
    ///
    /// 액세스 토큰 읽기 실패만 에러로 돌려준다. 나머지 키는 없거나 깨졌으면
    /// 비어 있는 것으로 본다 (만료 시각이 없으면 만료된 세션이 된다).
    async fn load(&self) -> Result<Option<Session>, CoreError> {
        let Some(access_token) = self.kv.get(ACCESS_TOKEN_KEY).await? else {
            return Ok(None);
        };

        let refresh_token = self.read_optional(REFRESH_TOKEN_KEY).await;
        let expires_at = self
            .read_optional(EXPIRES_AT_KEY)
            .await
            .and_then(|raw| raw.trim().parse::<i64>().ok());
        let user = self
            .read_optional(USER_KEY)
            .await
            .and_then(|raw| serde_json::from_str::<UserProfile>(&raw).ok());

        Ok(Some(Session {
            access_token,
            refresh_token,
            expires_at,
            user,
        }))
    }

    async fn read_optional(&self, key: &str) -> Option<String> {
        match self.kv.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("세션 키 읽기 실패 ({key}): {e}");
                None
            }
        }
    }

    /// 현재 세션 스냅샷 (처음 호출 시 저장소에서 로드)
    pub async fn current(&self) -> Option<Session> {
        if let Snapshot::Loaded(session) = &*self.snapshot.read().await {
            return session.clone();
        }

        let mut snapshot = self.snapshot.write().await;
        if let Snapshot::Loaded(session) = &*snapshot {
            return session.clone();
        }

        match self.load().await {
            Ok(session) => {
                *snapshot = Snapshot::Loaded(session.clone());
                session
            }
            Err(e) => {
                // 캐시하지 않음: 다음 조회에서 다시 시도
                warn!("세션 로드 실패: {e}");
                None
            }
        }
    }

    /// 저장된 액세스 토큰
    pub async fn get_token(&self) -> Option<String> {
        self.current().await.map(|s| s.access_token)
    }

    /// 저장된 사용자 프로필
    pub async fn get_user(&self) -> Option<UserProfile> {
        self.current().await.and_then(|s| s.user)
    }

    /// 만료 여부: 만료 시각이 없거나 해석할 수 없으면 만료로 본다
    pub async fn is_expired(&self) -> bool {
        match self.current().await {
            Some(session) => session.is_expired_at(Utc::now()),
            None => true,
        }
    }

    /// 세션이 있고 `margin` 안에 만료되는지 (선제 갱신 판단용)
    pub async fn expires_within(&self, margin: Duration) -> bool {
        self.current()
            .await
            .is_some_and(|s| s.expires_within(margin, Utc::now()))
    }

    // ── 갱신 / 복원 ──────────────────────────────────────

    /// 리프레시 토큰으로 세션 갱신, 실패 원인 반환
    ///
    /// 실패해도 기존 토큰은 그대로 남는다.
    /// 서버가 리프레시 토큰을 거부하면 `CoreError::Auth`.
    pub async fn try_refresh(&self) -> Result<Session, CoreError> {
        let observed = self.current().await.and_then(|s| s.refresh_token);
        let _flight = self.refresh_flight.lock().await;

        let current = self
            .current()
            .await
            .ok_or_else(|| CoreError::Auth("저장된 리프레시 토큰 없음".to_string()))?;
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(|| CoreError::Auth("저장된 리프레시 토큰 없음".to_string()))?;

        if observed.is_some_and(|observed| observed != refresh_token) {
            debug!("대기 중 다른 호출이 세션을 갱신함, 재사용");
            return Ok(current);
        }

        let session = bounded(
            "세션 갱신",
            self.call_timeout,
            self.service.refresh_session(&refresh_token),
        )
        .await?;

        self.store(&session).await;
        info!("세션 갱신 완료, 만료: {:?}", session.expires_at);
        Ok(session)
    }

    /// 세션 갱신: 성공 여부만 반환
    pub async fn refresh(&self) -> bool {
        match self.try_refresh().await {
            Ok(_) => true,
            Err(e) => {
                warn!("세션 갱신 실패: {e}");
                false
            }
        }
    }

    /// 저장된 토큰으로 원격 클라이언트 세션 복원
    ///
    /// 저장된 토큰이 없으면 `Ok(None)`. 만료됐으면 갱신, 아니면 토큰 쌍을 재주입한다.
    pub async fn try_restore(&self) -> Result<Option<Session>, CoreError> {
        let Some(stored) = self.current().await else {
            debug!("복원할 세션 없음");
            return Ok(None);
        };

        if stored.is_expired_at(Utc::now()) {
            debug!("저장된 세션 만료, 갱신으로 복원");
            return self.try_refresh().await.map(Some);
        }

        let session = bounded(
            "세션 재주입",
            self.call_timeout,
            self.service
                .set_session(&stored.access_token, stored.refresh_token.as_deref()),
        )
        .await?;

        self.store(&session).await;
        debug!("세션 복원 완료");
        Ok(Some(session))
    }

    /// 세션 복원: 성공 여부만 반환
    pub async fn restore(&self) -> bool {
        match self.try_restore().await {
            Ok(restored) => restored.is_some(),
            Err(e) => {
                warn!("세션 복원 실패: {e}");
                false
            }
        }
    }

    // ── 로그인 / 로그아웃 ────────────────────────────────

    /// 식별자/비밀번호 로그인 후 세션 저장
    pub async fn sign_in(&self, identifier: &str, password: &str) -> Result<Session, CoreError> {
        let session = bounded(
            "로그인",
            self.call_timeout,
            self.service.sign_in_with_password(identifier, password),
        )
        .await?;

        self.store(&session).await;
        info!("로그인 세션 저장 완료");
        Ok(session)
    }

    /// 로그아웃: 원격 로그아웃은 best-effort, 로컬 자격증명은 항상 삭제
    pub async fn sign_out(&self) {
        if let Err(e) = bounded("로그아웃", self.call_timeout, self.service.sign_out()).await {
            warn!("원격 로그아웃 실패: {e}");
        }

        let mut snapshot = self.snapshot.write().await;
        for key in AUTH_KEYS {
            self.remove_key(key).await;
        }
        *snapshot = Snapshot::Loaded(None);
        info!("로컬 세션 삭제 완료");
    }

    // ── 마지막 활성 시각 ─────────────────────────────────

    /// 앱이 비활성으로 전환된 시각 기록
    pub async fn mark_active(&self, at: DateTime<Utc>) {
        let millis = at.timestamp_millis().to_string();
        if let Err(e) = self.kv.set(LAST_ACTIVE_KEY, &millis).await {
            warn!("마지막 활성 시각 저장 실패: {e}");
        }
    }

    /// 마지막 활성 시각 (없거나 깨졌으면 `None`)
    pub async fn last_active_at(&self) -> Option<DateTime<Utc>> {
        self.read_optional(LAST_ACTIVE_KEY)
            .await
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
    }
}

#[async_trait]
impl AccessTokenProvider for SessionStore {
    async fn access_token(&self) -> Option<String> {
        self.get_token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{session, FlakyKv, MockSessionService};
    use yamkar_storage::MemoryKvStore;

    fn store_with(
        kv: Arc<dyn KeyValueStore>,
        service: Arc<MockSessionService>,
    ) -> SessionStore {
        SessionStore::new(kv, service, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn store_writes_four_keys() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = store_with(kv.clone(), Arc::new(MockSessionService::new()));

        store.store(&session("jwt_1", 3_600)).await;

        assert_eq!(kv.peek(ACCESS_TOKEN_KEY).as_deref(), Some("jwt_1"));
        assert_eq!(kv.peek(REFRESH_TOKEN_KEY).as_deref(), Some("ref_jwt_1"));
        assert!(kv.peek(EXPIRES_AT_KEY).is_some());
        assert!(kv.peek(USER_KEY).unwrap().contains("u_1"));
    }

    #[tokio::test]
    async fn failing_key_does_not_stop_other_writes() {
        let kv = Arc::new(FlakyKv::failing_on(REFRESH_TOKEN_KEY));
        let store = store_with(kv.clone(), Arc::new(MockSessionService::new()));

        store.store(&session("jwt_1", 3_600)).await;

        assert_eq!(kv.inner.peek(ACCESS_TOKEN_KEY).as_deref(), Some("jwt_1"));
        assert!(kv.inner.peek(REFRESH_TOKEN_KEY).is_none());
        assert!(kv.inner.peek(EXPIRES_AT_KEY).is_some());
        assert!(kv.inner.peek(USER_KEY).is_some());
    }

    #[tokio::test]
    async fn missing_or_garbled_expiry_is_expired() {
        let kv = Arc::new(MemoryKvStore::with_entries([(ACCESS_TOKEN_KEY, "jwt_1")]));
        let store = store_with(kv, Arc::new(MockSessionService::new()));
        assert!(store.is_expired().await);

        let kv = Arc::new(MemoryKvStore::with_entries([
            (ACCESS_TOKEN_KEY, "jwt_1"),
            (EXPIRES_AT_KEY, "내일"),
        ]));
        let store = store_with(kv, Arc::new(MockSessionService::new()));
        assert!(store.is_expired().await);
        assert_eq!(store.get_token().await.as_deref(), Some("jwt_1"));
    }

    #[tokio::test]
    async fn future_expiry_is_valid() {
        let store = store_with(
            Arc::new(MemoryKvStore::new()),
            Arc::new(MockSessionService::new()),
        );
        store.store(&session("jwt_1", 3_600)).await;
        assert!(!store.is_expired().await);
        assert!(store.expires_within(Duration::from_secs(7_200)).await);
        assert!(!store.expires_within(Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn refresh_success_replaces_tokens() {
        let kv = Arc::new(MemoryKvStore::new());
        let service = Arc::new(MockSessionService::new());
        service.set_refresh_result(Ok(session("jwt_2", 3_600)));
        let store = store_with(kv.clone(), service.clone());
        store.store(&session("jwt_1", -10)).await;

        assert!(store.refresh().await);
        assert_eq!(store.get_token().await.as_deref(), Some("jwt_2"));
        assert_eq!(kv.peek(ACCESS_TOKEN_KEY).as_deref(), Some("jwt_2"));
        assert_eq!(service.refresh_calls(), vec!["ref_jwt_1".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_refreshes_spend_token_once() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let service = Arc::new(MockSessionService::new().rotating());
        service.gate_refresh(gate.clone());
        let store = Arc::new(store_with(Arc::new(MemoryKvStore::new()), service.clone()));
        store.store(&session("jwt_old", -10)).await;

        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.try_refresh().await })
        };
        while service.refresh_calls().is_empty() {
            tokio::task::yield_now().await;
        }
        let second = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.try_refresh().await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!(first.access_token, "jwt_rotated_1");
        assert_eq!(second.access_token, "jwt_rotated_1");
        assert_eq!(service.refresh_calls(), vec!["ref_jwt_old".to_string()]);
        assert_eq!(store.get_token().await.as_deref(), Some("jwt_rotated_1"));
    }

    #[tokio::test]
    async fn refresh_failure_keeps_old_tokens() {
        let kv = Arc::new(MemoryKvStore::new());
        let service = Arc::new(MockSessionService::new());
        service.set_refresh_result(Err(CoreError::Network("오프라인".into())));
        let store = store_with(kv.clone(), service);
        store.store(&session("jwt_1", -10)).await;

        assert!(!store.refresh().await);
        assert_eq!(store.get_token().await.as_deref(), Some("jwt_1"));
        assert_eq!(kv.peek(REFRESH_TOKEN_KEY).as_deref(), Some("ref_jwt_1"));
    }

    #[tokio::test]
    async fn rejected_refresh_is_classified() {
        let service = Arc::new(MockSessionService::new());
        service.set_refresh_result(Err(CoreError::Auth("invalid_grant".into())));
        let store = store_with(Arc::new(MemoryKvStore::new()), service);
        store.store(&session("jwt_1", -10)).await;

        let err = store.try_refresh().await.unwrap_err();
        assert!(err.is_unauthenticated());
        assert_eq!(store.get_token().await.as_deref(), Some("jwt_1"));
    }

    #[tokio::test]
    async fn refresh_keeps_previous_user_when_absent() {
        let service = Arc::new(MockSessionService::new());
        let mut refreshed = session("jwt_2", 3_600);
        refreshed.user = None;
        refreshed.refresh_token = None;
        service.set_refresh_result(Ok(refreshed));
        let store = store_with(Arc::new(MemoryKvStore::new()), service);
        store.store(&session("jwt_1", 10)).await;

        assert!(store.refresh().await);
        assert_eq!(store.get_user().await.unwrap().id, "u_1");
        let current = store.current().await.unwrap();
        assert_eq!(current.refresh_token.as_deref(), Some("ref_jwt_1"));
    }

    #[tokio::test]
    async fn restore_without_token_is_false() {
        let service = Arc::new(MockSessionService::new());
        let store = store_with(Arc::new(MemoryKvStore::new()), service.clone());
        assert!(!store.restore().await);
        assert!(service.set_session_calls().is_empty());
    }

    #[tokio::test]
    async fn restore_valid_token_reinjects_pair() {
        let service = Arc::new(MockSessionService::new());
        let store = store_with(Arc::new(MemoryKvStore::new()), service.clone());
        store.store(&session("jwt_1", 3_600)).await;

        assert!(store.restore().await);
        assert_eq!(
            service.set_session_calls(),
            vec![("jwt_1".to_string(), Some("ref_jwt_1".to_string()))]
        );
        assert!(service.refresh_calls().is_empty());
    }

    #[tokio::test]
    async fn restore_expired_token_refreshes() {
        let service = Arc::new(MockSessionService::new());
        service.set_refresh_result(Ok(session("jwt_2", 3_600)));
        let store = store_with(Arc::new(MemoryKvStore::new()), service.clone());
        store.store(&session("jwt_1", -60)).await;

        assert!(store.restore().await);
        assert!(service.set_session_calls().is_empty());
        assert_eq!(store.get_token().await.as_deref(), Some("jwt_2"));
    }

    #[tokio::test]
    async fn persisted_session_survives_new_store() {
        let kv: Arc<MemoryKvStore> = Arc::new(MemoryKvStore::new());
        let service = Arc::new(MockSessionService::new());
        store_with(kv.clone(), service.clone())
            .store(&session("jwt_1", 3_600))
            .await;

        let reopened = store_with(kv, service);
        assert_eq!(reopened.get_token().await.as_deref(), Some("jwt_1"));
        assert_eq!(reopened.get_user().await.unwrap().id, "u_1");
        assert!(!reopened.is_expired().await);
    }

    #[tokio::test]
    async fn sign_in_then_sign_out_clears_credentials() {
        let kv = Arc::new(MemoryKvStore::new());
        let service = Arc::new(MockSessionService::new());
        let store = store_with(kv.clone(), service.clone());

        store.sign_in("kim@yamkar.test", "pw").await.unwrap();
        assert!(store.get_token().await.is_some());
        store.mark_active(Utc::now()).await;

        store.sign_out().await;
        assert!(store.get_token().await.is_none());
        for key in AUTH_KEYS {
            assert!(kv.peek(key).is_none(), "{key} 남아 있음");
        }
        assert!(kv.peek(LAST_ACTIVE_KEY).is_some());
        assert_eq!(service.sign_out_calls(), 1);
    }

    #[tokio::test]
    async fn last_active_roundtrip() {
        let store = store_with(
            Arc::new(MemoryKvStore::new()),
            Arc::new(MockSessionService::new()),
        );
        assert!(store.last_active_at().await.is_none());

        let at = DateTime::from_timestamp_millis(1_700_000_123_456).unwrap();
        store.mark_active(at).await;
        assert_eq!(store.last_active_at().await, Some(at));
    }

    #[tokio::test]
    async fn access_token_provider_reads_store() {
        let store = store_with(
            Arc::new(MemoryKvStore::new()),
            Arc::new(MockSessionService::new()),
        );
        let provider: &dyn AccessTokenProvider = &store;
        assert!(provider.access_token().await.is_none());

        store.store(&session("jwt_1", 3_600)).await;
        assert_eq!(provider.access_token().await.as_deref(), Some("jwt_1"));
    }
}
