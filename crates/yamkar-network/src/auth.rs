//! 원격 세션 서비스 어댑터.
//!
//! REST 토큰 엔드포인트로 로그인, 토큰 갱신, 세션 재주입, 로그아웃을 처리한다.
//! 현재 세션은 메모리에만 들고 있으며, 영속화는 `SessionStore` 몫이다.
//!
//! 엔드포인트:
//! - `POST /auth/v1/token?grant_type=password`
//! - `POST /auth/v1/token?grant_type=refresh_token`
//! - `GET  /auth/v1/user`
//! - `POST /auth/v1/logout`

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use yamkar_core::error::CoreError;
use yamkar_core::models::session::{Session, UserProfile};
use yamkar_core::ports::session_service::SessionService;

use crate::http::{build_client, check_response, transport_error, API_KEY_HEADER};

/// 서버 응답: 로그인/리프레시
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: Option<UserProfile>,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs))
            .or_else(|| jwt_expiry(&self.access_token));

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// JWT 페이로드의 `exp` 클레임 (서명 검증 없음)
pub fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<JwtClaims>(&bytes).ok()?.exp
}

/// REST 세션 서비스 — `SessionService` 포트 구현
#[derive(Clone)]
pub struct HttpSessionService {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    session: Arc<RwLock<Option<Session>>>,
}

impl HttpSessionService {
    /// 새 세션 서비스 생성
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, CoreError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: build_client(timeout)?,
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// 토큰 엔드포인트 호출
    ///
    /// 400/401은 자격증명 또는 리프레시 토큰 거부이므로 `CoreError::Auth`.
    async fn request_token(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, CoreError> {
        let url = format!("{}/auth/v1/token?grant_type={grant_type}", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("토큰 요청 실패", e))?;

        let status = resp.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            let text = resp.text().await.unwrap_or_default();
            return Err(CoreError::Auth(format!(
                "토큰 거부 ({grant_type}, {status}): {text}"
            )));
        }

        let token_resp: TokenResponse = check_response(resp)
            .await?
            .json()
            .await
            .map_err(|e| CoreError::Auth(format!("토큰 파싱 실패: {e}")))?;

        let session = token_resp.into_session();
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    /// 액세스 토큰으로 사용자 프로필 조회
    async fn fetch_user(&self, access_token: &str) -> Result<UserProfile, CoreError> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error("사용자 조회 실패", e))?;

        check_response(resp)
            .await?
            .json()
            .await
            .map_err(|e| CoreError::Auth(format!("사용자 파싱 실패: {e}")))
    }
}

#[async_trait]
impl SessionService for HttpSessionService {
    async fn get_session(&self) -> Result<Option<Session>, CoreError> {
        Ok(self.session.read().await.clone())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, CoreError> {
        let mut session = self
            .request_token(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;

        // 서버가 리프레시 토큰을 회전시키지 않으면 기존 토큰 유지
        if session.refresh_token.is_none() {
            session.refresh_token = Some(refresh_token.to_string());
            *self.session.write().await = Some(session.clone());
        }

        debug!("토큰 갱신 성공, 새 만료: {:?}", session.expires_at);
        Ok(session)
    }

    async fn sign_in_with_password(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Session, CoreError> {
        let session = self
            .request_token(
                "password",
                serde_json::json!({ "email": identifier, "password": password }),
            )
            .await?;

        info!("로그인 성공");
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), CoreError> {
        let current = self.session.write().await.take();

        if let Some(session) = current {
            let url = format!("{}/auth/v1/logout", self.base_url);
            let result = self
                .client
                .post(&url)
                .header(API_KEY_HEADER, &self.api_key)
                .bearer_auth(&session.access_token)
                .send()
                .await;
            if let Err(e) = result {
                warn!("원격 로그아웃 실패 (로컬 세션은 제거됨): {e}");
            }
        }

        debug!("로그아웃 완료");
        Ok(())
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Session, CoreError> {
        let expires_at = jwt_expiry(access_token);
        let expired = expires_at.map_or(true, |exp| Utc::now().timestamp() >= exp);

        if expired {
            let refresh_token = refresh_token.ok_or_else(|| {
                CoreError::Auth("만료된 세션에 리프레시 토큰 없음".to_string())
            })?;
            return self.refresh_session(refresh_token).await;
        }

        let user = self.fetch_user(access_token).await?;
        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at,
            user: Some(user),
        };
        *self.session.write().await = Some(session.clone());

        debug!("세션 재주입 완료");
        Ok(session)
    }
}
