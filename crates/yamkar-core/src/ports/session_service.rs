//! 원격 세션 서비스 포트.
//!
//! 구현: `yamkar-network` crate (reqwest)

use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::session::Session;

/// 원격 인증 서비스: 세션 발급, 갱신, 재주입
#[async_trait]
pub trait SessionService: Send + Sync {
    /// 클라이언트 런타임이 현재 들고 있는 세션
    async fn get_session(&self) -> Result<Option<Session>, CoreError>;

    /// 리프레시 토큰으로 새 세션 발급
    ///
    /// 서버가 토큰을 거부하면 `CoreError::Auth`를 반환한다.
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, CoreError>;

    /// 식별자/비밀번호 로그인
    async fn sign_in_with_password(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Session, CoreError>;

    /// 로그아웃
    async fn sign_out(&self) -> Result<(), CoreError>;

    /// 저장된 토큰 쌍을 클라이언트 런타임에 다시 주입
    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Session, CoreError>;
}

/// 업로드 등에 쓸 Bearer 토큰 공급자
///
/// 구현: `yamkar-recovery::session_store::SessionStore`
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// 현재 액세스 토큰 (없거나 읽기 실패 시 `None`)
    async fn access_token(&self) -> Option<String>;
}
