//! 인증 세션 모델.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 캐시된 사용자 프로필
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// 사용자 ID
    pub id: String,
    /// 이메일
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// 그 외 서버가 내려준 필드 (역할, 메타데이터 등)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 인증 세션: 액세스/리프레시 토큰, 만료 시각, 사용자 프로필
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// 액세스 토큰 (불투명 문자열)
    pub access_token: String,
    /// 리프레시 토큰
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// 만료 시각 (epoch 초). 없으면 검증 불가 세션으로 취급한다.
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// 사용자 프로필
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl Session {
    /// `now` 기준 만료 여부. 만료 시각이 없으면 만료로 본다.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now.timestamp() >= expires_at,
            None => true,
        }
    }

    /// `now + margin` 안에 만료되는지
    ///
    /// 표현할 수 없을 만큼 큰 여유 시간은 만료 임박으로 본다.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(margin)
            .ok()
            .and_then(|margin| now.checked_add_signed(margin))
        {
            Some(deadline) => self.is_expired_at(deadline),
            None => true,
        }
    }
}
