//! 공용 HTTP 유틸리티.
//!
//! 클라이언트 빌더와 응답 상태 코드 매핑.

use reqwest::header::RETRY_AFTER;
use std::time::Duration;
use tracing::warn;
use yamkar_core::error::CoreError;

/// `apikey` 헤더 이름
pub const API_KEY_HEADER: &str = "apikey";

/// Retry-After 헤더가 없을 때 기본 대기 시간 (초)
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// 요청 타임아웃이 설정된 HTTP 클라이언트 생성
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, CoreError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {}", e)))
}

/// 전송 단계 에러 변환 (연결 실패, 타임아웃)
pub fn transport_error(context: &str, err: reqwest::Error) -> CoreError {
    if err.is_timeout() {
        CoreError::Network(format!("{context}: 응답 시간 초과"))
    } else {
        CoreError::Network(format!("{context}: {err}"))
    }
}

/// HTTP 응답 상태 확인: 2xx가 아니면 `CoreError`로 변환
pub async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, CoreError> {
    let status = resp.status();

    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let status_code = status.as_u16();
    let text = resp.text().await.unwrap_or_else(|e| {
        warn!("응답 본문 읽기 실패: {e}");
        String::new()
    });

    match status_code {
        401 | 403 => Err(CoreError::Auth(format!("인증 실패 ({status}): {text}"))),
        404 => Err(CoreError::NotFound {
            resource_type: "API".to_string(),
            id: text,
        }),
        429 => Err(CoreError::RateLimit {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        }),
        502..=504 => Err(CoreError::ServiceUnavailable(text)),
        _ => Err(CoreError::Internal(format!("API 에러 ({status}): {text}"))),
    }
}
