//! 위치 업로드 어댑터.
//!
//! `{latitude, longitude, attendanceLogId}` JSON을 Bearer 토큰과 함께 POST한다.
//! 엔드포인트는 호출마다 받는다 (보고기 설정으로 덮어쓸 수 있음).

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use yamkar_core::error::CoreError;
use yamkar_core::models::location::LocationPayload;
use yamkar_core::ports::location::LocationUploader;

use crate::http::{build_client, check_response, transport_error, API_KEY_HEADER};

/// HTTP 위치 업로더 — `LocationUploader` 포트 구현
pub struct HttpLocationUploader {
    api_key: String,
    client: reqwest::Client,
}

impl HttpLocationUploader {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, CoreError> {
        Ok(Self {
            api_key: api_key.to_string(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl LocationUploader for HttpLocationUploader {
    async fn upload(
        &self,
        endpoint: &str,
        payload: &LocationPayload,
        access_token: &str,
    ) -> Result<(), CoreError> {
        let resp = self
            .client
            .post(endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .bearer_auth(access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| transport_error("위치 업로드 실패", e))?;

        check_response(resp).await?;
        debug!(
            "위치 업로드 완료: ({:.5}, {:.5}) → {}",
            payload.latitude, payload.longitude, payload.attendance_log_id
        );
        Ok(())
    }
}
