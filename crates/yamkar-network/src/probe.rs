//! 연결 확인 프로브 어댑터.
//!
//! 행 단위 접근 제어가 걸린 테이블에서 한 건만 조회해
//! 백엔드 도달성과 세션 유효성을 함께 확인한다.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use yamkar_core::error::CoreError;
use yamkar_core::ports::probe::DataProbe;

use crate::http::{build_client, check_response, transport_error, API_KEY_HEADER};

/// 단건 조회 프로브 — `DataProbe` 포트 구현
pub struct HttpDataProbe {
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpDataProbe {
    /// `GET {base_url}/rest/v1/{table}?select=id&limit=1`
    pub fn new(
        base_url: &str,
        api_key: &str,
        table: &str,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            url: format!(
                "{}/rest/v1/{table}?select=id&limit=1",
                base_url.trim_end_matches('/')
            ),
            api_key: api_key.to_string(),
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl DataProbe for HttpDataProbe {
    async fn probe(&self, access_token: &str) -> Result<(), CoreError> {
        let resp = self
            .client
            .get(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error("프로브 요청 실패", e))?;

        check_response(resp).await?;
        debug!("프로브 성공");
        Ok(())
    }
}
