//! 타임아웃 경합 결합자.
//!
//! 네트워크/저장소 호출을 정해진 시간 안에 끝내도록 감싼다.
//! 시간 초과는 항상 실패(`CoreError::ExecutionTimeout`)로 취급한다.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::CoreError;

/// `operation`을 `limit` 안에 완료시키거나 타임아웃 에러를 반환한다.
///
/// `label`은 타임아웃 로그에만 쓰인다.
pub async fn bounded<T, F>(label: &str, limit: Duration, operation: F) -> Result<T, CoreError>
where
    F: Future<Output = Result<T, CoreError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => {
            let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            debug!("{label}: {timeout_ms}ms 타임아웃");
            Err(CoreError::ExecutionTimeout { timeout_ms })
        }
    }
}
