//! 연결 확인 프로브 포트.
//!
//! 구현: `yamkar-network::probe::HttpDataProbe`

use async_trait::async_trait;

use crate::error::CoreError;

/// 백엔드 도달성과 세션 유효성을 확인하는 경량 조회
///
/// 부수효과가 없어야 한다.
#[async_trait]
pub trait DataProbe: Send + Sync {
    async fn probe(&self, access_token: &str) -> Result<(), CoreError>;
}
