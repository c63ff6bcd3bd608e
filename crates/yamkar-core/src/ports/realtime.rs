//! 실시간 채널 포트.
//!
//! 구현: `yamkar-network::realtime::RealtimeClient` (tokio-tungstenite)

use async_trait::async_trait;

use crate::error::CoreError;

/// 실시간 스트리밍 채널: best-effort 연결 관리
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// 연결 수립 (기존 연결은 정리 후 재연결)
    async fn connect(&self, access_token: &str) -> Result<(), CoreError>;

    /// 연결 종료 (연결이 없어도 성공)
    async fn disconnect(&self) -> Result<(), CoreError>;

    /// 현재 연결 여부
    fn is_connected(&self) -> bool;
}
