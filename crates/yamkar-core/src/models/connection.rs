//! 연결 상태 모델.

use serde::{Deserialize, Serialize};

/// 백엔드 연결 상태
///
/// 프로세스 전체에서 한 번에 하나의 값만 유효하다.
/// `Ready`일 때만 데이터 소비자가 세션과 백엔드 도달성을 가정할 수 있다.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    /// 프로세스 기동 직후 (검증 전)
    Connected,
    /// 세션 없음 (로그인 필요, 장애 아님)
    Disconnected,
    /// 복구 시퀀스 시작
    Reconnecting,
    /// 세션 확인/갱신 중
    Authenticating,
    /// 세션 유효 + 백엔드 도달 확인
    Ready,
    /// 복구 실패 (다음 라이프사이클 이벤트 또는 수동 재시도 대기)
    Error,
}

impl ConnectionStatus {
    /// 복구 시퀀스의 종료 상태인지
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Disconnected | ConnectionStatus::Ready | ConnectionStatus::Error
        )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Reconnecting => write!(f, "Reconnecting"),
            ConnectionStatus::Authenticating => write!(f, "Authenticating"),
            ConnectionStatus::Ready => write!(f, "Ready"),
            ConnectionStatus::Error => write!(f, "Error"),
        }
    }
}
