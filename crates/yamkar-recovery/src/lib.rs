//! # yamkar-recovery
//!
//! 앱이 다시 활성화될 때 인증된 연결을 결정적으로 복구한다.
//!
//! ## 모듈
//! - `session_store`: 세션 토큰 영속화, 갱신, 복원
//! - `connection`: 연결 복구 상태 머신 (워치독, 재진입 가드)
//! - `lifecycle`: 플랫폼 라이프사이클 신호 → `LifecycleSignal` 변환, 절전 감지

pub mod connection;
pub mod lifecycle;
pub mod session_store;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{ConnectionRecovery, RecoveryFailure, RecoveryOutcome};
pub use lifecycle::{LifecycleHub, SuspendDetector, Visibility};
pub use session_store::SessionStore;
