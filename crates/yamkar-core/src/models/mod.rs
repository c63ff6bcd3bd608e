//! YAMKAR 도메인 모델.
//!
//! 연결 상태, 인증 세션, 위치 추적 상태, 재시도 큐, 라이프사이클 신호를 정의한다.
//! 영속화되는 모델은 `serde` Serialize/Deserialize를 구현한다.

pub mod connection;
pub mod lifecycle;
pub mod location;
pub mod session;
