//! # yamkar-network
//!
//! HTTP/WebSocket 네트워크 어댑터.
//! 백엔드 인증 서비스(세션 발급/갱신), 연결 확인 프로브,
//! 위치 업로드 엔드포인트, 실시간 채널 통신을 담당한다.
//!
//! ## 모듈
//! - `http`: 공용 HTTP 클라이언트 빌더, 상태 코드 → `CoreError` 매핑
//! - `auth`: `SessionService` 구현 (REST 토큰 엔드포인트)
//! - `probe`: `DataProbe` 구현 (단건 조회)
//! - `location_client`: `LocationUploader` 구현 (JSON POST)
//! - `realtime`: `RealtimeChannel` 구현 (tokio-tungstenite, 하트비트)

pub mod auth;
pub mod http;
pub mod location_client;
pub mod probe;
pub mod realtime;

pub use auth::HttpSessionService;
pub use location_client::HttpLocationUploader;
pub use probe::HttpDataProbe;
pub use realtime::RealtimeClient;
