//! 애플리케이션 설정 구조체.
//!
//! 백엔드 URL, 복구 시퀀스 타임아웃, 위치 보고 주기, 저장소 경로,
//! 라이프사이클 감지 주기 등 런타임 설정을 정의한다.
//! 모든 필드에 serde 기본값이 있어 부분 설정 파일도 로드된다.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 백엔드 연결 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 연결 복구 설정
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// 위치 보고 설정
    #[serde(default)]
    pub location: LocationConfig,
    /// 로컬 저장소 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// 라이프사이클 감지 설정
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

// ============================================================
// 서버 설정
// ============================================================

/// 백엔드 연결 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 백엔드 기본 URL (예: "https://xyz.yamkar.app")
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 익명 API 키 (`apikey` 헤더)
    #[serde(default)]
    pub api_key: String,
    /// 요청 타임아웃 (밀리초)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// 실시간 채널 사용 여부
    #[serde(default = "default_true")]
    pub realtime_enabled: bool,
    /// 실시간 채널 하트비트 주기 (초)
    #[serde(default = "default_realtime_heartbeat_secs")]
    pub realtime_heartbeat_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            realtime_enabled: true,
            realtime_heartbeat_secs: default_realtime_heartbeat_secs(),
        }
    }
}

impl ServerConfig {
    /// 실시간 채널 WebSocket URL (http → ws, https → wss)
    pub fn realtime_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!(
            "{ws_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.api_key
        )
    }
}

// ============================================================
// 복구 설정
// ============================================================

/// 연결 복구 시퀀스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// 복구 시퀀스 전체 워치독 (밀리초)
    #[serde(default = "default_watchdog_ms")]
    pub watchdog_ms: u64,
    /// 세션 조회 타임아웃 (밀리초)
    #[serde(default = "default_session_check_timeout_ms")]
    pub session_check_timeout_ms: u64,
    /// 토큰 갱신 타임아웃 (밀리초)
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    /// 프로브 쿼리 타임아웃 (밀리초)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// 이 시간보다 오래 비활성이었으면 토큰 강제 갱신 (밀리초)
    #[serde(default = "default_long_inactivity_threshold_ms")]
    pub long_inactivity_threshold_ms: u64,
    /// 실시간 채널 disconnect → connect 사이 지연 (밀리초)
    #[serde(default = "default_realtime_reset_delay_ms")]
    pub realtime_reset_delay_ms: u64,
    /// 프로브 대상 테이블
    #[serde(default = "default_probe_table")]
    pub probe_table: String,
    /// 만료 전 선제 갱신 여유 (초)
    #[serde(default = "default_token_refresh_margin_secs")]
    pub token_refresh_margin_secs: u64,
    /// 선제 갱신 확인 주기 (초)
    #[serde(default = "default_token_refresh_check_secs")]
    pub token_refresh_check_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            watchdog_ms: default_watchdog_ms(),
            session_check_timeout_ms: default_session_check_timeout_ms(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            long_inactivity_threshold_ms: default_long_inactivity_threshold_ms(),
            realtime_reset_delay_ms: default_realtime_reset_delay_ms(),
            probe_table: default_probe_table(),
            token_refresh_margin_secs: default_token_refresh_margin_secs(),
            token_refresh_check_secs: default_token_refresh_check_secs(),
        }
    }
}

impl RecoveryConfig {
    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn session_check_timeout(&self) -> Duration {
        Duration::from_millis(self.session_check_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn long_inactivity_threshold(&self) -> Duration {
        Duration::from_millis(self.long_inactivity_threshold_ms)
    }

    pub fn realtime_reset_delay(&self) -> Duration {
        Duration::from_millis(self.realtime_reset_delay_ms)
    }

    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }

    pub fn token_refresh_check(&self) -> Duration {
        Duration::from_secs(self.token_refresh_check_secs.max(1))
    }
}

// ============================================================
// 위치 보고 설정
// ============================================================

/// 백그라운드 위치 보고 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    /// 최소 업로드 간격 (밀리초)
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// 이 거리 이상 이동하면 간격과 무관하게 업로드 (미터)
    #[serde(default = "default_distance_filter_m")]
    pub distance_filter_m: f64,
    /// 고정밀 측위
    #[serde(default = "default_true")]
    pub high_accuracy: bool,
    /// 업로드 엔드포인트 (None이면 `{base_url}/functions/v1/location-update`)
    #[serde(default)]
    pub upload_endpoint: Option<String>,
    /// 백그라운드 알림 제목
    #[serde(default = "default_notification_title")]
    pub notification_title: String,
    /// 백그라운드 알림 본문
    #[serde(default = "default_notification_text")]
    pub notification_text: String,
    /// 단일 측위 타임아웃 (밀리초)
    #[serde(default = "default_position_timeout_ms")]
    pub position_timeout_ms: u64,
    /// 캐시 위치 허용 최대 나이 (밀리초)
    #[serde(default)]
    pub maximum_age_ms: u64,
    /// 업로드 타임아웃 (밀리초)
    #[serde(default = "default_upload_timeout_ms")]
    pub upload_timeout_ms: u64,
    /// 실패 업로드 재시도 큐 용량
    #[serde(default = "default_retry_capacity")]
    pub retry_capacity: usize,
    /// gpsd 주소
    #[serde(default = "default_gpsd_addr")]
    pub gpsd_addr: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            distance_filter_m: default_distance_filter_m(),
            high_accuracy: true,
            upload_endpoint: None,
            notification_title: default_notification_title(),
            notification_text: default_notification_text(),
            position_timeout_ms: default_position_timeout_ms(),
            maximum_age_ms: 0,
            upload_timeout_ms: default_upload_timeout_ms(),
            retry_capacity: default_retry_capacity(),
            gpsd_addr: default_gpsd_addr(),
        }
    }
}

impl LocationConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn position_timeout(&self) -> Duration {
        Duration::from_millis(self.position_timeout_ms)
    }

    pub fn maximum_age(&self) -> Duration {
        Duration::from_millis(self.maximum_age_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    /// 실제 업로드 URL
    pub fn resolved_upload_endpoint(&self, base_url: &str) -> String {
        match &self.upload_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "{}/functions/v1/location-update",
                base_url.trim_end_matches('/')
            ),
        }
    }

    /// 호출자가 넘긴 부분 설정을 덮어쓴 새 설정
    pub fn merged(&self, overrides: &LocationOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(v) = overrides.update_interval_ms {
            merged.update_interval_ms = v;
        }
        if let Some(v) = overrides.distance_filter_m {
            merged.distance_filter_m = v;
        }
        if let Some(v) = overrides.high_accuracy {
            merged.high_accuracy = v;
        }
        if let Some(v) = &overrides.upload_endpoint {
            merged.upload_endpoint = Some(v.clone());
        }
        if let Some(v) = &overrides.notification_title {
            merged.notification_title = v.clone();
        }
        if let Some(v) = &overrides.notification_text {
            merged.notification_text = v.clone();
        }
        merged
    }
}

/// `LocationReporter::initialize`에 넘기는 부분 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationOverrides {
    pub update_interval_ms: Option<u64>,
    pub distance_filter_m: Option<f64>,
    pub high_accuracy: Option<bool>,
    pub upload_endpoint: Option<String>,
    pub notification_title: Option<String>,
    pub notification_text: Option<String>,
}

// ============================================================
// 저장소 / 라이프사이클 설정
// ============================================================

/// 로컬 저장소 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite DB 파일 경로 (None이면 플랫폼 기본 경로)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// 라이프사이클 감지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// 절전 감지 틱 주기 (밀리초)
    #[serde(default = "default_suspend_check_interval_ms")]
    pub suspend_check_interval_ms: u64,
    /// 틱 사이 벽시계 공백이 이 값을 넘으면 절전 복귀로 판단 (밀리초)
    #[serde(default = "default_suspend_gap_threshold_ms")]
    pub suspend_gap_threshold_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            suspend_check_interval_ms: default_suspend_check_interval_ms(),
            suspend_gap_threshold_ms: default_suspend_gap_threshold_ms(),
        }
    }
}

impl LifecycleConfig {
    pub fn suspend_check_interval(&self) -> Duration {
        Duration::from_millis(self.suspend_check_interval_ms.max(1))
    }

    pub fn suspend_gap_threshold(&self) -> Duration {
        Duration::from_millis(self.suspend_gap_threshold_ms)
    }
}

// ============================================================
// AppConfig impl
// ============================================================

impl AppConfig {
    /// 기본 설정값 반환
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            recovery: RecoveryConfig::default(),
            location: LocationConfig::default(),
            storage: StorageConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }

    /// 서버 요청 타임아웃을 Duration으로 반환
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }
}

// ============================================================
// serde 기본값 함수
// ============================================================

fn default_true() -> bool {
    true
}
fn default_base_url() -> String {
    "http://localhost:54321".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_realtime_heartbeat_secs() -> u64 {
    30
}
fn default_watchdog_ms() -> u64 {
    10_000
}
fn default_session_check_timeout_ms() -> u64 {
    5_000
}
fn default_refresh_timeout_ms() -> u64 {
    8_000
}
fn default_probe_timeout_ms() -> u64 {
    5_000
}
fn default_long_inactivity_threshold_ms() -> u64 {
    10_000
}
fn default_realtime_reset_delay_ms() -> u64 {
    500
}
fn default_probe_table() -> String {
    "profiles".to_string()
}
fn default_token_refresh_margin_secs() -> u64 {
    300
}
fn default_token_refresh_check_secs() -> u64 {
    60
}
fn default_update_interval_ms() -> u64 {
    30_000
}
fn default_distance_filter_m() -> f64 {
    10.0
}
fn default_notification_title() -> String {
    "위치 추적 중".to_string()
}
fn default_notification_text() -> String {
    "근무 중 위치를 주기적으로 보고하고 있습니다".to_string()
}
fn default_position_timeout_ms() -> u64 {
    10_000
}
fn default_upload_timeout_ms() -> u64 {
    10_000
}
fn default_retry_capacity() -> usize {
    50
}
fn default_gpsd_addr() -> String {
    "127.0.0.1:2947".to_string()
}
fn default_suspend_check_interval_ms() -> u64 {
    2_000
}
fn default_suspend_gap_threshold_ms() -> u64 {
    10_000
}
