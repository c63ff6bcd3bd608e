//! 위치 제공자 / 업로더 포트.
//!
//! 구현: `yamkar-location::gpsd` (위치), `yamkar-network::location_client` (업로드)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::error::CoreError;
use crate::models::location::{LocationPayload, Position};

/// 플랫폼 위치 감시가 내보내는 샘플 (측정 실패는 `Err`)
pub type PositionSample = Result<Position, CoreError>;

/// 권한 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    /// 아직 사용자에게 묻지 않음
    Prompt,
}

/// 권한 요청 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScope {
    /// 기본 위치 권한
    Foreground,
    /// 백그라운드 상승 권한
    Background,
}

/// 위치 권한 현황
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStatus {
    pub location: PermissionState,
    pub background: PermissionState,
}

impl PermissionStatus {
    pub fn granted() -> Self {
        Self {
            location: PermissionState::Granted,
            background: PermissionState::Granted,
        }
    }

    pub fn denied() -> Self {
        Self {
            location: PermissionState::Denied,
            background: PermissionState::Denied,
        }
    }

    /// 기본 위치 권한 허용 여부
    pub fn location_granted(&self) -> bool {
        self.location == PermissionState::Granted
    }
}

/// 위치 감시 옵션
#[derive(Debug, Clone, PartialEq)]
pub struct WatchOptions {
    /// 고정밀 측위
    pub high_accuracy: bool,
    /// 단일 측위 타임아웃
    pub timeout: Duration,
    /// 캐시된 위치 허용 최대 나이
    pub maximum_age: Duration,
    /// 플랫폼 거리 필터 (미터)
    pub distance_filter_m: f64,
    /// 백그라운드 알림 제목
    pub notification_title: String,
    /// 백그라운드 알림 본문
    pub notification_text: String,
}

/// 취소 가능한 위치 감시 구독
///
/// `samples`는 제공자가 감시를 멈추면 닫힌다.
#[derive(Debug)]
pub struct PositionWatch {
    pub samples: mpsc::Receiver<PositionSample>,
    pub canceller: WatchCanceller,
}

/// 위치 감시 취소 핸들: drop 시에도 취소된다
#[derive(Debug)]
pub struct WatchCanceller(Option<oneshot::Sender<()>>);

impl WatchCanceller {
    /// 감시 취소 (여러 번 호출해도 안전)
    pub fn cancel(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl Drop for WatchCanceller {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// 제공자 쪽 송신 단: 샘플 송신 + 취소 수신
pub struct WatchFeed {
    pub samples: mpsc::Sender<PositionSample>,
    pub cancelled: oneshot::Receiver<()>,
}

/// 연결된 (제공자 송신 단, 구독) 쌍 생성
pub fn position_watch(buffer: usize) -> (WatchFeed, PositionWatch) {
    let (sample_tx, sample_rx) = mpsc::channel(buffer.max(1));
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        WatchFeed {
            samples: sample_tx,
            cancelled: cancel_rx,
        },
        PositionWatch {
            samples: sample_rx,
            canceller: WatchCanceller(Some(cancel_tx)),
        },
    )
}

/// 플랫폼 위치 제공자
#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// 현재 권한 상태
    async fn check_permissions(&self) -> Result<PermissionStatus, CoreError>;

    /// 권한 요청
    async fn request_permissions(
        &self,
        scope: PermissionScope,
    ) -> Result<PermissionStatus, CoreError>;

    /// 백그라운드 추적에 별도 상승 권한이 필요한 플랫폼인지
    fn requires_background_grant(&self) -> bool {
        false
    }

    /// 단발성 위치 조회
    async fn current_position(&self, options: &WatchOptions) -> Result<Position, CoreError>;

    /// 위치 감시 시작
    async fn start_watch(&self, options: &WatchOptions) -> Result<PositionWatch, CoreError>;
}

/// 위치 업로드 엔드포인트
#[async_trait]
pub trait LocationUploader: Send + Sync {
    /// `endpoint`로 위치 1건을 Bearer 토큰과 함께 전송 (2xx가 아니면 에러)
    async fn upload(
        &self,
        endpoint: &str,
        payload: &LocationPayload,
        access_token: &str,
    ) -> Result<(), CoreError>;
}
