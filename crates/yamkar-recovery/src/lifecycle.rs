//! 라이프사이클 신호 어댑터.
//!
//! 페이지 가시성, 앱 상태(포그라운드/백그라운드), 시스템 절전 복귀를
//! 하나의 `LifecycleSignal` 스트림으로 합친다. 소비자는 `subscribe()`로
//! 받은 수신기를 복구 드라이버나 위치 보고기에 넘긴다.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info};
use yamkar_core::config::LifecycleConfig;
use yamkar_core::models::lifecycle::LifecycleSignal;

/// 페이지 가시성
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// 라이프사이클 신호 허브
pub struct LifecycleHub {
    tx: broadcast::Sender<LifecycleSignal>,
}

impl LifecycleHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 신호 발행 (구독자가 없어도 실패하지 않음)
    pub fn emit(&self, signal: LifecycleSignal) {
        debug!("라이프사이클 신호: {signal:?}");
        let _ = self.tx.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.tx.subscribe()
    }

    /// 페이지 가시성 변경 shim
    pub fn on_visibility_change(&self, visibility: Visibility) {
        match visibility {
            Visibility::Visible => self.emit(LifecycleSignal::BecameActive),
            Visibility::Hidden => self.emit(LifecycleSignal::inactive_now()),
        }
    }

    /// 앱 상태 변경 shim (`is_active`: 포그라운드 여부)
    pub fn on_app_state_change(&self, is_active: bool) {
        if is_active {
            self.emit(LifecycleSignal::BecameActive);
        } else {
            self.emit(LifecycleSignal::inactive_now());
        }
    }
}

impl Default for LifecycleHub {
    fn default() -> Self {
        Self::new(32)
    }
}

/// 시스템 절전 감지기
///
/// 단조 시계는 절전 중 멈추고 벽시계는 계속 흐른다. 두 틱 사이의
/// 벽시계 경과가 단조 경과보다 `gap_threshold` 이상 크면 절전 복귀로 본다.
pub struct SuspendDetector {
    check_interval: Duration,
    gap_threshold: Duration,
    last_wall: DateTime<Utc>,
    last_mono: Instant,
}

impl SuspendDetector {
    pub fn new(config: &LifecycleConfig) -> Self {
        Self::starting_at(config, Utc::now(), Instant::now())
    }

    fn starting_at(config: &LifecycleConfig, wall: DateTime<Utc>, mono: Instant) -> Self {
        Self {
            check_interval: config.suspend_check_interval(),
            gap_threshold: config.suspend_gap_threshold(),
            last_wall: wall,
            last_mono: mono,
        }
    }

    /// 새 틱 관측: 절전이었다면 절전 직전 벽시계 시각을 반환
    pub fn observe(&mut self, wall: DateTime<Utc>, mono: Instant) -> Option<DateTime<Utc>> {
        let wall_elapsed = (wall - self.last_wall).to_std().unwrap_or(Duration::ZERO);
        let mono_elapsed = mono.saturating_duration_since(self.last_mono);
        let suspended_since = self.last_wall;

        self.last_wall = wall;
        self.last_mono = mono;

        let gap = wall_elapsed.saturating_sub(mono_elapsed);
        if gap >= self.gap_threshold {
            Some(suspended_since)
        } else {
            None
        }
    }

    /// 감지 루프: 절전 복귀 시 `BecameInactive` → `BecameActive` 순서로 발행
    pub async fn run(mut self, hub: Arc<LifecycleHub>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.check_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(since) = self.observe(Utc::now(), Instant::now()) {
                        info!("시스템 절전 복귀 감지 (절전 시작: {since})");
                        hub.emit(LifecycleSignal::BecameInactive { at: since });
                        hub.emit(LifecycleSignal::BecameActive);
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!("절전 감지 루프 종료");
                    break;
                }
            }
        }
    }
}
