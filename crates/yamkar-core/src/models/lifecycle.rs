//! 라이프사이클 신호 모델.
//!
//! 플랫폼별 포그라운드/백그라운드, 페이지 가시성, 절전 복귀 신호를
//! 하나의 추상 이벤트로 통일한다.

use chrono::{DateTime, Utc};

/// 앱 활성/비활성 전환 신호
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// 포그라운드 복귀 / 화면 표시
    BecameActive,
    /// 백그라운드 진입 / 화면 숨김
    BecameInactive {
        /// 마지막으로 활성이던 시각
        at: DateTime<Utc>,
    },
}

impl LifecycleSignal {
    /// 지금 시각 기준 비활성 신호
    pub fn inactive_now() -> Self {
        LifecycleSignal::BecameInactive { at: Utc::now() }
    }
}
