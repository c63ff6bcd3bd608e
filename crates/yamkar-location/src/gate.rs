//! 샘플 게이트.
//!
//! 플랫폼 감시는 설정보다 자주 샘플을 내보낼 수 있다. 게이트는 감시 단위로
//! 생성되어 마지막으로 통과한 샘플을 기억하고, 다음 중 하나일 때만 통과시킨다.
//!
//! - 감시의 첫 샘플
//! - 마지막 통과 샘플 이후 `interval` 이상 경과
//! - 마지막 통과 샘플에서 `distance_m` 이상 이동

use std::time::Duration;
use yamkar_core::models::location::Position;

pub struct SampleGate {
    interval: Duration,
    distance_m: f64,
    last: Option<Position>,
}

impl SampleGate {
    pub fn new(interval: Duration, distance_m: f64) -> Self {
        Self {
            interval,
            distance_m,
            last: None,
        }
    }

    /// 샘플 통과 여부 판단 (통과하면 기준 샘플 갱신)
    pub fn admit(&mut self, position: &Position) -> bool {
        let admitted = match &self.last {
            None => true,
            Some(last) => {
                // 시각이 거꾸로 가면 경과 0으로 본다
                let elapsed = (position.timestamp - last.timestamp)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let moved = last.coordinate.distance_m(&position.coordinate);
                elapsed >= self.interval || (self.distance_m > 0.0 && moved >= self.distance_m)
            }
        };

        if admitted {
            self.last = Some(position.clone());
        }
        admitted
    }

    /// 기준 샘플 초기화
    pub fn reset(&mut self) {
        self.last = None;
    }
}
