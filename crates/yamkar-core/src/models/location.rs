//! 위치 추적 모델.
//!
//! 좌표, 위치 샘플, 추적 상태(영속화), 업로드 페이로드, 실패 업로드 재시도 큐.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 지구 평균 반지름 (미터)
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// 위도/경도 좌표
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// 위도 (-90 ~ 90)
    pub latitude: f64,
    /// 경도 (-180 ~ 180)
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// 유한값이며 유효 범위 안인지
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// 두 좌표 사이 거리 (미터, haversine)
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// 플랫폼 위치 샘플
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// 좌표
    pub coordinate: Coordinate,
    /// 수평 정확도 (미터)
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    /// 측정 시각
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinate: Coordinate::new(latitude, longitude),
            accuracy_m: None,
            timestamp,
        }
    }
}

/// 마지막 업로드 성공 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastUpdate {
    pub timestamp: DateTime<Utc>,
    pub coordinate: Coordinate,
}

/// 영속화되는 추적 상태
///
/// 불변식: `enabled == true`이면 `attendance_log_id`가 있어야 한다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingState {
    /// 추적 활성화 여부
    #[serde(default)]
    pub enabled: bool,
    /// 현재 출근 기간의 상관 ID
    #[serde(default)]
    pub attendance_log_id: Option<String>,
    /// 마지막 업로드 성공 스냅샷
    #[serde(default)]
    pub last_update: Option<LastUpdate>,
}

impl TrackingState {
    /// 지정한 출근 기록으로 활성화된 상태
    pub fn enabled_for(attendance_log_id: &str) -> Self {
        Self {
            enabled: true,
            attendance_log_id: Some(attendance_log_id.to_string()),
            last_update: None,
        }
    }

    /// 불변식 위반 상태(활성 + ID 없음)를 비활성으로 교정
    pub fn normalized(mut self) -> Self {
        let has_id = self
            .attendance_log_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty());
        if self.enabled && !has_id {
            self.enabled = false;
            self.attendance_log_id = None;
        }
        self
    }

    /// 추적 재개에 쓸 상관 ID (활성 상태일 때만)
    pub fn resumable_id(&self) -> Option<&str> {
        if self.enabled {
            self.attendance_log_id.as_deref()
        } else {
            None
        }
    }
}

/// 업로드 엔드포인트 JSON 본문
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub attendance_log_id: String,
}

impl LocationPayload {
    pub fn new(coordinate: Coordinate, attendance_log_id: &str) -> Self {
        Self {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            attendance_log_id: attendance_log_id.to_string(),
        }
    }
}

/// 업로드 실패로 보관된 위치 샘플
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUpload {
    pub coordinate: Coordinate,
    pub attendance_log_id: String,
    /// 측정 시각
    pub captured_at: DateTime<Utc>,
    /// 큐 적재 시각
    pub queued_at: DateTime<Utc>,
}

impl PendingUpload {
    pub fn from_position(position: &Position, attendance_log_id: &str) -> Self {
        Self {
            coordinate: position.coordinate,
            attendance_log_id: attendance_log_id.to_string(),
            captured_at: position.timestamp,
            queued_at: Utc::now(),
        }
    }

    pub fn payload(&self) -> LocationPayload {
        LocationPayload::new(self.coordinate, &self.attendance_log_id)
    }
}

/// 용량 제한 FIFO 재시도 큐
///
/// 삽입 순서를 보존하며, 용량을 넘기면 가장 오래된 항목부터 버린다.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingQueue {
    capacity: usize,
    entries: VecDeque<PendingUpload>,
}

impl PendingQueue {
    /// 빈 큐 생성 (용량은 최소 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// 기존 항목으로 큐 구성: 용량 초과분은 앞(오래된 쪽)에서 버린다
    pub fn from_entries(capacity: usize, entries: impl IntoIterator<Item = PendingUpload>) -> Self {
        let mut queue = Self::new(capacity);
        for entry in entries {
            queue.push(entry);
        }
        queue
    }

    /// 항목 추가. 용량 초과로 밀려난 항목이 있으면 반환한다.
    pub fn push(&mut self, entry: PendingUpload) -> Option<PendingUpload> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingUpload> {
        self.entries.iter()
    }

    /// 삽입 순서대로 모든 항목을 꺼낸다
    pub fn into_vec(self) -> Vec<PendingUpload> {
        self.entries.into_iter().collect()
    }
}
