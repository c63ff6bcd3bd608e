//! # yamkar-location
//!
//! 백그라운드 위치 보고 서브시스템.
//!
//! ## 모듈
//! - `reporter`: 추적 시작/중지, 업로드 파이프라인, 재시도 (`LocationReporter`)
//! - `pending`: 실패 업로드 영속 큐 (`PendingStore`)
//! - `gate`: 간격/거리 기반 샘플 필터 (`SampleGate`)
//! - `gpsd`: gpsd JSON 프로토콜 위치 제공자 (`GpsdPositionProvider`)

pub mod gate;
pub mod gpsd;
pub mod pending;
pub mod reporter;

#[cfg(test)]
pub(crate) mod test_support;

pub use gate::SampleGate;
pub use gpsd::GpsdPositionProvider;
pub use pending::PendingStore;
pub use reporter::LocationReporter;
