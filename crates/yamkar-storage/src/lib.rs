//! # yamkar-storage
//!
//! 로컬 키-값 저장소 어댑터.
//! 세션 토큰, 마지막 활성 시각, 위치 추적 상태, 실패 업로드 큐를
//! 키 단위로 영속화한다.
//!
//! ## 모듈
//! - `sqlite`: SQLite 키-값 저장소 (KeyValueStore 구현)
//! - `memory`: 인메모리 키-값 저장소 (테스트, 임시 실행용)
//! - `migration`: 스키마 마이그레이션

pub mod memory;
pub mod migration;
pub mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;
