//! 영속 키-값 저장소 포트.
//!
//! 구현: `yamkar-storage` crate (rusqlite, 인메모리)

use async_trait::async_trait;

use crate::error::CoreError;

/// 키 단위로 독립적으로 읽고 쓰는 영속 저장소
///
/// 호출자는 실패를 "값 없음"으로 취급할 수 있어야 한다.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 값 조회 (없으면 `None`)
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    /// 값 저장 (덮어쓰기)
    async fn set(&self, key: &str, value: &str) -> Result<(), CoreError>;

    /// 값 삭제 (없어도 성공)
    async fn remove(&self, key: &str) -> Result<(), CoreError>;
}
