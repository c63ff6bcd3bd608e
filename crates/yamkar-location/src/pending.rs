//! 실패 업로드 영속 큐.
//!
//! 키-값 저장소의 한 키에 JSON 배열로 보관한다. 읽기-수정-쓰기는
//! 내부 뮤텍스로 직렬화한다. 재시도는 스냅샷을 읽어 전송하고, 전송이 확인된
//! 항목만 나중에 지운다. 재시도 도중 프로세스가 죽어도 큐는 그대로 남는다.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use yamkar_core::error::CoreError;
use yamkar_core::models::location::{PendingQueue, PendingUpload};
use yamkar_core::ports::kv_store::KeyValueStore;

/// 재시도 큐 저장 키
pub const PENDING_UPLOADS_KEY: &str = "location.pending_uploads";

pub struct PendingStore {
    kv: Arc<dyn KeyValueStore>,
    capacity: usize,
    lock: Mutex<()>,
}

impl PendingStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            kv,
            capacity,
            lock: Mutex::new(()),
        }
    }

    /// 저장된 큐 읽기: 손상된 값은 빈 큐로 취급
    async fn read(&self) -> Result<PendingQueue, CoreError> {
        let entries = match self.kv.get(PENDING_UPLOADS_KEY).await? {
            Some(raw) => match serde_json::from_str::<Vec<PendingUpload>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("재시도 큐 파싱 실패, 비움: {e}");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        Ok(PendingQueue::from_entries(self.capacity, entries))
    }

    async fn write(&self, queue: PendingQueue) -> Result<(), CoreError> {
        if queue.is_empty() {
            return self.kv.remove(PENDING_UPLOADS_KEY).await;
        }
        let raw = serde_json::to_string(&queue.into_vec())?;
        self.kv.set(PENDING_UPLOADS_KEY, &raw).await
    }

    /// 현재 큐 스냅샷 (삽입 순서)
    pub async fn load(&self) -> Result<Vec<PendingUpload>, CoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.into_vec())
    }

    pub async fn len(&self) -> Result<usize, CoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.len())
    }

    /// 항목 적재: 용량 초과 시 가장 오래된 항목을 버린다
    pub async fn push(&self, entry: PendingUpload) -> Result<(), CoreError> {
        let _guard = self.lock.lock().await;
        let mut queue = self.read().await?;
        if let Some(evicted) = queue.push(entry) {
            warn!(
                "재시도 큐 용량({}) 초과, 가장 오래된 항목 폐기: {} @ {}",
                queue.capacity(),
                evicted.attendance_log_id,
                evicted.captured_at
            );
        }
        debug!("재시도 큐 적재 (총 {}건)", queue.len());
        self.write(queue).await
    }

    /// 전송이 확인된 항목만 큐에서 지운다.
    ///
    /// 스냅샷 이후 적재된 항목과 실패한 항목은 순서 그대로 남는다.
    /// 남은 건수를 반환한다.
    pub async fn settle(&self, delivered: &[PendingUpload]) -> Result<usize, CoreError> {
        let _guard = self.lock.lock().await;
        let mut remaining = self.read().await?.into_vec();
        let before = remaining.len();
        for entry in delivered {
            if let Some(index) = remaining.iter().position(|e| e == entry) {
                remaining.remove(index);
            }
        }
        if remaining.len() == before {
            return Ok(before);
        }

        let queue = PendingQueue::from_entries(self.capacity, remaining);
        let left = queue.len();
        self.write(queue).await?;
        Ok(left)
    }
}
