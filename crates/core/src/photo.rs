//! 照片记录存储

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

/// 照片记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: i64,
    pub url: String,
    pub is_processed: bool,
    pub user_id: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhotoStoreError {
    #[error("照片不存在: {0}")]
    NotFound(i64),

    #[error("照片存储错误: {0}")]
    Backend(String),
}

/// 照片持久化接口
pub trait PhotoStore: Send + Sync {
    fn create_record(&self, user_id: i64, url: &str) -> Result<PhotoRecord, PhotoStoreError>;

    fn mark_processed(&self, photo_id: i64) -> Result<(), PhotoStoreError>;

    fn get_record(&self, photo_id: i64) -> Result<Option<PhotoRecord>, PhotoStoreError>;

    /// 尚未处理的照片，按 id 升序，最多 `limit` 条
    fn unprocessed(&self, limit: usize) -> Result<Vec<PhotoRecord>, PhotoStoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    records: BTreeMap<i64, PhotoRecord>,
}

/// 内存实现
#[derive(Debug, Default)]
pub struct MemoryPhotoStore {
    inner: Mutex<Inner>,
}

impl MemoryPhotoStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, PhotoStoreError> {
        self.inner
            .lock()
            .map_err(|e| PhotoStoreError::Backend(format!("获取锁失败: {}", e)))
    }
}

impl PhotoStore for MemoryPhotoStore {
    fn create_record(&self, user_id: i64, url: &str) -> Result<PhotoRecord, PhotoStoreError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let record = PhotoRecord {
            id: inner.next_id,
            url: url.to_string(),
            is_processed: false,
            user_id,
            timestamp: Utc::now(),
        };
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn mark_processed(&self, photo_id: i64) -> Result<(), PhotoStoreError> {
        let mut inner = self.lock()?;
        let record = inner
            .records
            .get_mut(&photo_id)
            .ok_or(PhotoStoreError::NotFound(photo_id))?;
        record.is_processed = true;
        Ok(())
    }

    fn get_record(&self, photo_id: i64) -> Result<Option<PhotoRecord>, PhotoStoreError> {
        Ok(self.lock()?.records.get(&photo_id).cloned())
    }

    fn unprocessed(&self, limit: usize) -> Result<Vec<PhotoRecord>, PhotoStoreError> {
        Ok(self
            .lock()?
            .records
            .values()
            .filter(|r| !r.is_processed)
            .take(limit)
            .cloned()
            .collect())
    }
}
