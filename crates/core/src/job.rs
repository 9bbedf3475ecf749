//! 任务状态机
//!
//! `Pending → Processing → {Success, Failure}`，终态之后不再变化。
//! 记录保存在注入的 [`JobStore`] 中，状态机本身与存储无关。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;
use veil_rules::AnnotatedDetection;

use crate::RedactionRequest;

/// 任务 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Success,
    Failure,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Success => "success",
            JobState::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// 图像尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// 成功结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub input_path: String,
    pub output_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_id: Option<i64>,
    pub faces_detected: u32,
    pub plates_detected: u32,
    pub total_detections: usize,
    pub detections: Vec<AnnotatedDetection>,
    pub image_size: ImageSize,
}

/// 进度更新时附带的阶段计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub faces: u32,
    pub plates: u32,
}

/// 任务记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    /// 0-100，单调不减
    pub progress: u8,
    pub status: String,
    pub faces: u32,
    pub plates: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn pending(id: JobId, status: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Pending,
            progress: 0,
            status: status.to_string(),
            faces: 0,
            plates: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 未知任务的占位记录（尚未被调度或已过期）
    pub fn awaiting(id: JobId) -> Self {
        Self::pending(id, "任务等待执行")
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("任务 {id} 已结束 ({state})，拒绝更新")]
    Terminal { id: JobId, state: JobState },

    #[error("任务存储错误: {0}")]
    Store(String),
}

/// 任务记录存储
pub trait JobStore: Send + Sync {
    fn put(&self, record: JobRecord) -> Result<(), JobError>;

    fn get(&self, id: &JobId) -> Result<Option<JobRecord>, JobError>;

    /// 已被清理的终态任务的最终状态，默认不记录
    fn tombstone(&self, _id: &JobId) -> Result<Option<JobState>, JobError> {
        Ok(None)
    }
}

#[derive(Debug, Default)]
struct Records {
    live: HashMap<JobId, JobRecord>,
    /// 清理后只保留最终状态，防止迟到的更新复活任务
    purged: HashMap<JobId, JobState>,
}

/// 内存存储，终态记录超过 `ttl` 后可被清理
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Mutex<Records>,
    ttl: Option<chrono::Duration>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: std::time::Duration) -> Self {
        Self {
            records: Mutex::default(),
            ttl: chrono::Duration::from_std(ttl).ok(),
        }
    }

    /// 清理过期的终态记录，返回清理数量
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, JobError> {
        let Some(ttl) = self.ttl else {
            return Ok(0);
        };
        let mut records = self.lock()?;
        let expired: Vec<JobId> = records
            .live
            .values()
            .filter(|r| r.state.is_terminal() && r.updated_at + ttl < now)
            .map(|r| r.id)
            .collect();
        for id in &expired {
            if let Some(record) = records.live.remove(id) {
                records.purged.insert(*id, record.state);
            }
        }
        let purged = expired.len();
        if purged > 0 {
            log::info!("[Job] 清理过期任务 {} 个", purged);
        }
        Ok(purged)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.live.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Records>, JobError> {
        self.records
            .lock()
            .map_err(|e| JobError::Store(format!("获取锁失败: {}", e)))
    }
}

impl JobStore for MemoryJobStore {
    fn put(&self, record: JobRecord) -> Result<(), JobError> {
        self.lock()?.live.insert(record.id, record);
        Ok(())
    }

    fn get(&self, id: &JobId) -> Result<Option<JobRecord>, JobError> {
        Ok(self.lock()?.live.get(id).cloned())
    }

    fn tombstone(&self, id: &JobId) -> Result<Option<JobState>, JobError> {
        Ok(self.lock()?.purged.get(id).copied())
    }
}

/// 任务状态机
///
/// 每个任务只由执行它的流水线修改，读取方通过 [`query`](Self::query) 轮询
#[derive(Clone)]
pub struct JobLedger {
    store: Arc<dyn JobStore>,
}

impl JobLedger {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// 内存存储的状态机
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryJobStore::new()))
    }

    /// 为请求创建 Pending 记录
    pub fn submit(&self, request: &RedactionRequest) -> Result<JobId, JobError> {
        let id = JobId::new();
        self.store.put(JobRecord::pending(id, "任务已提交"))?;
        log::info!("[Job] [{}] 已提交: {}", id, request.image_path.display());
        Ok(id)
    }

    /// 上报进度，首次调用时 Pending → Processing
    ///
    /// 进度小于当前值时保持当前值
    pub fn advance(
        &self,
        id: &JobId,
        progress: u8,
        status: impl Into<String>,
        counts: Option<StageCounts>,
    ) -> Result<JobRecord, JobError> {
        let mut record = self.load_mutable(id)?;
        let progress = progress.min(100);
        if progress < record.progress {
            log::warn!(
                "[Job] [{}] 进度回退 {} -> {}，保持原值",
                id,
                record.progress,
                progress
            );
        }

        record.state = JobState::Processing;
        record.progress = record.progress.max(progress);
        record.status = status.into();
        if let Some(counts) = counts {
            record.faces = counts.faces;
            record.plates = counts.plates;
        }
        record.updated_at = Utc::now();

        log::debug!("[Job] [{}] {}% {}", id, record.progress, record.status);
        self.store.put(record.clone())?;
        Ok(record)
    }

    /// 成功结束
    pub fn complete(&self, id: &JobId, result: JobResult) -> Result<JobRecord, JobError> {
        let mut record = self.load_mutable(id)?;
        record.state = JobState::Success;
        record.progress = 100;
        record.status = "处理完成".to_string();
        record.faces = result.faces_detected;
        record.plates = result.plates_detected;
        record.result = Some(result);
        record.updated_at = Utc::now();

        self.store.put(record.clone())?;
        Ok(record)
    }

    /// 失败结束
    pub fn fail(&self, id: &JobId, error: impl Into<String>) -> Result<JobRecord, JobError> {
        let mut record = self.load_mutable(id)?;
        record.state = JobState::Failure;
        record.status = "处理失败".to_string();
        record.error = Some(error.into());
        record.updated_at = Utc::now();

        self.store.put(record.clone())?;
        Ok(record)
    }

    /// 查询任务快照，未知任务返回等待中的占位记录
    pub fn query(&self, id: &JobId) -> Result<JobRecord, JobError> {
        Ok(self
            .store
            .get(id)?
            .unwrap_or_else(|| JobRecord::awaiting(*id)))
    }

    fn load_mutable(&self, id: &JobId) -> Result<JobRecord, JobError> {
        let record = match self.store.get(id)? {
            Some(record) => record,
            None => match self.store.tombstone(id)? {
                Some(state) => return Err(JobError::Terminal { id: *id, state }),
                None => JobRecord::awaiting(*id),
            },
        };
        if record.state.is_terminal() {
            return Err(JobError::Terminal {
                id: *id,
                state: record.state,
            });
        }
        Ok(record)
    }
}

impl std::fmt::Debug for JobLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLedger").finish_non_exhaustive()
    }
}
